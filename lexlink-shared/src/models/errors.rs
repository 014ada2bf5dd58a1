use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Generic error body returned by non-streaming endpoints.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
    pub details: Option<String>,
}
