//! Caller identification stand-in.
//!
//! Identity arrives as an `x-lexlink-user-id` header carrying a UUID. The
//! middleware records it on the [`RequestContext`] and never rejects the
//! request; handlers that require a user decide what a missing identity
//! means for them.

use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use super::request_context::RequestContext;

pub const USER_ID_HEADER: &str = "x-lexlink-user-id";

pub async fn identify_user(mut request: Request<Body>, next: Next) -> Response {
    let user_id = extract_user_id(request.headers());

    if let Some(context) = request.extensions_mut().get_mut::<RequestContext>() {
        context.user_id = user_id;
    } else {
        request.extensions_mut().insert(RequestContext {
            request_id: String::new(),
            user_id,
        });
    }

    next.run(request).await
}

fn extract_user_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_valid_uuid() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        assert_eq!(extract_user_id(&headers), Some(id));
    }

    #[test]
    fn ignores_malformed_uuid() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert_eq!(extract_user_id(&headers), None);
    }

    #[test]
    fn missing_header_is_anonymous() {
        assert_eq!(extract_user_id(&HeaderMap::new()), None);
    }
}
