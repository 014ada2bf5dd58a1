use std::sync::Arc;

use shared::config::Config;

use crate::services::{relay::StreamRelay, store::ConversationStore};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ConversationStore>,
    pub relay: Arc<StreamRelay>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn ConversationStore>, relay: StreamRelay) -> Self {
        Self {
            config: Arc::new(config),
            store,
            relay: Arc::new(relay),
        }
    }
}
