//! Shared server state.

use std::sync::Arc;

use hearth_devices::Controller;

/// Maximum request body size.
pub const MAX_REQUEST_BODY_SIZE: usize = 64 * 1024;

#[derive(Clone)]
pub struct ServerState {
    pub controller: Arc<Controller>,
    /// Unix timestamp of server start.
    pub started_at: i64,
}

impl ServerState {
    pub fn new(controller: Arc<Controller>) -> Self {
        Self {
            controller,
            started_at: chrono::Utc::now().timestamp(),
        }
    }
}
