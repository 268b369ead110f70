use std::sync::Arc;

use application::{CallService, PinService, PresenceRegistry};

use crate::registry::SocketRegistry;

#[derive(Clone)]
pub struct AppState {
    pub presence: Arc<dyn PresenceRegistry>,
    pub pin_service: Arc<PinService>,
    pub call_service: Arc<CallService>,
    pub registry: Arc<SocketRegistry>,
}

impl AppState {
    pub fn new(
        presence: Arc<dyn PresenceRegistry>,
        pin_service: Arc<PinService>,
        call_service: Arc<CallService>,
        registry: Arc<SocketRegistry>,
    ) -> Self {
        Self {
            presence,
            pin_service,
            call_service,
            registry,
        }
    }
}
