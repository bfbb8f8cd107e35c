use crate::{
    config::Config,
    services::{AutoRecordOrchestrator, MediaProvider, RecordingAdmission, WebhookDispatcher, WebhookVerifier},
    websocket::Hub,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Hub,
    pub orchestrator: Arc<AutoRecordOrchestrator>,
    pub admission: Arc<RecordingAdmission>,
    pub provider: Arc<dyn MediaProvider>,
    pub webhooks: Arc<WebhookDispatcher>,
    /// Present when webhook signature verification is enabled.
    pub webhook_verifier: Option<Arc<WebhookVerifier>>,
}
