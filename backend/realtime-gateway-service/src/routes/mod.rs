pub mod health;
pub mod recordings;
pub mod token;
pub mod webhook;
pub mod wsroute;

use actix_web::web;

/// Registers every HTTP and WebSocket route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(webhook::receive_webhook)
        .service(wsroute::ws_handler)
        .service(recordings::check_availability)
        .service(recordings::start_recording)
        .service(recordings::stop_recording)
        .service(recordings::stop_all)
        .service(recordings::list_recordings)
        .service(token::issue_token)
        .service(health::health)
        .service(health::metrics_endpoint)
        .service(health::room_sessions);
}
