use actix_web::{web, App, HttpServer};
use realtime_gateway_service::{
    config, db, error, logging,
    redis_client::RedisClient,
    routes,
    services::{
        AutoRecordOrchestrator, LiveKitClient, MediaProvider, RecordingAdmission, UnconfiguredProvider,
        WebhookDispatcher, WebhookVerifier,
    },
    state::AppState,
    stores::{MemoryStores, PgStores, Stores},
    websocket::{EventBus, Hub, SessionStore},
};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let stores = match &cfg.database_url {
        Some(url) => {
            let pool = db::init_pool(url, cfg.database_max_connections)
                .await
                .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
            Stores::shared(Arc::new(PgStores::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            Stores::shared(Arc::new(MemoryStores::new()))
        }
    };

    let redis = match RedisClient::connect(&cfg.redis_url, cfg.redis_connect_timeout).await {
        Ok(client) => Some(client),
        Err(e) => {
            tracing::warn!(error = %e, "redis unavailable, sessions kept in memory and event bus disabled");
            None
        }
    };
    let sessions = match &redis {
        Some(client) => SessionStore::redis(client.clone(), cfg.session.ttl),
        None => SessionStore::memory(cfg.session.ttl),
    };
    let bus = EventBus::connect(redis, &cfg.event_bus_channel, &cfg.instance_id).await;

    let provider: Arc<dyn MediaProvider> = match &cfg.livekit {
        Some(livekit) => Arc::new(LiveKitClient::new(livekit, cfg.downstream_timeout)?),
        None => Arc::new(UnconfiguredProvider),
    };

    let hub = Hub::new(sessions, bus.clone());
    hub.start_session_sweep(cfg.session.sweep_interval).await;

    let admission = Arc::new(RecordingAdmission::new(
        provider.clone(),
        stores.recordings.clone(),
        stores.rooms.clone(),
        cfg.recording.egress_limit,
        cfg.recording.record_path.clone(),
        cfg.downstream_timeout,
    ));
    let orchestrator = Arc::new(AutoRecordOrchestrator::new(
        stores,
        admission.clone(),
        hub.clone(),
        cfg.recording.clone(),
        cfg.downstream_timeout,
    ));
    let webhooks = Arc::new(WebhookDispatcher::spawn(
        orchestrator.clone(),
        cfg.webhook.workers,
        cfg.webhook.queue_capacity,
    ));
    let webhook_verifier = match (&cfg.livekit, cfg.webhook.verify_signature) {
        (Some(livekit), true) => Some(Arc::new(WebhookVerifier::new(livekit))),
        _ => {
            tracing::warn!("webhook signature verification disabled");
            None
        }
    };

    let state = AppState {
        config: cfg.clone(),
        hub: hub.clone(),
        orchestrator: orchestrator.clone(),
        admission,
        provider,
        webhooks: webhooks.clone(),
        webhook_verifier,
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, instance_id = %cfg.instance_id, "starting realtime-gateway-service");

    let result = HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("server: {e}")));

    tracing::info!("shutting down");
    webhooks.shutdown().await;
    hub.stop().await;
    bus.stop().await;
    orchestrator.cleanup();

    result
}
