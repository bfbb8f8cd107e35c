pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod redis_client;
pub mod resilience;
pub mod routes;
pub mod services;
pub mod state;
pub mod stores;
pub mod websocket;
