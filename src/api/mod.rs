//! HTTP API: REST endpoints under `/api/ssh`, each a thin wrapper over
//! commands run on the gateway host.

pub mod activity;
pub mod agents;
pub mod bindings;
pub mod chat;
pub mod costs;
pub mod cron;
pub mod extract;
pub mod gateway;
pub mod gateway_config;
pub mod health;
pub mod logs;
pub mod models;
mod routes;
pub mod sessions;
pub mod skills;
mod state;
pub mod terminal;
pub mod workspace;

pub use routes::create_router;
pub use state::AppState;
