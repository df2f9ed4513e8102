//! API route definitions.

use axum::http::{header, HeaderValue, Method};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

use super::state::AppState;
use super::{
    activity, agents, bindings, chat, costs, cron, gateway, gateway_config, health, logs, models,
    sessions, skills, terminal, workspace,
};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.settings.cors_origins);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let api = Router::new()
        // Gateway
        .route("/status", get(gateway::status))
        .route("/ping", get(gateway::ping))
        .route("/gateway/restart", post(gateway::restart))
        .route("/doctor", post(gateway::doctor))
        // Config editor and local snapshots
        .route(
            "/config",
            get(gateway_config::get_config).post(gateway_config::update_config),
        )
        .route("/config/history", get(gateway_config::list_history))
        .route("/config/rollback", post(gateway_config::rollback))
        // Agents and routing
        .route(
            "/agents",
            get(agents::list_agents)
                .post(agents::save_agent)
                .delete(agents::delete_agent),
        )
        .route(
            "/bindings",
            get(bindings::list_bindings).post(bindings::assign),
        )
        .route("/chat/agents", get(agents::chat_agents))
        .route("/chat/send", post(chat::send))
        // Scheduling and spend
        .route("/cron", get(cron::list_jobs).post(cron::cron_action))
        .route("/costs", get(costs::get_costs))
        // Transcripts and logs
        .route(
            "/sessions",
            get(sessions::list_sessions).delete(sessions::delete_session),
        )
        .route("/logs", get(logs::get_logs))
        .route("/logs/stream", get(logs::stream_logs))
        .route("/activity", get(activity::get_activity))
        .route("/health", get(health::get_health))
        .route("/models", get(models::get_models))
        // Knowledge and skills
        .route(
            "/workspace",
            get(workspace::get_workspace).post(workspace::save_workspace_file),
        )
        .route("/skills", get(skills::list_skills))
        .route("/skills/meta", get(skills::skill_meta))
        .route("/skills/install", post(skills::install_skill))
        .route("/skills/uninstall", post(skills::uninstall_skill))
        .route("/terminal", post(terminal::run_command));

    let mut router = Router::new().nest("/api/ssh", api);

    if let Some(dir) = state.settings.static_dir.clone() {
        info!(dir = %dir.display(), "serving static frontend");
        let index = ServeFile::new(dir.join("index.html"));
        router = router.fallback_service(ServeDir::new(dir).fallback(index));
    }

    router.layer(cors).layer(trace_layer).with_state(state)
}

fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::new();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                warn!("CORS: Invalid origin in config: {}", origin);
                None
            })
        })
        .collect();

    if origins.is_empty() {
        warn!("CORS: All configured origins are invalid");
        return CorsLayer::new();
    }

    info!("CORS: Allowing {} origin(s)", origins.len());
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN])
}
