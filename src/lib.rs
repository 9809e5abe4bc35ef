pub mod auth;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod outbox;
pub mod phone;
pub mod provider;
pub mod rate_limit;
pub mod reminder;
pub mod signature;
pub mod state;
pub mod templates;
pub mod types;
pub mod worker;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::handlers::{
    admin::{
        get_message_handler, list_attempts_handler, list_messages_handler, replay_message_handler,
    },
    contact::contact_handler,
    webhook::appointment_webhook_handler,
};
use crate::state::AppState;

/// Full HTTP surface: public webhook and contact routes plus the
/// bearer-guarded admin routes.
pub fn api_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/admin/messages", get(list_messages_handler))
        .route("/admin/messages/:message_id", get(get_message_handler))
        .route(
            "/admin/messages/:message_id/attempts",
            get(list_attempts_handler),
        )
        .route(
            "/admin/messages/:message_id/replay",
            post(replay_message_handler),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::admin_auth));

    Router::new()
        .route("/webhook/appointment", post(appointment_webhook_handler))
        .route("/api/contact", post(contact_handler))
        .merge(admin_routes)
        .with_state(state)
}
