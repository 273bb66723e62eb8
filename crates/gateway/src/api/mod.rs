pub mod admin;
pub mod auth;
pub mod chat;
pub mod chats;
pub mod error;
pub mod guard;
pub mod health;
pub mod sessions;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **session** routes, reachable with a CRM session
/// id alone (an account token is optional), and **account** routes, which
/// enforce a platform login through the [`guard`] extractors.
pub fn router() -> Router<AppState> {
    let session_routes = Router::new()
        .route("/health", get(health::health))
        // CRM session lifecycle
        .route("/v1/sessions/init", post(sessions::init_session))
        .route("/v1/sessions/clear", post(sessions::clear_session))
        .route("/v1/sessions/:id/history", get(sessions::get_history))
        .route("/v1/sessions/:id/status", get(sessions::session_status))
        // Chat
        .route("/v1/chat", post(chat::chat))
        // Saved chats
        .route("/v1/chats", get(chats::list_chats).post(chats::save_chat))
        .route(
            "/v1/chats/:id",
            get(chats::get_chat).delete(chats::delete_chat),
        );

    let account_routes = Router::new()
        // Platform login
        .route("/v1/auth/login", post(auth::login))
        .route("/v1/auth/session", get(auth::current_session))
        .route("/v1/auth/logout", post(auth::logout))
        .route("/v1/auth/password", post(auth::change_password))
        .route(
            "/v1/auth/crm-credentials",
            get(auth::get_crm_credentials).put(auth::put_crm_credentials),
        )
        // Admin
        .route("/v1/admin/login", post(admin::admin_login))
        .route("/v1/admin/stats", get(admin::stats))
        .route(
            "/v1/admin/accounts",
            get(admin::list_accounts).post(admin::create_account),
        )
        .route(
            "/v1/admin/accounts/:id/activate",
            post(admin::activate_account),
        )
        .route(
            "/v1/admin/accounts/:id/deactivate",
            post(admin::deactivate_account),
        );

    session_routes.merge(account_routes)
}
