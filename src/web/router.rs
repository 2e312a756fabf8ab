//! Axum router construction.

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::web::config::AVATAR_BODY_LIMIT;
use crate::web::handlers;
use crate::web::state::SharedState;

/// Build the complete Axum router with all API routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        // Health
        .route("/api/health", get(handlers::health::health_handler))
        // Auth API
        .route("/api/auth/signup", post(handlers::auth::sign_up_handler))
        .route("/api/auth/signin", post(handlers::auth::sign_in_handler))
        .route("/api/auth/signout", post(handlers::auth::sign_out_handler))
        .route("/api/auth/me", get(handlers::auth::current_user_handler))
        // Profiles API
        .route(
            "/api/profile",
            get(handlers::profiles::get_own_profile_handler)
                .put(handlers::profiles::update_own_profile_handler)
                .delete(handlers::profiles::delete_account_handler),
        )
        .route(
            "/api/profile/avatar",
            put(handlers::profiles::upload_avatar_handler)
                .delete(handlers::profiles::delete_avatar_handler)
                .layer(DefaultBodyLimit::max(AVATAR_BODY_LIMIT)),
        )
        .route(
            "/api/profiles/search",
            get(handlers::profiles::search_profiles_handler),
        )
        .route(
            "/api/profiles/:username",
            get(handlers::profiles::get_profile_by_username_handler),
        )
        .route(
            "/avatars/:file_name",
            get(handlers::profiles::serve_avatar_handler),
        )
        // Relationships API
        .route(
            "/api/relationships",
            get(handlers::relationships::list_relationships_handler)
                .post(handlers::relationships::request_connection_handler),
        )
        .route(
            "/api/relationships/pending-count",
            get(handlers::relationships::pending_count_handler),
        )
        .route(
            "/api/relationships/:id",
            delete(handlers::relationships::remove_handler),
        )
        .route(
            "/api/relationships/:id/accept",
            post(handlers::relationships::accept_handler),
        )
        .route(
            "/api/relationships/:id/reject",
            post(handlers::relationships::reject_handler),
        )
        // Lists API
        .route(
            "/api/lists",
            get(handlers::resources::list_lists_handler)
                .post(handlers::resources::create_list_handler),
        )
        .route(
            "/api/lists/:id",
            get(handlers::resources::get_list_handler)
                .put(handlers::resources::update_list_handler)
                .delete(handlers::resources::delete_list_handler),
        )
        .route(
            "/api/lists/:id/pin",
            post(handlers::resources::pin_list_handler),
        )
        .route(
            "/api/lists/:id/archive",
            post(handlers::resources::archive_list_handler),
        )
        .route(
            "/api/lists/:id/leave",
            post(handlers::resources::leave_list_handler),
        )
        .route(
            "/api/lists/:id/tasks",
            get(handlers::tasks::list_tasks_handler).post(handlers::tasks::add_task_handler),
        )
        .route(
            "/api/lists/:id/shares",
            get(handlers::shares::list_list_shares_handler)
                .post(handlers::shares::share_list_handler),
        )
        .route(
            "/api/list-shares/:grant_id",
            put(handlers::shares::update_list_share_handler)
                .delete(handlers::shares::revoke_list_share_handler),
        )
        // Tasks API
        .route(
            "/api/tasks/:id",
            put(handlers::tasks::update_task_handler).delete(handlers::tasks::delete_task_handler),
        )
        .route(
            "/api/tasks/:id/complete",
            post(handlers::tasks::complete_task_handler),
        )
        // Notes API
        .route(
            "/api/notes",
            get(handlers::resources::list_notes_handler)
                .post(handlers::resources::create_note_handler),
        )
        .route(
            "/api/notes/:id",
            get(handlers::resources::get_note_handler)
                .put(handlers::resources::update_note_handler)
                .delete(handlers::resources::delete_note_handler),
        )
        .route(
            "/api/notes/:id/pin",
            post(handlers::resources::pin_note_handler),
        )
        .route(
            "/api/notes/:id/archive",
            post(handlers::resources::archive_note_handler),
        )
        .route(
            "/api/notes/:id/leave",
            post(handlers::resources::leave_note_handler),
        )
        .route(
            "/api/notes/:id/shares",
            get(handlers::shares::list_note_shares_handler)
                .post(handlers::shares::share_note_handler),
        )
        .route(
            "/api/note-shares/:grant_id",
            put(handlers::shares::update_note_share_handler)
                .delete(handlers::shares::revoke_note_share_handler),
        )
        // Dashboard
        .route(
            "/api/dashboard",
            get(handlers::dashboard::dashboard_handler),
        )
        // WebSocket
        .route("/api/ws", get(handlers::websocket::ws_handler))
        .with_state(state)
}
