use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, patch, post},
};

/// Routes whose handlers enforce admin-equivalence through the policy
/// engine: catalog writes and the user-administration surface. The auth
/// middleware above this router rejects anonymous callers first, so denial
/// here is always a 403, never a 401.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // Taxonomy writes; no update verb exists for these.
        .route("/categories", post(handlers::create_category))
        .route("/categories/{slug}", delete(handlers::delete_category))
        .route("/genres", post(handlers::create_genre))
        .route("/genres/{slug}", delete(handlers::delete_genre))
        // Title writes.
        .route("/titles", post(handlers::create_title))
        .route(
            "/titles/{id}",
            patch(handlers::update_title).delete(handlers::delete_title),
        )
        // User administration, keyed by username.
        .route("/users", get(handlers::list_users).post(handlers::create_user))
        .route(
            "/users/{username}",
            get(handlers::get_user_detail)
                .patch(handlers::update_user_detail)
                .delete(handlers::delete_user_detail),
        )
}
