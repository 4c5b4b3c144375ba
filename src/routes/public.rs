use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Unauthenticated surface: the confirmation-code flow and all read-only
/// catalog access. Mutating verbs on these paths live in the other tiers.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // Liveness probe for monitors and load balancers.
        .route("/health", get(|| async { "ok" }))
        // Confirmation-code flow.
        .route("/auth/signup", post(handlers::signup))
        .route("/auth/token", post(handlers::obtain_token))
        // Catalog reads.
        .route("/categories", get(handlers::list_categories))
        .route("/genres", get(handlers::list_genres))
        .route("/titles", get(handlers::list_titles))
        .route("/titles/{id}", get(handlers::get_title))
        // Reviews and comments, scoped under their parents.
        .route("/titles/{title_id}/reviews", get(handlers::list_reviews))
        .route(
            "/titles/{title_id}/reviews/{review_id}",
            get(handlers::get_review),
        )
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments",
            get(handlers::list_comments),
        )
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
            get(handlers::get_comment),
        )
}
