use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, patch, post},
};

/// Routes for any authenticated user. The auth middleware layered above this
/// router guarantees a resolved identity; ownership and moderator overrides
/// are decided per request by the review/comment policy.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // Review mutations under a title.
        .route("/titles/{title_id}/reviews", post(handlers::create_review))
        .route(
            "/titles/{title_id}/reviews/{review_id}",
            patch(handlers::update_review).delete(handlers::delete_review),
        )
        // Comment mutations under a review.
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments",
            post(handlers::create_comment),
        )
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
            patch(handlers::update_comment).delete(handlers::delete_comment),
        )
        // Self-service profile. Registered before /users/{username} resolves;
        // the static segment wins over the capture.
        .route("/users/me", get(handlers::get_me).patch(handlers::update_me))
}
