use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    AppState,
    auth::{AuthUser, issue_token},
    error::{ApiError, FieldErrors},
    mailer::MailerState,
    models::{
        Category, Comment, CommentCreateRequest, CommentUpdateRequest, CreateUserRequest, Genre,
        NewTitle, Page, PageParams, Review, ReviewCreateRequest, ReviewUpdateRequest,
        SignupRequest, TaxonomyPayload, Title, TitleCreateRequest, TitleFilter, TitlePatch,
        TitleUpdateRequest, TokenRequest, TokenResponse, UpdateUserRequest, User,
    },
    policy::{
        Action, CATEGORY_ACCESS, COMMENT_ACCESS, GENRE_ACCESS, REVIEW_ACCESS, TITLE_ACCESS,
        USER_ADMIN_ACCESS, authorize,
    },
    repository::RepositoryState,
};
use serde::Deserialize;

// --- Query parameter structs ---

/// Pagination-only query parameters.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl PageQuery {
    fn params(&self) -> PageParams {
        PageParams::from_query(self.page, self.page_size)
    }
}

/// Search + pagination for category/genre/user listings.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct SearchQuery {
    /// Case-insensitive substring match on the searchable field.
    pub search: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl SearchQuery {
    fn params(&self) -> PageParams {
        PageParams::from_query(self.page, self.page_size)
    }
}

/// Title listing filters plus pagination.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct TitleListQuery {
    /// Category slug.
    pub category: Option<String>,
    /// Genre slug.
    pub genre: Option<String>,
    /// Substring match on the title name.
    pub name: Option<String>,
    pub year: Option<i32>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

// --- Auth flow ---

const CONFIRMATION_SUBJECT: &str = "YaMDb registration";

/// signup
///
/// [Public] Requests a confirmation code for a (username, email) pair. The
/// user record is created inactive on first contact; repeated calls simply
/// rotate the code. Delivery is best-effort; a gateway failure is logged and
/// the request still succeeds.
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 200, description = "Code issued and mailed", body = SignupRequest),
        (status = 400, description = "Validation error or identity conflict")
    )
)]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<Json<SignupRequest>, ApiError> {
    payload.validate()?;
    let user = state
        .repo
        .find_or_create_signup(&payload.username, &payload.email)
        .await?;

    let code = Uuid::new_v4().simple().to_string();
    state.repo.set_confirmation_code(user.id, &code).await?;
    deliver_code(&state.mailer, &user.email, &code).await;

    Ok(Json(payload))
}

async fn deliver_code(mailer: &MailerState, email: &str, code: &str) {
    let body = format!("Confirmation code: {code}");
    if let Err(e) = mailer.send(email, CONFIRMATION_SUBJECT, &body).await {
        tracing::warn!("confirmation mail to {email} failed: {e}");
    }
}

/// obtain_token
///
/// [Public] Exchanges a confirmation code for a signed bearer token and
/// activates the account. A wrong code and an unknown username produce the
/// same response, so the endpoint never reveals whether a username exists.
#[utoipa::path(
    post,
    path = "/auth/token",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Invalid confirmation code")
    )
)]
pub async fn obtain_token(
    State(state): State<AppState>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    payload.validate()?;
    let invalid = || ApiError::validation("confirmation_code", "Invalid confirmation code.");

    let user = state
        .repo
        .get_user_by_username(&payload.username)
        .await
        .ok_or_else(invalid)?;

    if user.confirmation_code != payload.confirmation_code {
        return Err(invalid());
    }

    state.repo.activate_user(user.id).await?;
    let token = issue_token(user.id, &state.config.jwt_secret)?;
    Ok(Json(TokenResponse { token }))
}

// --- Categories ---

/// [Public] Lists categories ordered by name, searchable by name.
#[utoipa::path(
    get,
    path = "/categories",
    params(SearchQuery),
    responses((status = 200, description = "Paginated categories"))
)]
pub async fn list_categories(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Page<Category>>, ApiError> {
    authorize(CATEGORY_ACCESS, None, Action::List, None)?;
    let page = state.repo.list_categories(query.search.clone(), query.params()).await?;
    Ok(Json(page))
}

/// [Admin] Creates a category.
#[utoipa::path(
    post,
    path = "/categories",
    request_body = TaxonomyPayload,
    responses(
        (status = 201, description = "Created", body = Category),
        (status = 400, description = "Validation error")
    )
)]
pub async fn create_category(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<TaxonomyPayload>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    authorize(CATEGORY_ACCESS, Some(&user), Action::Create, None)?;
    payload.validate()?;
    let category = state.repo.create_category(&payload.name, &payload.slug).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// [Admin] Deletes a category by slug; its titles drop to no category.
#[utoipa::path(
    delete,
    path = "/categories/{slug}",
    params(("slug" = String, Path, description = "Category slug")),
    responses((status = 204, description = "Deleted"), (status = 404, description = "Not found"))
)]
pub async fn delete_category(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    authorize(CATEGORY_ACCESS, Some(&user), Action::Delete, None)?;
    if state.repo.delete_category(&slug).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Category"))
    }
}

// --- Genres ---

/// [Public] Lists genres ordered by name, searchable by name.
#[utoipa::path(
    get,
    path = "/genres",
    params(SearchQuery),
    responses((status = 200, description = "Paginated genres"))
)]
pub async fn list_genres(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Page<Genre>>, ApiError> {
    authorize(GENRE_ACCESS, None, Action::List, None)?;
    let page = state.repo.list_genres(query.search.clone(), query.params()).await?;
    Ok(Json(page))
}

/// [Admin] Creates a genre.
#[utoipa::path(
    post,
    path = "/genres",
    request_body = TaxonomyPayload,
    responses(
        (status = 201, description = "Created", body = Genre),
        (status = 400, description = "Validation error")
    )
)]
pub async fn create_genre(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<TaxonomyPayload>,
) -> Result<(StatusCode, Json<Genre>), ApiError> {
    authorize(GENRE_ACCESS, Some(&user), Action::Create, None)?;
    payload.validate()?;
    let genre = state.repo.create_genre(&payload.name, &payload.slug).await?;
    Ok((StatusCode::CREATED, Json(genre)))
}

/// [Admin] Deletes a genre by slug.
#[utoipa::path(
    delete,
    path = "/genres/{slug}",
    params(("slug" = String, Path, description = "Genre slug")),
    responses((status = 204, description = "Deleted"), (status = 404, description = "Not found"))
)]
pub async fn delete_genre(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    authorize(GENRE_ACCESS, Some(&user), Action::Delete, None)?;
    if state.repo.delete_genre(&slug).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Genre"))
    }
}

// --- Titles ---

/// [Public] Lists titles newest-first with filters (category/genre slug,
/// name substring, year) and the aggregated rating on every row.
#[utoipa::path(
    get,
    path = "/titles",
    params(TitleListQuery),
    responses((status = 200, description = "Paginated titles"))
)]
pub async fn list_titles(
    State(state): State<AppState>,
    Query(query): Query<TitleListQuery>,
) -> Result<Json<Page<Title>>, ApiError> {
    authorize(TITLE_ACCESS, None, Action::List, None)?;
    let filter = TitleFilter {
        category: query.category,
        genre: query.genre,
        name: query.name,
        year: query.year,
    };
    let params = PageParams::from_query(query.page, query.page_size);
    let page = state.repo.list_titles(filter, params).await?;
    Ok(Json(page))
}

/// [Public] Retrieves one title with nested category/genres and rating.
#[utoipa::path(
    get,
    path = "/titles/{id}",
    params(("id" = i64, Path, description = "Title id")),
    responses((status = 200, description = "Found", body = Title), (status = 404, description = "Not found"))
)]
pub async fn get_title(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Title>, ApiError> {
    authorize(TITLE_ACCESS, None, Action::Retrieve, None)?;
    let title = state.repo.get_title(id).await.ok_or(ApiError::NotFound("Title"))?;
    Ok(Json(title))
}

/// create_title
///
/// [Admin] Creates a title. Genre and category arrive as slugs; every slug
/// must already exist in the catalog or the write fails with a field-keyed
/// 400. The response is the nested read representation.
#[utoipa::path(
    post,
    path = "/titles",
    request_body = TitleCreateRequest,
    responses(
        (status = 201, description = "Created", body = Title),
        (status = 400, description = "Validation error")
    )
)]
pub async fn create_title(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<TitleCreateRequest>,
) -> Result<(StatusCode, Json<Title>), ApiError> {
    authorize(TITLE_ACCESS, Some(&user), Action::Create, None)?;
    payload.validate()?;

    let category_id = match &payload.category {
        Some(slug) => Some(resolve_category(&state.repo, slug).await?),
        None => None,
    };
    let genre_ids = resolve_genres(&state.repo, &payload.genre).await?;

    let title = state
        .repo
        .create_title(NewTitle {
            name: payload.name,
            year: payload.year,
            description: payload.description,
            category_id,
            genre_ids,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(title)))
}

/// [Admin] Partially updates a title; a provided genre list replaces the set.
#[utoipa::path(
    patch,
    path = "/titles/{id}",
    params(("id" = i64, Path, description = "Title id")),
    request_body = TitleUpdateRequest,
    responses((status = 200, description = "Updated", body = Title), (status = 404, description = "Not found"))
)]
pub async fn update_title(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<TitleUpdateRequest>,
) -> Result<Json<Title>, ApiError> {
    authorize(TITLE_ACCESS, Some(&user), Action::Update, None)?;
    payload.validate()?;

    let category_id = match &payload.category {
        Some(slug) => Some(resolve_category(&state.repo, slug).await?),
        None => None,
    };
    let genre_ids = match &payload.genre {
        Some(slugs) => Some(resolve_genres(&state.repo, slugs).await?),
        None => None,
    };

    let patch = TitlePatch {
        name: payload.name,
        year: payload.year,
        description: payload.description,
        category_id,
        genre_ids,
    };
    let title = state
        .repo
        .update_title(id, patch)
        .await?
        .ok_or(ApiError::NotFound("Title"))?;
    Ok(Json(title))
}

/// [Admin] Deletes a title; reviews and their comments cascade away.
#[utoipa::path(
    delete,
    path = "/titles/{id}",
    params(("id" = i64, Path, description = "Title id")),
    responses((status = 204, description = "Deleted"), (status = 404, description = "Not found"))
)]
pub async fn delete_title(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    authorize(TITLE_ACCESS, Some(&user), Action::Delete, None)?;
    if state.repo.delete_title(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Title"))
    }
}

/// Resolves a category slug to its id, or a field-keyed validation error.
async fn resolve_category(repo: &RepositoryState, slug: &str) -> Result<i64, ApiError> {
    repo.get_category_by_slug(slug)
        .await
        .map(|c| c.id)
        .ok_or_else(|| {
            ApiError::validation("category", format!("Category with slug \"{slug}\" does not exist."))
        })
}

/// Resolves genre slugs to ids, collecting one error per missing slug.
async fn resolve_genres(repo: &RepositoryState, slugs: &[String]) -> Result<Vec<i64>, ApiError> {
    let mut ids = Vec::with_capacity(slugs.len());
    let mut errors = FieldErrors::new();
    for slug in slugs {
        match repo.get_genre_by_slug(slug).await {
            Some(genre) => ids.push(genre.id),
            None => errors.push("genre", format!("Genre with slug \"{slug}\" does not exist.")),
        }
    }
    errors.into_result()?;
    Ok(ids)
}

// --- Reviews ---

/// [Public] Lists a title's reviews, oldest first.
#[utoipa::path(
    get,
    path = "/titles/{title_id}/reviews",
    params(("title_id" = i64, Path, description = "Title id"), PageQuery),
    responses((status = 200, description = "Paginated reviews"), (status = 404, description = "Title not found"))
)]
pub async fn list_reviews(
    State(state): State<AppState>,
    Path(title_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Review>>, ApiError> {
    authorize(REVIEW_ACCESS, None, Action::List, None)?;
    let title = state.repo.get_title(title_id).await.ok_or(ApiError::NotFound("Title"))?;
    let page = state.repo.list_reviews(title.id, query.params()).await?;
    Ok(Json(page))
}

/// [Public] Retrieves one review scoped under its title.
#[utoipa::path(
    get,
    path = "/titles/{title_id}/reviews/{review_id}",
    params(
        ("title_id" = i64, Path, description = "Title id"),
        ("review_id" = i64, Path, description = "Review id")
    ),
    responses((status = 200, description = "Found", body = Review), (status = 404, description = "Not found"))
)]
pub async fn get_review(
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(i64, i64)>,
) -> Result<Json<Review>, ApiError> {
    authorize(REVIEW_ACCESS, None, Action::Retrieve, None)?;
    let review = state
        .repo
        .get_review(title_id, review_id)
        .await
        .ok_or(ApiError::NotFound("Review"))?;
    Ok(Json(review))
}

/// create_review
///
/// [Authenticated] Posts a review on a title. The duplicate check runs here
/// as a validation step so a second review by the same author comes back as
/// a clean 400; the storage unique constraint stays underneath as the race
/// safety net.
#[utoipa::path(
    post,
    path = "/titles/{title_id}/reviews",
    params(("title_id" = i64, Path, description = "Title id")),
    request_body = ReviewCreateRequest,
    responses(
        (status = 201, description = "Created", body = Review),
        (status = 400, description = "Validation error or duplicate review"),
        (status = 404, description = "Title not found")
    )
)]
pub async fn create_review(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(title_id): Path<i64>,
    Json(payload): Json<ReviewCreateRequest>,
) -> Result<(StatusCode, Json<Review>), ApiError> {
    authorize(REVIEW_ACCESS, Some(&user), Action::Create, None)?;
    payload.validate()?;
    let title = state.repo.get_title(title_id).await.ok_or(ApiError::NotFound("Title"))?;

    if state.repo.review_exists(title.id, user.id).await {
        return Err(ApiError::validation(
            "non_field_errors",
            "You have already reviewed this title.",
        ));
    }

    let review = state
        .repo
        .create_review(title.id, user.id, &payload.text, payload.score)
        .await?;
    Ok((StatusCode::CREATED, Json(review)))
}

/// [Author/moderator/admin] Partially updates a review. No duplicate
/// re-check on update.
#[utoipa::path(
    patch,
    path = "/titles/{title_id}/reviews/{review_id}",
    params(
        ("title_id" = i64, Path, description = "Title id"),
        ("review_id" = i64, Path, description = "Review id")
    ),
    request_body = ReviewUpdateRequest,
    responses((status = 200, description = "Updated", body = Review), (status = 404, description = "Not found"))
)]
pub async fn update_review(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(i64, i64)>,
    Json(payload): Json<ReviewUpdateRequest>,
) -> Result<Json<Review>, ApiError> {
    payload.validate()?;
    let review = state
        .repo
        .get_review(title_id, review_id)
        .await
        .ok_or(ApiError::NotFound("Review"))?;
    authorize(REVIEW_ACCESS, Some(&user), Action::Update, Some(review.author_id))?;

    let updated = state
        .repo
        .update_review(review.id, payload.text, payload.score)
        .await?
        .ok_or(ApiError::NotFound("Review"))?;
    Ok(Json(updated))
}

/// [Author/moderator/admin] Deletes a review; its comments cascade away.
#[utoipa::path(
    delete,
    path = "/titles/{title_id}/reviews/{review_id}",
    params(
        ("title_id" = i64, Path, description = "Title id"),
        ("review_id" = i64, Path, description = "Review id")
    ),
    responses((status = 204, description = "Deleted"), (status = 404, description = "Not found"))
)]
pub async fn delete_review(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    let review = state
        .repo
        .get_review(title_id, review_id)
        .await
        .ok_or(ApiError::NotFound("Review"))?;
    authorize(REVIEW_ACCESS, Some(&user), Action::Delete, Some(review.author_id))?;

    if state.repo.delete_review(review.id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Review"))
    }
}

// --- Comments ---

/// [Public] Lists a review's comments, oldest first. The review is resolved
/// by both its own id and the title id from the path.
#[utoipa::path(
    get,
    path = "/titles/{title_id}/reviews/{review_id}/comments",
    params(
        ("title_id" = i64, Path, description = "Title id"),
        ("review_id" = i64, Path, description = "Review id"),
        PageQuery
    ),
    responses((status = 200, description = "Paginated comments"), (status = 404, description = "Review not found"))
)]
pub async fn list_comments(
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(i64, i64)>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Comment>>, ApiError> {
    authorize(COMMENT_ACCESS, None, Action::List, None)?;
    let review = state
        .repo
        .get_review(title_id, review_id)
        .await
        .ok_or(ApiError::NotFound("Review"))?;
    let page = state.repo.list_comments(review.id, query.params()).await?;
    Ok(Json(page))
}

/// [Public] Retrieves one comment scoped under its review and title.
#[utoipa::path(
    get,
    path = "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    params(
        ("title_id" = i64, Path, description = "Title id"),
        ("review_id" = i64, Path, description = "Review id"),
        ("comment_id" = i64, Path, description = "Comment id")
    ),
    responses((status = 200, description = "Found", body = Comment), (status = 404, description = "Not found"))
)]
pub async fn get_comment(
    State(state): State<AppState>,
    Path((title_id, review_id, comment_id)): Path<(i64, i64, i64)>,
) -> Result<Json<Comment>, ApiError> {
    authorize(COMMENT_ACCESS, None, Action::Retrieve, None)?;
    let review = state
        .repo
        .get_review(title_id, review_id)
        .await
        .ok_or(ApiError::NotFound("Review"))?;
    let comment = state
        .repo
        .get_comment(review.id, comment_id)
        .await
        .ok_or(ApiError::NotFound("Comment"))?;
    Ok(Json(comment))
}

/// [Authenticated] Posts a comment on a review.
#[utoipa::path(
    post,
    path = "/titles/{title_id}/reviews/{review_id}/comments",
    params(
        ("title_id" = i64, Path, description = "Title id"),
        ("review_id" = i64, Path, description = "Review id")
    ),
    request_body = CommentCreateRequest,
    responses(
        (status = 201, description = "Created", body = Comment),
        (status = 404, description = "Review not found")
    )
)]
pub async fn create_comment(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(i64, i64)>,
    Json(payload): Json<CommentCreateRequest>,
) -> Result<(StatusCode, Json<Comment>), ApiError> {
    authorize(COMMENT_ACCESS, Some(&user), Action::Create, None)?;
    payload.validate()?;
    let review = state
        .repo
        .get_review(title_id, review_id)
        .await
        .ok_or(ApiError::NotFound("Review"))?;

    let comment = state.repo.create_comment(review.id, user.id, &payload.text).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// [Author/moderator/admin] Partially updates a comment.
#[utoipa::path(
    patch,
    path = "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    params(
        ("title_id" = i64, Path, description = "Title id"),
        ("review_id" = i64, Path, description = "Review id"),
        ("comment_id" = i64, Path, description = "Comment id")
    ),
    request_body = CommentUpdateRequest,
    responses((status = 200, description = "Updated", body = Comment), (status = 404, description = "Not found"))
)]
pub async fn update_comment(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path((title_id, review_id, comment_id)): Path<(i64, i64, i64)>,
    Json(payload): Json<CommentUpdateRequest>,
) -> Result<Json<Comment>, ApiError> {
    payload.validate()?;
    let review = state
        .repo
        .get_review(title_id, review_id)
        .await
        .ok_or(ApiError::NotFound("Review"))?;
    let comment = state
        .repo
        .get_comment(review.id, comment_id)
        .await
        .ok_or(ApiError::NotFound("Comment"))?;
    authorize(COMMENT_ACCESS, Some(&user), Action::Update, Some(comment.author_id))?;

    let updated = state
        .repo
        .update_comment(comment.id, payload.text)
        .await?
        .ok_or(ApiError::NotFound("Comment"))?;
    Ok(Json(updated))
}

/// [Author/moderator/admin] Deletes a comment.
#[utoipa::path(
    delete,
    path = "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
    params(
        ("title_id" = i64, Path, description = "Title id"),
        ("review_id" = i64, Path, description = "Review id"),
        ("comment_id" = i64, Path, description = "Comment id")
    ),
    responses((status = 204, description = "Deleted"), (status = 404, description = "Not found"))
)]
pub async fn delete_comment(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path((title_id, review_id, comment_id)): Path<(i64, i64, i64)>,
) -> Result<StatusCode, ApiError> {
    let review = state
        .repo
        .get_review(title_id, review_id)
        .await
        .ok_or(ApiError::NotFound("Review"))?;
    let comment = state
        .repo
        .get_comment(review.id, comment_id)
        .await
        .ok_or(ApiError::NotFound("Comment"))?;
    authorize(COMMENT_ACCESS, Some(&user), Action::Delete, Some(comment.author_id))?;

    if state.repo.delete_comment(comment.id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Comment"))
    }
}

// --- User administration ---

/// [Admin] Lists users ordered by username, searchable by username.
#[utoipa::path(
    get,
    path = "/users",
    params(SearchQuery),
    responses((status = 200, description = "Paginated users"))
)]
pub async fn list_users(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Page<User>>, ApiError> {
    authorize(USER_ADMIN_ACCESS, Some(&user), Action::List, None)?;
    let page = state.repo.list_users(query.search.clone(), query.params()).await?;
    Ok(Json(page))
}

/// [Admin] Creates a user directly; the account is active immediately.
#[utoipa::path(
    post,
    path = "/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Created", body = User),
        (status = 400, description = "Validation error")
    )
)]
pub async fn create_user(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    authorize(USER_ADMIN_ACCESS, Some(&user), Action::Create, None)?;
    payload.validate()?;
    let created = state.repo.create_user(payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// [Admin] Retrieves a user by username.
#[utoipa::path(
    get,
    path = "/users/{username}",
    params(("username" = String, Path, description = "Username")),
    responses((status = 200, description = "Found", body = User), (status = 404, description = "Not found"))
)]
pub async fn get_user_detail(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<User>, ApiError> {
    authorize(USER_ADMIN_ACCESS, Some(&user), Action::Retrieve, None)?;
    let found = state
        .repo
        .get_user_by_username(&username)
        .await
        .ok_or(ApiError::NotFound("User"))?;
    Ok(Json(found))
}

/// [Admin] Partially updates a user. Role changes are allowed here; this is
/// the only path that can promote or demote.
#[utoipa::path(
    patch,
    path = "/users/{username}",
    params(("username" = String, Path, description = "Username")),
    request_body = UpdateUserRequest,
    responses((status = 200, description = "Updated", body = User), (status = 404, description = "Not found"))
)]
pub async fn update_user_detail(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<User>, ApiError> {
    authorize(USER_ADMIN_ACCESS, Some(&user), Action::Update, None)?;
    payload.validate()?;
    let updated = state
        .repo
        .update_user(&username, payload)
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    Ok(Json(updated))
}

/// [Admin] Deletes a user; their reviews and comments cascade away.
#[utoipa::path(
    delete,
    path = "/users/{username}",
    params(("username" = String, Path, description = "Username")),
    responses((status = 204, description = "Deleted"), (status = 404, description = "Not found"))
)]
pub async fn delete_user_detail(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<StatusCode, ApiError> {
    authorize(USER_ADMIN_ACCESS, Some(&user), Action::Delete, None)?;
    if state.repo.delete_user(&username).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("User"))
    }
}

// --- Self-service profile ---

/// [Authenticated] Returns the caller's own record.
#[utoipa::path(
    get,
    path = "/users/me",
    responses((status = 200, description = "Own profile", body = User))
)]
pub async fn get_me(AuthUser { user }: AuthUser) -> Json<User> {
    Json(user)
}

/// update_me
///
/// [Authenticated] Partial update of the caller's own record. Whatever role
/// the payload carries, the stored role stays the caller's current one, so
/// the self-service path can never escalate privileges.
#[utoipa::path(
    patch,
    path = "/users/me",
    request_body = UpdateUserRequest,
    responses((status = 200, description = "Updated", body = User))
)]
pub async fn update_me(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Json(mut payload): Json<UpdateUserRequest>,
) -> Result<Json<User>, ApiError> {
    payload.validate()?;
    payload.role = Some(user.role);
    let updated = state
        .repo
        .update_user(&user.username, payload)
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    Ok(Json(updated))
}
