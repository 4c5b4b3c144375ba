use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::sync::LazyLock;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, FieldErrors};

// --- Field length limits (mirrored by the schema) ---

pub const MAX_LENGTH: usize = 256;
pub const MAX_LENGTH_NAME: usize = 150;
pub const MAX_LENGTH_EMAIL: usize = 254;
pub const MAX_LENGTH_SLUG: usize = 50;

/// Usernames reserved for routing; `/users/me` is the self-service endpoint.
pub const RESERVED_USERNAME: &str = "me";

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.@+-]+$").expect("static pattern"));
static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-a-zA-Z0-9_]+$").expect("static pattern"));
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static pattern"));

// --- Identity & role model ---

/// RBAC role. Stored as the Postgres enum `user_role`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Moderator,
    Admin,
}

/// User
///
/// Canonical identity record. Responses expose only the profile fields; the
/// confirmation code and the elevated system flags never serialize.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow, Default)]
pub struct User {
    #[serde(skip_serializing, default)]
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: String,
    pub role: Role,
    #[serde(skip_serializing, default)]
    #[schema(ignore)]
    pub confirmation_code: String,
    #[serde(skip_serializing, default)]
    #[schema(ignore)]
    pub is_active: bool,
    #[serde(skip_serializing, default)]
    #[schema(ignore)]
    pub is_staff: bool,
    #[serde(skip_serializing, default)]
    #[schema(ignore)]
    pub is_superuser: bool,
}

impl User {
    /// Admin-equivalence: the role says admin, or an elevated system flag is
    /// set. Every privilege check in the service goes through here or
    /// `is_moderator`; nothing re-derives these.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin || self.is_staff || self.is_superuser
    }

    pub fn is_moderator(&self) -> bool {
        self.role == Role::Moderator
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}

// --- Catalog taxonomies ---

/// Category
///
/// Labeled taxonomy a title belongs to (at most one). Identified by slug in
/// the API; the numeric id stays internal.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow, Default)]
pub struct Category {
    #[serde(skip_serializing, default)]
    pub id: i64,
    pub name: String,
    pub slug: String,
}

/// Genre. Same shape as Category, attached many-to-many.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow, Default)]
pub struct Genre {
    #[serde(skip_serializing, default)]
    pub id: i64,
    pub name: String,
    pub slug: String,
}

// --- Titles ---

/// Title
///
/// Catalog entry in its read representation: nested category/genre objects
/// and the aggregated rating (null until the first review lands).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct Title {
    pub id: i64,
    pub name: String,
    pub year: i32,
    pub rating: Option<f64>,
    pub description: Option<String>,
    pub genre: Vec<Genre>,
    pub category: Option<Category>,
}

/// Listing filters for titles; all optional, combined with AND.
#[derive(Debug, Clone, Default)]
pub struct TitleFilter {
    pub category: Option<String>,
    pub genre: Option<String>,
    pub name: Option<String>,
    pub year: Option<i32>,
}

/// Repository input for title creation, with slugs already resolved to ids.
#[derive(Debug, Clone)]
pub struct NewTitle {
    pub name: String,
    pub year: i32,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    pub genre_ids: Vec<i64>,
}

/// Partial title update. `None` leaves the column untouched; a provided
/// genre list replaces the whole set.
#[derive(Debug, Clone, Default)]
pub struct TitlePatch {
    pub name: Option<String>,
    pub year: Option<i32>,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    pub genre_ids: Option<Vec<i64>>,
}

// --- Reviews & comments ---

/// Review
///
/// One per (title, author). The foreign keys ride along for ownership checks
/// but never serialize; `author` carries the username joined in by the
/// repository.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow, Default)]
pub struct Review {
    pub id: i64,
    #[serde(skip_serializing, default)]
    pub title_id: i64,
    #[serde(skip_serializing, default)]
    pub author_id: Uuid,
    pub author: String,
    pub text: String,
    pub score: i32,
    pub pub_date: DateTime<Utc>,
}

impl fmt::Display for Review {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.author, truncated(&self.text))
    }
}

/// Comment attached to a review.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow, Default)]
pub struct Comment {
    pub id: i64,
    #[serde(skip_serializing, default)]
    pub review_id: i64,
    #[serde(skip_serializing, default)]
    pub author_id: Uuid,
    pub author: String,
    pub text: String,
    pub pub_date: DateTime<Utc>,
}

impl fmt::Display for Comment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.author, truncated(&self.text))
    }
}

fn truncated(text: &str) -> String {
    text.chars().take(20).collect()
}

// --- Pagination ---

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Resolved page-number pagination parameters.
#[derive(Debug, Clone, Copy)]
pub struct PageParams {
    pub page: i64,
    pub page_size: i64,
}

impl PageParams {
    pub fn from_query(page: Option<i64>, page_size: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

impl Default for PageParams {
    fn default() -> Self {
        Self::from_query(None, None)
    }
}

/// Paginated list envelope: total count plus the current page of results.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Page<T> {
    pub count: i64,
    pub results: Vec<T>,
}

// --- Request payloads (input schemas) ---

/// Input for POST /auth/signup.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
}

impl SignupRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        validate_username(&mut errors, &self.username);
        validate_email(&mut errors, &self.email);
        errors.into_result()
    }
}

/// Input for POST /auth/token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct TokenRequest {
    pub username: String,
    pub confirmation_code: String,
}

impl TokenRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.username.is_empty() {
            errors.push("username", "This field may not be blank.");
        }
        if self.confirmation_code.is_empty() {
            errors.push("confirmation_code", "This field may not be blank.");
        }
        errors.into_result()
    }
}

/// Bearer token response for a successful code exchange.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct TokenResponse {
    pub token: String,
}

/// Input for category/genre creation: `{name, slug}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct TaxonomyPayload {
    pub name: String,
    pub slug: String,
}

impl TaxonomyPayload {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.name.is_empty() {
            errors.push("name", "This field may not be blank.");
        } else if self.name.chars().count() > MAX_LENGTH {
            errors.push("name", format!("Ensure this field has no more than {MAX_LENGTH} characters."));
        }
        validate_slug(&mut errors, &self.slug);
        errors.into_result()
    }
}

/// Input for POST /titles. Genre and category arrive as slugs and are
/// resolved against the catalog before the write.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct TitleCreateRequest {
    pub name: String,
    pub year: i32,
    pub description: Option<String>,
    #[serde(default)]
    pub genre: Vec<String>,
    pub category: Option<String>,
}

impl TitleCreateRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.name.is_empty() {
            errors.push("name", "This field may not be blank.");
        } else if self.name.chars().count() > MAX_LENGTH {
            errors.push("name", format!("Ensure this field has no more than {MAX_LENGTH} characters."));
        }
        errors.into_result()
    }
}

/// Input for PATCH /titles/{id}; every field optional.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct TitleUpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl TitleUpdateRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if let Some(name) = &self.name {
            if name.is_empty() {
                errors.push("name", "This field may not be blank.");
            } else if name.chars().count() > MAX_LENGTH {
                errors.push("name", format!("Ensure this field has no more than {MAX_LENGTH} characters."));
            }
        }
        errors.into_result()
    }
}

/// Input for POST .../reviews.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct ReviewCreateRequest {
    pub text: String,
    pub score: i32,
}

impl ReviewCreateRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if self.text.is_empty() {
            errors.push("text", "This field may not be blank.");
        }
        validate_score(&mut errors, self.score);
        errors.into_result()
    }
}

/// Input for PATCH .../reviews/{review_id}.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct ReviewUpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,
}

impl ReviewUpdateRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if let Some(text) = &self.text {
            if text.is_empty() {
                errors.push("text", "This field may not be blank.");
            }
        }
        if let Some(score) = self.score {
            validate_score(&mut errors, score);
        }
        errors.into_result()
    }
}

/// Input for POST .../comments.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct CommentCreateRequest {
    pub text: String,
}

impl CommentCreateRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.text.is_empty() {
            return Err(ApiError::validation("text", "This field may not be blank."));
        }
        Ok(())
    }
}

/// Input for PATCH .../comments/{comment_id}.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct CommentUpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CommentUpdateRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if let Some(text) = &self.text {
            if text.is_empty() {
                return Err(ApiError::validation("text", "This field may not be blank."));
            }
        }
        Ok(())
    }
}

/// Input for the admin user-creation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub bio: String,
    pub role: Option<Role>,
}

impl CreateUserRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        validate_username(&mut errors, &self.username);
        validate_email(&mut errors, &self.email);
        validate_name(&mut errors, "first_name", &self.first_name);
        validate_name(&mut errors, "last_name", &self.last_name);
        errors.into_result()
    }
}

/// Partial user update (admin endpoint and /users/me).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl UpdateUserRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut errors = FieldErrors::new();
        if let Some(username) = &self.username {
            validate_username(&mut errors, username);
        }
        if let Some(email) = &self.email {
            validate_email(&mut errors, email);
        }
        if let Some(first_name) = &self.first_name {
            validate_name(&mut errors, "first_name", first_name);
        }
        if let Some(last_name) = &self.last_name {
            validate_name(&mut errors, "last_name", last_name);
        }
        errors.into_result()
    }
}

// --- Shared field validators ---

fn validate_username(errors: &mut FieldErrors, username: &str) {
    if username.is_empty() {
        errors.push("username", "This field may not be blank.");
        return;
    }
    if username.chars().count() > MAX_LENGTH_NAME {
        errors.push(
            "username",
            format!("Ensure this field has no more than {MAX_LENGTH_NAME} characters."),
        );
    }
    if !USERNAME_RE.is_match(username) {
        errors.push("username", "Enter a valid username (letters, digits and .@+- only).");
    }
    if username == RESERVED_USERNAME {
        errors.push("username", "Username \"me\" is reserved.");
    }
}

fn validate_email(errors: &mut FieldErrors, email: &str) {
    if email.is_empty() {
        errors.push("email", "This field may not be blank.");
        return;
    }
    if email.chars().count() > MAX_LENGTH_EMAIL {
        errors.push(
            "email",
            format!("Ensure this field has no more than {MAX_LENGTH_EMAIL} characters."),
        );
    }
    if !EMAIL_RE.is_match(email) {
        errors.push("email", "Enter a valid email address.");
    }
}

fn validate_name(errors: &mut FieldErrors, field: &str, value: &str) {
    if value.chars().count() > MAX_LENGTH_NAME {
        errors.push(
            field,
            format!("Ensure this field has no more than {MAX_LENGTH_NAME} characters."),
        );
    }
}

fn validate_slug(errors: &mut FieldErrors, slug: &str) {
    if slug.is_empty() {
        errors.push("slug", "This field may not be blank.");
        return;
    }
    if slug.chars().count() > MAX_LENGTH_SLUG {
        errors.push(
            "slug",
            format!("Ensure this field has no more than {MAX_LENGTH_SLUG} characters."),
        );
    }
    if !SLUG_RE.is_match(slug) {
        errors.push("slug", "Enter a valid slug (letters, digits, hyphens and underscores).");
    }
}

fn validate_score(errors: &mut FieldErrors, score: i32) {
    // 0 is a legal score; the inclusive range is 0..=10.
    if !(0..=10).contains(&score) {
        errors.push("score", "Score must be between 0 and 10.");
    }
}
