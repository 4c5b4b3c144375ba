use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, query_builder::QueryBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{
    Category, Comment, CreateUserRequest, Genre, NewTitle, Page, PageParams, Review, Role, Title,
    TitleFilter, TitlePatch, UpdateUserRequest, User,
};

/// Repository
///
/// Abstract contract for all persistence operations. Handlers talk to
/// `Arc<dyn Repository>`, so the Postgres implementation below and the
/// in-memory double used by the integration tests are interchangeable.
///
/// Lookups return `Option`; operations that can trip a storage constraint
/// return `Result` so unique violations surface as clean validation errors.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users & signup ---
    async fn get_user(&self, id: Uuid) -> Option<User>;
    async fn get_user_by_username(&self, username: &str) -> Option<User>;
    /// Looks up the user keyed by the exact (username, email) pair, creating
    /// an inactive record when absent. A collision of either field with a
    /// different record is a conflict.
    async fn find_or_create_signup(&self, username: &str, email: &str) -> Result<User, ApiError>;
    async fn set_confirmation_code(&self, id: Uuid, code: &str) -> Result<(), ApiError>;
    async fn activate_user(&self, id: Uuid) -> Result<(), ApiError>;
    async fn list_users(
        &self,
        search: Option<String>,
        page: PageParams,
    ) -> Result<Page<User>, ApiError>;
    async fn create_user(&self, req: CreateUserRequest) -> Result<User, ApiError>;
    async fn update_user(
        &self,
        username: &str,
        req: UpdateUserRequest,
    ) -> Result<Option<User>, ApiError>;
    async fn delete_user(&self, username: &str) -> Result<bool, ApiError>;

    // --- Categories ---
    async fn list_categories(
        &self,
        search: Option<String>,
        page: PageParams,
    ) -> Result<Page<Category>, ApiError>;
    async fn get_category_by_slug(&self, slug: &str) -> Option<Category>;
    async fn create_category(&self, name: &str, slug: &str) -> Result<Category, ApiError>;
    async fn delete_category(&self, slug: &str) -> Result<bool, ApiError>;

    // --- Genres ---
    async fn list_genres(
        &self,
        search: Option<String>,
        page: PageParams,
    ) -> Result<Page<Genre>, ApiError>;
    async fn get_genre_by_slug(&self, slug: &str) -> Option<Genre>;
    async fn create_genre(&self, name: &str, slug: &str) -> Result<Genre, ApiError>;
    async fn delete_genre(&self, slug: &str) -> Result<bool, ApiError>;

    // --- Titles ---
    async fn list_titles(
        &self,
        filter: TitleFilter,
        page: PageParams,
    ) -> Result<Page<Title>, ApiError>;
    async fn get_title(&self, id: i64) -> Option<Title>;
    async fn create_title(&self, new: NewTitle) -> Result<Title, ApiError>;
    async fn update_title(&self, id: i64, patch: TitlePatch) -> Result<Option<Title>, ApiError>;
    async fn delete_title(&self, id: i64) -> Result<bool, ApiError>;

    // --- Reviews (scoped under a title) ---
    async fn list_reviews(
        &self,
        title_id: i64,
        page: PageParams,
    ) -> Result<Page<Review>, ApiError>;
    async fn get_review(&self, title_id: i64, review_id: i64) -> Option<Review>;
    async fn review_exists(&self, title_id: i64, author_id: Uuid) -> bool;
    async fn create_review(
        &self,
        title_id: i64,
        author_id: Uuid,
        text: &str,
        score: i32,
    ) -> Result<Review, ApiError>;
    async fn update_review(
        &self,
        review_id: i64,
        text: Option<String>,
        score: Option<i32>,
    ) -> Result<Option<Review>, ApiError>;
    async fn delete_review(&self, review_id: i64) -> Result<bool, ApiError>;

    // --- Comments (scoped under a review) ---
    async fn list_comments(
        &self,
        review_id: i64,
        page: PageParams,
    ) -> Result<Page<Comment>, ApiError>;
    async fn get_comment(&self, review_id: i64, comment_id: i64) -> Option<Comment>;
    async fn create_comment(
        &self,
        review_id: i64,
        author_id: Uuid,
        text: &str,
    ) -> Result<Comment, ApiError>;
    async fn update_comment(
        &self,
        comment_id: i64,
        text: Option<String>,
    ) -> Result<Option<Comment>, ApiError>;
    async fn delete_comment(&self, comment_id: i64) -> Result<bool, ApiError>;
}

/// Shared handle for the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

const USER_COLUMNS: &str = "id, username, email, first_name, last_name, bio, role, \
     confirmation_code, is_active, is_staff, is_superuser";

const REVIEW_COLUMNS: &str =
    "r.id, r.title_id, r.author_id, u.username AS author, r.text, r.score, r.pub_date";

const COMMENT_COLUMNS: &str =
    "c.id, c.review_id, c.author_id, u.username AS author, c.text, c.pub_date";

/// Flat row shape for title queries; genres are attached in a second pass.
#[derive(Debug, FromRow)]
struct TitleRow {
    id: i64,
    name: String,
    year: i32,
    description: Option<String>,
    rating: Option<f64>,
    category_id: Option<i64>,
    category_name: Option<String>,
    category_slug: Option<String>,
}

#[derive(Debug, FromRow)]
struct TitleGenreRow {
    title_id: i64,
    id: i64,
    name: String,
    slug: String,
}

impl TitleRow {
    fn into_title(self, genre: Vec<Genre>) -> Title {
        let category = match (self.category_id, self.category_name, self.category_slug) {
            (Some(id), Some(name), Some(slug)) => Some(Category { id, name, slug }),
            _ => None,
        };
        Title {
            id: self.id,
            name: self.name,
            year: self.year,
            rating: self.rating,
            description: self.description,
            genre,
            category,
        }
    }
}

/// PostgresRepository
///
/// Concrete `Repository` backed by the PostgreSQL pool. Uniqueness is always
/// left to the schema constraints; this layer translates the violations into
/// the API error taxonomy.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attaches genre lists to a batch of title rows, preserving row order.
    async fn attach_genres(&self, rows: Vec<TitleRow>) -> Result<Vec<Title>, ApiError> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut genres_by_title: HashMap<i64, Vec<Genre>> = HashMap::new();
        if !ids.is_empty() {
            let genre_rows = sqlx::query_as::<_, TitleGenreRow>(
                "SELECT tg.title_id, g.id, g.name, g.slug \
                 FROM title_genres tg JOIN genres g ON g.id = tg.genre_id \
                 WHERE tg.title_id = ANY($1) ORDER BY g.name",
            )
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;
            for row in genre_rows {
                genres_by_title
                    .entry(row.title_id)
                    .or_default()
                    .push(Genre { id: row.id, name: row.name, slug: row.slug });
            }
        }
        Ok(rows
            .into_iter()
            .map(|row| {
                let genre = genres_by_title.remove(&row.id).unwrap_or_default();
                row.into_title(genre)
            })
            .collect())
    }
}

/// True when the error is a storage-level unique-constraint violation.
fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Maps a unique violation on users to a field-keyed validation error, or a
/// plain conflict when the compound (username, email) constraint fired.
fn map_user_unique(e: sqlx::Error) -> ApiError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return match db.constraint() {
                Some(c) if c.contains("username") => {
                    ApiError::validation("username", "A user with that username already exists.")
                }
                Some(c) if c.contains("email") => {
                    ApiError::validation("email", "A user with that email already exists.")
                }
                _ => ApiError::Conflict(
                    "Username or Email already taken!!! Choose another one!".to_string(),
                ),
            };
        }
    }
    ApiError::Database(e)
}

/// Same mapping for the name/slug uniques on categories and genres.
fn map_taxonomy_unique(e: sqlx::Error) -> ApiError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return match db.constraint() {
                Some(c) if c.contains("slug") => {
                    ApiError::validation("slug", "This slug is already in use.")
                }
                _ => ApiError::validation("name", "This name is already in use."),
            };
        }
    }
    ApiError::Database(e)
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_user(&self, id: Uuid) -> Option<User> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("get_user error: {e:?}");
                None
            })
    }

    async fn get_user_by_username(&self, username: &str) -> Option<User> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("get_user_by_username error: {e:?}");
            None
        })
    }

    async fn find_or_create_signup(&self, username: &str, email: &str) -> Result<User, ApiError> {
        let existing = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 AND email = $2"
        ))
        .bind(username)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(user) = existing {
            return Ok(user);
        }

        // Not found as a pair: insert and let the unique constraints decide
        // whether one of the fields belongs to somebody else.
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, username, email, is_active) VALUES ($1, $2, $3, FALSE) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::Conflict(
                    "Username or Email already taken!!! Choose another one!".to_string(),
                )
            } else {
                ApiError::Database(e)
            }
        })
    }

    async fn set_confirmation_code(&self, id: Uuid, code: &str) -> Result<(), ApiError> {
        sqlx::query("UPDATE users SET confirmation_code = $2 WHERE id = $1")
            .bind(id)
            .bind(code)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn activate_user(&self, id: Uuid) -> Result<(), ApiError> {
        sqlx::query("UPDATE users SET is_active = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_users(
        &self,
        search: Option<String>,
        page: PageParams,
    ) -> Result<Page<User>, ApiError> {
        let mut count_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM users WHERE TRUE");
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users WHERE TRUE"));
        if let Some(s) = search {
            let pattern = format!("%{s}%");
            for b in [&mut count_builder, &mut builder] {
                b.push(" AND username ILIKE ");
                b.push_bind(pattern.clone());
            }
        }
        let count: i64 = count_builder.build_query_scalar().fetch_one(&self.pool).await?;

        builder.push(" ORDER BY username ASC LIMIT ");
        builder.push_bind(page.limit());
        builder.push(" OFFSET ");
        builder.push_bind(page.offset());
        let results = builder.build_query_as::<User>().fetch_all(&self.pool).await?;
        Ok(Page { count, results })
    }

    async fn create_user(&self, req: CreateUserRequest) -> Result<User, ApiError> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, username, email, first_name, last_name, bio, role, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE) RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(req.username)
        .bind(req.email)
        .bind(req.first_name)
        .bind(req.last_name)
        .bind(req.bio)
        .bind(req.role.unwrap_or(Role::User))
        .fetch_one(&self.pool)
        .await
        .map_err(map_user_unique)
    }

    async fn update_user(
        &self,
        username: &str,
        req: UpdateUserRequest,
    ) -> Result<Option<User>, ApiError> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET \
                username = COALESCE($2, username), \
                email = COALESCE($3, email), \
                first_name = COALESCE($4, first_name), \
                last_name = COALESCE($5, last_name), \
                bio = COALESCE($6, bio), \
                role = COALESCE($7, role) \
             WHERE username = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(username)
        .bind(req.username)
        .bind(req.email)
        .bind(req.first_name)
        .bind(req.last_name)
        .bind(req.bio)
        .bind(req.role)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_user_unique)
    }

    async fn delete_user(&self, username: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM users WHERE username = $1")
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_categories(
        &self,
        search: Option<String>,
        page: PageParams,
    ) -> Result<Page<Category>, ApiError> {
        let mut count_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM categories WHERE TRUE");
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT id, name, slug FROM categories WHERE TRUE");
        if let Some(s) = search {
            let pattern = format!("%{s}%");
            for b in [&mut count_builder, &mut builder] {
                b.push(" AND name ILIKE ");
                b.push_bind(pattern.clone());
            }
        }
        let count: i64 = count_builder.build_query_scalar().fetch_one(&self.pool).await?;

        builder.push(" ORDER BY name ASC LIMIT ");
        builder.push_bind(page.limit());
        builder.push(" OFFSET ");
        builder.push_bind(page.offset());
        let results = builder.build_query_as::<Category>().fetch_all(&self.pool).await?;
        Ok(Page { count, results })
    }

    async fn get_category_by_slug(&self, slug: &str) -> Option<Category> {
        sqlx::query_as::<_, Category>("SELECT id, name, slug FROM categories WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("get_category_by_slug error: {e:?}");
                None
            })
    }

    async fn create_category(&self, name: &str, slug: &str) -> Result<Category, ApiError> {
        sqlx::query_as::<_, Category>(
            "INSERT INTO categories (name, slug) VALUES ($1, $2) RETURNING id, name, slug",
        )
        .bind(name)
        .bind(slug)
        .fetch_one(&self.pool)
        .await
        .map_err(map_taxonomy_unique)
    }

    async fn delete_category(&self, slug: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM categories WHERE slug = $1")
            .bind(slug)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_genres(
        &self,
        search: Option<String>,
        page: PageParams,
    ) -> Result<Page<Genre>, ApiError> {
        let mut count_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM genres WHERE TRUE");
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT id, name, slug FROM genres WHERE TRUE");
        if let Some(s) = search {
            let pattern = format!("%{s}%");
            for b in [&mut count_builder, &mut builder] {
                b.push(" AND name ILIKE ");
                b.push_bind(pattern.clone());
            }
        }
        let count: i64 = count_builder.build_query_scalar().fetch_one(&self.pool).await?;

        builder.push(" ORDER BY name ASC LIMIT ");
        builder.push_bind(page.limit());
        builder.push(" OFFSET ");
        builder.push_bind(page.offset());
        let results = builder.build_query_as::<Genre>().fetch_all(&self.pool).await?;
        Ok(Page { count, results })
    }

    async fn get_genre_by_slug(&self, slug: &str) -> Option<Genre> {
        sqlx::query_as::<_, Genre>("SELECT id, name, slug FROM genres WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("get_genre_by_slug error: {e:?}");
                None
            })
    }

    async fn create_genre(&self, name: &str, slug: &str) -> Result<Genre, ApiError> {
        sqlx::query_as::<_, Genre>(
            "INSERT INTO genres (name, slug) VALUES ($1, $2) RETURNING id, name, slug",
        )
        .bind(name)
        .bind(slug)
        .fetch_one(&self.pool)
        .await
        .map_err(map_taxonomy_unique)
    }

    async fn delete_genre(&self, slug: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM genres WHERE slug = $1")
            .bind(slug)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_titles(
        &self,
        filter: TitleFilter,
        page: PageParams,
    ) -> Result<Page<Title>, ApiError> {
        // Both builders carry the same WHERE clauses; the rating aggregate
        // only belongs on the page query.
        let mut count_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT COUNT(*) FROM titles t \
             LEFT JOIN categories c ON t.category_id = c.id WHERE TRUE",
        );
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT t.id, t.name, t.year, t.description, \
                    AVG(r.score)::float8 AS rating, \
                    c.id AS category_id, c.name AS category_name, c.slug AS category_slug \
             FROM titles t \
             LEFT JOIN categories c ON t.category_id = c.id \
             LEFT JOIN reviews r ON r.title_id = t.id WHERE TRUE",
        );

        for b in [&mut count_builder, &mut builder] {
            if let Some(category) = &filter.category {
                b.push(" AND c.slug = ");
                b.push_bind(category.clone());
            }
            if let Some(genre) = &filter.genre {
                b.push(
                    " AND EXISTS (SELECT 1 FROM title_genres tg \
                     JOIN genres g ON g.id = tg.genre_id \
                     WHERE tg.title_id = t.id AND g.slug = ",
                );
                b.push_bind(genre.clone());
                b.push(")");
            }
            if let Some(name) = &filter.name {
                b.push(" AND t.name ILIKE ");
                b.push_bind(format!("%{name}%"));
            }
            if let Some(year) = filter.year {
                b.push(" AND t.year = ");
                b.push_bind(year);
            }
        }

        let count: i64 = count_builder.build_query_scalar().fetch_one(&self.pool).await?;

        builder.push(" GROUP BY t.id, c.id ORDER BY t.id DESC LIMIT ");
        builder.push_bind(page.limit());
        builder.push(" OFFSET ");
        builder.push_bind(page.offset());
        let rows = builder.build_query_as::<TitleRow>().fetch_all(&self.pool).await?;

        let results = self.attach_genres(rows).await?;
        Ok(Page { count, results })
    }

    async fn get_title(&self, id: i64) -> Option<Title> {
        let row = sqlx::query_as::<_, TitleRow>(
            "SELECT t.id, t.name, t.year, t.description, \
                    AVG(r.score)::float8 AS rating, \
                    c.id AS category_id, c.name AS category_name, c.slug AS category_slug \
             FROM titles t \
             LEFT JOIN categories c ON t.category_id = c.id \
             LEFT JOIN reviews r ON r.title_id = t.id \
             WHERE t.id = $1 GROUP BY t.id, c.id",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("get_title error: {e:?}");
            None
        })?;

        match self.attach_genres(vec![row]).await {
            Ok(mut titles) => titles.pop(),
            Err(e) => {
                tracing::error!("get_title genres error: {e:?}");
                None
            }
        }
    }

    async fn create_title(&self, new: NewTitle) -> Result<Title, ApiError> {
        let mut tx = self.pool.begin().await?;
        let (title_id,): (i64,) = sqlx::query_as(
            "INSERT INTO titles (name, year, description, category_id) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&new.name)
        .bind(new.year)
        .bind(&new.description)
        .bind(new.category_id)
        .fetch_one(&mut *tx)
        .await?;

        for genre_id in &new.genre_ids {
            sqlx::query(
                "INSERT INTO title_genres (title_id, genre_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(title_id)
            .bind(genre_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.get_title(title_id)
            .await
            .ok_or_else(|| ApiError::Internal("created title could not be re-read".to_string()))
    }

    async fn update_title(&self, id: i64, patch: TitlePatch) -> Result<Option<Title>, ApiError> {
        let mut tx = self.pool.begin().await?;
        let updated: Option<(i64,)> = sqlx::query_as(
            "UPDATE titles SET \
                name = COALESCE($2, name), \
                year = COALESCE($3, year), \
                description = COALESCE($4, description), \
                category_id = COALESCE($5, category_id) \
             WHERE id = $1 RETURNING id",
        )
        .bind(id)
        .bind(patch.name)
        .bind(patch.year)
        .bind(patch.description)
        .bind(patch.category_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((title_id,)) = updated else {
            return Ok(None);
        };

        // A provided genre list replaces the whole association set.
        if let Some(genre_ids) = patch.genre_ids {
            sqlx::query("DELETE FROM title_genres WHERE title_id = $1")
                .bind(title_id)
                .execute(&mut *tx)
                .await?;
            for genre_id in genre_ids {
                sqlx::query("INSERT INTO title_genres (title_id, genre_id) VALUES ($1, $2)")
                    .bind(title_id)
                    .bind(genre_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;

        Ok(self.get_title(title_id).await)
    }

    async fn delete_title(&self, id: i64) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM titles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_reviews(
        &self,
        title_id: i64,
        page: PageParams,
    ) -> Result<Page<Review>, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE title_id = $1")
            .bind(title_id)
            .fetch_one(&self.pool)
            .await?;

        let results = sqlx::query_as::<_, Review>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews r JOIN users u ON u.id = r.author_id \
             WHERE r.title_id = $1 ORDER BY r.pub_date ASC LIMIT $2 OFFSET $3"
        ))
        .bind(title_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;
        Ok(Page { count, results })
    }

    async fn get_review(&self, title_id: i64, review_id: i64) -> Option<Review> {
        sqlx::query_as::<_, Review>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews r JOIN users u ON u.id = r.author_id \
             WHERE r.id = $2 AND r.title_id = $1"
        ))
        .bind(title_id)
        .bind(review_id)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("get_review error: {e:?}");
            None
        })
    }

    async fn review_exists(&self, title_id: i64, author_id: Uuid) -> bool {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM reviews WHERE title_id = $1 AND author_id = $2",
        )
        .bind(title_id)
        .bind(author_id)
        .fetch_one(&self.pool)
        .await
        .map(|n| n > 0)
        .unwrap_or_else(|e| {
            tracing::error!("review_exists error: {e:?}");
            false
        })
    }

    async fn create_review(
        &self,
        title_id: i64,
        author_id: Uuid,
        text: &str,
        score: i32,
    ) -> Result<Review, ApiError> {
        // Insert-then-join in one round trip; the unique constraint backs up
        // the handler's duplicate pre-check.
        sqlx::query_as::<_, Review>(
            "WITH inserted AS ( \
                INSERT INTO reviews (title_id, author_id, text, score) \
                VALUES ($1, $2, $3, $4) \
                RETURNING id, title_id, author_id, text, score, pub_date \
             ) \
             SELECT i.id, i.title_id, i.author_id, u.username AS author, \
                    i.text, i.score, i.pub_date \
             FROM inserted i JOIN users u ON u.id = i.author_id",
        )
        .bind(title_id)
        .bind(author_id)
        .bind(text)
        .bind(score)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::validation("non_field_errors", "You have already reviewed this title.")
            } else {
                ApiError::Database(e)
            }
        })
    }

    async fn update_review(
        &self,
        review_id: i64,
        text: Option<String>,
        score: Option<i32>,
    ) -> Result<Option<Review>, ApiError> {
        let review = sqlx::query_as::<_, Review>(
            "WITH updated AS ( \
                UPDATE reviews SET text = COALESCE($2, text), score = COALESCE($3, score) \
                WHERE id = $1 \
                RETURNING id, title_id, author_id, text, score, pub_date \
             ) \
             SELECT i.id, i.title_id, i.author_id, u.username AS author, \
                    i.text, i.score, i.pub_date \
             FROM updated i JOIN users u ON u.id = i.author_id",
        )
        .bind(review_id)
        .bind(text)
        .bind(score)
        .fetch_optional(&self.pool)
        .await?;
        Ok(review)
    }

    async fn delete_review(&self, review_id: i64) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM reviews WHERE id = $1")
            .bind(review_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_comments(
        &self,
        review_id: i64,
        page: PageParams,
    ) -> Result<Page<Comment>, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE review_id = $1")
            .bind(review_id)
            .fetch_one(&self.pool)
            .await?;

        let results = sqlx::query_as::<_, Comment>(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments c JOIN users u ON u.id = c.author_id \
             WHERE c.review_id = $1 ORDER BY c.pub_date ASC LIMIT $2 OFFSET $3"
        ))
        .bind(review_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;
        Ok(Page { count, results })
    }

    async fn get_comment(&self, review_id: i64, comment_id: i64) -> Option<Comment> {
        sqlx::query_as::<_, Comment>(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments c JOIN users u ON u.id = c.author_id \
             WHERE c.id = $2 AND c.review_id = $1"
        ))
        .bind(review_id)
        .bind(comment_id)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("get_comment error: {e:?}");
            None
        })
    }

    async fn create_comment(
        &self,
        review_id: i64,
        author_id: Uuid,
        text: &str,
    ) -> Result<Comment, ApiError> {
        let comment = sqlx::query_as::<_, Comment>(
            "WITH inserted AS ( \
                INSERT INTO comments (review_id, author_id, text) VALUES ($1, $2, $3) \
                RETURNING id, review_id, author_id, text, pub_date \
             ) \
             SELECT i.id, i.review_id, i.author_id, u.username AS author, i.text, i.pub_date \
             FROM inserted i JOIN users u ON u.id = i.author_id",
        )
        .bind(review_id)
        .bind(author_id)
        .bind(text)
        .fetch_one(&self.pool)
        .await?;
        Ok(comment)
    }

    async fn update_comment(
        &self,
        comment_id: i64,
        text: Option<String>,
    ) -> Result<Option<Comment>, ApiError> {
        let comment = sqlx::query_as::<_, Comment>(
            "WITH updated AS ( \
                UPDATE comments SET text = COALESCE($2, text) WHERE id = $1 \
                RETURNING id, review_id, author_id, text, pub_date \
             ) \
             SELECT i.id, i.review_id, i.author_id, u.username AS author, i.text, i.pub_date \
             FROM updated i JOIN users u ON u.id = i.author_id",
        )
        .bind(comment_id)
        .bind(text)
        .fetch_optional(&self.pool)
        .await?;
        Ok(comment)
    }

    async fn delete_comment(&self, comment_id: i64) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(comment_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
