#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use uuid::Uuid;

use yamdb::{
    AppConfig, AppState, MailerState, MockMailer, RepositoryState, create_router,
    error::ApiError,
    models::{
        Category, Comment, CreateUserRequest, Genre, NewTitle, Page, PageParams, Review, Role,
        Title, TitleFilter, TitlePatch, UpdateUserRequest, User,
    },
    repository::Repository,
};

// --- In-memory repository double ---

#[derive(Debug, Clone)]
struct StoredTitle {
    id: i64,
    name: String,
    year: i32,
    description: Option<String>,
    category_id: Option<i64>,
}

#[derive(Debug, Clone)]
struct StoredReview {
    id: i64,
    title_id: i64,
    author_id: Uuid,
    text: String,
    score: i32,
    pub_date: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredComment {
    id: i64,
    review_id: i64,
    author_id: Uuid,
    text: String,
    pub_date: chrono::DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Store {
    users: Vec<User>,
    categories: Vec<Category>,
    genres: Vec<Genre>,
    titles: Vec<StoredTitle>,
    title_genres: Vec<(i64, i64)>,
    reviews: Vec<StoredReview>,
    comments: Vec<StoredComment>,
    next_id: i64,
}

impl Store {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn username_of(&self, id: Uuid) -> String {
        self.users
            .iter()
            .find(|u| u.id == id)
            .map(|u| u.username.clone())
            .unwrap_or_default()
    }

    fn build_title(&self, stored: &StoredTitle) -> Title {
        let scores: Vec<i32> = self
            .reviews
            .iter()
            .filter(|r| r.title_id == stored.id)
            .map(|r| r.score)
            .collect();
        let rating = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().map(|&s| f64::from(s)).sum::<f64>() / scores.len() as f64)
        };
        let mut genre: Vec<Genre> = self
            .title_genres
            .iter()
            .filter(|(title_id, _)| *title_id == stored.id)
            .filter_map(|(_, genre_id)| self.genres.iter().find(|g| g.id == *genre_id).cloned())
            .collect();
        genre.sort_by(|a, b| a.name.cmp(&b.name));
        let category = stored
            .category_id
            .and_then(|id| self.categories.iter().find(|c| c.id == id).cloned());
        Title {
            id: stored.id,
            name: stored.name.clone(),
            year: stored.year,
            rating,
            description: stored.description.clone(),
            genre,
            category,
        }
    }

    fn build_review(&self, stored: &StoredReview) -> Review {
        Review {
            id: stored.id,
            title_id: stored.title_id,
            author_id: stored.author_id,
            author: self.username_of(stored.author_id),
            text: stored.text.clone(),
            score: stored.score,
            pub_date: stored.pub_date,
        }
    }

    fn build_comment(&self, stored: &StoredComment) -> Comment {
        Comment {
            id: stored.id,
            review_id: stored.review_id,
            author_id: stored.author_id,
            author: self.username_of(stored.author_id),
            text: stored.text.clone(),
            pub_date: stored.pub_date,
        }
    }

    /// Mirrors the schema's ON DELETE CASCADE from reviews to comments.
    fn drop_review(&mut self, review_id: i64) {
        self.reviews.retain(|r| r.id != review_id);
        self.comments.retain(|c| c.review_id != review_id);
    }
}

fn paginate<T>(items: Vec<T>, page: PageParams) -> Page<T> {
    let count = items.len() as i64;
    let results = items
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .collect();
    Page { count, results }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// InMemoryRepository
///
/// Full `Repository` implementation over a mutex-guarded store, enforcing
/// the same uniqueness and cascade rules the Postgres schema carries. Keeps
/// the integration tests independent of a running database.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    store: Arc<Mutex<Store>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct store access for elevated-flag setup the API never exposes.
    pub fn set_system_flags(&self, username: &str, is_staff: bool, is_superuser: bool) {
        let mut store = self.store.lock().unwrap();
        if let Some(user) = store.users.iter_mut().find(|u| u.username == username) {
            user.is_staff = is_staff;
            user.is_superuser = is_superuser;
        }
    }

    pub fn stored_user(&self, username: &str) -> Option<User> {
        let store = self.store.lock().unwrap();
        store.users.iter().find(|u| u.username == username).cloned()
    }

    pub fn review_count(&self) -> usize {
        self.store.lock().unwrap().reviews.len()
    }

    pub fn comment_count(&self) -> usize {
        self.store.lock().unwrap().comments.len()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_user(&self, id: Uuid) -> Option<User> {
        let store = self.store.lock().unwrap();
        store.users.iter().find(|u| u.id == id).cloned()
    }

    async fn get_user_by_username(&self, username: &str) -> Option<User> {
        let store = self.store.lock().unwrap();
        store.users.iter().find(|u| u.username == username).cloned()
    }

    async fn find_or_create_signup(&self, username: &str, email: &str) -> Result<User, ApiError> {
        let mut store = self.store.lock().unwrap();
        if let Some(user) = store
            .users
            .iter()
            .find(|u| u.username == username && u.email == email)
        {
            return Ok(user.clone());
        }
        if store
            .users
            .iter()
            .any(|u| u.username == username || u.email == email)
        {
            return Err(ApiError::Conflict(
                "Username or Email already taken!!! Choose another one!".to_string(),
            ));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            confirmation_code: "000000".to_string(),
            is_active: false,
            ..User::default()
        };
        store.users.push(user.clone());
        Ok(user)
    }

    async fn set_confirmation_code(&self, id: Uuid, code: &str) -> Result<(), ApiError> {
        let mut store = self.store.lock().unwrap();
        if let Some(user) = store.users.iter_mut().find(|u| u.id == id) {
            user.confirmation_code = code.to_string();
        }
        Ok(())
    }

    async fn activate_user(&self, id: Uuid) -> Result<(), ApiError> {
        let mut store = self.store.lock().unwrap();
        if let Some(user) = store.users.iter_mut().find(|u| u.id == id) {
            user.is_active = true;
        }
        Ok(())
    }

    async fn list_users(
        &self,
        search: Option<String>,
        page: PageParams,
    ) -> Result<Page<User>, ApiError> {
        let store = self.store.lock().unwrap();
        let mut users: Vec<User> = store
            .users
            .iter()
            .filter(|u| {
                search
                    .as_deref()
                    .is_none_or(|needle| contains_ci(&u.username, needle))
            })
            .cloned()
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(paginate(users, page))
    }

    async fn create_user(&self, req: CreateUserRequest) -> Result<User, ApiError> {
        let mut store = self.store.lock().unwrap();
        if store.users.iter().any(|u| u.username == req.username) {
            return Err(ApiError::validation(
                "username",
                "A user with that username already exists.",
            ));
        }
        if store.users.iter().any(|u| u.email == req.email) {
            return Err(ApiError::validation(
                "email",
                "A user with that email already exists.",
            ));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: req.username,
            email: req.email,
            first_name: req.first_name,
            last_name: req.last_name,
            bio: req.bio,
            role: req.role.unwrap_or(Role::User),
            confirmation_code: "000000".to_string(),
            is_active: true,
            is_staff: false,
            is_superuser: false,
        };
        store.users.push(user.clone());
        Ok(user)
    }

    async fn update_user(
        &self,
        username: &str,
        req: UpdateUserRequest,
    ) -> Result<Option<User>, ApiError> {
        let mut store = self.store.lock().unwrap();
        let Some(index) = store.users.iter().position(|u| u.username == username) else {
            return Ok(None);
        };
        if let Some(new_username) = &req.username {
            if store
                .users
                .iter()
                .enumerate()
                .any(|(i, u)| i != index && &u.username == new_username)
            {
                return Err(ApiError::validation(
                    "username",
                    "A user with that username already exists.",
                ));
            }
        }
        if let Some(new_email) = &req.email {
            if store
                .users
                .iter()
                .enumerate()
                .any(|(i, u)| i != index && &u.email == new_email)
            {
                return Err(ApiError::validation(
                    "email",
                    "A user with that email already exists.",
                ));
            }
        }
        let user = &mut store.users[index];
        if let Some(v) = req.username {
            user.username = v;
        }
        if let Some(v) = req.email {
            user.email = v;
        }
        if let Some(v) = req.first_name {
            user.first_name = v;
        }
        if let Some(v) = req.last_name {
            user.last_name = v;
        }
        if let Some(v) = req.bio {
            user.bio = v;
        }
        if let Some(v) = req.role {
            user.role = v;
        }
        Ok(Some(user.clone()))
    }

    async fn delete_user(&self, username: &str) -> Result<bool, ApiError> {
        let mut store = self.store.lock().unwrap();
        let Some(user) = store.users.iter().find(|u| u.username == username).cloned() else {
            return Ok(false);
        };
        store.users.retain(|u| u.id != user.id);
        // User deletion cascades to their reviews (with those reviews'
        // comments) and their own comments.
        let review_ids: Vec<i64> = store
            .reviews
            .iter()
            .filter(|r| r.author_id == user.id)
            .map(|r| r.id)
            .collect();
        for review_id in review_ids {
            store.drop_review(review_id);
        }
        store.comments.retain(|c| c.author_id != user.id);
        Ok(true)
    }

    async fn list_categories(
        &self,
        search: Option<String>,
        page: PageParams,
    ) -> Result<Page<Category>, ApiError> {
        let store = self.store.lock().unwrap();
        let mut items: Vec<Category> = store
            .categories
            .iter()
            .filter(|c| {
                search
                    .as_deref()
                    .is_none_or(|needle| contains_ci(&c.name, needle))
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(paginate(items, page))
    }

    async fn get_category_by_slug(&self, slug: &str) -> Option<Category> {
        let store = self.store.lock().unwrap();
        store.categories.iter().find(|c| c.slug == slug).cloned()
    }

    async fn create_category(&self, name: &str, slug: &str) -> Result<Category, ApiError> {
        let mut store = self.store.lock().unwrap();
        if store.categories.iter().any(|c| c.slug == slug) {
            return Err(ApiError::validation("slug", "This slug is already in use."));
        }
        if store.categories.iter().any(|c| c.name == name) {
            return Err(ApiError::validation("name", "This name is already in use."));
        }
        let category = Category {
            id: store.next_id(),
            name: name.to_string(),
            slug: slug.to_string(),
        };
        store.categories.push(category.clone());
        Ok(category)
    }

    async fn delete_category(&self, slug: &str) -> Result<bool, ApiError> {
        let mut store = self.store.lock().unwrap();
        let Some(category) = store.categories.iter().find(|c| c.slug == slug).cloned() else {
            return Ok(false);
        };
        store.categories.retain(|c| c.id != category.id);
        // SET NULL semantics: titles survive their category.
        for title in store.titles.iter_mut() {
            if title.category_id == Some(category.id) {
                title.category_id = None;
            }
        }
        Ok(true)
    }

    async fn list_genres(
        &self,
        search: Option<String>,
        page: PageParams,
    ) -> Result<Page<Genre>, ApiError> {
        let store = self.store.lock().unwrap();
        let mut items: Vec<Genre> = store
            .genres
            .iter()
            .filter(|g| {
                search
                    .as_deref()
                    .is_none_or(|needle| contains_ci(&g.name, needle))
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(paginate(items, page))
    }

    async fn get_genre_by_slug(&self, slug: &str) -> Option<Genre> {
        let store = self.store.lock().unwrap();
        store.genres.iter().find(|g| g.slug == slug).cloned()
    }

    async fn create_genre(&self, name: &str, slug: &str) -> Result<Genre, ApiError> {
        let mut store = self.store.lock().unwrap();
        if store.genres.iter().any(|g| g.slug == slug) {
            return Err(ApiError::validation("slug", "This slug is already in use."));
        }
        if store.genres.iter().any(|g| g.name == name) {
            return Err(ApiError::validation("name", "This name is already in use."));
        }
        let genre = Genre {
            id: store.next_id(),
            name: name.to_string(),
            slug: slug.to_string(),
        };
        store.genres.push(genre.clone());
        Ok(genre)
    }

    async fn delete_genre(&self, slug: &str) -> Result<bool, ApiError> {
        let mut store = self.store.lock().unwrap();
        let Some(genre) = store.genres.iter().find(|g| g.slug == slug).cloned() else {
            return Ok(false);
        };
        store.genres.retain(|g| g.id != genre.id);
        store.title_genres.retain(|(_, genre_id)| *genre_id != genre.id);
        Ok(true)
    }

    async fn list_titles(
        &self,
        filter: TitleFilter,
        page: PageParams,
    ) -> Result<Page<Title>, ApiError> {
        let store = self.store.lock().unwrap();
        let mut titles: Vec<Title> = store
            .titles
            .iter()
            .map(|t| store.build_title(t))
            .filter(|t| {
                filter.category.as_deref().is_none_or(|slug| {
                    t.category.as_ref().is_some_and(|c| c.slug == slug)
                })
            })
            .filter(|t| {
                filter
                    .genre
                    .as_deref()
                    .is_none_or(|slug| t.genre.iter().any(|g| g.slug == slug))
            })
            .filter(|t| {
                filter
                    .name
                    .as_deref()
                    .is_none_or(|needle| contains_ci(&t.name, needle))
            })
            .filter(|t| filter.year.is_none_or(|year| t.year == year))
            .collect();
        titles.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(paginate(titles, page))
    }

    async fn get_title(&self, id: i64) -> Option<Title> {
        let store = self.store.lock().unwrap();
        store
            .titles
            .iter()
            .find(|t| t.id == id)
            .map(|t| store.build_title(t))
    }

    async fn create_title(&self, new: NewTitle) -> Result<Title, ApiError> {
        let mut store = self.store.lock().unwrap();
        let id = store.next_id();
        store.titles.push(StoredTitle {
            id,
            name: new.name,
            year: new.year,
            description: new.description,
            category_id: new.category_id,
        });
        for genre_id in new.genre_ids {
            if !store.title_genres.contains(&(id, genre_id)) {
                store.title_genres.push((id, genre_id));
            }
        }
        let stored = store.titles.last().cloned().unwrap();
        Ok(store.build_title(&stored))
    }

    async fn update_title(&self, id: i64, patch: TitlePatch) -> Result<Option<Title>, ApiError> {
        let mut store = self.store.lock().unwrap();
        let Some(index) = store.titles.iter().position(|t| t.id == id) else {
            return Ok(None);
        };
        {
            let title = &mut store.titles[index];
            if let Some(v) = patch.name {
                title.name = v;
            }
            if let Some(v) = patch.year {
                title.year = v;
            }
            if let Some(v) = patch.description {
                title.description = Some(v);
            }
            if let Some(v) = patch.category_id {
                title.category_id = Some(v);
            }
        }
        if let Some(genre_ids) = patch.genre_ids {
            store.title_genres.retain(|(title_id, _)| *title_id != id);
            for genre_id in genre_ids {
                store.title_genres.push((id, genre_id));
            }
        }
        let stored = store.titles[index].clone();
        Ok(Some(store.build_title(&stored)))
    }

    async fn delete_title(&self, id: i64) -> Result<bool, ApiError> {
        let mut store = self.store.lock().unwrap();
        if !store.titles.iter().any(|t| t.id == id) {
            return Ok(false);
        }
        store.titles.retain(|t| t.id != id);
        store.title_genres.retain(|(title_id, _)| *title_id != id);
        let review_ids: Vec<i64> = store
            .reviews
            .iter()
            .filter(|r| r.title_id == id)
            .map(|r| r.id)
            .collect();
        for review_id in review_ids {
            store.drop_review(review_id);
        }
        Ok(true)
    }

    async fn list_reviews(
        &self,
        title_id: i64,
        page: PageParams,
    ) -> Result<Page<Review>, ApiError> {
        let store = self.store.lock().unwrap();
        let mut reviews: Vec<Review> = store
            .reviews
            .iter()
            .filter(|r| r.title_id == title_id)
            .map(|r| store.build_review(r))
            .collect();
        reviews.sort_by_key(|r| r.pub_date);
        Ok(paginate(reviews, page))
    }

    async fn get_review(&self, title_id: i64, review_id: i64) -> Option<Review> {
        let store = self.store.lock().unwrap();
        store
            .reviews
            .iter()
            .find(|r| r.id == review_id && r.title_id == title_id)
            .map(|r| store.build_review(r))
    }

    async fn review_exists(&self, title_id: i64, author_id: Uuid) -> bool {
        let store = self.store.lock().unwrap();
        store
            .reviews
            .iter()
            .any(|r| r.title_id == title_id && r.author_id == author_id)
    }

    async fn create_review(
        &self,
        title_id: i64,
        author_id: Uuid,
        text: &str,
        score: i32,
    ) -> Result<Review, ApiError> {
        let mut store = self.store.lock().unwrap();
        // Storage-level unique (title, author), backing up the handler check.
        if store
            .reviews
            .iter()
            .any(|r| r.title_id == title_id && r.author_id == author_id)
        {
            return Err(ApiError::validation(
                "non_field_errors",
                "You have already reviewed this title.",
            ));
        }
        let review = StoredReview {
            id: store.next_id(),
            title_id,
            author_id,
            text: text.to_string(),
            score,
            pub_date: Utc::now(),
        };
        store.reviews.push(review.clone());
        Ok(store.build_review(&review))
    }

    async fn update_review(
        &self,
        review_id: i64,
        text: Option<String>,
        score: Option<i32>,
    ) -> Result<Option<Review>, ApiError> {
        let mut store = self.store.lock().unwrap();
        let Some(index) = store.reviews.iter().position(|r| r.id == review_id) else {
            return Ok(None);
        };
        {
            let review = &mut store.reviews[index];
            if let Some(v) = text {
                review.text = v;
            }
            if let Some(v) = score {
                review.score = v;
            }
        }
        let stored = store.reviews[index].clone();
        Ok(Some(store.build_review(&stored)))
    }

    async fn delete_review(&self, review_id: i64) -> Result<bool, ApiError> {
        let mut store = self.store.lock().unwrap();
        if !store.reviews.iter().any(|r| r.id == review_id) {
            return Ok(false);
        }
        store.drop_review(review_id);
        Ok(true)
    }

    async fn list_comments(
        &self,
        review_id: i64,
        page: PageParams,
    ) -> Result<Page<Comment>, ApiError> {
        let store = self.store.lock().unwrap();
        let mut comments: Vec<Comment> = store
            .comments
            .iter()
            .filter(|c| c.review_id == review_id)
            .map(|c| store.build_comment(c))
            .collect();
        comments.sort_by_key(|c| c.pub_date);
        Ok(paginate(comments, page))
    }

    async fn get_comment(&self, review_id: i64, comment_id: i64) -> Option<Comment> {
        let store = self.store.lock().unwrap();
        store
            .comments
            .iter()
            .find(|c| c.id == comment_id && c.review_id == review_id)
            .map(|c| store.build_comment(c))
    }

    async fn create_comment(
        &self,
        review_id: i64,
        author_id: Uuid,
        text: &str,
    ) -> Result<Comment, ApiError> {
        let mut store = self.store.lock().unwrap();
        let comment = StoredComment {
            id: store.next_id(),
            review_id,
            author_id,
            text: text.to_string(),
            pub_date: Utc::now(),
        };
        store.comments.push(comment.clone());
        Ok(store.build_comment(&comment))
    }

    async fn update_comment(
        &self,
        comment_id: i64,
        text: Option<String>,
    ) -> Result<Option<Comment>, ApiError> {
        let mut store = self.store.lock().unwrap();
        let Some(index) = store.comments.iter().position(|c| c.id == comment_id) else {
            return Ok(None);
        };
        if let Some(v) = text {
            store.comments[index].text = v;
        }
        let stored = store.comments[index].clone();
        Ok(Some(store.build_comment(&stored)))
    }

    async fn delete_comment(&self, comment_id: i64) -> Result<bool, ApiError> {
        let mut store = self.store.lock().unwrap();
        let before = store.comments.len();
        store.comments.retain(|c| c.id != comment_id);
        Ok(store.comments.len() < before)
    }
}

// --- Test application harness ---

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub repo: InMemoryRepository,
    pub mailer: MockMailer,
}

/// Boots the real router over a random local port with the in-memory
/// repository and the mock mailer behind it.
pub async fn spawn_app() -> TestApp {
    let repo = InMemoryRepository::new();
    let mailer = MockMailer::new();

    let state = AppState {
        repo: Arc::new(repo.clone()) as RepositoryState,
        mailer: Arc::new(mailer.clone()) as MailerState,
        config: AppConfig::default(),
    };
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        address,
        client: reqwest::Client::new(),
        repo,
        mailer,
    }
}

impl TestApp {
    /// Seeds an active user with the given role and returns the stored record.
    pub async fn seed_user(&self, username: &str, role: Role) -> User {
        self.repo
            .create_user(CreateUserRequest {
                username: username.to_string(),
                email: format!("{username}@example.com"),
                first_name: String::new(),
                last_name: String::new(),
                bio: String::new(),
                role: Some(role),
            })
            .await
            .expect("seed user")
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }
}
