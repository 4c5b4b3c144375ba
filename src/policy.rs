use uuid::Uuid;

use crate::error::ApiError;
use crate::models::User;

/// The standard CRUD verbs a policy is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    List,
    Retrieve,
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn is_read(self) -> bool {
        matches!(self, Self::List | Self::Retrieve)
    }
}

/// Policy
///
/// A pure allow/deny predicate over (actor, action, target-author), evaluated
/// before any data access. Handlers list one or more policies; a single grant
/// is sufficient (`authorize` ORs the list and short-circuits).
pub trait Policy: Send + Sync {
    fn allows(&self, actor: Option<&User>, action: Action, target_author: Option<Uuid>) -> bool;
}

/// Read-only verbs for anyone, including anonymous callers; everything else
/// denied.
pub struct AnonymousRead;

impl Policy for AnonymousRead {
    fn allows(&self, _actor: Option<&User>, action: Action, _target_author: Option<Uuid>) -> bool {
        action.is_read()
    }
}

/// Every verb requires admin-equivalence; anonymous callers are denied
/// outright.
pub struct AdminOnly;

impl Policy for AdminOnly {
    fn allows(&self, actor: Option<&User>, _action: Action, _target_author: Option<Uuid>) -> bool {
        actor.is_some_and(User::is_admin)
    }
}

/// Read-only verbs for anyone; mutations require admin-equivalence.
pub struct AdminOrReadOnly;

impl Policy for AdminOrReadOnly {
    fn allows(&self, actor: Option<&User>, action: Action, _target_author: Option<Uuid>) -> bool {
        action.is_read() || actor.is_some_and(User::is_admin)
    }
}

/// The review/comment policy: reads are open; creation needs any
/// authenticated actor (ownership is assigned, not checked); update/delete
/// need the target's author, a moderator, or an admin.
pub struct AdminModeratorAuthorOrReadOnly;

impl Policy for AdminModeratorAuthorOrReadOnly {
    fn allows(&self, actor: Option<&User>, action: Action, target_author: Option<Uuid>) -> bool {
        if action.is_read() {
            return true;
        }
        let Some(user) = actor else {
            return false;
        };
        match action {
            Action::Create => true,
            Action::Update | Action::Delete => {
                user.is_admin()
                    || user.is_moderator()
                    || target_author.is_some_and(|author| author == user.id)
            }
            Action::List | Action::Retrieve => true,
        }
    }
}

// Canonical per-resource policy lists.
pub static CATEGORY_ACCESS: &[&dyn Policy] = &[&AnonymousRead, &AdminOnly];
pub static GENRE_ACCESS: &[&dyn Policy] = &[&AnonymousRead, &AdminOnly];
pub static TITLE_ACCESS: &[&dyn Policy] = &[&AnonymousRead, &AdminOrReadOnly];
pub static REVIEW_ACCESS: &[&dyn Policy] = &[&AdminModeratorAuthorOrReadOnly];
pub static COMMENT_ACCESS: &[&dyn Policy] = &[&AdminModeratorAuthorOrReadOnly];
pub static USER_ADMIN_ACCESS: &[&dyn Policy] = &[&AdminOnly];

/// authorize
///
/// Evaluates a policy list with OR semantics, short-circuiting on the first
/// grant. Total denial maps to 401 for anonymous actors and 403 otherwise.
pub fn authorize(
    policies: &[&dyn Policy],
    actor: Option<&User>,
    action: Action,
    target_author: Option<Uuid>,
) -> Result<(), ApiError> {
    if policies.iter().any(|p| p.allows(actor, action, target_author)) {
        return Ok(());
    }
    if actor.is_none() {
        Err(ApiError::Unauthenticated)
    } else {
        Err(ApiError::PermissionDenied)
    }
}
