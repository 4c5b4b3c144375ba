/// Router Module Index
///
/// Routing is segregated by access tier. The policy engine still runs inside
/// every handler; the tiers exist so the authentication middleware wraps
/// exactly the routes that need a resolved identity.

/// Routes accessible to anonymous callers: the auth flow and every read.
pub mod public;

/// Routes requiring a resolved identity: review/comment mutations and the
/// self-service profile.
pub mod authenticated;

/// Routes whose handlers demand admin-equivalence: catalog writes and user
/// administration.
pub mod admin;
