//! Session state: identity, transcript storage and eviction.

pub mod identity;
pub mod store;
pub mod sweeper;

pub use identity::{ResolvedSession, SESSION_COOKIE, SessionResolver, token_from_cookie_header};
pub use store::{ConversationStore, SessionGuard};
pub use sweeper::{SessionSweeper, SweepStats, SweeperConfig};
