pub mod auth;
pub mod conversation;
pub mod delivery;
pub mod discussion;
pub mod error;
pub mod idempotency;
pub mod identity;
pub mod ports;
pub mod rooms;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
