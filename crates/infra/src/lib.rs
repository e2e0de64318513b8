pub mod config;
pub mod db;
pub mod idempotency;
pub mod items;
pub mod logging;
pub mod realtime;
pub mod repositories;
