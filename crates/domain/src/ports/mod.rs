use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod conversation;
pub mod db;
pub mod discussion;
pub mod idempotency;
pub mod items;
pub mod realtime;
