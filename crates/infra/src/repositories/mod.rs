mod memory;
mod surreal;

pub use memory::{InMemoryConversationRepository, InMemoryDiscussionRepository};
pub use surreal::{SurrealConversationRepository, SurrealDiscussionRepository};
