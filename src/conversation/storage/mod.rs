//! Storage backends for conversations.

pub mod conversation_store;
pub mod sqlite_store;

pub use conversation_store::{ConversationStore, InMemoryConversationStore, StoreFuture};
pub use sqlite_store::SqliteConversationStore;
