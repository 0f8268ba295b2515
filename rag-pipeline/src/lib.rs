#![allow(clippy::missing_docs_in_private_items)]

pub mod chat;
pub mod chunker;
pub mod conversational;
pub mod extract;
pub mod service;

pub use chat::ChatProvider;
pub use conversational::{ConversationalQueryRequest, ConversationalRagService};
pub use service::{IngestOutcome, QueryRequest, QueryResponse, RagService, SourceDocument};
