//! Built-in tool handlers.
//!
//! Keys here match the `handler` field in each `tools/<name>/tool.yaml`.

pub mod contact_request;
pub mod end_session;
pub mod get_document;
pub mod knowledge;
pub mod search_knowledge;

use std::sync::Arc;

pub use contact_request::SendContactRequestHandler;
pub use end_session::EndSessionHandler;
pub use get_document::GetDocumentHandler;
pub use knowledge::{
    HttpKnowledgeIndex, InMemoryKnowledgeIndex, KnowledgeDocument, KnowledgeError, KnowledgeHit,
    KnowledgeIndex,
};
pub use search_knowledge::SearchKnowledgeHandler;

use crate::handler::HandlerTable;
use crate::registry::RegistryError;

pub const SEARCH_KNOWLEDGE: &str = "knowledge.search";
pub const GET_DOCUMENT: &str = "knowledge.get_document";
pub const SEND_CONTACT_REQUEST: &str = "contact.send_request";
pub const END_SESSION: &str = "session.end";

/// Handler table with every built-in tool, backed by `index`.
pub fn builtin_handlers(index: Arc<dyn KnowledgeIndex>) -> Result<HandlerTable, RegistryError> {
    let mut table = HandlerTable::new();
    table.register(SEARCH_KNOWLEDGE, SearchKnowledgeHandler::new(index.clone()))?;
    table.register(GET_DOCUMENT, GetDocumentHandler::new(index))?;
    table.register(SEND_CONTACT_REQUEST, SendContactRequestHandler)?;
    table.register(END_SESSION, EndSessionHandler)?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_is_registered() {
        let table = builtin_handlers(Arc::new(InMemoryKnowledgeIndex::default())).unwrap();
        for key in [SEARCH_KNOWLEDGE, GET_DOCUMENT, SEND_CONTACT_REQUEST, END_SESSION] {
            assert!(table.get(key).is_some(), "{key} missing");
        }
    }
}
