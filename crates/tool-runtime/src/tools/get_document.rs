use std::sync::Arc;

use async_trait::async_trait;
use palaver_core::{ToolError, ToolOutcome};
use serde::Deserialize;
use serde_json::{json, Value};

use super::knowledge::KnowledgeIndex;
use crate::context::ExecutionContext;
use crate::handler::ToolHandler;

#[derive(Deserialize)]
struct Args {
    document_id: String,
}

pub struct GetDocumentHandler {
    index: Arc<dyn KnowledgeIndex>,
}

impl GetDocumentHandler {
    pub fn new(index: Arc<dyn KnowledgeIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl ToolHandler for GetDocumentHandler {
    async fn call(&self, args: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolOutcome> {
        let args: Args = serde_json::from_value(args)?;
        let outcome = match self.index.document(&args.document_id).await {
            Ok(Some(doc)) => ToolOutcome::ok(json!(doc)),
            Ok(None) => ToolOutcome::fail(
                ToolError::permanent(format!("no document with id '{}'", args.document_id))
                    .with_details(json!({ "documentId": args.document_id })),
            ),
            Err(e) => ToolOutcome::fail(e.into()),
        };
        Ok(outcome)
    }
}
