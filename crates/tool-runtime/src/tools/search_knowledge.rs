use std::sync::Arc;

use async_trait::async_trait;
use palaver_core::{ToolError, ToolOutcome};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::knowledge::KnowledgeIndex;
use crate::context::ExecutionContext;
use crate::handler::ToolHandler;

#[derive(Deserialize)]
struct Args {
    query: String,
    top_k: usize,
    #[serde(default)]
    section: Option<String>,
}

/// Searches the knowledge base. An empty result is a success with no hits.
pub struct SearchKnowledgeHandler {
    index: Arc<dyn KnowledgeIndex>,
}

impl SearchKnowledgeHandler {
    pub fn new(index: Arc<dyn KnowledgeIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl ToolHandler for SearchKnowledgeHandler {
    async fn call(&self, args: Value, ctx: &ExecutionContext) -> anyhow::Result<ToolOutcome> {
        let args: Args = serde_json::from_value(args)?;
        debug!(session_id = %ctx.session_id, query = %args.query, top_k = args.top_k, "searching knowledge");

        match self
            .index
            .search(&args.query, args.top_k, args.section.as_deref())
            .await
        {
            Ok(hits) => Ok(ToolOutcome::ok(json!({
                "query": args.query,
                "count": hits.len(),
                "hits": hits,
            }))),
            Err(e) => Ok(ToolOutcome::fail(ToolError::from(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::knowledge::sample_index;
    use palaver_core::Mode;

    fn ctx() -> ExecutionContext {
        ExecutionContext::detached("search_knowledge", Mode::Voice)
    }

    #[tokio::test]
    async fn returns_hits() {
        let handler = SearchKnowledgeHandler::new(Arc::new(sample_index()));
        let outcome = handler
            .call(json!({"query": "support hours", "top_k": 3}), &ctx())
            .await
            .unwrap();
        match outcome {
            ToolOutcome::Success { data: Some(data), .. } => {
                assert_eq!(data["count"], 1);
                assert_eq!(data["hits"][0]["id"], "support-hours");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_hits_is_still_success() {
        let handler = SearchKnowledgeHandler::new(Arc::new(sample_index()));
        let outcome = handler
            .call(json!({"query": "zebra", "top_k": 3}), &ctx())
            .await
            .unwrap();
        assert!(matches!(outcome, ToolOutcome::Success { .. }));
    }
}
