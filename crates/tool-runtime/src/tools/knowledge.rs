//! Knowledge base access used by the retrieval tools.

use std::time::Duration;

use async_trait::async_trait;
use palaver_core::config::KnowledgeConfig;
use palaver_core::{ErrorType, ToolError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub id: String,
    pub title: String,
    pub snippet: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("Knowledge service unavailable: {0}")]
    Unavailable(String),
    #[error("Knowledge service rate limited")]
    RateLimited,
    #[error("Knowledge service rejected the request: {0}")]
    Rejected(String),
}

impl From<KnowledgeError> for ToolError {
    fn from(e: KnowledgeError) -> Self {
        let error_type = match e {
            KnowledgeError::Unavailable(_) => ErrorType::Transient,
            KnowledgeError::RateLimited => ErrorType::RateLimit,
            KnowledgeError::Rejected(_) => ErrorType::Permanent,
        };
        ToolError::new(error_type, e.to_string())
    }
}

#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        section: Option<&str>,
    ) -> Result<Vec<KnowledgeHit>, KnowledgeError>;

    async fn document(&self, id: &str) -> Result<Option<KnowledgeDocument>, KnowledgeError>;
}

/// Client for an external search service:
/// `POST {base}/search` and `GET {base}/documents/{id}`.
pub struct HttpKnowledgeIndex {
    client: reqwest::Client,
    base_url: String,
}

impl HttpKnowledgeIndex {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, KnowledgeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KnowledgeError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// `None` when no search URL is configured.
    pub fn from_config(config: &KnowledgeConfig) -> Result<Option<Self>, KnowledgeError> {
        config
            .search_url
            .as_deref()
            .map(|url| Self::new(url, Duration::from_millis(config.timeout_ms)))
            .transpose()
    }

    fn classify(status: reqwest::StatusCode, body: String) -> KnowledgeError {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            KnowledgeError::RateLimited
        } else if status.is_server_error() {
            KnowledgeError::Unavailable(format!("{status}: {body}"))
        } else {
            KnowledgeError::Rejected(format!("{status}: {body}"))
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<KnowledgeHit>,
}

fn transport_error(e: reqwest::Error) -> KnowledgeError {
    KnowledgeError::Unavailable(e.to_string())
}

#[async_trait]
impl KnowledgeIndex for HttpKnowledgeIndex {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        section: Option<&str>,
    ) -> Result<Vec<KnowledgeHit>, KnowledgeError> {
        let url = format!("{}/search", self.base_url);
        debug!(url = %url, query, top_k, "knowledge search");
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "query": query, "top_k": top_k, "section": section }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify(status, body));
        }
        let parsed: SearchResponse = resp.json().await.map_err(transport_error)?;
        Ok(parsed.hits)
    }

    async fn document(&self, id: &str) -> Result<Option<KnowledgeDocument>, KnowledgeError> {
        let url = format!("{}/documents/{id}", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(transport_error)?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify(status, body));
        }
        resp.json().await.map(Some).map_err(transport_error)
    }
}

/// Term-overlap search over a fixed document set. Used when no search
/// service is configured, and in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKnowledgeIndex {
    documents: Vec<KnowledgeDocument>,
}

impl InMemoryKnowledgeIndex {
    pub fn new(documents: Vec<KnowledgeDocument>) -> Self {
        Self { documents }
    }
}

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn snippet(body: &str) -> String {
    const MAX: usize = 160;
    match body.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}

#[async_trait]
impl KnowledgeIndex for InMemoryKnowledgeIndex {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        section: Option<&str>,
    ) -> Result<Vec<KnowledgeHit>, KnowledgeError> {
        let wanted = terms(query);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits: Vec<KnowledgeHit> = self
            .documents
            .iter()
            .filter(|d| section.is_none() || d.section.as_deref() == section)
            .filter_map(|doc| {
                let have = terms(&format!("{} {}", doc.title, doc.body));
                let matched = wanted.iter().filter(|t| have.contains(t)).count();
                (matched > 0).then(|| KnowledgeHit {
                    id: doc.id.clone(),
                    title: doc.title.clone(),
                    snippet: snippet(&doc.body),
                    score: matched as f32 / wanted.len() as f32,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn document(&self, id: &str) -> Result<Option<KnowledgeDocument>, KnowledgeError> {
        Ok(self.documents.iter().find(|d| d.id == id).cloned())
    }
}

#[cfg(test)]
pub(crate) fn sample_index() -> InMemoryKnowledgeIndex {
    InMemoryKnowledgeIndex::new(vec![
        KnowledgeDocument {
            id: "pricing".to_string(),
            title: "Pricing plans".to_string(),
            body: "The team plan costs 20 euros per seat per month.".to_string(),
            section: Some("sales".to_string()),
        },
        KnowledgeDocument {
            id: "support-hours".to_string(),
            title: "Support hours".to_string(),
            body: "Support is available on weekdays from 9 to 17.".to_string(),
            section: Some("support".to_string()),
        },
    ])
}
