//! Single-use confirmation tokens for side-effecting tools.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, Utc};
use palaver_core::ConfirmationRequest;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

struct Pending {
    tool_id: String,
    args_hash: String,
    request: ConfirmationRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redemption {
    Accepted,
    Expired,
    /// Never issued, already used, or issued for a different call
    Invalid,
}

/// Issues tokens bound to one `(tool_id, arguments)` pair and redeems each
/// at most once.
pub struct ConfirmationStore {
    ttl: Duration,
    pending: HashMap<String, Pending>,
    /// Tokens the user confirmed out of band, waiting for the call to recur
    presented: HashSet<String>,
}

impl ConfirmationStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::seconds(i64::from(u32::try_from(ttl_secs).unwrap_or(u32::MAX))),
            pending: HashMap::new(),
            presented: HashSet::new(),
        }
    }

    pub fn issue(&mut self, tool_id: &str, args_hash: &str, args: &Value) -> ConfirmationRequest {
        self.purge_expired();
        let request = ConfirmationRequest {
            token: Uuid::new_v4().to_string(),
            preview: preview(tool_id, args),
            expires_at: Utc::now() + self.ttl,
        };
        debug!(tool_id, token = %request.token, "issued confirmation token");
        self.pending.insert(
            request.token.clone(),
            Pending {
                tool_id: tool_id.to_string(),
                args_hash: args_hash.to_string(),
                request: request.clone(),
            },
        );
        request
    }

    /// Record that the user confirmed `token`. The next matching call uses it.
    /// Tokens that were never issued, or have expired, are dropped.
    pub fn present(&mut self, token: impl Into<String>) {
        self.presented.insert(token.into());
        self.purge_expired();
    }

    /// A presented token that was issued for exactly this call, if any.
    pub fn presented_for(&self, tool_id: &str, args_hash: &str) -> Option<String> {
        self.presented
            .iter()
            .find(|token| {
                self.pending
                    .get(*token)
                    .is_some_and(|p| p.tool_id == tool_id && p.args_hash == args_hash)
            })
            .cloned()
    }

    pub fn redeem(&mut self, token: &str, tool_id: &str, args_hash: &str) -> Redemption {
        self.presented.remove(token);
        let Some(pending) = self.pending.get(token) else {
            return Redemption::Invalid;
        };
        if pending.tool_id != tool_id || pending.args_hash != args_hash {
            return Redemption::Invalid;
        }
        let expired = Utc::now() >= pending.request.expires_at;
        self.pending.remove(token);
        if expired {
            Redemption::Expired
        } else {
            Redemption::Accepted
        }
    }

    fn purge_expired(&mut self) {
        let now = Utc::now();
        self.pending.retain(|_, p| p.request.expires_at > now);
        let pending = &self.pending;
        self.presented.retain(|token| pending.contains_key(token));
    }
}

/// `send_contact_request(email="a@b.c", name="Ada")`, keys sorted.
fn preview(tool_id: &str, args: &Value) -> String {
    let Some(obj) = args.as_object() else {
        return format!("{tool_id}()");
    };
    let mut keys: Vec<&String> = obj.keys().collect();
    keys.sort();
    let parts: Vec<String> = keys
        .into_iter()
        .map(|k| format!("{k}={}", obj[k.as_str()]))
        .collect();
    format!("{tool_id}({})", parts.join(", "))
}
