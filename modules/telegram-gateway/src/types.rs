use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which messages to iterate. Exactly one of `entity`, `ids` (with
/// `entity`) or `search` drives the request; the rest are bounds.
#[derive(Debug, Clone, Default)]
pub struct HistoryRequest {
    /// Canonical id or handle of the chat to read.
    pub entity: Option<String>,
    /// Fetch exactly these message ids from `entity`.
    pub ids: Vec<i64>,
    /// Global search query (no `entity`).
    pub search: Option<String>,
    /// Total number of messages to yield. `None` reads everything.
    pub limit: Option<u32>,
    pub offset_date: Option<DateTime<Utc>>,
    pub offset_id: Option<i64>,
    pub min_id: Option<i64>,
    pub max_id: Option<i64>,
    pub add_offset: Option<i64>,
    pub from_user: Option<String>,
    pub reverse: bool,
    pub reply_to: Option<i64>,
}

/// Query string for one page of `GET /messages`.
#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct HistoryQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add_offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_user: Option<String>,
    pub reverse: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<i64>,
}

impl HistoryQuery {
    pub(crate) fn first_page(request: &HistoryRequest, page_size: u32) -> Self {
        let ids = (!request.ids.is_empty()).then(|| {
            request
                .ids
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(",")
        });
        Self {
            entity: request.entity.clone(),
            ids,
            search: request.search.clone(),
            limit: page_limit(request.limit, page_size),
            offset_date: request.offset_date.map(|d| d.to_rfc3339()),
            offset_id: request.offset_id,
            min_id: request.min_id,
            max_id: request.max_id,
            add_offset: request.add_offset,
            from_user: request.from_user.clone(),
            reverse: request.reverse,
            reply_to: request.reply_to,
        }
    }
}

/// Page size for the next request given what is left of the total limit.
pub(crate) fn page_limit(remaining: Option<u32>, page_size: u32) -> u32 {
    let page_size = page_size.max(1);
    remaining.map_or(page_size, |r| r.min(page_size))
}

/// One page of messages. `next_offset_id` is absent on the last page.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessagePage {
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub next_offset_id: Option<i64>,
}

/// Error body the gateway relays for Telegram RPC failures.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RpcErrorBody {
    pub error_code: u16,
    pub error_message: String,
}
