pub mod error;
pub mod types;

pub use error::{GatewayError, Result};
pub use types::HistoryRequest;

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use types::{page_limit, HistoryQuery, MessagePage, RpcErrorBody};

/// Client for a self-hosted MTProto gateway. The gateway owns the
/// authorized Telegram session; this client only speaks its JSON API:
///
/// - `GET /v1/sessions/{session}/me`
/// - `GET /v1/sessions/{session}/entities/{identifier}`
/// - `GET /v1/sessions/{session}/messages?...` (paged by `next_offset_id`)
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    session: String,
    token: Option<String>,
    page_size: u32,
}

impl GatewayClient {
    pub fn new(
        base_url: &str,
        session: &str,
        token: Option<String>,
        timeout: Duration,
        page_size: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session: session.to_string(),
            token,
            page_size,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/sessions/{}/{}", self.base_url, self.session, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<&HistoryQuery>,
    ) -> Result<T> {
        let mut request = self.client.get(self.url(path));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(query) = query {
            request = request.query(query);
        }
        let resp = request.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<RpcErrorBody>(&body) {
                Ok(rpc) => GatewayError::Rpc {
                    code: rpc.error_code,
                    name: rpc.error_message,
                },
                Err(_) => GatewayError::Api {
                    status: status.as_u16(),
                    message: body,
                },
            });
        }

        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// The account the session is signed in as.
    pub async fn get_me(&self) -> Result<Value> {
        self.get_json("me", None).await
    }

    /// Look up a user, chat or channel by numeric id or handle.
    pub async fn get_entity(&self, identifier: &str) -> Result<Value> {
        tracing::debug!(identifier, "Resolving entity");
        self.get_json(&format!("entities/{identifier}"), None).await
    }

    async fn fetch_page(&self, query: &HistoryQuery) -> Result<MessagePage> {
        self.get_json("messages", Some(query)).await
    }

    /// Iterate messages page by page. The stream ends after the last page,
    /// after `request.limit` messages, or right after yielding an error.
    pub fn iter_messages(&self, request: HistoryRequest) -> BoxStream<'_, Result<Value>> {
        let query = HistoryQuery::first_page(&request, self.page_size);
        paginate(query, request.limit, self.page_size, move |query| async move {
            self.fetch_page(&query).await
        })
    }
}

/// Drive `fetch` one page at a time. After the first page the query moves
/// to `next_offset_id` and drops `add_offset`; an empty page or a missing
/// `next_offset_id` is the last page.
fn paginate<'a, F, Fut>(
    query: HistoryQuery,
    remaining: Option<u32>,
    page_size: u32,
    fetch: F,
) -> BoxStream<'a, Result<Value>>
where
    F: Fn(HistoryQuery) -> Fut + Send + 'a,
    Fut: Future<Output = Result<MessagePage>> + Send + 'a,
{
    let pager = Pager {
        fetch,
        query,
        page_size,
        remaining,
        buffer: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(pager, |mut pager| async move {
        loop {
            if pager.remaining == Some(0) {
                return None;
            }
            if let Some(message) = pager.buffer.pop_front() {
                if let Some(remaining) = pager.remaining.as_mut() {
                    *remaining -= 1;
                }
                return Some((Ok(message), pager));
            }
            if pager.exhausted {
                return None;
            }

            pager.query.limit = page_limit(pager.remaining, pager.page_size);
            match (pager.fetch)(pager.query.clone()).await {
                Ok(page) => {
                    tracing::debug!(
                        count = page.messages.len(),
                        next_offset_id = ?page.next_offset_id,
                        "Fetched message page"
                    );
                    match page.next_offset_id {
                        Some(next) if !page.messages.is_empty() => {
                            pager.query.offset_id = Some(next);
                            pager.query.add_offset = None;
                        }
                        _ => pager.exhausted = true,
                    }
                    pager.buffer.extend(page.messages);
                }
                Err(err) => {
                    pager.exhausted = true;
                    return Some((Err(err), pager));
                }
            }
        }
    })
    .boxed()
}

struct Pager<F> {
    fetch: F,
    query: HistoryQuery,
    page_size: u32,
    remaining: Option<u32>,
    buffer: VecDeque<Value>,
    exhausted: bool,
}
