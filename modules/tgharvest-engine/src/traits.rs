// Trait boundary to the messaging platform.
//
// MessageSource is everything the engine needs from the platform: resolve an
// entity, identify the operating account, and stream messages. Errors cross
// the boundary as the closed SourceError set so the harvest loop can switch
// on kind. GatewaySource adapts telegram_gateway::GatewayClient to it;
// testing::MockSource stands in for tests.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use telegram_gateway::{GatewayClient, GatewayError, HistoryRequest};
use tgharvest_common::{EntityRef, FetchParams, MessageRecord, Profile};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Boundary types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The platform asked us to back off for `seconds`.
    #[error("rate limited, retry in {seconds}s")]
    RateLimited { seconds: u64 },

    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("entity is private: {0}")]
    Private(String),

    /// The account the harvester runs as is gone. Nothing else will work.
    #[error("operating account has been deactivated")]
    AccountDeactivated,

    /// The platform answered with an error we have no special handling for.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The platform could not be reached at all.
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// What to read.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageTarget {
    /// A chat's history, bounded by the query params.
    History(EntityRef),
    /// Specific messages of one chat.
    Ids { entity: EntityRef, ids: Vec<i64> },
    /// Global search across everything visible to the account.
    Search(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageQuery {
    pub target: MessageTarget,
    pub params: FetchParams,
}

impl MessageQuery {
    pub fn history(entity: EntityRef, params: FetchParams) -> Self {
        Self {
            target: MessageTarget::History(entity),
            params,
        }
    }
}

// ---------------------------------------------------------------------------
// MessageSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Resolve a handle or id to the entity's profile.
    async fn resolve_entity(&self, entity: &EntityRef) -> Result<Profile, SourceError>;

    /// Profile of the account the source is signed in as.
    async fn current_account(&self) -> Result<Profile, SourceError>;

    /// Stream matching messages. The stream ends after the first error.
    fn iter_messages(
        &self,
        query: MessageQuery,
    ) -> BoxStream<'_, Result<MessageRecord, SourceError>>;
}

// ---------------------------------------------------------------------------
// GatewaySource
// ---------------------------------------------------------------------------

/// `MessageSource` over the MTProto gateway.
pub struct GatewaySource {
    client: GatewayClient,
    default_wait_secs: u64,
}

impl GatewaySource {
    /// `default_wait_secs` is used for flood errors that carry no wait time.
    pub fn new(client: GatewayClient, default_wait_secs: u64) -> Self {
        Self {
            client,
            default_wait_secs,
        }
    }

    fn classify(&self, err: GatewayError) -> SourceError {
        classify_gateway_error(err, self.default_wait_secs)
    }
}

/// Map gateway failures onto the closed error set.
pub fn classify_gateway_error(err: GatewayError, default_wait_secs: u64) -> SourceError {
    if let Some(seconds) = err.wait_seconds() {
        return SourceError::RateLimited { seconds };
    }

    let name = err.rpc_name().unwrap_or_default().to_string();
    match name.as_str() {
        "FLOOD" | "FLOOD_WAIT" | "FLOOD_PREMIUM_WAIT" => {
            return SourceError::RateLimited {
                seconds: default_wait_secs,
            }
        }
        "USERNAME_NOT_OCCUPIED" | "USERNAME_INVALID" | "PEER_ID_INVALID" => {
            return SourceError::NotFound(name)
        }
        "CHANNEL_PRIVATE" | "CHANNEL_INVALID" | "CHAT_FORBIDDEN" => {
            return SourceError::Private(name)
        }
        n if n.starts_with("USER_DEACTIVATED")
            || n == "AUTH_KEY_UNREGISTERED"
            || n == "SESSION_REVOKED" =>
        {
            return SourceError::AccountDeactivated
        }
        _ => {}
    }

    match err {
        GatewayError::Rpc { code: 420, .. } => SourceError::RateLimited {
            seconds: default_wait_secs,
        },
        GatewayError::Api { status: 404, message } => SourceError::NotFound(message),
        GatewayError::Network(message) => SourceError::Unavailable(message),
        other => SourceError::Protocol(other.to_string()),
    }
}

fn history_request(query: MessageQuery) -> HistoryRequest {
    let params = query.params;
    let mut request = HistoryRequest {
        limit: params.limit,
        offset_date: params.offset_date,
        offset_id: params.offset_id,
        min_id: params.min_id,
        max_id: params.max_id,
        add_offset: params.add_offset,
        from_user: params.from_user,
        reverse: params.reverse.unwrap_or(false),
        reply_to: params.reply_to,
        ..Default::default()
    };
    match query.target {
        MessageTarget::History(entity) => request.entity = Some(entity.to_string()),
        MessageTarget::Ids { entity, ids } => {
            request.entity = Some(entity.to_string());
            request.ids = ids;
        }
        MessageTarget::Search(q) => request.search = Some(q),
    }
    request
}

fn into_record(value: Value) -> Result<MessageRecord, SourceError> {
    match value {
        Value::Object(record) => Ok(record),
        other => Err(SourceError::Protocol(format!(
            "expected a message object, got {other}"
        ))),
    }
}

fn into_profile(entity: Value) -> Result<Profile, SourceError> {
    Profile::from_entity(&entity)
        .ok_or_else(|| SourceError::Protocol("entity without a numeric id".to_string()))
}

#[async_trait]
impl MessageSource for GatewaySource {
    async fn resolve_entity(&self, entity: &EntityRef) -> Result<Profile, SourceError> {
        let raw = self
            .client
            .get_entity(&entity.to_string())
            .await
            .map_err(|e| self.classify(e))?;
        into_profile(raw)
    }

    async fn current_account(&self) -> Result<Profile, SourceError> {
        let raw = self.client.get_me().await.map_err(|e| self.classify(e))?;
        into_profile(raw)
    }

    fn iter_messages(
        &self,
        query: MessageQuery,
    ) -> BoxStream<'_, Result<MessageRecord, SourceError>> {
        self.client
            .iter_messages(history_request(query))
            .map(move |item| item.map_err(|e| self.classify(e)).and_then(into_record))
            .boxed()
    }
}
