use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(String),

    /// A Telegram RPC error relayed by the gateway, e.g. `420 FLOOD_WAIT_35`.
    #[error("RPC error {code}: {name}")]
    Rpc { code: u16, name: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl GatewayError {
    /// The RPC error name with any numeric suffix removed
    /// (`FLOOD_WAIT_35` -> `FLOOD_WAIT`).
    pub fn rpc_name(&self) -> Option<&str> {
        match self {
            GatewayError::Rpc { name, .. } => Some(match split_wait_suffix(name) {
                Some((base, _)) => base,
                None => name.as_str(),
            }),
            _ => None,
        }
    }

    /// Seconds the platform asked us to wait, for `*_WAIT_<n>` errors.
    pub fn wait_seconds(&self) -> Option<u64> {
        match self {
            GatewayError::Rpc { name, .. } => split_wait_suffix(name).map(|(_, secs)| secs),
            _ => None,
        }
    }

    /// HTTP-ish status code, if the gateway answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Rpc { code, .. } => Some(*code),
            GatewayError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn split_wait_suffix(name: &str) -> Option<(&str, u64)> {
    let (base, secs) = name.rsplit_once('_')?;
    let secs = secs.parse().ok()?;
    base.ends_with("WAIT").then_some((base, secs))
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc(code: u16, name: &str) -> GatewayError {
        GatewayError::Rpc {
            code,
            name: name.to_string(),
        }
    }

    #[test]
    fn flood_wait_carries_seconds() {
        let err = rpc(420, "FLOOD_WAIT_35");
        assert_eq!(err.rpc_name(), Some("FLOOD_WAIT"));
        assert_eq!(err.wait_seconds(), Some(35));
        assert_eq!(err.status(), Some(420));
    }

    #[test]
    fn names_without_wait_suffix_are_untouched() {
        let err = rpc(400, "USERNAME_NOT_OCCUPIED");
        assert_eq!(err.rpc_name(), Some("USERNAME_NOT_OCCUPIED"));
        assert_eq!(err.wait_seconds(), None);

        let err = rpc(400, "PHOTO_INVALID_DIMENSIONS_2");
        assert_eq!(err.rpc_name(), Some("PHOTO_INVALID_DIMENSIONS_2"));
        assert_eq!(err.wait_seconds(), None);
    }

    #[test]
    fn network_errors_have_no_rpc_name() {
        let err = GatewayError::Network("connection refused".into());
        assert_eq!(err.rpc_name(), None);
        assert_eq!(err.status(), None);
    }
}
