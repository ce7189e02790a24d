/// Secrets and environment-specific values. Everything else lives in the
/// TOML `FileConfig`.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Bearer token for the MTProto gateway.
    pub gateway_token: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let config = Self {
            gateway_token: std::env::var("TGHARVEST_GATEWAY_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
        };

        config.log_keys();
        config
    }

    fn log_keys(&self) {
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) => {
                    let head: String = v.chars().take(5).collect();
                    format!("{head}...({} chars)", v.len())
                }
                None => "<not set>".to_string(),
            }
        }

        tracing::debug!("  TGHARVEST_GATEWAY_TOKEN: {}", preview_opt(&self.gateway_token));
    }
}
