pub mod config;
pub mod file_config;
pub mod members;
pub mod types;

pub use config::AppConfig;
pub use file_config::{FileConfig, GatewayConfig, HarvestConfig};
pub use members::{normalize_member, parse_member_list};
pub use types::*;
