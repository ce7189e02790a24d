use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use tgharvest_common::file_config::DEFAULT_CONFIG_PATH;
use tgharvest_common::FetchParams;

#[derive(Parser, Debug)]
#[command(name = "tgharvest", about = "Resumable, rate-limit aware Telegram message harvester")]
pub struct Cli {
    /// Path to config TOML file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Verbose logging, plus JSON log lines in tgharvest.log.json
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a config file pointing at an MTProto gateway session
    Configure {
        #[arg(long)]
        url: String,
        #[arg(long)]
        session: String,
        /// Directory that holds group directories
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Replace an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Fetch channels into <id>.jsonl in the working directory
    Get {
        #[arg(required = true)]
        channels: Vec<String>,
        #[command(flatten)]
        fetch: FetchArgs,
    },

    /// Fetch posts listed as channel/post_id lines
    Hydrate {
        /// Input file, `-` for stdin
        #[arg(default_value = "-")]
        input: String,
        /// Output file, `-` for stdout
        #[arg(default_value = "-")]
        output: String,
    },

    /// Global search, results appended to <query>.jsonl
    Search {
        #[arg(required = true)]
        queries: Vec<String>,
    },

    /// Manage and run harvest groups
    Group {
        #[command(subcommand)]
        command: GroupCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum GroupCommand {
    /// Create a group from accounts and/or an account list file
    Init {
        name: String,
        accounts: Vec<String>,
        /// File with one handle, id or t.me link per line
        #[arg(long)]
        read_file: Option<PathBuf>,
        /// Only harvest messages from this date on (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        start_date: Option<DateTime<Utc>>,
        /// Maximum messages per member per pass
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Run one harvest pass per group, in order
    Run {
        #[arg(required = true)]
        groups: Vec<String>,
    },

    /// Return quarantined members to rotation
    Reset {
        #[arg(required = true)]
        groups: Vec<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Maximum number of messages, -1 for no limit
    #[arg(short = 'l', long, allow_negative_numbers = true)]
    pub limit: Option<i64>,
    /// Start from this date (YYYY-MM-DD or RFC 3339)
    #[arg(short = 'O', long, value_parser = parse_date)]
    pub offset_date: Option<DateTime<Utc>>,
    #[arg(short = 'o', long)]
    pub offset_id: Option<i64>,
    /// Only messages with a larger id
    #[arg(short = 'm', long)]
    pub min_id: Option<i64>,
    /// Only messages with a smaller id
    #[arg(short = 'M', long)]
    pub max_id: Option<i64>,
    #[arg(short = 'a', long, allow_negative_numbers = true)]
    pub add_offset: Option<i64>,
    /// Only messages sent by this user
    #[arg(short = 'f', long)]
    pub from_user: Option<String>,
    /// Oldest first (default)
    #[arg(long, overrides_with = "forward")]
    pub reverse: bool,
    /// Newest first
    #[arg(long, overrides_with = "reverse")]
    pub forward: bool,
    /// Only replies to this message id
    #[arg(short = 'r', long)]
    pub reply_to: Option<i64>,
}

impl FetchArgs {
    pub fn to_params(&self) -> FetchParams {
        FetchParams {
            limit: self.limit.and_then(|l| u32::try_from(l).ok()),
            offset_date: self.offset_date,
            offset_id: self.offset_id,
            min_id: self.min_id,
            max_id: self.max_id,
            add_offset: self.add_offset,
            from_user: self.from_user.clone(),
            reverse: Some(!self.forward),
            reply_to: self.reply_to,
        }
    }
}

pub fn parse_date(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(start) = date.and_hms_opt(0, 0, 0) {
            return Ok(start.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| format!("expected YYYY-MM-DD or an RFC 3339 timestamp, got {raw:?}"))
}
