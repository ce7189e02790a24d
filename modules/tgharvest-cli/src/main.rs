mod cli;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use telegram_gateway::GatewayClient;
use tgharvest_common::file_config::{load_config, save_config};
use tgharvest_common::{parse_member_list, AppConfig, FetchParams, FileConfig};
use tgharvest_engine::{
    parse_hydrate_input, Dispatcher, GatewaySource, Group, GroupHandle, GroupStore, HarvestError,
    Harvester, MessageSource, SystemClock,
};

use cli::{Cli, Command, GroupCommand};

const DEBUG_LOG_PATH: &str = "tgharvest.log.json";

/// Exit status for conditions no retry will fix.
const FATAL_EXIT: u8 = 127;

#[derive(Debug, Error)]
#[error("No config at {0}. Run `tgharvest configure` first or pass --config <path>")]
struct MissingConfig(PathBuf);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.debug) {
        eprintln!("Failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            if is_fatal(&e) {
                ExitCode::from(FATAL_EXIT)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.is::<MissingConfig>()
            || cause
                .downcast_ref::<HarvestError>()
                .is_some_and(HarvestError::is_account_fatal)
    })
}

fn init_tracing(debug: bool) -> Result<()> {
    let default_level = if debug {
        "tgharvest=debug,telegram_gateway=debug"
    } else {
        "tgharvest=info,telegram_gateway=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))?;

    let json_layer = if debug {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(DEBUG_LOG_PATH)
            .with_context(|| format!("Failed to open {DEBUG_LOG_PATH}"))?;
        Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file)),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(json_layer)
        .try_init()?;
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Configure {
            url,
            session,
            data_dir,
            force,
        } => configure(&cli.config, &url, &session, data_dir, force),

        Command::Get { channels, fetch } => {
            let config = read_config(&cli.config)?;
            let outcomes = dispatcher(&config)?
                .get(&channels, &fetch.to_params())
                .await?;
            info!(channels = outcomes.len(), "Get complete");
            Ok(())
        }

        Command::Hydrate { input, output } => {
            let config = read_config(&cli.config)?;
            let content = read_input(&input)?;
            let requests = parse_hydrate_input(&content);
            let dispatcher = dispatcher(&config)?;
            let written = if output == "-" {
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                dispatcher.hydrate(&requests, &mut out).await?
            } else {
                let mut out = std::io::BufWriter::new(
                    std::fs::File::create(&output)
                        .with_context(|| format!("Failed to create {output}"))?,
                );
                dispatcher.hydrate(&requests, &mut out).await?
            };
            info!(channels = requests.len(), written, "Hydrate complete");
            Ok(())
        }

        Command::Search { queries } => {
            let config = read_config(&cli.config)?;
            dispatcher(&config)?.search(&queries).await?;
            Ok(())
        }

        Command::Group { command } => {
            let config = read_config(&cli.config)?;
            let store = GroupStore::new(&config.harvest.data_dir);
            match command {
                GroupCommand::Init {
                    name,
                    accounts,
                    read_file,
                    start_date,
                    limit,
                } => init_group(&store, name, accounts, read_file, start_date, limit),
                GroupCommand::Run { groups } => run_groups(&config, store, &groups).await,
                GroupCommand::Reset { groups } => reset_groups(&store, &groups),
            }
        }
    }
}

async fn run_groups(config: &FileConfig, store: GroupStore, groups: &[String]) -> Result<()> {
    for name in groups {
        if !store.exists(name) {
            anyhow::bail!("Unknown group {name}");
        }
    }
    let harvester = Harvester::new(source(config)?, store, Arc::new(SystemClock));
    for name in groups {
        let report = harvester
            .run_group(name)
            .await
            .with_context(|| format!("Harvest of group {name} failed"))?;
        info!(group = name.as_str(), records = report.records(), "Group done");
    }
    Ok(())
}

fn reset_groups(store: &GroupStore, groups: &[String]) -> Result<()> {
    for name in groups {
        let mut group = GroupHandle::open(store, name, Arc::new(SystemClock))?;
        let restored = group.retry_all()?;
        info!(group = name.as_str(), restored, "Reset group");
    }
    Ok(())
}

fn configure(
    path: &Path,
    url: &str,
    session: &str,
    data_dir: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists, pass --force to replace it", path.display());
    }
    let mut config = FileConfig::new(url.to_string(), session.to_string());
    if let Some(dir) = data_dir {
        config.harvest.data_dir = dir;
    }
    save_config(path, &config)?;
    info!(path = %path.display(), url, session, "Wrote config");
    Ok(())
}

fn read_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Err(MissingConfig(path.to_path_buf()).into());
    }
    load_config(path)
}

fn source(config: &FileConfig) -> Result<Arc<dyn MessageSource>> {
    let secrets = AppConfig::from_env();
    let client = GatewayClient::new(
        &config.gateway.url,
        &config.gateway.session,
        secrets.gateway_token,
        Duration::from_secs(config.gateway.timeout_secs),
        config.gateway.page_size,
    )
    .context("Failed to build gateway client")?;
    Ok(Arc::new(GatewaySource::new(
        client,
        config.harvest.default_rate_limit_secs,
    )))
}

fn dispatcher(config: &FileConfig) -> Result<Dispatcher> {
    Ok(Dispatcher::new(
        source(config)?,
        ".",
        Duration::from_secs(config.harvest.flood_sleep_threshold_secs),
    ))
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("Failed to read stdin")?;
        return Ok(content);
    }
    std::fs::read_to_string(input).with_context(|| format!("Failed to read {input}"))
}

fn init_group(
    store: &GroupStore,
    name: String,
    accounts: Vec<String>,
    read_file: Option<PathBuf>,
    start_date: Option<chrono::DateTime<chrono::Utc>>,
    limit: Option<u32>,
) -> Result<()> {
    let mut members = parse_member_list(&accounts.join("\n"));
    if let Some(path) = read_file {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read account list {}", path.display()))?;
        members.extend(parse_member_list(&content));
    }

    let params = FetchParams {
        offset_date: start_date,
        limit,
        reverse: Some(true),
        ..Default::default()
    };
    let group = Group::new(name, members, params);
    store.create(&group)?;
    Ok(())
}
