use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use histsync_core::analytics::{analyze_with_offset, summarize};
use histsync_core::config::{DEFAULT_MAX_TOTAL, FULL_FETCH_MAX_TOTAL};
use histsync_core::export::{stats_to_json, to_csv};
use histsync_core::filter::{data_summary, search, HistoryFilter, SearchOptions};
use histsync_core::{format::format_timestamp, Clock, HistoryFetcher, HistoryRecord, MemoryHistorySource, OperationResult, SystemClock};
use histsync_sync::settings::{
    ENCRYPT_ENABLED_KEY, ENCRYPT_KEY_KEY, SYNC_ENABLED_KEY, SYNC_FREQUENCY_KEY, WEBDAV_PASSWORD_KEY,
    WEBDAV_URL_KEY, WEBDAV_USERNAME_KEY,
};
use histsync_sync::{
    deduplicate, ConflictStrategy, DedupStrategy, JsonFileKvStore, KeyValueStore, RemoteEndpoint,
    SyncEngine, SyncScheduler, SyncSettings, SyncStateStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod input;
mod table;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    /// Table format (default)
    Table,
    /// Pretty JSON
    Json,
    /// CSV format
    Csv,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DedupArg {
    Url,
    Title,
    UrlAndTitle,
}

impl From<DedupArg> for DedupStrategy {
    fn from(arg: DedupArg) -> Self {
        match arg {
            DedupArg::Url => DedupStrategy::Url,
            DedupArg::Title => DedupStrategy::Title,
            DedupArg::UrlAndTitle => DedupStrategy::UrlAndTitle,
        }
    }
}

#[derive(Parser)]
#[command(name = "histsync")]
#[command(about = "Browser history fetch, analytics and WebDAV sync", long_about = None)]
struct Cli {
    /// Local state file (settings, last sync time, pending queue, cache)
    #[arg(long, global = true, env = "HISTSYNC_STATE")]
    state: Option<PathBuf>,

    /// Browser history dump (JSON array of items, or {items, visits})
    #[arg(long, global = true, env = "HISTSYNC_HISTORY")]
    history: Option<PathBuf>,

    /// Use a local directory as the remote instead of the configured WebDAV server
    #[arg(long, global = true)]
    remote_dir: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch history, optionally filtered
    Fetch {
        /// Only the last N days (0 = everything)
        #[arg(short, long, default_value = "0")]
        days: u32,
        /// Maximum number of records
        #[arg(short, long, default_value_t = DEFAULT_MAX_TOTAL)]
        max: usize,
        /// Keyword to search for in title, url and domain
        #[arg(short, long)]
        search: Option<String>,
        /// Match the keyword exactly
        #[arg(long)]
        exact: bool,
        /// Case-sensitive keyword match
        #[arg(long)]
        case_sensitive: bool,
        /// Only these domains
        #[arg(long = "domain")]
        domains: Vec<String>,
        /// Exclude these domains
        #[arg(long = "exclude-domain")]
        exclude_domains: Vec<String>,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        min_visits: Option<u32>,
        #[arg(long)]
        max_visits: Option<u32>,
        /// Collapse duplicates
        #[arg(long, value_enum)]
        dedup: Option<DedupArg>,
        /// Rows shown in table output
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Output format (table, json, csv)
        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },
    /// Usage statistics
    Report {
        /// Only the last N days (0 = everything)
        #[arg(short, long, default_value = "0")]
        days: u32,
        /// Offset from UTC in minutes for hour/day buckets
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        utc_offset_minutes: i32,
        /// Emit the JSON export instead of tables
        #[arg(long)]
        json: bool,
        /// Number of domains listed
        #[arg(long, default_value = "10")]
        top: usize,
    },
    /// Visit events for one URL
    Visits {
        url: String,
    },
    /// Sync settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Remote sync operations
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write default settings that are not set yet
    Init,
    /// Set one setting (webdavUrl, webdavUsername, webdavPassword, syncEnabled,
    /// syncFrequency, encryptEnabled, encryptKey)
    Set { key: String, value: String },
    /// Remove an optional setting
    Unset { key: String },
    /// Show the current settings
    Show,
}

#[derive(Subcommand)]
enum SyncCommands {
    /// Upload all history as the full snapshot
    UploadFull,
    /// Download the full snapshot into the local cache
    Download {
        /// Print the downloaded records as JSON
        #[arg(long)]
        print: bool,
    },
    /// Upload history since the last sync as a new increment
    UploadIncremental,
    /// Fold remote increments into the snapshot
    Merge,
    /// Resolve local history against the remote snapshot
    Reconcile {
        /// local-wins, remote-wins, latest-timestamp-wins, max-visit-count-wins, smart
        #[arg(short, long, default_value = "smart")]
        strategy: String,
    },
    /// Show local sync bookkeeping
    Status,
    /// Check that the remote is reachable
    Test,
    /// Forget the last sync time, pending queue and cache
    Reset,
    /// Run scheduled incremental uploads until interrupted
    Watch,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(run(cli))
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

struct AppContext {
    state_path: PathBuf,
    history: Option<PathBuf>,
    remote_dir: Option<PathBuf>,
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = AppContext {
        state_path: match cli.state {
            Some(path) => path,
            None => default_state_path()?,
        },
        history: cli.history,
        remote_dir: cli.remote_dir,
    };

    match cli.command {
        Commands::Fetch {
            days,
            max,
            search: keyword,
            exact,
            case_sensitive,
            domains,
            exclude_domains,
            from,
            to,
            min_visits,
            max_visits,
            dedup,
            limit,
            output,
        } => {
            let fetcher = HistoryFetcher::new(Arc::new(ctx.require_history()?));
            let outcome = fetcher.fetch_recent(days, max).await.context("Failed to fetch history")?;
            let mut records = outcome.records;

            if let Some(keyword) = keyword.filter(|k| !k.is_empty()) {
                let mut options = SearchOptions::default();
                if exact {
                    options = options.exact();
                }
                if case_sensitive {
                    options = options.case_sensitive();
                }
                records = search(&records, &keyword, &options);
            }

            let filter = HistoryFilter::new()
                .with_date_range(from.as_deref(), to.as_deref())
                .context("Invalid date range")?
                .with_domains(domains)
                .excluding_domains(exclude_domains)
                .with_visit_count_bounds(min_visits, max_visits);
            records = filter.apply(&records);

            if let Some(strategy) = dedup {
                records = deduplicate(&records, strategy.into());
            }

            print_records(&records, limit, output)?;
            if matches!(output, OutputFormat::Table) {
                println!();
                println!(
                    "Count: {}, Windows: {}, Saturated: {}, Failed: {}",
                    records.len(),
                    outcome.stats.windows_queried,
                    outcome.stats.saturated_windows,
                    outcome.stats.failed_windows
                );
            }
        }

        Commands::Report {
            days,
            utc_offset_minutes,
            json,
            top,
        } => {
            let fetcher = HistoryFetcher::new(Arc::new(ctx.require_history()?));
            let records = fetcher
                .fetch_recent(days, FULL_FETCH_MAX_TOTAL)
                .await
                .context("Failed to fetch history")?
                .records;

            let offset = chrono::FixedOffset::east_opt(utc_offset_minutes * 60)
                .ok_or_else(|| anyhow!("UTC offset out of range: {} minutes", utc_offset_minutes))?;
            let stats = analyze_with_offset(&records, offset);

            if json {
                println!("{}", stats_to_json(&stats, SystemClock.now_ms())?);
            } else {
                let summary = summarize(&stats);
                let data = data_summary(&records)?;
                println!("{}", table::format_summary_table(&stats, &summary));
                println!();
                println!("{}", table::format_domains_table(&stats.domain_stats[..top.min(stats.domain_stats.len())]));
                println!();
                println!("{}", table::format_hourly_table(&stats));
                println!();
                println!("Data size: {} ({} records)", data.size_formatted, data.total_records);
            }
        }

        Commands::Visits { url } => {
            let fetcher = HistoryFetcher::new(Arc::new(ctx.require_history()?));
            let visits = fetcher.visit_details(&url).await.context("Failed to load visits")?;
            println!("{}", table::format_visits_table(&visits));
        }

        Commands::Config { command } => handle_config_command(&ctx, command).await?,

        Commands::Sync { command } => handle_sync_command(&ctx, command).await?,
    }

    Ok(())
}

impl AppContext {
    fn require_history(&self) -> Result<MemoryHistorySource> {
        let path = self
            .history
            .as_ref()
            .ok_or_else(|| anyhow!("No history file given (use --history or HISTSYNC_HISTORY)"))?;
        input::load_history(path)
    }

    /// History when given; sync operations that only read the remote work without it.
    fn optional_history(&self) -> Result<MemoryHistorySource> {
        match &self.history {
            Some(path) => input::load_history(path),
            None => Ok(MemoryHistorySource::new()),
        }
    }

    async fn open_kv(&self) -> Result<Arc<JsonFileKvStore>> {
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let kv = JsonFileKvStore::open(&self.state_path)
            .await
            .with_context(|| format!("Failed to open state file {}", self.state_path.display()))?;
        Ok(Arc::new(kv))
    }

    async fn build_engine(&self, kv: Arc<JsonFileKvStore>) -> Result<SyncEngine> {
        let settings = SyncSettings::load(kv.as_ref()).await?;
        settings.validate()?;

        let endpoint = match &self.remote_dir {
            Some(dir) => RemoteEndpoint::FileSystem {
                path: dir.display().to_string(),
            },
            None => settings
                .webdav_endpoint()
                .context("WebDAV is not configured (see `histsync config set`)")?,
        };
        let store = endpoint.connect()?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let fetcher = Arc::new(HistoryFetcher::new(Arc::new(self.optional_history()?)).with_clock(clock.clone()));
        let state = SyncStateStore::new(kv, clock.clone());

        Ok(SyncEngine::new(store, fetcher, state)
            .with_cipher(settings.cipher())
            .with_clock(clock))
    }
}

fn default_state_path() -> Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow!("Cannot determine a data directory; pass --state"))?;
    Ok(base.join("histsync").join("state.json"))
}

fn print_records(records: &[HistoryRecord], limit: usize, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Table => println!("{}", table::format_records_table(records, limit)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(records)?),
        OutputFormat::Csv => print!("{}", to_csv(records)),
    }
    Ok(())
}

fn report(result: OperationResult) -> Result<()> {
    if result.success {
        println!("✓ {}", result.message);
        Ok(())
    } else {
        bail!("{}", result.message)
    }
}

async fn handle_config_command(ctx: &AppContext, command: ConfigCommands) -> Result<()> {
    let kv = ctx.open_kv().await?;

    match command {
        ConfigCommands::Init => {
            let written = SyncSettings::initialize_defaults(kv.as_ref()).await?;
            if written.is_empty() {
                println!("✓ Settings already initialized");
            } else {
                println!("✓ Initialized: {}", written.join(", "));
            }
        }

        ConfigCommands::Set { key, value } => {
            let mut settings = SyncSettings::load(kv.as_ref()).await?;
            apply_setting(&mut settings, &key, Some(&value))?;
            settings.save(kv.as_ref()).await.context("Failed to save settings")?;
            println!("✓ {} updated", key);
        }

        ConfigCommands::Unset { key } => {
            let mut settings = SyncSettings::load(kv.as_ref()).await?;
            apply_setting(&mut settings, &key, None)?;
            settings.save(kv.as_ref()).await.context("Failed to save settings")?;
            println!("✓ {} cleared", key);
        }

        ConfigCommands::Show => {
            let settings = SyncSettings::load(kv.as_ref()).await?;
            let redact = |value: &Option<String>| match value {
                Some(_) => "********".to_string(),
                None => "-".to_string(),
            };
            let rows = [
                (WEBDAV_URL_KEY, settings.webdav_url.clone().unwrap_or_else(|| "-".into())),
                (WEBDAV_USERNAME_KEY, settings.webdav_username.clone().unwrap_or_else(|| "-".into())),
                (WEBDAV_PASSWORD_KEY, redact(&settings.webdav_password)),
                (SYNC_ENABLED_KEY, settings.sync_enabled.to_string()),
                (SYNC_FREQUENCY_KEY, format!("{} ms", settings.sync_frequency_ms)),
                (ENCRYPT_ENABLED_KEY, settings.encrypt_enabled.to_string()),
                (ENCRYPT_KEY_KEY, redact(&settings.encrypt_key)),
            ];
            println!("{}", table::format_pairs_table(&rows));
            println!("State file: {}", ctx.state_path.display());
        }
    }
    Ok(())
}

/// Updates one field by its stored key name; `None` clears optional fields.
fn apply_setting<'a>(settings: &mut SyncSettings, key: &str, value: Option<&'a str>) -> Result<()> {
    let text = |v: Option<&str>| v.map(str::to_string).filter(|s| !s.is_empty());
    let required = |v: Option<&'a str>| -> Result<&'a str> { v.ok_or_else(|| anyhow!("{} cannot be cleared", key)) };
    let parse_bool = |v: &str| -> Result<bool> {
        match v.to_ascii_lowercase().as_str() {
            "true" | "on" | "yes" | "1" => Ok(true),
            "false" | "off" | "no" | "0" => Ok(false),
            other => bail!("Expected true or false, got '{}'", other),
        }
    };

    match key {
        WEBDAV_URL_KEY => settings.webdav_url = text(value),
        WEBDAV_USERNAME_KEY => settings.webdav_username = text(value),
        WEBDAV_PASSWORD_KEY => settings.webdav_password = text(value),
        ENCRYPT_KEY_KEY => settings.encrypt_key = text(value),
        SYNC_ENABLED_KEY => settings.sync_enabled = parse_bool(required(value)?)?,
        ENCRYPT_ENABLED_KEY => settings.encrypt_enabled = parse_bool(required(value)?)?,
        SYNC_FREQUENCY_KEY => {
            let ms: u64 = required(value)?
                .parse()
                .context("syncFrequency must be a number of milliseconds")?;
            if ms == 0 {
                bail!("syncFrequency must be positive");
            }
            settings.sync_frequency_ms = ms;
        }
        other => bail!("Unknown setting: {}", other),
    }
    Ok(())
}

async fn handle_sync_command(ctx: &AppContext, command: SyncCommands) -> Result<()> {
    let kv = ctx.open_kv().await?;

    match command {
        SyncCommands::Status => {
            let state = SyncStateStore::new(kv.clone(), Arc::new(SystemClock));
            let last = state.last_sync().await?;
            let rows = [
                (
                    "Last sync",
                    if last > 0 {
                        format_timestamp(last)
                    } else {
                        "never".to_string()
                    },
                ),
                ("Pending records", state.pending_count().await?.to_string()),
                ("Cached records", state.cached_history().await?.len().to_string()),
            ];
            println!("{}", table::format_pairs_table(&rows));
            return Ok(());
        }
        SyncCommands::Reset => {
            let state = SyncStateStore::new(kv.clone(), Arc::new(SystemClock));
            state.reset().await?;
            println!("✓ Local sync state cleared");
            return Ok(());
        }
        _ => {}
    }

    let mut engine = ctx.build_engine(kv.clone()).await?;

    match command {
        SyncCommands::UploadFull => {
            if ctx.history.is_none() {
                bail!("No history file given (use --history or HISTSYNC_HISTORY)");
            }
            report(engine.upload_full(None).await)?;
        }
        SyncCommands::Download { print } => {
            let result = engine.download_full().await;
            if print && result.success {
                if let Some(records) = &result.data {
                    println!("{}", serde_json::to_string_pretty(records)?);
                }
            }
            report(OperationResult { data: None, ..result })?;
        }
        SyncCommands::UploadIncremental => report(engine.upload_incremental().await)?,
        SyncCommands::Merge => report(engine.download_and_merge().await)?,
        SyncCommands::Reconcile { strategy } => {
            let strategy: ConflictStrategy = strategy.parse()?;
            report(engine.reconcile_with_remote(strategy).await)?;
        }
        SyncCommands::Test => report(engine.test_connection().await)?,
        SyncCommands::Watch => {
            let mut events = engine
                .subscribe()
                .ok_or_else(|| anyhow!("Event stream already taken"))?;
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    tracing::info!(?event, "sync event");
                }
            });

            let kv_store: Arc<dyn KeyValueStore> = kv;
            let mut scheduler = SyncScheduler::new(Arc::new(engine), kv_store);
            scheduler.start().await?;
            println!("Scheduled sync running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl-C")?;
            scheduler.stop().await?;
            println!("✓ Stopped");
        }
        SyncCommands::Status | SyncCommands::Reset => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_setting() {
        let mut settings = SyncSettings::default();
        apply_setting(&mut settings, WEBDAV_URL_KEY, Some("https://dav.example.com")).unwrap();
        apply_setting(&mut settings, SYNC_ENABLED_KEY, Some("off")).unwrap();
        apply_setting(&mut settings, SYNC_FREQUENCY_KEY, Some("120000")).unwrap();
        assert_eq!(settings.webdav_url.as_deref(), Some("https://dav.example.com"));
        assert!(!settings.sync_enabled);
        assert_eq!(settings.sync_frequency_ms, 120_000);

        apply_setting(&mut settings, WEBDAV_URL_KEY, None).unwrap();
        assert!(settings.webdav_url.is_none());

        assert!(apply_setting(&mut settings, SYNC_ENABLED_KEY, None).is_err());
        assert!(apply_setting(&mut settings, SYNC_FREQUENCY_KEY, Some("0")).is_err());
        assert!(apply_setting(&mut settings, "bogus", Some("x")).is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "histsync",
            "--history",
            "h.json",
            "sync",
            "reconcile",
            "--strategy",
            "latest",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sync {
                command: SyncCommands::Reconcile { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_sync_against_directory_remote() {
        let dir = tempfile::tempdir().unwrap();
        let history = dir.path().join("history.json");
        std::fs::write(
            &history,
            r#"[{"id":"1","url":"https://a.com","title":"A","lastVisitTime":1700000000000,"visitCount":2}]"#,
        )
        .unwrap();

        let ctx = AppContext {
            state_path: dir.path().join("state").join("state.json"),
            history: Some(history),
            remote_dir: Some(dir.path().join("remote")),
        };
        let kv = ctx.open_kv().await.unwrap();
        kv.set(
            [(histsync_sync::settings::ENCRYPT_ENABLED_KEY.to_string(), serde_json::json!(false))]
                .into_iter()
                .collect(),
        )
        .await
        .unwrap();

        let engine = ctx.build_engine(kv).await.unwrap();
        let result = engine.upload_full(None).await;
        assert!(result.success, "{}", result.message);
        assert!(dir.path().join("remote").join("browser-history-total.json").exists());
    }
}
