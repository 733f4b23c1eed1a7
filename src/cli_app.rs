//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use wattshare::core::config::Config;
use wattshare::core::errors::WsError;
use wattshare::core::types::{TimeRange, format_ts, parse_ts};
use wattshare::daemon::runtime;
use wattshare::daemon::signals::SignalHandler;
use wattshare::energy::{AggregationEngine, AttributionEngine};
use wattshare::ingest::relay::{IngestionRelay, RelaySettings};
use wattshare::ingest::synthetic::SyntheticSampleSource;
use wattshare::logger::activity::{ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger};
use wattshare::logger::jsonl::JsonlConfig;
use wattshare::series::store::open_series_store;
use wattshare::session::RemovalMode;
use wattshare::session::tracker::IntervalTracker;

/// wattshare: who used how much of the shared machine's energy.
#[derive(Debug, Parser)]
#[command(
    name = "wattshare",
    author,
    version,
    about = "Per-user energy accounting on a shared host",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the ingestion service until SIGTERM/SIGINT.
    Daemon,
    /// Connect a user; without an id a fresh one is allocated.
    Connect(ConnectArgs),
    /// Disconnect a user.
    Disconnect(UserArg),
    /// Record a liveness heartbeat for a connected user.
    Heartbeat(UserArg),
    /// Remove a user.
    Remove(RemoveArgs),
    /// List users.
    Users,
    /// Show one user.
    User(UserArg),
    /// List a user's links.
    Links(UserArg),
    /// List all intervals in chronological order.
    Intervals,
    /// Show one interval.
    Interval(IntervalArg),
    /// Attributed samples for a user.
    Consumption(ConsumptionArgs),
    /// Daily highlights (max, min, sum, mean) for a user.
    Today(TodayArgs),
    /// One mean per day since the user first connected.
    Daily(UserArg),
    /// 52 weekly means, current week first.
    Weekly(UserArg),
    /// Year, month, week and today means.
    Means(UserArg),
    /// Where a user ranks among all users.
    Rank(UserArg),
    /// Fill the series store with synthetic samples.
    Seed(SeedArgs),
    /// Show the effective configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct UserArg {
    #[arg(value_name = "USER_ID")]
    user_id: i64,
}

#[derive(Debug, Clone, Args)]
struct ConnectArgs {
    #[arg(value_name = "USER_ID")]
    user_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RemovalModeArg {
    Delete,
    Forget,
    Dissociate,
}

impl From<RemovalModeArg> for RemovalMode {
    fn from(arg: RemovalModeArg) -> Self {
        match arg {
            RemovalModeArg::Delete => Self::Delete,
            RemovalModeArg::Forget => Self::Forget,
            RemovalModeArg::Dissociate => Self::Dissociate,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct RemoveArgs {
    #[arg(value_name = "USER_ID")]
    user_id: i64,
    /// delete: drop user and links; forget: drop user, keep links;
    /// dissociate: keep user, detach links.
    #[arg(long, value_enum, default_value_t = RemovalModeArg::Dissociate)]
    mode: RemovalModeArg,
}

#[derive(Debug, Clone, Args)]
struct IntervalArg {
    #[arg(value_name = "INTERVAL_ID")]
    interval_id: i64,
}

#[derive(Debug, Clone, Args)]
struct ConsumptionArgs {
    #[arg(value_name = "USER_ID")]
    user_id: i64,
    /// Window start (RFC 3339).
    #[arg(long, value_name = "TIMESTAMP")]
    from: Option<String>,
    /// Window end, exclusive (RFC 3339).
    #[arg(long, value_name = "TIMESTAMP")]
    to: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct TodayArgs {
    #[arg(value_name = "USER_ID")]
    user_id: i64,
    /// Day to summarise (YYYY-MM-DD, UTC); defaults to today.
    #[arg(long, value_name = "DATE")]
    date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Args)]
struct SeedArgs {
    /// Number of one-second samples; defaults to `ingest.synthetic_samples`.
    #[arg(long, value_name = "N")]
    count: Option<u64>,
    /// RNG seed; defaults to `ingest.synthetic_seed`.
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,
    /// Timestamp of the first sample (RFC 3339); defaults to now.
    #[arg(long, value_name = "TIMESTAMP")]
    start: Option<String>,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration and print its hash.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
        }
    }
}

impl From<WsError> for CliError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::UserNotFound { .. }
            | WsError::IntervalNotFound { .. }
            | WsError::InvalidConfig { .. }
            | WsError::MissingConfig { .. }
            | WsError::ConfigParse { .. } => Self::User(err.to_string()),
            WsError::InvariantViolation { .. } => Self::Internal(err.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
        Command::Config(args) => run_config(cli, args),
        Command::Daemon => run_daemon(cli),
        Command::Connect(args) => run_connect(cli, args),
        Command::Disconnect(args) => run_disconnect(cli, args),
        Command::Heartbeat(args) => run_heartbeat(cli, args),
        Command::Remove(args) => run_remove(cli, args),
        Command::Users => run_users(cli),
        Command::User(args) => run_user(cli, args),
        Command::Links(args) => run_links(cli, args),
        Command::Intervals => run_intervals(cli),
        Command::Interval(args) => run_interval(cli, args),
        Command::Consumption(args) => run_consumption(cli, args),
        Command::Today(args) => run_today(cli, args),
        Command::Daily(args) => run_daily(cli, args),
        Command::Weekly(args) => run_weekly(cli, args),
        Command::Means(args) => run_means(cli, args),
        Command::Rank(args) => run_rank(cli, args),
        Command::Seed(args) => run_seed(cli, args),
    }
}

// ──────────────────── wiring ────────────────────

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

/// Run `f` with an activity logger writing to the configured JSONL file,
/// then flush it.
fn with_logger<T>(
    config: &Config,
    f: impl FnOnce(&ActivityLoggerHandle) -> Result<T, CliError>,
) -> Result<T, CliError> {
    let (logger, join) = spawn_logger(ActivityLoggerConfig::new(JsonlConfig::at(
        config.paths.jsonl_log.clone(),
    )))?;
    let result = f(&logger);
    logger.shutdown();
    let _ = join.join();
    result
}

fn open_tracker(config: &Config, logger: ActivityLoggerHandle) -> Result<IntervalTracker, CliError> {
    Ok(IntervalTracker::open(&config.session, logger)?)
}

fn open_engine(config: &Config) -> Result<AggregationEngine, CliError> {
    let logger = ActivityLoggerHandle::detached();
    let tracker = Arc::new(open_tracker(config, logger.clone())?);
    let store = open_series_store(&config.series)?;
    let attribution = AttributionEngine::new(tracker, store, config.attribution.workers, logger);
    Ok(AggregationEngine::new(
        attribution,
        config.attribution.rank_workers,
    ))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CliError> {
    parse_ts(raw).map_err(|e| CliError::User(format!("invalid timestamp {raw:?}: {e}")))
}

// ──────────────────── commands ────────────────────

fn run_daemon(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let signals = SignalHandler::new();
    let outcome = runtime::run(&config, &signals)?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "{} after {}s ({:?})",
                "wattshare stopped".bold(),
                outcome.uptime_secs,
                outcome.cause
            );
            if let Some(relay) = &outcome.relay {
                println!(
                    "  relay: {} from {}, {} written, {} failed",
                    relay.reason, relay.source, relay.written, relay.write_failures
                );
            }
            if !outcome.shutdown.is_clean() {
                println!("  {}", "shutdown was not clean".yellow());
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "daemon",
                "outcome": serde_json::to_value(&outcome)?,
            }))?;
        }
    }
    Ok(())
}

fn run_connect(cli: &Cli, args: &ConnectArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let transition = with_logger(&config, |logger| {
        let tracker = open_tracker(&config, logger.clone())?;
        Ok(match args.user_id {
            Some(id) => tracker.connect(id)?,
            None => Some(tracker.connect_new()?),
        })
    })?;

    match output_mode(cli) {
        OutputMode::Human => match &transition {
            Some(t) => println!(
                "user {} {} (interval {} now has {} user(s))",
                t.user_id,
                "connected".green(),
                t.opened.id,
                t.opened.concurrent_users
            ),
            None => println!("user already connected; nothing changed"),
        },
        OutputMode::Json => write_json_line(&json!({
            "command": "connect",
            "changed": transition.is_some(),
            "transition": serde_json::to_value(&transition)?,
        }))?,
    }
    Ok(())
}

fn run_disconnect(cli: &Cli, args: &UserArg) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let transition = with_logger(&config, |logger| {
        Ok(open_tracker(&config, logger.clone())?.disconnect(args.user_id)?)
    })?;

    match output_mode(cli) {
        OutputMode::Human => match &transition {
            Some(t) => println!(
                "user {} {} (interval {} now has {} user(s))",
                t.user_id,
                "disconnected".yellow(),
                t.opened.id,
                t.opened.concurrent_users
            ),
            None => println!("user {} was not connected; nothing changed", args.user_id),
        },
        OutputMode::Json => write_json_line(&json!({
            "command": "disconnect",
            "changed": transition.is_some(),
            "transition": serde_json::to_value(&transition)?,
        }))?,
    }
    Ok(())
}

fn run_heartbeat(cli: &Cli, args: &UserArg) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let recorded =
        open_tracker(&config, ActivityLoggerHandle::detached())?.heartbeat(args.user_id)?;

    match output_mode(cli) {
        OutputMode::Human => {
            if recorded {
                println!("heartbeat recorded for user {}", args.user_id);
            } else {
                println!("user {} is not connected; heartbeat ignored", args.user_id);
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "heartbeat",
            "user_id": args.user_id,
            "recorded": recorded,
        }))?,
    }
    Ok(())
}

fn run_remove(cli: &Cli, args: &RemoveArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let report = with_logger(&config, |logger| {
        Ok(open_tracker(&config, logger.clone())?.remove_user(args.user_id, args.mode.into())?)
    })?;

    match output_mode(cli) {
        OutputMode::Human => println!(
            "user {} removed ({}), {} link(s) affected{}",
            report.user_id,
            report.mode.as_str(),
            report.links_affected,
            if report.was_connected {
                ", was connected"
            } else {
                ""
            }
        ),
        OutputMode::Json => write_json_line(&json!({
            "command": "remove",
            "report": serde_json::to_value(&report)?,
        }))?,
    }
    Ok(())
}

fn run_users(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let users = open_tracker(&config, ActivityLoggerHandle::detached())?.list_users()?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "{}",
                format!("{:>8}  {:<27}  {:<27}", "ID", "Session start", "Session end").bold()
            );
            for user in &users {
                let end = user
                    .end_session
                    .map_or_else(|| "connected".green().to_string(), format_ts);
                println!("{:>8}  {:<27}  {end}", user.id, format_ts(user.start_session));
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "users",
            "users": serde_json::to_value(&users)?,
        }))?,
    }
    Ok(())
}

fn run_user(cli: &Cli, args: &UserArg) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let user = open_tracker(&config, ActivityLoggerHandle::detached())?.get_user(args.user_id)?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{}", format!("User {}", user.id).bold());
            println!("  Session start: {}", format_ts(user.start_session));
            match user.end_session {
                Some(end) => println!("  Session end:   {}", format_ts(end)),
                None => println!("  Session end:   {}", "connected".green()),
            }
            if let Some(seen) = user.last_seen {
                println!("  Last seen:     {}", format_ts(seen));
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "user",
            "user": serde_json::to_value(&user)?,
        }))?,
    }
    Ok(())
}

fn run_links(cli: &Cli, args: &UserArg) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let links = open_tracker(&config, ActivityLoggerHandle::detached())?.user_links(args.user_id)?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "{}",
                format!("{:>8}  {:>14}  {:>14}", "Link", "First interval", "Last interval").bold()
            );
            for link in &links {
                let end = link
                    .end_interval_id
                    .map_or_else(|| "open".green().to_string(), |id| id.to_string());
                println!("{:>8}  {:>14}  {end:>14}", link.id, link.start_interval_id);
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "links",
            "user_id": args.user_id,
            "links": serde_json::to_value(&links)?,
        }))?,
    }
    Ok(())
}

fn run_intervals(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let intervals = open_tracker(&config, ActivityLoggerHandle::detached())?.all_intervals()?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "{}",
                format!("{:>8}  {:<27}  {:<27}  {:>5}", "ID", "Start", "Stop", "Users").bold()
            );
            for interval in &intervals {
                let stop = interval
                    .stop
                    .map_or_else(|| "current".green().to_string(), format_ts);
                println!(
                    "{:>8}  {:<27}  {stop:<27}  {:>5}",
                    interval.id,
                    format_ts(interval.start),
                    interval.concurrent_users
                );
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "intervals",
            "intervals": serde_json::to_value(&intervals)?,
        }))?,
    }
    Ok(())
}

fn run_interval(cli: &Cli, args: &IntervalArg) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let interval =
        open_tracker(&config, ActivityLoggerHandle::detached())?.interval_by_id(args.interval_id)?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{}", format!("Interval {}", interval.id).bold());
            println!("  Start: {}", format_ts(interval.start));
            match interval.stop {
                Some(stop) => println!("  Stop:  {}", format_ts(stop)),
                None => println!("  Stop:  {}", "current".green()),
            }
            println!("  Users: {}", interval.concurrent_users);
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "interval",
            "interval": serde_json::to_value(interval)?,
        }))?,
    }
    Ok(())
}

fn run_consumption(cli: &Cli, args: &ConsumptionArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let window = match (&args.from, &args.to) {
        (None, None) => None,
        (from, to) => {
            let start = from
                .as_deref()
                .map_or(Ok(DateTime::<Utc>::UNIX_EPOCH), parse_timestamp)?;
            let stop = to.as_deref().map_or_else(|| Ok(Utc::now()), parse_timestamp)?;
            if stop <= start {
                return Err(CliError::User("--to must be after --from".to_string()));
            }
            Some(TimeRange::new(start, stop))
        }
    };

    let engine = open_engine(&config)?;
    let mut samples = engine.attribution().consumption(args.user_id, window)?;
    samples.sort_by_key(|s| s.timestamp);

    match output_mode(cli) {
        OutputMode::Human => {
            let total: f64 = samples.iter().map(|s| s.value).sum();
            for s in &samples {
                println!("{}  {:>12.6}", format_ts(s.timestamp), s.value);
            }
            println!(
                "{}: {} sample(s), total {total:.6}",
                format!("User {}", args.user_id).bold(),
                samples.len()
            );
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "consumption",
            "user_id": args.user_id,
            "samples": serde_json::to_value(&samples)?,
        }))?,
    }
    Ok(())
}

fn run_today(cli: &Cli, args: &TodayArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let date = args.date.unwrap_or_else(|| Utc::now().date_naive());
    let h = open_engine(&config)?.daily_highlights(args.user_id, date)?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{}", format!("User {} on {date}", args.user_id).bold());
            println!("  max:  {:>12.6}  at {}", h.max.value, format_ts(h.max.timestamp));
            println!("  min:  {:>12.6}  at {}", h.min.value, format_ts(h.min.timestamp));
            println!("  sum:  {:>12.6}", h.sum.value);
            println!("  mean: {:>12.6}", h.mean.value);
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "today",
            "user_id": args.user_id,
            "date": date.to_string(),
            "highlights": serde_json::to_value(h)?,
        }))?,
    }
    Ok(())
}

fn run_daily(cli: &Cli, args: &UserArg) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let engine = open_engine(&config)?;
    let mode = output_mode(cli);

    // Days are printed as they are computed.
    let mut collected = Vec::new();
    for day in engine.all_daily_means(args.user_id)? {
        let day = day?;
        match mode {
            OutputMode::Human => println!("{}  {:>12.6}", day.date, day.mean),
            OutputMode::Json => collected.push(day),
        }
    }
    if mode == OutputMode::Json {
        write_json_line(&json!({
            "command": "daily",
            "user_id": args.user_id,
            "days": serde_json::to_value(&collected)?,
        }))?;
    }
    Ok(())
}

fn run_weekly(cli: &Cli, args: &UserArg) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let buckets = open_engine(&config)?.weekly_buckets(args.user_id)?;

    match output_mode(cli) {
        OutputMode::Human => {
            for (weeks_ago, mean) in buckets.iter().enumerate() {
                let label = if weeks_ago == 0 {
                    "this week".to_string()
                } else {
                    format!("{weeks_ago} week(s) ago")
                };
                println!("{label:>16}  {mean:>12.6}");
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "weekly",
            "user_id": args.user_id,
            "buckets": buckets,
        }))?,
    }
    Ok(())
}

fn run_means(cli: &Cli, args: &UserArg) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let means = open_engine(&config)?.all_means(args.user_id)?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{}", format!("User {} means", args.user_id).bold());
            println!("  year:  {:>12.6}", means.year);
            println!("  month: {:>12.6}", means.month);
            println!("  week:  {:>12.6}", means.week);
            println!("  today: {:>12.6}", means.today);
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "means",
            "user_id": args.user_id,
            "means": serde_json::to_value(means)?,
        }))?,
    }
    Ok(())
}

fn run_rank(cli: &Cli, args: &UserArg) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let ranks = open_engine(&config)?.rank(args.user_id)?;

    match output_mode(cli) {
        OutputMode::Human => {
            let n = ranks.total_users;
            println!(
                "{}",
                format!("User {} of {n} (1 = lowest consumption)", args.user_id).bold()
            );
            println!("  year:  {}/{n}", ranks.year);
            println!("  month: {}/{n}", ranks.month);
            println!("  week:  {}/{n}", ranks.week);
            println!("  day:   {}/{n}", ranks.day);
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "rank",
            "user_id": args.user_id,
            "ranks": serde_json::to_value(ranks)?,
        }))?,
    }
    Ok(())
}

fn run_seed(cli: &Cli, args: &SeedArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let start = args
        .start
        .as_deref()
        .map_or_else(|| Ok(Utc::now()), parse_timestamp)?;
    let source = SyntheticSampleSource::new(
        start,
        args.count.unwrap_or(config.ingest.synthetic_samples),
        args.seed.unwrap_or(config.ingest.synthetic_seed),
    );

    let report = with_logger(&config, |logger| {
        let store = open_series_store(&config.series)?;
        let report = IngestionRelay::spawn(
            Box::new(source),
            Arc::clone(&store),
            RelaySettings::from(&config.ingest),
            logger.clone(),
        )?
        .join()?;
        store.close()?;
        Ok(report)
    })?;

    match output_mode(cli) {
        OutputMode::Human => println!(
            "seeded {} sample(s) starting {} ({} failed)",
            report.written,
            format_ts(start),
            report.write_failures
        ),
        OutputMode::Json => write_json_line(&json!({
            "command": "seed",
            "start": format_ts(start),
            "report": serde_json::to_value(&report)?,
        }))?,
    }
    Ok(())
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "config path",
                    "path": path.to_string_lossy(),
                    "exists": exists,
                }))?,
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => write_json_line(&json!({
                    "command": "config show",
                    "config": serde_json::to_value(&config)?,
                }))?,
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is {}.", "valid".green());
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => write_json_line(&json!({
                        "command": "config validate",
                        "valid": true,
                        "path": config.paths.config_file.to_string_lossy(),
                        "hash": hash,
                    }))?,
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is {}: {e}", "INVALID".red()),
                    OutputMode::Json => write_json_line(&json!({
                        "command": "config validate",
                        "valid": false,
                        "error": e.to_string(),
                    }))?,
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("WATTSHARE_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "wattshare",
            "--config",
            "/tmp/wattshare.toml",
            "--json",
            "--no-color",
            "users",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["wattshare", "users", "--json", "--no-color"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_every_subcommand() {
        let cases = [
            vec!["wattshare", "daemon"],
            vec!["wattshare", "connect"],
            vec!["wattshare", "connect", "7"],
            vec!["wattshare", "disconnect", "7"],
            vec!["wattshare", "heartbeat", "7"],
            vec!["wattshare", "remove", "7", "--mode", "forget"],
            vec!["wattshare", "users"],
            vec!["wattshare", "user", "7"],
            vec!["wattshare", "links", "7"],
            vec!["wattshare", "intervals"],
            vec!["wattshare", "interval", "3"],
            vec![
                "wattshare",
                "consumption",
                "7",
                "--from",
                "2026-01-01T00:00:00Z",
                "--to",
                "2026-02-01T00:00:00Z",
            ],
            vec!["wattshare", "today", "7", "--date", "2026-03-04"],
            vec!["wattshare", "daily", "7"],
            vec!["wattshare", "weekly", "7"],
            vec!["wattshare", "means", "7"],
            vec!["wattshare", "rank", "7"],
            vec!["wattshare", "seed", "--count", "10", "--seed", "3"],
            vec!["wattshare", "config", "show"],
        ];

        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn remove_mode_defaults_to_dissociate_and_rejects_unknown() {
        let cli = Cli::try_parse_from(["wattshare", "remove", "4"]).unwrap();
        match cli.command {
            Command::Remove(args) => {
                assert_eq!(RemovalMode::from(args.mode), RemovalMode::Dissociate);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["wattshare", "remove", "4", "--mode", "purge"]).is_err());
    }

    #[test]
    fn user_commands_require_numeric_ids() {
        assert!(Cli::try_parse_from(["wattshare", "disconnect"]).is_err());
        assert!(Cli::try_parse_from(["wattshare", "rank", "alice"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["wattshare", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(
            resolve_output_mode(false, Some("auto"), true),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn domain_errors_map_to_exit_codes() {
        assert_eq!(
            CliError::from(WsError::UserNotFound { user_id: 1 }).exit_code(),
            1
        );
        assert_eq!(
            CliError::from(WsError::InvariantViolation {
                details: String::new()
            })
            .exit_code(),
            3
        );
        assert_eq!(
            CliError::from(WsError::Runtime {
                details: String::new()
            })
            .exit_code(),
            2
        );
    }
}
