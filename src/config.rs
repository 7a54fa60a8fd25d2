use chrono::NaiveTime;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Football odds collector, signal generator and self-monitor
#[derive(Parser, Debug, Clone)]
#[command(name = "betsentinel", version, about)]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Directory holding the database, logs and JSON state files
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// SQLite database path (defaults to <data_dir>/odds.db)
    #[arg(long, env = "DATABASE_PATH")]
    pub database_path: Option<PathBuf>,

    /// The Odds API key; fetching is disabled when unset
    #[arg(long, env = "ODDS_API_KEY")]
    pub odds_api_key: Option<String>,

    /// The Odds API base URL
    #[arg(
        long,
        env = "ODDS_API_URL",
        default_value = "https://api.the-odds-api.com/v4"
    )]
    pub odds_api_url: String,

    /// Sport key to poll
    #[arg(long, env = "ODDS_SPORT", default_value = "soccer")]
    pub odds_sport: String,

    /// Bookmaker regions
    #[arg(long, env = "ODDS_REGIONS", default_value = "uk")]
    pub odds_regions: String,

    /// Betting markets
    #[arg(long, env = "ODDS_MARKETS", default_value = "h2h")]
    pub odds_markets: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value = "10")]
    pub http_timeout_secs: u64,

    /// Response cache time-to-live in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "30")]
    pub cache_ttl_secs: u64,

    /// Response cache capacity (entries)
    #[arg(long, env = "CACHE_CAPACITY", default_value = "100")]
    pub cache_capacity: usize,

    /// Collector period in seconds
    #[arg(long, env = "COLLECT_INTERVAL_SECS", default_value = "60")]
    pub collect_interval_secs: u64,

    /// Signal generator period in seconds
    #[arg(long, env = "SIGNAL_INTERVAL_SECS", default_value = "300")]
    pub signal_interval_secs: u64,

    /// Backtester period in seconds
    #[arg(long, env = "BACKTEST_INTERVAL_SECS", default_value = "3600")]
    pub backtest_interval_secs: u64,

    /// status.json refresh period in seconds
    #[arg(long, env = "STATUS_INTERVAL_SECS", default_value = "120")]
    pub status_interval_secs: u64,

    /// Anomaly sweep period in seconds
    #[arg(long, env = "ANOMALY_INTERVAL_SECS", default_value = "300")]
    pub anomaly_interval_secs: u64,

    /// Local wall-clock time (HH:MM) of the daily report
    #[arg(long, env = "REPORT_TIME", default_value = "00:00")]
    pub report_time: String,

    /// Lookback for live signal generation, in hours
    #[arg(long, env = "SIGNAL_WINDOW_HOURS", default_value = "1")]
    pub signal_window_hours: i64,

    /// Lookback for the backtest, in days
    #[arg(long, env = "BACKTEST_WINDOW_DAYS", default_value = "7")]
    pub backtest_window_days: i64,

    /// Lookback for the daily report, in hours
    #[arg(long, env = "REPORT_WINDOW_HOURS", default_value = "24")]
    pub report_window_hours: i64,

    /// Max mean odds must exceed this for a BUY signal
    #[arg(long, env = "BUY_MIN_ODDS", default_value = "2.0")]
    pub buy_min_odds: f64,

    /// Per-outcome standard deviation must stay below this for a BUY signal
    #[arg(long, env = "BUY_MAX_STD", default_value = "0.2")]
    pub buy_max_std: f64,

    /// Rolling capacity of each performance series and history list
    #[arg(long, env = "HISTORY_SIZE", default_value = "100")]
    pub history_size: usize,

    /// Relative deviation from baseline that flags an anomaly (0.25 = 25%)
    #[arg(long, env = "ANOMALY_THRESHOLD", default_value = "0.25")]
    pub anomaly_threshold: f64,

    /// Number of recent runs averaged into the anomaly baseline
    #[arg(long, env = "ANOMALY_LOOKBACK", default_value = "5")]
    pub anomaly_lookback: usize,

    /// Runs that must be back within threshold for an anomaly to recover
    #[arg(long, env = "RECOVERY_RUNS", default_value = "3")]
    pub recovery_runs: usize,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Start the scheduler (default)
    Run,
    /// Fetch and store odds once
    Collect,
    /// Generate signals from recent odds once
    Signals,
    /// Run the backtest once
    Backtest,
    /// Write the daily report now
    Report,
    /// Run an anomaly sweep and list recent anomalies
    Anomalies {
        #[arg(long, default_value = "24")]
        hours: i64,
    },
    /// Print per-module optimisation analysis
    Analyze,
    /// Save or compare performance baselines
    Baseline {
        #[arg(value_enum)]
        action: BaselineAction,
    },
    /// Print status.json and the tail of app.log
    Status {
        #[arg(long, default_value = "10")]
        lines: usize,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineAction {
    /// Snapshot current averages as the before-optimisation baseline
    Save,
    /// Snapshot current averages as the after-optimisation baseline
    After,
    /// Compare the before baseline with current averages
    Compare,
}

/// Longest accepted lookback window: ten years.
pub const MAX_WINDOW_HOURS: i64 = 87_600;

fn check_window(name: &str, hours: i64) -> anyhow::Result<()> {
    if hours <= 0 || hours > MAX_WINDOW_HOURS {
        anyhow::bail!("{} must be between 1 hour and {} hours", name, MAX_WINDOW_HOURS);
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        let intervals = [
            ("collect_interval_secs", self.collect_interval_secs),
            ("signal_interval_secs", self.signal_interval_secs),
            ("backtest_interval_secs", self.backtest_interval_secs),
            ("status_interval_secs", self.status_interval_secs),
            ("anomaly_interval_secs", self.anomaly_interval_secs),
            ("http_timeout_secs", self.http_timeout_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                anyhow::bail!("{} must be positive", name);
            }
        }
        let windows = [
            ("signal_window_hours", self.signal_window_hours),
            ("report_window_hours", self.report_window_hours),
            ("backtest_window_days", self.backtest_window_days.saturating_mul(24)),
        ];
        if let Some(Command::Anomalies { hours }) = &self.command {
            check_window("anomalies --hours", *hours)?;
        }
        for (name, hours) in windows {
            check_window(name, hours)?;
        }
        if !(self.anomaly_threshold > 0.0 && self.anomaly_threshold <= 10.0) {
            anyhow::bail!("anomaly_threshold must be in (0, 10]");
        }
        if self.anomaly_lookback == 0 {
            anyhow::bail!("anomaly_lookback must be at least 1");
        }
        if self.history_size <= self.anomaly_lookback {
            anyhow::bail!("history_size must be larger than anomaly_lookback");
        }
        if self.recovery_runs == 0 {
            anyhow::bail!("recovery_runs must be at least 1");
        }
        if !self.buy_min_odds.is_finite() || self.buy_min_odds <= 1.0 {
            anyhow::bail!("buy_min_odds must be a number greater than 1.0 (decimal odds)");
        }
        if !self.buy_max_std.is_finite() || self.buy_max_std < 0.0 {
            anyhow::bail!("buy_max_std must be a non-negative number");
        }
        self.report_time()?;
        Ok(())
    }

    /// API key usable for requests, ignoring the `.env.example` placeholder.
    pub fn effective_api_key(&self) -> Option<&str> {
        self.odds_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty() && *k != "your_api_key_here")
    }

    pub fn report_time(&self) -> anyhow::Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.report_time, "%H:%M")
            .map_err(|e| anyhow::anyhow!("invalid REPORT_TIME '{}': {}", self.report_time, e))
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("odds.db"))
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("app.log")
    }

    pub fn signals_log_path(&self) -> PathBuf {
        self.data_dir.join("signals.log")
    }

    pub fn backtest_metrics_path(&self) -> PathBuf {
        self.data_dir.join("backtest_metrics.json")
    }

    pub fn performance_path(&self) -> PathBuf {
        self.data_dir.join("performance.json")
    }

    pub fn anomalies_log_path(&self) -> PathBuf {
        self.data_dir.join("anomalies.log")
    }

    pub fn report_path(&self) -> PathBuf {
        self.data_dir.join("report.txt")
    }

    pub fn status_path(&self) -> PathBuf {
        self.data_dir.join("status.json")
    }
}
