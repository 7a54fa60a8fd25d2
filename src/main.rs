use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod backtester;
mod collector;
mod config;
mod db;
mod error;
mod files;
mod odds_api;
mod perf;
mod reporter;
mod scheduler;
mod signals;
mod status;

use config::{BaselineAction, Command, Config};
use perf::analysis::{self, Baseline, BaselineSlot};
use scheduler::{Job, Jobs};
use status::StatusFile;

/// Log to stdout and, without ANSI colours, to `<data_dir>/app.log`.
/// The returned guard flushes the file writer when dropped.
fn init_tracing(config: &Config) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("Failed to create data directory {}", config.data_dir.display())
    })?;
    let file_appender = tracing_appender::rolling::never(&config.data_dir, "app.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; real environment variables still apply.
    dotenvy::dotenv().ok();

    let config = Config::parse();
    config.validate()?;
    let _guard = init_tracing(&config)?;

    let command = config.command.clone().unwrap_or(Command::Run);
    match command {
        Command::Run => {
            if config.effective_api_key().is_none() {
                warn!("ODDS_API_KEY not set; the collector will skip every cycle");
            }
            let jobs = Arc::new(Jobs::new(config.clone())?);
            scheduler::run(jobs, &config).await?;
        }
        Command::Collect => Jobs::new(config)?.run(Job::Collect).await?,
        Command::Signals => {
            let window = chrono::Duration::hours(config.signal_window_hours);
            let log = signals::SignalLog::new(config.signals_log_path());
            Jobs::new(config)?.run(Job::Signals).await?;
            for s in log.since(Utc::now() - window)? {
                println!("{} | {} | {} | Odds: {:.2}", s.matchup, s.signal, s.reason, s.odds);
            }
        }
        Command::Backtest => Jobs::new(config)?.run(Job::Backtest).await?,
        Command::Report => Jobs::new(config)?.run(Job::Report).await?,
        Command::Anomalies { hours } => {
            let jobs = Jobs::new(config)?;
            jobs.run(Job::AnomalySweep).await?;
            let lines = jobs.recent_anomalies(hours).await?;
            if lines.is_empty() {
                println!("No anomalies in the last {} hours.", hours);
            }
            for line in lines {
                println!("{}", line);
            }
        }
        Command::Analyze => {
            let doc = perf::PerformanceTracker::new(config.performance_path(), config.history_size)
                .snapshot()
                .await;
            print!("{}", analysis::render_analysis(&analysis::analyze(&doc)));
        }
        Command::Baseline { action } => baseline(&config, action).await?,
        Command::Status { lines } => {
            match StatusFile::read(&config.status_path()) {
                Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
                None => println!("No status file at {}", config.status_path().display()),
            }
            let db = db::Database::open(config.database_path())?;
            let stats = db.odds_stats()?;
            println!(
                "\nStored odds: {} records across {} events (avg {:.2})",
                stats.total_records,
                stats.total_events,
                stats.avg_odds.unwrap_or(0.0)
            );
            let cutoff = Utc::now() - chrono::Duration::hours(config.report_window_hours);
            for r in db.recent_odds(cutoff, 5)? {
                println!(
                    "  {} | {} vs {} | {} {} @ {:.2}",
                    r.observed_at.to_rfc3339(),
                    r.home_team,
                    r.away_team,
                    r.bookmaker,
                    r.outcome_name,
                    r.price
                );
            }

            let tracker =
                perf::PerformanceTracker::new(config.performance_path(), config.history_size);
            println!("\nJobs:");
            for module in [
                collector::MODULE,
                signals::MODULE,
                backtester::MODULE,
                reporter::MODULE,
            ] {
                match tracker.module_metrics(module).await {
                    Some(m) => println!(
                        "  {}: {} ok, {} failed, avg {:.3}s, last run {}",
                        module,
                        m.success_count,
                        m.error_count,
                        m.avg_runtime,
                        m.last_update
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "never".to_string())
                    ),
                    None => println!("  {}: no runs recorded", module),
                }
            }
            println!("\nLast {} log lines:", lines);
            for line in files::tail_lines(&config.log_path(), lines)? {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

async fn baseline(config: &Config, action: BaselineAction) -> Result<()> {
    let tracker = perf::PerformanceTracker::new(config.performance_path(), config.history_size);
    match action {
        BaselineAction::Save | BaselineAction::After => {
            let slot = if action == BaselineAction::Save {
                BaselineSlot::BeforeOptimization
            } else {
                BaselineSlot::AfterOptimization
            };
            let mut saved = None;
            tracker
                .update(|doc| saved = Some(analysis::save_baseline(doc, slot, Utc::now())))
                .await?;
            let modules = saved.map_or(0, |b| b.modules.len());
            info!("Saved {:?} baseline covering {} modules", slot, modules);
        }
        BaselineAction::Compare => {
            let doc = tracker.snapshot().await;
            let Some(before) = doc.before_optimization.as_ref() else {
                println!("No baseline saved yet. Run `betsentinel baseline save` first.");
                return Ok(());
            };
            let current = doc
                .after_optimization
                .clone()
                .unwrap_or_else(|| Baseline::capture(&doc, Utc::now()));
            print!("{}", analysis::render_comparison(&analysis::compare(before, &current)));
        }
    }
    Ok(())
}
