//! Job wiring and the long-running schedule.
//!
//! [`Jobs`] owns every shared component (store, performance tracker, odds
//! source, state files) and runs one job at a time on request; the CLI's
//! one-shot subcommands and the scheduler both go through it. [`run`] spawns
//! one interval task per periodic job plus the daily report timer and waits
//! for Ctrl-C.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::backtester::{self, MetricsHistory};
use crate::collector;
use crate::config::Config;
use crate::db::Database;
use crate::odds_api::{OddsApiClient, OddsSource};
use crate::perf::{AnomalyConfig, AnomalyDetector, PerformanceTracker};
use crate::reporter;
use crate::signals::{self, SignalLog, SignalRule};
use crate::status::StatusFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Collect,
    Signals,
    Backtest,
    Report,
    AnomalySweep,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Job::Collect => "collector",
            Job::Signals => "signal generator",
            Job::Backtest => "backtester",
            Job::Report => "daily report",
            Job::AnomalySweep => "anomaly sweep",
        };
        f.write_str(name)
    }
}

pub struct Jobs {
    config: Config,
    db: Database,
    tracker: PerformanceTracker,
    source: Arc<dyn OddsSource>,
    signal_log: SignalLog,
    backtests: MetricsHistory,
    rule: SignalRule,
    detector: Mutex<AnomalyDetector>,
    status: StatusFile,
}

impl Jobs {
    /// Open the store and build the odds API client from `config`.
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Failed to create data directory {}", config.data_dir.display())
        })?;
        let db_path = config.database_path();
        let db = Database::open(&db_path)?;
        info!("Database opened: {}", db_path.display());

        let tracker = PerformanceTracker::new(config.performance_path(), config.history_size);
        let client = OddsApiClient::new(&config, tracker.clone(), collector::MODULE)?;
        Ok(Self::with_source(config, db, tracker, Arc::new(client)))
    }

    pub fn with_source(
        config: Config,
        db: Database,
        tracker: PerformanceTracker,
        source: Arc<dyn OddsSource>,
    ) -> Self {
        let detector = AnomalyDetector::new(
            tracker.clone(),
            config.anomalies_log_path(),
            AnomalyConfig {
                threshold: config.anomaly_threshold,
                lookback: config.anomaly_lookback,
                recovery_runs: config.recovery_runs,
            },
        );
        Jobs {
            db,
            source,
            signal_log: SignalLog::new(config.signals_log_path()),
            backtests: MetricsHistory::new(config.backtest_metrics_path(), config.history_size),
            rule: SignalRule::from_config(&config),
            detector: Mutex::new(detector),
            status: StatusFile::open(config.status_path()),
            tracker,
            config,
        }
    }

    #[cfg(test)]
    pub fn tracker(&self) -> &PerformanceTracker {
        &self.tracker
    }

    #[cfg(test)]
    pub fn status(&self) -> &StatusFile {
        &self.status
    }

    /// Run one job to completion. Tracked jobs record their runtime, CPU and
    /// memory under their module name whether or not they succeed.
    pub async fn run(&self, job: Job) -> Result<()> {
        let config = &self.config;
        match job {
            Job::Collect => {
                self.tracker
                    .track(
                        collector::MODULE,
                        "collect_odds",
                        collector::collect_odds(self.source.as_ref(), &self.db, Utc::now()),
                    )
                    .await?;
            }
            Job::Signals => {
                let window = ChronoDuration::hours(config.signal_window_hours);
                self.tracker
                    .track(signals::MODULE, "generate_signals", async {
                        signals::generate_signals(
                            &self.db,
                            &self.signal_log,
                            &self.rule,
                            window,
                            Utc::now(),
                        )
                    })
                    .await?;
            }
            Job::Backtest => {
                let window = ChronoDuration::days(config.backtest_window_days);
                self.tracker
                    .track(backtester::MODULE, "run_backtest", async {
                        backtester::run_backtest(
                            &self.db,
                            &self.backtests,
                            &self.rule,
                            window,
                            Utc::now(),
                        )
                    })
                    .await?;
            }
            Job::Report => {
                let report_path = config.report_path();
                self.tracker
                    .track(reporter::MODULE, "generate_daily_report", async {
                        reporter::generate_daily_report(
                            &self.db,
                            &self.signal_log,
                            &report_path,
                            config.report_window_hours,
                            Utc::now(),
                        )
                    })
                    .await?;
            }
            Job::AnomalySweep => {
                let found = self.detector.lock().await.run().await?;
                if !found.is_empty() {
                    info!("Anomaly sweep flagged {} new anomalies", found.len());
                }
            }
        }
        Ok(())
    }

    /// Run `job`, log a failure instead of returning it, and count the run.
    pub async fn run_counted(&self, job: Job) -> bool {
        let ok = match self.run(job).await {
            Ok(()) => true,
            Err(e) => {
                error!("Error in {}: {:#}", job, e);
                false
            }
        };
        self.status.record(ok);
        ok
    }

    pub fn write_status(&self) {
        match self.status.write(Utc::now()) {
            Ok(s) => info!(
                "Status updated: {} iterations, {} errors",
                s.iterations, s.errors
            ),
            Err(e) => error!("Error writing status file: {:#}", e),
        }
    }

    /// Anomaly log lines from the last `hours` hours.
    pub async fn recent_anomalies(&self, hours: i64) -> Result<Vec<String>> {
        self.detector.lock().await.recent(hours)
    }
}

/// Time until the next local `at`, strictly after `now`.
pub fn until_next(at: NaiveTime, now: NaiveDateTime) -> Duration {
    let mut next = now.date().and_time(at);
    if next <= now {
        next += ChronoDuration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

fn spawn_periodic(jobs: Arc<Jobs>, job: Job, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            jobs.run_counted(job).await;
        }
    })
}

/// Run the schedule until Ctrl-C.
pub async fn run(jobs: Arc<Jobs>, config: &Config) -> Result<()> {
    let report_at = config.report_time()?;
    info!(
        "Scheduler starting (collect every {}s, signals every {}s, backtest every {}s, report at {})",
        config.collect_interval_secs,
        config.signal_interval_secs,
        config.backtest_interval_secs,
        report_at.format("%H:%M")
    );

    jobs.write_status();
    jobs.run_counted(Job::Collect).await;
    jobs.run_counted(Job::Signals).await;

    let secs = Duration::from_secs;
    let mut handles = vec![
        spawn_periodic(jobs.clone(), Job::Collect, secs(config.collect_interval_secs)),
        spawn_periodic(jobs.clone(), Job::Signals, secs(config.signal_interval_secs)),
        spawn_periodic(jobs.clone(), Job::Backtest, secs(config.backtest_interval_secs)),
        spawn_periodic(jobs.clone(), Job::AnomalySweep, secs(config.anomaly_interval_secs)),
    ];

    {
        let jobs = jobs.clone();
        let period = secs(config.status_interval_secs);
        handles.push(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                jobs.write_status();
            }
        }));
    }

    {
        let jobs = jobs.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let wait = until_next(report_at, Local::now().naive_local());
                info!("Next daily report in {}s", wait.as_secs());
                tokio::time::sleep(wait).await;
                jobs.run_counted(Job::Report).await;
            }
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    for handle in handles {
        handle.abort();
    }
    jobs.write_status();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::odds_api::types::{Bookmaker, BookmakerMarket, Outcome};
    use crate::odds_api::OddsEvent;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use clap::Parser;

    struct FixedSource(Vec<OddsEvent>);

    #[async_trait]
    impl OddsSource for FixedSource {
        async fn fetch_odds(&self) -> Result<Option<Vec<OddsEvent>>, FetchError> {
            Ok(Some(self.0.clone()))
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn event() -> OddsEvent {
        OddsEvent {
            sport_key: "soccer_epl".into(),
            sport_title: "EPL".into(),
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            commence_time: "2026-10-18T15:00:00Z".into(),
            bookmakers: vec![Bookmaker {
                key: "williamhill".into(),
                markets: vec![BookmakerMarket {
                    key: "h2h".into(),
                    outcomes: vec![
                        Outcome {
                            name: "Arsenal".into(),
                            price: 1.7,
                        },
                        Outcome {
                            name: "Chelsea".into(),
                            price: 4.8,
                        },
                    ],
                }],
            }],
        }
    }

    fn jobs(dir: &std::path::Path) -> Jobs {
        let config = Config::try_parse_from([
            "betsentinel",
            "--data-dir",
            dir.to_str().unwrap(),
        ])
        .unwrap();
        let db = Database::open(":memory:").unwrap();
        let tracker = PerformanceTracker::new(config.performance_path(), config.history_size);
        Jobs::with_source(config, db, tracker, Arc::new(FixedSource(vec![event()])))
    }

    #[test]
    fn next_report_is_later_today_or_tomorrow() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let at = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        let now = day.and_hms_opt(23, 30, 0).unwrap();
        assert_eq!(until_next(at, now), Duration::from_secs(30 * 60));

        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        let morning = day.and_hms_opt(11, 0, 0).unwrap();
        assert_eq!(until_next(noon, morning), Duration::from_secs(3600));
        // Exactly at the report time schedules the next day's run.
        assert_eq!(
            until_next(noon, day.and_time(noon)),
            Duration::from_secs(24 * 3600)
        );
    }

    #[tokio::test]
    async fn jobs_run_end_to_end_and_are_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = jobs(dir.path());

        for job in [Job::Collect, Job::Signals, Job::Backtest, Job::Report, Job::AnomalySweep] {
            assert!(jobs.run_counted(job).await, "{} failed", job);
        }

        let doc = jobs.tracker().snapshot().await;
        for module in ["collector", "signal_generator", "backtester", "reporter"] {
            assert_eq!(doc.modules[module].success_count, 1, "{}", module);
        }
        assert!(dir.path().join("signals.log").exists());
        assert!(dir.path().join("backtest_metrics.json").exists());
        let report = std::fs::read_to_string(dir.path().join("report.txt")).unwrap();
        assert!(report.contains("  BUY signals: 1\n"));

        let status = jobs.status().write(Utc::now()).unwrap();
        assert_eq!(status.iterations, 5);
        assert_eq!(status.errors, 0);
    }
}
