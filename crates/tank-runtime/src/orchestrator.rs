//! Async monitoring orchestrator.
//!
//! A single tokio task owns a [`TankMonitor`] and drives it from two
//! intervals (latest reading, history series) and a command channel. Results
//! are sent as [`MonitorEvent`]s through an `mpsc` channel so consumers never
//! share mutable state with the loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tank_core::models::{ConnectionStatus, HistoryPoint, Reading, UsageSummary, HOURS_PER_DAY};
use tank_core::Result;
use tank_data::aggregator::{IngestOutcome, UsageAggregator};
use tank_data::telemetry::TelemetryClient;
use tank_data::trend::TrendAnalyzer;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

// ── Defaults ──────────────────────────────────────────────────────────────────

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_HISTORY_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_HISTORY_HOURS: u32 = 24;

// ── Public types ──────────────────────────────────────────────────────────────

/// Everything the presentation layer needs after one poll.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TankSnapshot {
    /// Latest reading, annotated with the inferred pump state.
    pub reading: Reading,
    pub summary: UsageSummary,
    pub today_hourly: [f64; HOURS_PER_DAY],
    pub ingest: IngestOutcome,
}

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Snapshot(TankSnapshot),
    /// Downsampled level series for the chart.
    History(Vec<HistoryPoint>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Refresh,
    RefreshHistory,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    pub history_interval: Duration,
    pub history_hours: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            history_interval: Duration::from_secs(DEFAULT_HISTORY_INTERVAL_SECS),
            history_hours: DEFAULT_HISTORY_HOURS,
        }
    }
}

// ── TankMonitor ───────────────────────────────────────────────────────────────

/// Fetch → annotate → ingest pipeline for one tank.
pub struct TankMonitor {
    client: Arc<TelemetryClient>,
    trend: TrendAnalyzer,
    aggregator: UsageAggregator,
    /// Timestamp of the last reading fed to the trend window.
    last_observed_at: Option<DateTime<Utc>>,
    last_status: Option<ConnectionStatus>,
}

impl TankMonitor {
    pub fn new(client: Arc<TelemetryClient>, trend: TrendAnalyzer, aggregator: UsageAggregator) -> Self {
        Self {
            client,
            trend,
            aggregator,
            last_observed_at: None,
            last_status: None,
        }
    }

    /// Fetch the latest reading and fold it into trend and usage.
    ///
    /// `force` bypasses the reading cache. A reading already seen (same
    /// timestamp) keeps the current pump state without growing the trend
    /// window; the sentinel is never observed or ingested.
    pub async fn poll(&mut self, force: bool) -> TankSnapshot {
        let raw = if force {
            self.client.refresh_latest().await
        } else {
            self.client.fetch_latest().await
        };
        self.track_status(raw.connection);

        let reading = if raw.is_sentinel() {
            raw
        } else if self.last_observed_at.is_some_and(|seen| raw.timestamp <= seen) {
            raw.with_pump_state(self.trend.state())
        } else {
            self.last_observed_at = Some(raw.timestamp);
            self.trend.annotate(raw)
        };

        let ingest = self.aggregator.ingest(&reading);
        TankSnapshot {
            summary: self.aggregator.get_summary(),
            today_hourly: self.aggregator.today_hourly_usage(),
            reading,
            ingest,
        }
    }

    pub async fn history(&self, hours: u32, force: bool) -> Vec<HistoryPoint> {
        if force {
            self.client.refresh_history(hours).await
        } else {
            self.client.fetch_history(hours).await
        }
    }

    pub fn aggregator(&self) -> &UsageAggregator {
        &self.aggregator
    }

    pub fn trend(&self) -> &TrendAnalyzer {
        &self.trend
    }

    pub fn connection_status(&self) -> Option<ConnectionStatus> {
        self.last_status
    }

    /// Final persist of the usage state.
    pub fn close(self) -> Result<()> {
        self.aggregator.close()
    }

    fn track_status(&mut self, status: ConnectionStatus) {
        if self.last_status == Some(status) {
            return;
        }
        match status {
            ConnectionStatus::Connected => tracing::info!(%status, "tank connection status changed"),
            _ => tracing::warn!(
                %status,
                last_error = ?self.client.last_error(),
                "tank connection status changed"
            ),
        }
        self.last_status = Some(status);
    }
}

// ── MonitoringOrchestrator ────────────────────────────────────────────────────

/// Background monitoring coordinator.
///
/// Call [`MonitoringOrchestrator::start`] to run the loop in a dedicated
/// tokio task and receive the event channel plus a control handle.
pub struct MonitoringOrchestrator {
    monitor: TankMonitor,
    config: OrchestratorConfig,
}

impl MonitoringOrchestrator {
    pub fn new(monitor: TankMonitor, config: OrchestratorConfig) -> Self {
        Self { monitor, config }
    }

    /// Start the monitoring loop.
    ///
    /// Both intervals fire immediately, so the first snapshot and history
    /// series arrive without waiting a full period.
    pub fn start(self) -> (mpsc::Receiver<MonitorEvent>, MonitoringHandle) {
        // Buffer a modest number of events so slow consumers don't stall the loop.
        let (tx, rx) = mpsc::channel(16);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let handle = tokio::spawn(async move {
            self.monitoring_loop(tx, cmd_rx).await;
        });

        (
            rx,
            MonitoringHandle {
                commands: cmd_tx,
                handle,
            },
        )
    }

    async fn monitoring_loop(self, tx: mpsc::Sender<MonitorEvent>, mut commands: mpsc::Receiver<Command>) {
        let Self { mut monitor, config } = self;

        let mut poll = time::interval(config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut history = time::interval(config.history_interval);
        history.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                _ = poll.tick() => MonitorEvent::Snapshot(monitor.poll(false).await),
                _ = history.tick() => MonitorEvent::History(monitor.history(config.history_hours, false).await),
                command = commands.recv() => match command {
                    Some(Command::Refresh) => {
                        tracing::debug!("manual refresh requested");
                        poll.reset();
                        MonitorEvent::Snapshot(monitor.poll(true).await)
                    }
                    Some(Command::RefreshHistory) => {
                        history.reset();
                        MonitorEvent::History(monitor.history(config.history_hours, true).await)
                    }
                    Some(Command::Shutdown) | None => {
                        tracing::debug!("shutdown requested; exiting loop");
                        break;
                    }
                },
            };

            if tx.send(event).await.is_err() {
                tracing::debug!("monitoring channel closed; exiting loop");
                break;
            }
        }

        if let Err(e) = monitor.close() {
            tracing::warn!(error = %e, "final usage persist failed");
        }
    }
}

// ── MonitoringHandle ──────────────────────────────────────────────────────────

/// Control handle for the background monitoring task.
pub struct MonitoringHandle {
    commands: mpsc::Sender<Command>,
    handle: tokio::task::JoinHandle<()>,
}

impl MonitoringHandle {
    /// Poll immediately, bypassing the reading cache.
    /// Returns `false` if the loop has already stopped.
    pub async fn refresh(&self) -> bool {
        self.commands.send(Command::Refresh).await.is_ok()
    }

    pub async fn refresh_history(&self) -> bool {
        self.commands.send(Command::RefreshHistory).await.is_ok()
    }

    /// Stop the loop and wait for the final persist.
    pub async fn shutdown(self) {
        // A closed channel means the loop is already on its way out.
        let _ = self.commands.send(Command::Shutdown).await;
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "monitoring task ended abnormally");
        }
    }

    /// Abort the loop without the final persist.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
