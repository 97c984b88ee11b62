mod bootstrap;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tank_core::formatting::{format_liters, format_percent, format_run_time};
use tank_core::settings::Settings;
use tank_core::time_utils::TimezoneHandler;
use tank_data::aggregator::{UsageAggregator, UsageConfig};
use tank_data::store::JsonFileStore;
use tank_data::telemetry::{TelemetryClient, TelemetryConfig};
use tank_data::transport::{build_transports, TransportUrls};
use tank_data::trend::TrendAnalyzer;
use tank_runtime::orchestrator::{
    MonitorEvent, MonitoringOrchestrator, OrchestratorConfig, TankMonitor, TankSnapshot,
};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load_with_last_used();
    settings.validate()?;

    let data_dir = settings.resolved_data_dir();
    bootstrap::ensure_directories(&data_dir)?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_ref())?;

    tracing::info!("Tank Monitor v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "View: {}, Channel: {}, Timezone: {}",
        settings.view,
        settings.channel_id.as_deref().unwrap_or("-"),
        settings.timezone
    );

    let timezone = TimezoneHandler::new(&settings.timezone);
    let mut aggregator = UsageAggregator::open(
        usage_config(&settings),
        timezone,
        Box::new(JsonFileStore::in_dir(&data_dir)),
    );
    if settings.reset_usage {
        aggregator.reset();
    }

    match settings.view.as_str() {
        "live" => {
            let client = Arc::new(build_client(&settings, timezone)?);
            run_live(client, aggregator, orchestrator_config(&settings)).await?;
        }

        "summary" => {
            print_json(&aggregator.get_summary())?;
            aggregator.close()?;
        }

        "history" => {
            let days = usize::try_from(settings.days).unwrap_or(usize::MAX);
            print_json(&aggregator.get_historical_usage(days))?;
            aggregator.close()?;
        }

        "check" => {
            aggregator.close()?;
            let client = build_client(&settings, timezone)?;
            if client.test_connection().await {
                println!("connection ok");
            } else {
                anyhow::bail!(
                    "connection check failed: {}",
                    client.last_error().unwrap_or_else(|| "unknown error".to_string())
                );
            }
        }

        unknown => {
            eprintln!("Unknown view mode: {}", unknown);
        }
    }

    Ok(())
}

// ── Live view ──────────────────────────────────────────────────────────────────

async fn run_live(
    client: Arc<TelemetryClient>,
    aggregator: UsageAggregator,
    config: OrchestratorConfig,
) -> Result<()> {
    tracing::info!("Starting live monitoring...");

    let monitor = TankMonitor::new(client, TrendAnalyzer::default(), aggregator);
    let (mut rx, handle) = MonitoringOrchestrator::new(monitor, config).start();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(MonitorEvent::Snapshot(snapshot)) => {
                    log_snapshot(&snapshot);
                    println!("{}", serde_json::to_string(&snapshot)?);
                }
                Some(MonitorEvent::History(points)) => {
                    tracing::info!(
                        points = points.len(),
                        latest = ?points.last().map(|p| p.level_percent),
                        "level history updated"
                    );
                }
                None => break,
            },
            _ = &mut ctrl_c => {
                tracing::info!("Ctrl+C received; shutting down monitoring task");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

fn log_snapshot(snapshot: &TankSnapshot) {
    let reading = &snapshot.reading;
    let daily = &snapshot.summary.daily;
    tracing::info!(
        "Level {} ({} of {}), pump {}, updated {} | today: used {}, intake {}, pump {}",
        format_percent(reading.level_percent),
        format_liters(reading.current_volume_liters()),
        format_liters(reading.tank_capacity_liters),
        reading.pump_state,
        reading.last_updated,
        format_liters(daily.usage_liters),
        format_liters(daily.intake_liters),
        format_run_time(daily.pump_run_time_minutes),
    );
}

// ── Wiring ─────────────────────────────────────────────────────────────────────

fn build_client(settings: &Settings, timezone: TimezoneHandler) -> Result<TelemetryClient> {
    let config = telemetry_config(settings, timezone)?;
    let urls = TransportUrls {
        primary: settings.api_url.clone(),
        fallback: settings.fallback_url.clone(),
        relay: settings.relay_url.clone(),
    };
    let transports = build_transports(&urls, config.transport_timeout)?;
    tracing::debug!(
        transports = ?transports.iter().map(|t| t.name()).collect::<Vec<_>>(),
        "transport chain ready"
    );
    Ok(TelemetryClient::new(config, transports))
}

fn telemetry_config(settings: &Settings, timezone: TimezoneHandler) -> Result<TelemetryConfig> {
    let channel_id = settings
        .channel_id
        .clone()
        .filter(|c| !c.is_empty())
        .context("a channel id is required (--channel-id or TANK_CHANNEL_ID)")?;
    let mut config = TelemetryConfig::new(channel_id);
    config.api_key = settings.api_key.clone().filter(|k| !k.is_empty());
    config.default_capacity_liters = settings.capacity_liters;
    config.timezone = timezone;
    Ok(config)
}

fn usage_config(settings: &Settings) -> UsageConfig {
    UsageConfig {
        pump_rate_lpm: settings.pump_rate_lpm,
        poll_interval: Duration::from_secs(u64::from(settings.poll_interval)),
        ..UsageConfig::default()
    }
}

fn orchestrator_config(settings: &Settings) -> OrchestratorConfig {
    OrchestratorConfig {
        poll_interval: Duration::from_secs(u64::from(settings.poll_interval)),
        history_interval: Duration::from_secs(u64::from(settings.history_interval)),
        history_hours: settings.history_hours,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
