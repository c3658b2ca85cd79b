mod transport;

use std::process;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use core_types::{AppConfig, Clock, SpeedSample, SystemClock};
use ledger::DistanceLedger;
use link_supervisor::ConnectionSupervisor;
use session_engine::SessionEngine;
use transport::{SyntheticTransport, Transport};

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(err) = run().await {
        eprintln!("paceline failed: {err}");
        process::exit(1);
    }
}

#[derive(Debug, Error)]
enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Ledger(#[from] ledger::LedgerError),
    #[error("upstream link failed after {attempts} reconnection attempts")]
    LinkFailed { attempts: u32 },
}

async fn run() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    println!("paceline: speed & daily distance aggregator");
    println!(
        "device {}; distance db at {}",
        config.device_id,
        config.db_path.display()
    );

    let ledger = Arc::new(DistanceLedger::open(&config.db_path, Arc::clone(&clock))?);
    if !ledger.connected() {
        println!("warning: persistence unavailable; totals will not survive this run");
    }

    if config.stats_only {
        print_recent(&ledger);
        return Ok(());
    }

    let mut engine = SessionEngine::new(
        config.device_id,
        Arc::clone(&ledger),
        Arc::clone(&clock),
        config.speed_window_secs,
    );
    let mut supervisor = ConnectionSupervisor::new(config.max_reconnect_attempts);

    let (sample_tx, mut sample_rx) = mpsc::channel::<SpeedSample>(config.queue_capacity);
    let cancel = CancellationToken::new();
    spawn_shutdown_watcher(cancel.clone());

    let mut transport = SyntheticTransport::new(config.device_id, Arc::clone(&clock));
    supervisor.begin_connect();
    match transport.connect(sample_tx.clone(), cancel.clone()).await {
        Ok(()) => {
            supervisor.record_attempt(true);
        }
        Err(err) => {
            log::error!("initial connect failed: {err}");
            if !reconnect(&mut transport, &mut supervisor, &sample_tx, &cancel, &config).await {
                report_final(&mut engine);
                return Err(AppError::LinkFailed {
                    attempts: config.max_reconnect_attempts,
                });
            }
        }
    }
    println!("listening for samples; press Ctrl+C to stop");

    // One task owns every engine/supervisor mutation: sample delivery and
    // the periodic flush/liveness tick are serialized through this select.
    let mut link_failed = false;
    let mut ticker = tokio::time::interval(Duration::from_secs(config.flush_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            maybe = sample_rx.recv() => match maybe {
                Some(sample) => {
                    engine.record_sample(sample.speed, sample.ts_secs);
                    supervisor.on_sample_received(clock.unix_secs());
                }
                None => break,
            },
            _ = ticker.tick() => {
                engine.flush();
                if supervisor.check_liveness(clock.unix_secs(), config.liveness_window_secs)
                    && !reconnect(&mut transport, &mut supervisor, &sample_tx, &cancel, &config)
                        .await
                {
                    link_failed = true;
                    break;
                }
            }
        }
    }

    // Deterministic shutdown: one forced flush, then the final report.
    engine.flush();
    report_final(&mut engine);

    if link_failed {
        return Err(AppError::LinkFailed {
            attempts: config.max_reconnect_attempts,
        });
    }
    Ok(())
}

fn spawn_shutdown_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("cannot listen for shutdown signal: {err}");
            return;
        }
        log::info!("shutdown signal received");
        cancel.cancel();
    });
}

/// Bounded reconnection with a fixed delay between attempts. Returns false
/// exactly when the supervisor reaches its terminal state.
async fn reconnect<T: Transport>(
    transport: &mut T,
    supervisor: &mut ConnectionSupervisor,
    sink: &mpsc::Sender<SpeedSample>,
    cancel: &CancellationToken,
    config: &AppConfig,
) -> bool {
    let delay = Duration::from_millis(config.reconnect_delay_ms);
    loop {
        if cancel.is_cancelled() {
            return true;
        }
        tokio::time::sleep(delay).await;
        match transport.connect(sink.clone(), cancel.clone()).await {
            Ok(()) => {
                supervisor.record_attempt(true);
                log::info!("upstream link re-established");
                return true;
            }
            Err(err) => {
                log::warn!(
                    "reconnect attempt {} failed: {err}",
                    supervisor.attempt_count() + 1
                );
                if !supervisor.record_attempt(false) {
                    return false;
                }
            }
        }
    }
}

fn print_recent(ledger: &DistanceLedger) {
    let records = ledger.recent_records();
    if records.is_empty() {
        println!("no stored distance for today or yesterday");
        return;
    }
    println!("stored daily distance (today, then yesterday):");
    for record in records {
        println!(
            "  {}  entity {:>6}  {:>8.2} units  updated {}",
            record.date,
            record.entity_id,
            record.distance,
            record.last_updated.format("%H:%M:%S")
        );
    }
}

fn report_final(engine: &mut SessionEngine) {
    let snap = engine.snapshot();
    println!();
    println!("final session stats:");
    println!("  session distance : {:>8.2} units", snap.session_distance);
    println!("  total today      : {:>8.2} units", snap.total_today);
    println!("  yesterday        : {:>8.2} units", snap.yesterday_distance);
    println!("  max speed        : {:>8.2} units/h", snap.max_speed);
    println!("  average speed    : {:>8.2} units/h", snap.average_speed);
    println!("  session duration : {:>8} s", snap.session_duration_secs);
}
