//! Seam to the device/network layer that discovers the equipment and
//! delivers speed broadcasts.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use core_types::{Clock, SpeedSample, MPS_TO_UNITS_PER_HOUR};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("sample queue is closed")]
    QueueClosed,
}

/// A source of speed samples. `connect` establishes the upstream link and
/// starts pushing converted samples into the bounded queue until the token
/// cancels or the link drops. Broadcast pages the aggregator doesn't care
/// about never reach the queue; the transport drops them silently.
pub trait Transport {
    async fn connect(
        &mut self,
        sink: mpsc::Sender<SpeedSample>,
        cancel: CancellationToken,
    ) -> Result<(), TransportError>;
}

/// Stand-in for the real ANT+ receiver: a bounded random walk over
/// plausible equipment speeds, broadcast at the device's ~4 Hz cadence.
/// Raw values are in m/s like the real general-fe page and are converted
/// to display units here, at the boundary.
pub struct SyntheticTransport {
    device_id: u32,
    clock: Arc<dyn Clock>,
}

impl SyntheticTransport {
    pub fn new(device_id: u32, clock: Arc<dyn Clock>) -> Self {
        Self { device_id, clock }
    }
}

impl Transport for SyntheticTransport {
    async fn connect(
        &mut self,
        sink: mpsc::Sender<SpeedSample>,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        if sink.is_closed() {
            return Err(TransportError::QueueClosed);
        }
        log::info!("synthetic transport up as device {}", self.device_id);
        let clock = Arc::clone(&self.clock);
        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut speed_mps = 4.0_f64;
            let mut ticks = tokio::time::interval(Duration::from_millis(250));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticks.tick() => {}
                }
                speed_mps = (speed_mps + rng.gen_range(-0.2..0.2)).clamp(2.0, 7.0);
                let sample = SpeedSample {
                    speed: speed_mps * MPS_TO_UNITS_PER_HOUR,
                    ts_secs: clock.unix_secs(),
                };
                if sink.send(sample).await.is_err() {
                    break;
                }
            }
        });
        Ok(())
    }
}
