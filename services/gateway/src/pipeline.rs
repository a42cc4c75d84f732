//! Stream ingestion pipeline.
//!
//! The pipeline owns the read loop against a [`ByteSource`] and wires the
//! stages together: frame decoding, record parsing, unit conversion,
//! batch aggregation and publishing. Decoded readings and published
//! batches are surfaced as ordered events on a channel so a host can
//! display them without sharing mutable state with the loop.

use crate::batch::BatchAggregator;
use crate::config::GatewayConfig;
use crate::convert::{self, GasSpecies};
use crate::document::{Coordinate, ObservationDocument};
use crate::frame::{FrameDecoder, FrameError, RawFrame};
use crate::publisher::Publisher;
use crate::record::SensorRecord;
use crate::serial::ByteSource;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors surfaced by pipeline lifecycle operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("pipeline has no sensor link")]
    NotStarted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Lifecycle state of the read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
}

/// Notifications emitted by the pipeline, in decode order.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// One reading was decoded and converted.
    ReadingDecoded {
        species: GasSpecies,
        micrograms: f64,
    },
    /// A full batch was aggregated and handed to the publisher.
    BatchPublished { mean: f64 },
}

/// Counters for pipeline activity.
#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    pub bytes_read: u64,
    pub frames_decoded: u64,
    pub frames_overflowed: u64,
    pub records_malformed: u64,
    pub readings_converted: u64,
    pub readings_discarded: u64,
    pub batches_published: u64,
    pub batches_skipped_no_location: u64,
}

/// Orchestrator for the ingestion pipeline.
///
/// Cheap to clone; clones share the same lifecycle, location cell and
/// counters.
#[derive(Clone)]
pub struct StreamPipeline {
    config: GatewayConfig,
    publisher: Arc<Publisher>,
    coordinate: Arc<RwLock<Coordinate>>,
    running: Arc<AtomicBool>,
    state: Arc<RwLock<PipelineState>>,
    stats: Arc<RwLock<PipelineStats>>,
    source: Arc<tokio::sync::Mutex<Option<Box<dyn ByteSource>>>>,
    handle: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
    event_tx: mpsc::Sender<PipelineEvent>,
}

impl StreamPipeline {
    /// Create a pipeline and the receiving end of its event channel.
    pub fn new(
        config: GatewayConfig,
        publisher: Arc<Publisher>,
    ) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (event_tx, event_rx) = mpsc::channel(64);

        (
            Self {
                config,
                publisher,
                coordinate: Arc::new(RwLock::new(Coordinate::default())),
                running: Arc::new(AtomicBool::new(false)),
                state: Arc::new(RwLock::new(PipelineState::Idle)),
                stats: Arc::new(RwLock::new(PipelineStats::default())),
                source: Arc::new(tokio::sync::Mutex::new(None)),
                handle: Arc::new(tokio::sync::Mutex::new(None)),
                event_tx,
            },
            event_rx,
        )
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        *self.state.read()
    }

    /// Whether the read loop is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current pipeline counters.
    pub fn stats(&self) -> PipelineStats {
        self.stats.read().clone()
    }

    /// The most recently pushed location.
    pub fn location(&self) -> Coordinate {
        *self.coordinate.read()
    }

    /// Replace the current location wholesale.
    ///
    /// Safe to call concurrently with the read loop; the aggregation step
    /// reads the cell once per flush.
    pub fn update_location(&self, coord: Coordinate) {
        *self.coordinate.write() = coord;
        debug!(
            latitude = coord.latitude,
            longitude = coord.longitude,
            "location updated"
        );
    }

    /// Start the read loop over the given byte source.
    pub async fn start(&self, source: Box<dyn ByteSource>) -> Result<(), PipelineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyRunning);
        }

        *self.source.lock().await = Some(source);
        *self.state.write() = PipelineState::Running;

        let worker = self.clone();
        let handle = tokio::spawn(async move { worker.read_loop().await });
        *self.handle.lock().await = Some(handle);

        info!("pipeline started");
        Ok(())
    }

    /// Stop the pipeline: halt the read loop, abandon the pending batch
    /// and close the sensor link.
    ///
    /// The flag flip is observed by the loop within one poll iteration.
    /// Unflushed partial batches are discarded, not published.
    pub async fn stop(&self) {
        self.halt_read_loop().await;

        if let Some(mut source) = self.source.lock().await.take() {
            if let Err(e) = source.close().await {
                warn!(error = %e, "failed to close sensor link");
            }
        }
        info!("pipeline stopped");
    }

    /// Send a raw control command to the sensor board over the ingestion
    /// link, bypassing the broker.
    ///
    /// The read loop is halted and the pending batch abandoned first, so
    /// the link is quiet when the command goes out. The link itself stays
    /// open.
    pub async fn send_control_command(&self, command: &str) -> Result<(), PipelineError> {
        self.halt_read_loop().await;

        let mut guard = self.source.lock().await;
        let source = guard.as_mut().ok_or(PipelineError::NotStarted)?;
        source.write_all(command.as_bytes()).await?;

        info!(command, "control command sent to sensor board");
        Ok(())
    }

    async fn halt_read_loop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "read loop task failed");
            }
        }
    }

    async fn read_loop(self) {
        let mut decoder = FrameDecoder::new(
            self.config.framing.frame_capacity,
            self.config.framing.delimiter,
        );
        let mut batch = BatchAggregator::new(self.config.batch.capacity);
        let mut chunk = vec![0u8; self.config.serial.read_chunk_size];
        let poll_interval = self.config.serial.poll_interval();

        info!("read loop started");
        while self.running.load(Ordering::SeqCst) {
            // surface at most one completed frame per cycle; further
            // frames from the same chunk wait for the next iterations
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    self.process_frame(&frame, &mut batch).await;
                    continue;
                }
                Ok(None) => {}
                Err(FrameError::Overflow {
                    capacity,
                    discarded,
                }) => {
                    self.stats.write().frames_overflowed += 1;
                    warn!(capacity, discarded, "oversized frame discarded, resyncing");
                    continue;
                }
            }

            let read = {
                let mut guard = self.source.lock().await;
                match guard.as_mut() {
                    Some(source) => source.read_into(&mut chunk).await,
                    None => break,
                }
            };

            match read {
                Ok(0) => tokio::time::sleep(poll_interval).await,
                Ok(n) => {
                    self.stats.write().bytes_read += n as u64;
                    decoder.extend(&chunk[..n]);
                }
                Err(e) => {
                    // transient: the loop only exits on an explicit stop
                    warn!(error = %e, "sensor read failed");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }

        // the in-flight partial frame and any partial batch are abandoned
        decoder.reset();
        batch.clear();
        *self.state.write() = PipelineState::Idle;
        info!("read loop exited");
    }

    async fn process_frame(&self, frame: &RawFrame, batch: &mut BatchAggregator) {
        self.stats.write().frames_decoded += 1;

        let text = match frame.as_text() {
            Ok(text) => text,
            Err(_) => {
                self.stats.write().records_malformed += 1;
                debug!("frame does not decode as text, discarded");
                return;
            }
        };

        let record = match SensorRecord::parse(text) {
            Ok(record) => record,
            Err(e) => {
                self.stats.write().records_malformed += 1;
                debug!(error = %e, "malformed record discarded");
                return;
            }
        };

        let micrograms =
            match convert::ppb_to_micrograms(record.species, record.ppb, record.temperature) {
                Ok(value) => convert::round2(value),
                Err(e) => {
                    self.stats.write().readings_discarded += 1;
                    warn!(error = %e, "reading discarded");
                    return;
                }
            };
        self.stats.write().readings_converted += 1;

        let _ = self
            .event_tx
            .send(PipelineEvent::ReadingDecoded {
                species: record.species,
                micrograms,
            })
            .await;

        batch.append(micrograms);
        if !batch.is_full() {
            return;
        }
        let Some(mean) = batch.flush() else {
            return;
        };

        let coord = self.location();
        if !coord.is_set() {
            self.stats.write().batches_skipped_no_location += 1;
            debug!(mean, "batch complete but location unknown, not published");
            return;
        }

        let document = ObservationDocument::build(
            mean,
            coord,
            &record.phenomenon_time,
            &record.serial,
            &self.config.document.base_url,
            &self.config.document.description,
        );
        match self.publisher.publish(&document).await {
            Ok(()) => {
                self.stats.write().batches_published += 1;
                let _ = self
                    .event_tx
                    .send(PipelineEvent::BatchPublished { mean })
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "publish rejected");
            }
        }
    }
}
