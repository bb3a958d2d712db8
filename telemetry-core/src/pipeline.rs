//! Ingestion pipeline
//!
//! Per inbound frame: decode → persist → broadcast.
//!
//! - Decode failures are logged and the frame is dropped.
//! - Store failures are logged and the sample is dropped; it is never broadcast, so live
//!   subscribers only ever see persisted samples.
//! - Battery halves are merged by a shared [`BatteryAssembler`]; a half whose
//!   counterpart is unknown is dropped silently.
//! - Broadcast only queues the sample for each subscriber; it never waits on one.
//!
//! Nothing in here returns a fatal error: the pipeline keeps accepting frames whatever
//! happened to the previous one. `process` may be called from several transport threads
//! at once; frames handed over by one thread are fully handled in order.

use crate::assembler::BatteryAssembler;
use crate::codec::{self, FrameCodec};
use crate::config::{BatteryLayout, PipelineConfig};
use crate::registry::{LiveFeed, Sink, SubscriptionHandle, SubscriptionRegistry};
use crate::store::SampleStore;
use crate::types::{
    BatterySample, DecodeError, EcuSample, RawFrame, Result, Sample, SampleKind, SourceId,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What happened to one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Sample persisted and queued for `recipients` subscribers
    Delivered { kind: SampleKind, recipients: usize },
    /// Battery half recorded, counterpart not yet known
    AwaitingCounterpart,
    /// Source excluded by configuration
    Filtered,
    /// Payload could not be decoded
    DecodeFailed(DecodeError),
    /// Sample could not be persisted
    StoreFailed,
}

/// Snapshot of the pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub stored: u64,
    pub decode_failures: u64,
    pub store_failures: u64,
    pub awaiting_counterpart: u64,
    pub filtered: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    stored: AtomicU64,
    decode_failures: AtomicU64,
    store_failures: AtomicU64,
    awaiting_counterpart: AtomicU64,
    filtered: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decode-persist-broadcast pipeline for ECU and battery telemetry
pub struct IngestionPipeline {
    config: PipelineConfig,
    codec: FrameCodec,
    store: Arc<dyn SampleStore>,
    battery: BatteryAssembler,
    ecu_subscribers: Arc<SubscriptionRegistry<EcuSample>>,
    battery_subscribers: Arc<SubscriptionRegistry<BatterySample>>,
    counters: Counters,
}

impl IngestionPipeline {
    /// Create a pipeline persisting into `store`
    pub fn new(config: PipelineConfig, store: Arc<dyn SampleStore>) -> Result<Self> {
        config.validate()?;

        let battery = match config.max_half_age_ms {
            Some(max_age) => BatteryAssembler::with_max_half_age_ms(max_age),
            None => BatteryAssembler::new(),
        };

        log::info!(
            "Pipeline ready: throttle calibration {}..{}, battery layout {:?}",
            config.calibration.low,
            config.calibration.high,
            config.battery_layout
        );

        Ok(Self {
            codec: FrameCodec::new(config.calibration),
            store,
            battery,
            ecu_subscribers: Arc::new(
                SubscriptionRegistry::new("ecu").with_queue_capacity(config.sink_queue_capacity),
            ),
            battery_subscribers: Arc::new(
                SubscriptionRegistry::new("battery")
                    .with_queue_capacity(config.sink_queue_capacity),
            ),
            counters: Counters::default(),
            config,
        })
    }

    /// Get the codec used for decoding
    pub fn codec(&self) -> FrameCodec {
        self.codec
    }

    /// Transport callback entry point: frame id plus payload
    ///
    /// Unknown ids are logged and dropped like any other undecodable frame.
    pub fn process_raw(&self, id: u32, payload: &[u8]) -> Outcome {
        match SourceId::try_from(id) {
            Ok(source) => self.process(&RawFrame::new(source, payload)),
            Err(e) => {
                Counters::bump(&self.counters.frames);
                Counters::bump(&self.counters.decode_failures);
                log::warn!("Dropping frame: {}", e);
                Outcome::DecodeFailed(e)
            }
        }
    }

    /// Handle one frame end to end
    pub fn process(&self, frame: &RawFrame) -> Outcome {
        Counters::bump(&self.counters.frames);
        log::trace!("Frame {} ({} bytes)", frame.source, frame.dlc());

        if !self.config.should_process_source(frame.source) {
            Counters::bump(&self.counters.filtered);
            return Outcome::Filtered;
        }

        let sample = match self.decode(frame) {
            Ok(Some(sample)) => sample,
            Ok(None) => {
                Counters::bump(&self.counters.awaiting_counterpart);
                log::debug!(
                    "Battery half from {} held until its counterpart arrives",
                    frame.source
                );
                return Outcome::AwaitingCounterpart;
            }
            Err(e) => {
                Counters::bump(&self.counters.decode_failures);
                log::warn!("Dropping frame: {}", e);
                return Outcome::DecodeFailed(e);
            }
        };

        if let Err(e) = self.store.save(&sample) {
            Counters::bump(&self.counters.store_failures);
            log::warn!("Failed to persist {} sample, not broadcasting: {}", sample.kind(), e);
            return Outcome::StoreFailed;
        }
        Counters::bump(&self.counters.stored);

        let kind = sample.kind();
        let report = match &sample {
            Sample::Ecu(s) => self.ecu_subscribers.broadcast(s),
            Sample::Battery(s) => self.battery_subscribers.broadcast(s),
        };

        Outcome::Delivered {
            kind,
            recipients: report.delivered,
        }
    }

    fn decode(&self, frame: &RawFrame) -> std::result::Result<Option<Sample>, DecodeError> {
        let payload = frame.payload.as_slice();
        match (frame.source, self.config.battery_layout) {
            (SourceId::EcuMotion, _) => Ok(Some(self.codec.decode_ecu(payload)?.into())),
            (SourceId::BatteryCharge, BatteryLayout::TwoFrame) => {
                let half = codec::decode_battery_charge(payload)?;
                Ok(self.battery.accept(half).map(Sample::from))
            }
            (SourceId::BatteryCells, BatteryLayout::TwoFrame) => {
                let half = codec::decode_battery_cells(payload)?;
                Ok(self.battery.accept(half).map(Sample::from))
            }
            (SourceId::BatteryCharge, BatteryLayout::LegacySingle) => {
                Ok(Some(codec::decode_battery_legacy(payload)?.into()))
            }
            (SourceId::BatteryCells, BatteryLayout::LegacySingle) => {
                Err(DecodeError::UnexpectedFrame(SourceId::BatteryCells))
            }
        }
    }

    /// Register a live ECU sink, driven from its own delivery thread
    pub fn subscribe_ecu(&self, sink: Arc<dyn Sink<EcuSample>>) -> SubscriptionHandle {
        self.ecu_subscribers.subscribe(sink)
    }

    /// Register a live battery sink, driven from its own delivery thread
    pub fn subscribe_battery(&self, sink: Arc<dyn Sink<BatterySample>>) -> SubscriptionHandle {
        self.battery_subscribers.subscribe(sink)
    }

    /// Revoke an ECU subscription; unknown handles are ignored
    pub fn unsubscribe_ecu(&self, handle: SubscriptionHandle) -> bool {
        self.ecu_subscribers.unsubscribe(handle)
    }

    /// Revoke a battery subscription; unknown handles are ignored
    pub fn unsubscribe_battery(&self, handle: SubscriptionHandle) -> bool {
        self.battery_subscribers.unsubscribe(handle)
    }

    /// Open a bounded live ECU feed that unsubscribes when dropped
    pub fn live_ecu(&self) -> LiveFeed<EcuSample> {
        LiveFeed::open(&self.ecu_subscribers, self.config.sink_queue_capacity)
    }

    /// Open a bounded live battery feed that unsubscribes when dropped
    pub fn live_battery(&self) -> LiveFeed<BatterySample> {
        LiveFeed::open(&self.battery_subscribers, self.config.sink_queue_capacity)
    }

    /// Number of live subscribers for a sample kind
    pub fn subscriber_count(&self, kind: SampleKind) -> usize {
        match kind {
            SampleKind::Ecu => self.ecu_subscribers.len(),
            SampleKind::Battery => self.battery_subscribers.len(),
        }
    }

    /// Snapshot of the frame counters
    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            frames: c.frames.load(Ordering::Relaxed),
            stored: c.stored.load(Ordering::Relaxed),
            decode_failures: c.decode_failures.load(Ordering::Relaxed),
            store_failures: c.store_failures.load(Ordering::Relaxed),
            awaiting_counterpart: c.awaiting_counterpart.load(Ordering::Relaxed),
            filtered: c.filtered.load(Ordering::Relaxed),
        }
    }
}
