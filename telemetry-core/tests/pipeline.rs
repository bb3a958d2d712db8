// End-to-end behaviour of the ingestion pipeline
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use telemetry_core::codec::{encode_battery_cells, encode_battery_charge};
use telemetry_core::{
    sink_fn, Averages, BatteryLayout, BatterySample, CellReading, EcuSample, FrameLogReader,
    FrameLogWriter, IngestionPipeline, JsonlStore, LiveFeed, MemoryStore, Outcome,
    PipelineConfig, RawFrame, Sample, SampleKind, SampleStore, Simulator, SourceId, StoreError,
};

/// Store that fails every save
struct FailingStore {
    attempts: AtomicUsize,
}

impl SampleStore for FailingStore {
    fn save(&self, _sample: &Sample) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Rejected("disk full".to_string()))
    }

    fn query_all(&self, _kind: SampleKind) -> Result<Vec<Sample>, StoreError> {
        Ok(Vec::new())
    }
}

fn cells() -> [CellReading; 4] {
    [
        CellReading { temp: 25, voltage: 37 },
        CellReading { temp: 26, voltage: 38 },
        CellReading { temp: 27, voltage: 39 },
        CellReading { temp: 28, voltage: 40 },
    ]
}

fn drain(feed: &LiveFeed<BatterySample>) -> Vec<BatterySample> {
    std::iter::from_fn(|| feed.try_recv()).collect()
}

#[test]
fn battery_halves_merge_into_one_sample() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = IngestionPipeline::new(PipelineConfig::new(), store.clone()).unwrap();
    let feed = pipeline.live_battery();

    let charge = RawFrame::new(SourceId::BatteryCharge, encode_battery_charge(42));
    assert_eq!(pipeline.process(&charge), Outcome::AwaitingCounterpart);
    assert!(feed.try_recv().is_none());
    assert!(store.is_empty());

    let cell_frame = RawFrame::new(SourceId::BatteryCells, encode_battery_cells(&cells()));
    assert_eq!(
        pipeline.process(&cell_frame),
        Outcome::Delivered {
            kind: SampleKind::Battery,
            recipients: 1
        }
    );

    let seen = drain(&feed);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].charge_level, 42);
    assert_eq!(seen[0].cells, cells());
    assert_eq!(store.query_all(SampleKind::Battery).unwrap().len(), 1);
}

#[test]
fn only_one_half_emits_nothing() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = IngestionPipeline::new(PipelineConfig::new(), store.clone()).unwrap();
    let feed = pipeline.live_battery();

    for _ in 0..3 {
        let frame = RawFrame::new(SourceId::BatteryCells, encode_battery_cells(&cells()));
        assert_eq!(pipeline.process(&frame), Outcome::AwaitingCounterpart);
    }

    assert!(drain(&feed).is_empty());
    assert!(store.is_empty());
    assert_eq!(pipeline.stats().awaiting_counterpart, 3);
}

#[test]
fn failed_persistence_is_never_broadcast() {
    let store = Arc::new(FailingStore {
        attempts: AtomicUsize::new(0),
    });
    let pipeline = IngestionPipeline::new(PipelineConfig::new(), store.clone()).unwrap();

    let broadcasts = Arc::new(AtomicUsize::new(0));
    let counter = broadcasts.clone();
    pipeline.subscribe_ecu(Arc::new(sink_fn(move |_: EcuSample| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })));
    let feed = pipeline.live_ecu();

    let frame = RawFrame::new(
        SourceId::EcuMotion,
        vec![0x03, 0xE8, 0x32, 0x0B, 0xB8, 0x00, 0x64, 0x00],
    );
    assert_eq!(pipeline.process(&frame), Outcome::StoreFailed);
    assert_eq!(pipeline.process(&frame), Outcome::StoreFailed);

    assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(broadcasts.load(Ordering::SeqCst), 0);
    assert!(feed.try_recv().is_none());
    assert_eq!(pipeline.stats().store_failures, 2);
}

#[test]
fn per_stream_order_is_preserved() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = IngestionPipeline::new(PipelineConfig::new(), store.clone()).unwrap();
    let feed = pipeline.live_ecu();

    let codec = pipeline.codec();
    let mut sim = Simulator::with_seed(codec, BatteryLayout::TwoFrame, 11);
    let mut expected = Vec::new();
    for _ in 0..20 {
        let sample = sim.ecu_sample();
        expected.push(sample.motor_rpm);
        pipeline.process(&RawFrame::new(SourceId::EcuMotion, codec.encode_ecu(&sample)));
    }

    let live: Vec<u16> = std::iter::from_fn(|| feed.try_recv())
        .map(|s| s.motor_rpm)
        .collect();
    assert_eq!(live, expected);

    let stored: Vec<u16> = store
        .query_all(SampleKind::Ecu)
        .unwrap()
        .into_iter()
        .filter_map(|s| match s {
            Sample::Ecu(e) => Some(e.motor_rpm),
            _ => None,
        })
        .collect();
    assert_eq!(stored, expected);
}

#[test]
fn simulated_log_replays_into_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonlStore::open(&dir.path().join("samples.jsonl")).unwrap());
    let pipeline = IngestionPipeline::new(PipelineConfig::new(), store.clone()).unwrap();

    let mut writer = FrameLogWriter::new(Vec::new());
    writer.write_comment("simulated").unwrap();
    for frames in Simulator::with_seed(pipeline.codec(), BatteryLayout::TwoFrame, 3).take(10) {
        for frame in &frames {
            writer.write_frame(frame).unwrap();
        }
    }
    // Noise a real capture would contain
    let mut log = String::from_utf8(writer.finish().unwrap()).unwrap();
    log.push_str("100#03E8\n555#00\n");

    let mut skipped = 0;
    for frame in FrameLogReader::new(Cursor::new(log)) {
        match frame {
            Ok(frame) => {
                pipeline.process(&frame);
            }
            Err(_) => skipped += 1,
        }
    }

    assert_eq!(skipped, 1);
    let stats = pipeline.stats();
    assert_eq!(stats.frames, 31);
    assert_eq!(stats.decode_failures, 1);
    // First charge frame has no counterpart yet; every later half merges
    assert_eq!(stats.awaiting_counterpart, 1);
    assert_eq!(store.query_all(SampleKind::Ecu).unwrap().len(), 10);
    assert_eq!(store.query_all(SampleKind::Battery).unwrap().len(), 19);

    match store.query_averages(SampleKind::Ecu).unwrap() {
        Averages::Ecu(avg) => assert!((0.0..=100.0).contains(&avg.avg_throttle)),
        other => panic!("unexpected averages: {:?}", other),
    }
}

#[test]
fn concurrent_battery_halves_merge_consistently() {
    const PER_PRODUCER: u8 = 200;

    let store = Arc::new(MemoryStore::new());
    let config = PipelineConfig::new().with_sink_queue_capacity(4_096);
    let pipeline = Arc::new(IngestionPipeline::new(config, store.clone()).unwrap());
    let feed = pipeline.live_battery();

    // Every cell frame carries one marker value in all eight bytes, so a merged sample
    // built from two different cell frames would show mixed values
    let charges: HashSet<u8> = (0..PER_PRODUCER).collect();
    let markers: HashSet<u8> = (0..PER_PRODUCER).collect();

    let barrier = Arc::new(Barrier::new(4));
    let producers: Vec<_> = (0..4)
        .map(|worker| {
            let pipeline = pipeline.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for value in (0..PER_PRODUCER).filter(|v| v % 2 == worker % 2) {
                    let frame = if worker < 2 {
                        RawFrame::new(SourceId::BatteryCharge, encode_battery_charge(value))
                    } else {
                        RawFrame::new(SourceId::BatteryCells, [value; 8])
                    };
                    pipeline.process(&frame);
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    let stats = pipeline.stats();
    assert_eq!(stats.frames, 2 * u64::from(PER_PRODUCER));
    assert_eq!(stats.stored + stats.awaiting_counterpart, stats.frames);
    assert!(stats.awaiting_counterpart >= 1);

    let live = drain(&feed);
    let stored: Vec<BatterySample> = store
        .query_all(SampleKind::Battery)
        .unwrap()
        .into_iter()
        .filter_map(|s| match s {
            Sample::Battery(b) => Some(b),
            _ => None,
        })
        .collect();
    assert_eq!(live.len() as u64, stats.stored);
    assert_eq!(stored.len(), live.len());

    for sample in stored.iter().chain(&live) {
        assert!(charges.contains(&sample.charge_level));
        let marker = sample.cells[0].temp;
        assert!(markers.contains(&marker));
        assert!(sample
            .cells
            .iter()
            .all(|c| c.temp == marker && c.voltage == marker));
    }
}
