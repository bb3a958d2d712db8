//! Ingestion summary
//!
//! Tallies per-stream outcomes and prints the end-of-run report.

use std::collections::BTreeMap;
use std::path::PathBuf;
use telemetry_core::{Outcome, PipelineStats};

/// Outcome counts for one replayed stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub path: PathBuf,
    pub lines_skipped: usize,
    /// The log could not be read to the end
    pub read_failed: bool,
    pub delivered: BTreeMap<String, usize>,
    pub recipients: usize,
    pub awaiting: usize,
    pub filtered: usize,
    pub decode_failed: usize,
    pub store_failed: usize,
}

impl StreamReport {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }

    /// Record what the pipeline did with one frame
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Delivered { kind, recipients } => {
                *self.delivered.entry(kind.to_string()).or_insert(0) += 1;
                self.recipients += recipients;
            }
            Outcome::AwaitingCounterpart => self.awaiting += 1,
            Outcome::Filtered => self.filtered += 1,
            Outcome::DecodeFailed(_) => self.decode_failed += 1,
            Outcome::StoreFailed => self.store_failed += 1,
        }
    }

    /// Samples stored from this stream
    pub fn stored(&self) -> usize {
        self.delivered.values().sum()
    }
}

/// Print the end-of-run summary
pub fn print_summary(streams: &[StreamReport], stats: &PipelineStats) {
    println!("\n=== INGESTION SUMMARY ===");
    for stream in streams {
        println!("{:?}", stream.path);
        for (kind, count) in &stream.delivered {
            println!("  {:<8} samples: {}", kind, count);
        }
        println!("  live deliveries:   {}", stream.recipients);
        println!("  awaiting partner:  {}", stream.awaiting);
        if stream.filtered > 0 {
            println!("  filtered:          {}", stream.filtered);
        }
        println!("  decode failures:   {}", stream.decode_failed);
        println!("  store failures:    {}", stream.store_failed);
        println!("  unreadable lines:  {}", stream.lines_skipped);
        if stream.read_failed {
            println!("  read failed before the end of the log");
        }
    }

    println!("\nTotal frames processed: {}", stats.frames);
    println!("Total samples stored:   {}", stats.stored);
    println!("Decode failures:        {}", stats.decode_failures);
    println!("Store failures:         {}", stats.store_failures);
}
