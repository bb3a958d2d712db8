//! Live viewers
//!
//! Each viewer owns one live feed and runs on its own thread, printing every sample it
//! receives as a JSON line. A viewer ends when the pipeline is dropped; its subscription
//! is released on the way out, whether it returns normally or unwinds.

use serde::Serialize;
use std::io::{self, Write};
use std::thread::{self, JoinHandle};
use telemetry_core::{IngestionPipeline, LiveFeed, SampleKind};

/// Start one viewer per followed sample kind
pub fn spawn_viewers(pipeline: &IngestionPipeline, follow: &[SampleKind]) -> Vec<JoinHandle<()>> {
    let mut kinds = follow.to_vec();
    kinds.sort_by_key(|k| *k as u8);
    kinds.dedup();

    kinds
        .into_iter()
        .map(|kind| match kind {
            SampleKind::Ecu => spawn_viewer(kind, pipeline.live_ecu()),
            SampleKind::Battery => spawn_viewer(kind, pipeline.live_battery()),
        })
        .collect()
}

fn spawn_viewer<T>(kind: SampleKind, mut feed: LiveFeed<T>) -> JoinHandle<()>
where
    T: Serialize + Clone + Send + 'static,
{
    thread::spawn(move || {
        log::debug!("{} viewer attached ({})", kind, feed.handle());
        let stdout = io::stdout();

        for sample in feed.by_ref() {
            #[derive(Serialize)]
            struct Line<'a, S> {
                stream: SampleKind,
                #[serde(flatten)]
                sample: &'a S,
            }

            let line = match serde_json::to_string(&Line {
                stream: kind,
                sample: &sample,
            }) {
                Ok(line) => line,
                Err(e) => {
                    log::warn!("Cannot render {} sample: {}", kind, e);
                    continue;
                }
            };

            let mut out = stdout.lock();
            if writeln!(out, "{}", line).is_err() {
                // Stdout closed (e.g. piped into `head`); detach quietly
                break;
            }
        }

        if feed.dropped() > 0 {
            log::warn!(
                "{} viewer fell behind and skipped {} samples",
                kind,
                feed.dropped()
            );
        }
        log::debug!("{} viewer detached", kind);
    })
}
