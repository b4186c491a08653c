//! Background preview generation
//!
//! One worker thread walks the current video list and calls
//! [`cache::ensure`] for each entry. It never touches the metadata store;
//! it gets its own copy of the key list and reports back through a bounded
//! event channel that the interactive thread drains (see `bridge`).

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use tracing::{debug, info, warn};

use super::cache::{self, EnsureOutcome};
use super::extractor::{PreviewError, ThumbnailExtractor};
use crate::paths::RelKey;

/// How long the worker waits on a full event channel before re-checking
/// whether its pass was cancelled
const SEND_RETRY: Duration = Duration::from_millis(25);

/// One video to preview
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewItem {
    pub key: RelKey,
    pub source: PathBuf,
}

/// Message from the worker to the interactive thread.
///
/// Every event carries the generation of the pass that produced it, so
/// results from a cancelled pass can be recognised and dropped.
#[derive(Debug)]
pub enum PreviewEvent {
    Started {
        generation: u64,
        key: RelKey,
    },
    Finished {
        generation: u64,
        key: RelKey,
        outcome: Result<EnsureOutcome, PreviewError>,
    },
    PassComplete {
        generation: u64,
        cancelled: bool,
    },
}

impl PreviewEvent {
    pub fn generation(&self) -> u64 {
        match self {
            PreviewEvent::Started { generation, .. }
            | PreviewEvent::Finished { generation, .. }
            | PreviewEvent::PassComplete { generation, .. } => *generation,
        }
    }
}

struct PreviewJob {
    generation: u64,
    items: Vec<PreviewItem>,
    cache_dir: PathBuf,
    cancel: Arc<AtomicBool>,
}

/// The next pass to run. A newer pass replaces one that has not started yet.
type PendingJob = Arc<Mutex<Option<PreviewJob>>>;

/// Handle to the preview worker thread
pub struct PreviewPipeline {
    pending: PendingJob,
    /// Capacity 1: a wake-up already queued covers any later job
    wake: Sender<()>,
    /// Cancel flag of the most recently submitted pass
    cancel: Option<Arc<AtomicBool>>,
    generation: u64,
}

impl PreviewPipeline {
    /// Start the worker. Results are sent on `events`.
    pub fn spawn(extractor: Arc<dyn ThumbnailExtractor>, events: Sender<PreviewEvent>) -> io::Result<Self> {
        let pending: PendingJob = Arc::default();
        let (wake, wake_rx) = bounded::<()>(1);

        let slot = Arc::clone(&pending);
        thread::Builder::new()
            .name("preview-worker".into())
            .spawn(move || run_worker(slot, wake_rx, events, extractor))?;

        Ok(PreviewPipeline {
            pending,
            wake,
            cancel: None,
            generation: 0,
        })
    }

    /// Queue a pass over `items`, cancelling any pass still running.
    ///
    /// Never blocks, however far behind the worker or the event consumer is.
    /// Returns the generation number of the new pass.
    pub fn start_pass(&mut self, items: Vec<PreviewItem>, cache_dir: PathBuf) -> u64 {
        self.cancel();
        self.generation += 1;

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel = Some(Arc::clone(&cancel));

        let count = items.len();
        let job = PreviewJob {
            generation: self.generation,
            items,
            cache_dir,
            cancel,
        };
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(job);

        match self.wake.try_send(()) {
            Ok(()) | Err(crossbeam_channel::TrySendError::Full(())) => {
                debug!("Queued preview pass {} ({} videos)", self.generation, count);
            }
            Err(crossbeam_channel::TrySendError::Disconnected(())) => {
                warn!("⚠️  Preview worker is gone, previews will not update");
            }
        }
        self.generation
    }

    /// Stop the running pass after the artifact currently being generated
    pub fn cancel(&mut self) {
        if let Some(flag) = self.cancel.take() {
            flag.store(true, Ordering::Relaxed);
        }
        // A pass that never started is simply dropped
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Generation of the most recent pass (0 before the first one)
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for PreviewPipeline {
    fn drop(&mut self) {
        // Dropping `wake` afterwards disconnects the channel and ends the worker
        self.cancel();
    }
}

fn run_worker(
    pending: PendingJob,
    wake: Receiver<()>,
    events: Sender<PreviewEvent>,
    extractor: Arc<dyn ThumbnailExtractor>,
) {
    debug!("Preview worker started ({})", extractor.name());
    while wake.recv().is_ok() {
        let job = pending.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(job) = job else {
            continue;
        };
        if !run_pass(&job, extractor.as_ref(), &events) {
            break;
        }
    }
    debug!("Preview worker exiting");
}

enum Delivery {
    Sent,
    /// The pass was cancelled while the channel was full
    Cancelled,
    /// Nobody is listening any more
    Disconnected,
}

/// Send `event`, waiting for room only as long as the pass is still current
fn deliver(events: &Sender<PreviewEvent>, mut event: PreviewEvent, cancel: &AtomicBool) -> Delivery {
    loop {
        match events.send_timeout(event, SEND_RETRY) {
            Ok(()) => return Delivery::Sent,
            Err(SendTimeoutError::Timeout(unsent)) => {
                if cancel.load(Ordering::Relaxed) {
                    return Delivery::Cancelled;
                }
                event = unsent;
            }
            Err(SendTimeoutError::Disconnected(_)) => return Delivery::Disconnected,
        }
    }
}

/// Returns false once the receiving side has gone away
fn run_pass(job: &PreviewJob, extractor: &dyn ThumbnailExtractor, events: &Sender<PreviewEvent>) -> bool {
    let generation = job.generation;
    let (mut generated, mut cached, mut failed) = (0usize, 0usize, 0usize);

    let cancelled = || {
        debug!("Preview pass {} cancelled", generation);
        let complete = PreviewEvent::PassComplete { generation, cancelled: true };
        !matches!(deliver(events, complete, &job.cancel), Delivery::Disconnected)
    };

    for item in &job.items {
        // Checked between artifacts only; a decode in progress is not interrupted
        if job.cancel.load(Ordering::Relaxed) {
            return cancelled();
        }

        let started = PreviewEvent::Started {
            generation,
            key: item.key.clone(),
        };
        match deliver(events, started, &job.cancel) {
            Delivery::Sent => {}
            Delivery::Cancelled => return cancelled(),
            Delivery::Disconnected => return false,
        }

        let outcome = cache::ensure(&item.key, &item.source, &job.cache_dir, extractor);
        match &outcome {
            Ok(EnsureOutcome::Cached(_)) => cached += 1,
            Ok(EnsureOutcome::Generated(_)) => generated += 1,
            Err(e) => {
                debug!("No preview for {}: {}", item.key, e);
                failed += 1;
            }
        }

        let finished = PreviewEvent::Finished {
            generation,
            key: item.key.clone(),
            outcome,
        };
        match deliver(events, finished, &job.cancel) {
            Delivery::Sent => {}
            Delivery::Cancelled => return cancelled(),
            Delivery::Disconnected => return false,
        }
    }

    info!(
        "🖼️  Preview pass {}: {} generated, {} cached, {} unavailable",
        generation, generated, cached, failed
    );
    let complete = PreviewEvent::PassComplete { generation, cancelled: false };
    !matches!(deliver(events, complete, &job.cancel), Delivery::Disconnected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::cache::tests::CountingExtractor;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn collect_until_complete(rx: &Receiver<PreviewEvent>, generation: u64) -> Vec<PreviewEvent> {
        let mut events = Vec::new();
        loop {
            let event = rx.recv_timeout(Duration::from_secs(10)).unwrap();
            let done = matches!(event, PreviewEvent::PassComplete { generation: g, .. } if g == generation);
            events.push(event);
            if done {
                return events;
            }
        }
    }

    fn items(root: &std::path::Path, names: &[&str]) -> Vec<PreviewItem> {
        names
            .iter()
            .map(|name| {
                let source = root.join(name);
                fs::write(&source, b"x").unwrap();
                PreviewItem {
                    key: RelKey::parse(name).unwrap(),
                    source,
                }
            })
            .collect()
    }

    #[test]
    fn test_pass_reports_each_item_once() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let extractor = Arc::new(CountingExtractor { calls: Arc::clone(&calls) });
        let (tx, rx) = bounded(64);
        let mut pipeline = PreviewPipeline::spawn(extractor, tx).unwrap();

        let cache_dir = dir.path().join("previews");
        let generation = pipeline.start_pass(items(dir.path(), &["a.mp4", "b.avi", "c.mkv"]), cache_dir.clone());
        let events = collect_until_complete(&rx, generation);

        let finished: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PreviewEvent::Finished { key, outcome, .. } => Some((key.as_str(), outcome.is_ok())),
                _ => None,
            })
            .collect();
        assert_eq!(finished, vec![("a.mp4", true), ("b.avi", false), ("c.mkv", true)]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Second pass: good files are cached, the failed one is retried
        let generation = pipeline.start_pass(items(dir.path(), &["a.mp4", "b.avi", "c.mkv"]), cache_dir);
        let events = collect_until_complete(&rx, generation);
        let cached = events
            .iter()
            .filter(|e| matches!(e, PreviewEvent::Finished { outcome: Ok(EnsureOutcome::Cached(_)), .. }))
            .count();
        assert_eq!(cached, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_cancelled_pass_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = bounded(4);
        let mut pipeline = PreviewPipeline::spawn(Arc::new(CountingExtractor::default()), tx).unwrap();

        let names: Vec<String> = (0..50).map(|i| format!("v{i:02}.mp4")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let first = pipeline.start_pass(items(dir.path(), &refs), dir.path().join("previews"));
        let second = pipeline.start_pass(Vec::new(), dir.path().join("previews"));
        assert_eq!(second, first + 1);

        // The tiny channel blocks the worker, so the first pass cannot finish
        // all fifty items before it sees the cancel flag
        let mut first_finished = 0;
        loop {
            match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                PreviewEvent::Finished { generation, .. } if generation == first => first_finished += 1,
                PreviewEvent::PassComplete { generation, cancelled } if generation == second => {
                    assert!(!cancelled);
                    break;
                }
                _ => {}
            }
        }
        assert!(first_finished < 50);
    }

    #[test]
    fn test_start_pass_never_blocks_on_full_event_channel() {
        let dir = tempfile::tempdir().unwrap();
        let names: Vec<String> = (0..400).map(|i| format!("v{i:03}.mp4")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let batch = items(dir.path(), &refs);
        let cache_dir = dir.path().join("previews");

        // Nobody reads the events: the worker fills the channel and stalls
        let (tx, rx) = bounded(8);
        let mut pipeline =
            PreviewPipeline::spawn(Arc::new(crate::preview::UnavailableExtractor), tx).unwrap();

        let (done_tx, done_rx) = bounded(1);
        let submitter = thread::spawn(move || {
            let mut last = 0;
            for _ in 0..6 {
                last = pipeline.start_pass(batch.clone(), cache_dir.clone());
                thread::sleep(Duration::from_millis(30));
            }
            done_tx.send(last).unwrap();
            pipeline
        });

        let last = done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("start_pass blocked behind a stalled worker");
        assert_eq!(last, 6);
        let _pipeline = submitter.join().unwrap();

        // Once the events are drained, the latest pass runs to completion
        loop {
            match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                PreviewEvent::PassComplete { generation, cancelled } if generation == last => {
                    assert!(!cancelled);
                    break;
                }
                _ => {}
            }
        }
    }
}
