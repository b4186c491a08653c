//! Hand-off from the preview worker to the interactive thread
//!
//! The worker only ever sends [`PreviewEvent`]s into a bounded channel. The
//! bridge owns the receiving end; the UI calls [`PreviewBridge::drain`] on its
//! own schedule, which updates per-key state and notifies subscribers.

use std::collections::HashMap;
use std::path::PathBuf;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};

use super::cache::EnsureOutcome;
use super::pipeline::PreviewEvent;
use crate::paths::RelKey;

/// Events buffered between the worker and the UI
pub const EVENT_CAPACITY: usize = 512;

/// Where a video is in preview generation.
///
/// `Failed` is not terminal; the next pass tries again.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PreviewState {
    #[default]
    Unknown,
    Queued,
    Generating,
    Ready(PathBuf),
    Failed(String),
}

/// Notification that a preview became available
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewReady {
    pub key: RelKey,
    pub path: PathBuf,
    /// `false` when the artifact was already cached
    pub generated: bool,
}

pub type ReadyCallback = Box<dyn FnMut(&PreviewReady)>;

pub struct PreviewBridge {
    events: Receiver<PreviewEvent>,
    generation: u64,
    running: bool,
    states: HashMap<RelKey, PreviewState>,
    subscribers: Vec<ReadyCallback>,
}

impl PreviewBridge {
    /// Create the bridge together with the sender the worker should use
    pub fn channel() -> (Sender<PreviewEvent>, Self) {
        let (tx, rx) = bounded(EVENT_CAPACITY);
        let bridge = PreviewBridge {
            events: rx,
            generation: 0,
            running: false,
            states: HashMap::new(),
            subscribers: Vec::new(),
        };
        (tx, bridge)
    }

    /// Track a new pass. Every key starts `Queued`; keys not listed are forgotten.
    pub fn begin_pass(&mut self, generation: u64, keys: impl IntoIterator<Item = RelKey>) {
        self.generation = generation;
        self.running = true;
        self.states = keys.into_iter().map(|key| (key, PreviewState::Queued)).collect();
    }

    /// Forget everything, e.g. when the dataset is closed
    pub fn clear(&mut self) {
        self.running = false;
        self.states.clear();
    }

    /// Call `callback` for every preview that becomes ready from now on
    pub fn subscribe(&mut self, callback: impl FnMut(&PreviewReady) + 'static) {
        self.subscribers.push(Box::new(callback));
    }

    /// Apply all pending events and return the previews that became ready.
    ///
    /// Events from older passes, or for keys outside the current pass, are
    /// dropped. A key is reported ready at most once per pass.
    pub fn drain(&mut self) -> Vec<PreviewReady> {
        let mut ready = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if event.generation() != self.generation {
                continue;
            }
            match event {
                PreviewEvent::Started { key, .. } => {
                    if let Some(state) = self.states.get_mut(&key) {
                        if *state == PreviewState::Queued {
                            *state = PreviewState::Generating;
                        }
                    }
                }
                PreviewEvent::Finished { key, outcome, .. } => {
                    let Some(state) = self.states.get_mut(&key) else {
                        debug!("Dropping preview event for {} (not in pass)", key);
                        continue;
                    };
                    if matches!(state, PreviewState::Ready(_)) {
                        continue;
                    }
                    match outcome {
                        Ok(outcome) => {
                            let generated = matches!(outcome, EnsureOutcome::Generated(_));
                            let path = match outcome {
                                EnsureOutcome::Cached(path) | EnsureOutcome::Generated(path) => path,
                            };
                            *state = PreviewState::Ready(path.clone());
                            ready.push(PreviewReady { key, path, generated });
                        }
                        Err(e) => {
                            warn!("⚠️  No preview for {}: {}", key, e);
                            *state = PreviewState::Failed(e.to_string());
                        }
                    }
                }
                PreviewEvent::PassComplete { cancelled, .. } => {
                    debug!("Preview pass {} complete (cancelled: {})", self.generation, cancelled);
                    self.running = false;
                }
            }
        }

        for item in &ready {
            for subscriber in &mut self.subscribers {
                subscriber(item);
            }
        }
        ready
    }

    pub fn state(&self, key: &RelKey) -> PreviewState {
        self.states.get(key).cloned().unwrap_or_default()
    }

    /// Keys whose latest attempt failed, with the reason, sorted by key
    pub fn failures(&self) -> Vec<(RelKey, String)> {
        let mut failed: Vec<_> = self
            .states
            .iter()
            .filter_map(|(key, state)| match state {
                PreviewState::Failed(reason) => Some((key.clone(), reason.clone())),
                _ => None,
            })
            .collect();
        failed.sort();
        failed
    }

    /// Whether the current pass has not reported completion yet
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::extractor::PreviewError;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn key(raw: &str) -> RelKey {
        RelKey::parse(raw).unwrap()
    }

    fn finished(generation: u64, raw: &str, ok: bool) -> PreviewEvent {
        let outcome = if ok {
            Ok(EnsureOutcome::Generated(PathBuf::from(format!("/cache/{raw}.jpg"))))
        } else {
            Err(PreviewError::Unavailable)
        };
        PreviewEvent::Finished {
            generation,
            key: key(raw),
            outcome,
        }
    }

    #[test]
    fn test_state_transitions() {
        let (tx, mut bridge) = PreviewBridge::channel();
        bridge.begin_pass(1, [key("a.mp4"), key("b.avi")]);
        assert_eq!(bridge.state(&key("a.mp4")), PreviewState::Queued);
        assert_eq!(bridge.state(&key("zzz.mp4")), PreviewState::Unknown);

        tx.send(PreviewEvent::Started { generation: 1, key: key("a.mp4") }).unwrap();
        assert!(bridge.drain().is_empty());
        assert_eq!(bridge.state(&key("a.mp4")), PreviewState::Generating);

        tx.send(finished(1, "a.mp4", true)).unwrap();
        tx.send(finished(1, "b.avi", false)).unwrap();
        tx.send(PreviewEvent::PassComplete { generation: 1, cancelled: false }).unwrap();
        let ready = bridge.drain();

        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].key, key("a.mp4"));
        assert!(ready[0].generated);
        assert!(matches!(bridge.state(&key("a.mp4")), PreviewState::Ready(_)));
        assert_eq!(bridge.failures().len(), 1);
        assert!(!bridge.is_running());

        // A later pass retries failed keys
        bridge.begin_pass(2, [key("b.avi")]);
        assert_eq!(bridge.state(&key("b.avi")), PreviewState::Queued);
        assert!(bridge.failures().is_empty());
    }

    #[test]
    fn test_stale_and_foreign_events_are_dropped() {
        let (tx, mut bridge) = PreviewBridge::channel();
        bridge.begin_pass(2, [key("a.mp4")]);

        tx.send(finished(1, "a.mp4", true)).unwrap();
        tx.send(finished(2, "other.mp4", true)).unwrap();
        assert!(bridge.drain().is_empty());
        assert_eq!(bridge.state(&key("a.mp4")), PreviewState::Queued);
        assert_eq!(bridge.state(&key("other.mp4")), PreviewState::Unknown);

        // Old pass completing does not end the current one
        tx.send(PreviewEvent::PassComplete { generation: 1, cancelled: true }).unwrap();
        bridge.drain();
        assert!(bridge.is_running());
    }

    #[test]
    fn test_ready_reported_once_and_subscribers_called() {
        let (tx, mut bridge) = PreviewBridge::channel();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        bridge.subscribe(move |ready| sink.borrow_mut().push(ready.key.to_string()));

        bridge.begin_pass(1, [key("a.mp4")]);
        tx.send(finished(1, "a.mp4", true)).unwrap();
        tx.send(finished(1, "a.mp4", true)).unwrap();
        assert_eq!(bridge.drain().len(), 1);
        assert_eq!(*seen.borrow(), vec!["a.mp4".to_string()]);
    }
}
