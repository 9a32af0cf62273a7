//! Daemon event loop
//!
//! Each captured physical device gets a reader task that forwards its key
//! events, together with the device's active key set at read time, to a
//! single consumer. That consumer ([`EventLoop`]) owns the shared
//! [`PendingQueue`], so classification is strictly one event at a time.

use std::collections::HashMap;

use anyhow::Result;
use evdev::{EventType, InputEvent, Key};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::classifier::{ActiveKeys, Classifier, PendingQueue, RawKeyEvent, ShutdownFlag};
use crate::device::Source;
use crate::injector::{event_value, EmitError};

/// Buffered events per reader before it waits on the loop.
pub const EVENT_BUFFER: usize = 256;

/// A key event read from one physical source.
#[derive(Debug, Clone)]
pub struct SourceEvent {
    pub source: Source,
    pub event: InputEvent,
    pub active: ActiveKeys,
}

/// Forward key events from `stream` until the device goes away or the loop stops.
pub fn spawn_reader(
    source: Source,
    mut stream: evdev::EventStream,
    tx: mpsc::Sender<SourceEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match stream.next_event().await {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("Stopped reading {} device: {}", source, e);
                    return;
                }
            };

            if event.event_type() != EventType::KEY {
                continue;
            }

            let active: ActiveKeys = match stream.device().get_key_state() {
                Ok(state) => state.iter().map(|key| key.code()).collect(),
                Err(e) => {
                    tracing::warn!("Could not read {} key state, skipping event: {}", source, e);
                    continue;
                }
            };

            if tx.send(SourceEvent { source, event, active }).await.is_err() {
                tracing::debug!("Event loop gone, {} reader exiting", source);
                return;
            }
        }
    })
}

/// Owns the shared classification state and dispatches source events.
pub struct EventLoop {
    classifiers: HashMap<Source, Classifier>,
    queue: PendingQueue,
    shutdown: ShutdownFlag,
}

impl EventLoop {
    pub fn new(shutdown: ShutdownFlag) -> Self {
        Self {
            classifiers: HashMap::new(),
            queue: PendingQueue::new(),
            shutdown,
        }
    }

    /// Route events from a keyboard source through `classifier`.
    pub fn add_classifier(&mut self, source: Source, classifier: Classifier) {
        self.classifiers.insert(source, classifier);
    }

    pub fn has_classifiers(&self) -> bool {
        !self.classifiers.is_empty()
    }

    /// Handle one event. Fails only when the output writer is gone.
    pub fn handle(&mut self, source_event: &SourceEvent) -> Result<(), EmitError> {
        let SourceEvent {
            source,
            event,
            active,
        } = source_event;

        if *source == Source::Power {
            self.handle_power(event);
            return Ok(());
        }

        match self.classifiers.get_mut(source) {
            Some(classifier) => {
                let raw = RawKeyEvent::from_input(*source, event);
                classifier.classify_and_drive(&raw, active, &mut self.queue)
            }
            None => {
                tracing::debug!("No classifier for {} events, ignoring", source);
                Ok(())
            }
        }
    }

    /// The power button press starts a pending shutdown. Acting on it is up
    /// to the session; the daemon only suppresses the firmware's Meta key.
    fn handle_power(&self, event: &InputEvent) {
        if event.code() == Key::KEY_POWER.code() && event.value() == event_value::PRESS {
            tracing::info!("Power button pressed, shutdown pending");
            self.shutdown.raise();
        }
    }

    /// Process events until ctrl-c or until every reader has stopped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<SourceEvent>) -> Result<()> {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(source_event) => self.handle(&source_event)?,
                    None => {
                        tracing::warn!("All input readers stopped");
                        break;
                    }
                },
                _ = &mut ctrl_c => {
                    tracing::info!("Shutting down...");
                    break;
                }
            }
        }

        let held: Vec<_> = self.queue.pending().collect();
        if !held.is_empty() {
            tracing::warn!("Exiting with roles still held: {:?}", held);
        }

        Ok(())
    }
}
