//! Virtual device injection via uinput
//!
//! Classification never touches the virtual device directly. Classifiers hold
//! an [`OutputSink`] and enqueue [`EmitRequest`]s; a single writer task
//! ([`run_writer`]) drains the queue, turns each request into one report and
//! enforces the profile's minimum spacing between button reports.

use std::time::Duration;

use anyhow::Result;
use evdev::{uinput::VirtualDeviceBuilder, AttributeSet, EventType, InputEvent, Key};
use handymap_config::Role;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::profile::Binding;

/// Event value constants for key events.
pub mod event_value {
    /// Key release event value
    pub const RELEASE: i32 = 0;
    /// Key press event value
    pub const PRESS: i32 = 1;
    /// Key repeat event value (autorepeat)
    #[allow(dead_code)]
    pub const REPEAT: i32 = 2;
}

/// Highest key code the virtual device advertises. Covers the keyboard block
/// and the gamepad buttons (BTN_SOUTH..BTN_THUMBR).
const MAX_OUTPUT_CODE: u16 = 0x13f;

/// One unit of work for the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitRequest {
    /// Press a role's keys in binding order
    Press { role: Role, keys: Vec<Key> },
    /// Release a role's keys in reverse binding order
    Release { role: Role, keys: Vec<Key> },
    /// Forward a raw key event unchanged
    Passthrough { code: u16, value: i32 },
}

impl EmitRequest {
    /// Events making up the report for this request, SYN_REPORT included.
    pub fn to_events(&self) -> Vec<InputEvent> {
        let mut events: Vec<InputEvent> = match self {
            EmitRequest::Press { keys, .. } => keys
                .iter()
                .map(|k| InputEvent::new(EventType::KEY, k.code(), event_value::PRESS))
                .collect(),
            EmitRequest::Release { keys, .. } => keys
                .iter()
                .rev()
                .map(|k| InputEvent::new(EventType::KEY, k.code(), event_value::RELEASE))
                .collect(),
            EmitRequest::Passthrough { code, value } => {
                vec![InputEvent::new(EventType::KEY, *code, *value)]
            }
        };
        events.push(InputEvent::new(EventType::SYNCHRONIZATION, 0, 0));
        events
    }

    /// Button reports are paced; passthrough keys are not.
    fn is_paced(&self) -> bool {
        !matches!(self, EmitRequest::Passthrough { .. })
    }
}

/// The writer task is gone, so nothing can reach the virtual device anymore.
#[derive(Debug, Error)]
#[error("output writer has stopped, dropped {request:?}")]
pub struct EmitError {
    pub request: EmitRequest,
}

/// Handle through which classifiers emit. Cheap to clone.
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: mpsc::UnboundedSender<EmitRequest>,
}

impl OutputSink {
    /// Create a sink and the receiver the writer task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EmitRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit_down(&self, role: Role, binding: &Binding) -> Result<(), EmitError> {
        self.send(EmitRequest::Press {
            role,
            keys: binding.keys().to_vec(),
        })
    }

    pub fn emit_up(&self, role: Role, binding: &Binding) -> Result<(), EmitError> {
        self.send(EmitRequest::Release {
            role,
            keys: binding.keys().to_vec(),
        })
    }

    pub fn emit_passthrough(&self, code: u16, value: i32) -> Result<(), EmitError> {
        self.send(EmitRequest::Passthrough { code, value })
    }

    fn send(&self, request: EmitRequest) -> Result<(), EmitError> {
        self.tx
            .send(request)
            .map_err(|mpsc::error::SendError(request)| EmitError { request })
    }
}

/// Something that can write one report to an output device.
pub trait ReportWriter {
    fn write_report(&mut self, events: &[InputEvent]) -> Result<()>;
}

/// Drain emission requests until every [`OutputSink`] is dropped.
///
/// A failed write ends the task with the error; senders then observe a
/// closed channel on their next emit.
pub async fn run_writer<W: ReportWriter>(
    mut rx: mpsc::UnboundedReceiver<EmitRequest>,
    mut writer: W,
    spacing: Duration,
) -> Result<()> {
    let mut last_paced: Option<Instant> = None;

    while let Some(request) = rx.recv().await {
        if request.is_paced() {
            if let Some(last) = last_paced {
                tokio::time::sleep_until(last + spacing).await;
            }
        }

        match &request {
            EmitRequest::Press { role, .. } => tracing::debug!("Writing {} press", role),
            EmitRequest::Release { role, .. } => tracing::debug!("Writing {} release", role),
            EmitRequest::Passthrough { code, value } => {
                tracing::trace!("Passing through code {} value {}", code, value)
            }
        }
        writer.write_report(&request.to_events())?;

        if request.is_paced() {
            last_paced = Some(Instant::now());
        }
    }

    tracing::debug!("All output sinks dropped, writer exiting");
    Ok(())
}

/// A virtual input device for injecting events
pub struct VirtualDevice {
    device: evdev::uinput::VirtualDevice,
}

impl VirtualDevice {
    /// Create a virtual device advertising keyboard keys and gamepad buttons.
    pub fn new(name: &str) -> Result<Self> {
        let mut keys = AttributeSet::<Key>::new();
        for code in 0..=MAX_OUTPUT_CODE {
            keys.insert(Key::new(code));
        }

        let device = VirtualDeviceBuilder::new()?
            .name(name)
            .with_keys(&keys)?
            .build()?;

        Ok(Self { device })
    }
}

impl ReportWriter for VirtualDevice {
    fn write_report(&mut self, events: &[InputEvent]) -> Result<()> {
        self.device.emit(events)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every report with the (virtual) time it was written.
    #[derive(Clone, Default)]
    struct RecordingWriter {
        reports: Arc<Mutex<Vec<(Instant, Vec<(u16, i32)>)>>>,
    }

    impl ReportWriter for RecordingWriter {
        fn write_report(&mut self, events: &[InputEvent]) -> Result<()> {
            let keys = events
                .iter()
                .filter(|e| e.event_type() == EventType::KEY)
                .map(|e| (e.code(), e.value()))
                .collect();
            self.reports.lock().unwrap().push((Instant::now(), keys));
            Ok(())
        }
    }

    struct FailingWriter;

    impl ReportWriter for FailingWriter {
        fn write_report(&mut self, _events: &[InputEvent]) -> Result<()> {
            anyhow::bail!("uinput device closed")
        }
    }

    fn qam() -> Binding {
        Binding::new(vec![Key::BTN_MODE, Key::BTN_SOUTH])
    }

    #[test]
    fn test_press_and_release_event_order() {
        let press = EmitRequest::Press {
            role: Role::Button2,
            keys: qam().keys().to_vec(),
        };
        let events = press.to_events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].code(), Key::BTN_MODE.code());
        assert_eq!(events[0].value(), event_value::PRESS);
        assert_eq!(events[1].code(), Key::BTN_SOUTH.code());
        assert_eq!(events[2].event_type(), EventType::SYNCHRONIZATION);

        let release = EmitRequest::Release {
            role: Role::Button2,
            keys: qam().keys().to_vec(),
        };
        let events = release.to_events();
        assert_eq!(events[0].code(), Key::BTN_SOUTH.code());
        assert_eq!(events[0].value(), event_value::RELEASE);
        assert_eq!(events[1].code(), Key::BTN_MODE.code());
    }

    #[test]
    fn test_passthrough_preserves_value() {
        let request = EmitRequest::Passthrough {
            code: Key::KEY_VOLUMEUP.code(),
            value: event_value::REPEAT,
        };
        let events = request.to_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].code(), Key::KEY_VOLUMEUP.code());
        assert_eq!(events[0].value(), event_value::REPEAT);
    }

    #[test]
    fn test_emit_after_writer_gone_fails() {
        let (sink, rx) = OutputSink::channel();
        drop(rx);
        let err = sink.emit_down(Role::Button1, &qam()).unwrap_err();
        assert!(matches!(err.request, EmitRequest::Press { role: Role::Button1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_enforces_spacing_between_button_reports() {
        let (sink, rx) = OutputSink::channel();
        let recorder = RecordingWriter::default();
        let spacing = Duration::from_millis(110);

        sink.emit_down(Role::Button2, &qam()).unwrap();
        sink.emit_passthrough(Key::KEY_VOLUMEUP.code(), 1).unwrap();
        sink.emit_up(Role::Button2, &qam()).unwrap();
        drop(sink);

        run_writer(rx, recorder.clone(), spacing).await.unwrap();

        let reports = recorder.reports.lock().unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].1, vec![(Key::BTN_MODE.code(), 1), (Key::BTN_SOUTH.code(), 1)]);
        assert_eq!(reports[1].1, vec![(Key::KEY_VOLUMEUP.code(), 1)]);
        assert_eq!(reports[2].1, vec![(Key::BTN_SOUTH.code(), 0), (Key::BTN_MODE.code(), 0)]);

        // Passthrough goes out immediately, the release waits for the spacing
        assert_eq!(reports[1].0, reports[0].0);
        assert!(reports[2].0 - reports[0].0 >= spacing);
    }

    #[tokio::test]
    async fn test_writer_failure_closes_channel() {
        let (sink, rx) = OutputSink::channel();
        sink.emit_down(Role::Button1, &qam()).unwrap();

        let result = run_writer(rx, FailingWriter, Duration::ZERO).await;
        assert!(result.is_err());
        assert!(sink.emit_up(Role::Button1, &qam()).is_err());
    }
}
