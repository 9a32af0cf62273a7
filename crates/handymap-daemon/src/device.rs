//! Physical input sources

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use evdev::Device;

/// The physical inputs a profile can take over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// Keyboard channel carrying the extra buttons
    Keyboard,
    /// Second keyboard channel on devices that split their extra buttons
    Keyboard2,
    /// ACPI power button
    Power,
}

impl Source {
    /// Whether the daemon takes the device for exclusive access.
    ///
    /// Keyboards are grabbed so their raw scancodes never reach the session.
    /// The power button is only observed: logind and the session still have
    /// to see `KEY_POWER`, and the daemon never re-emits it.
    pub fn is_grabbed(self) -> bool {
        match self {
            Source::Keyboard | Source::Keyboard2 => true,
            Source::Power => false,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Keyboard => write!(f, "keyboard"),
            Source::Keyboard2 => write!(f, "keyboard-2"),
            Source::Power => write!(f, "power"),
        }
    }
}

/// Open a source device and turn it into an event stream, grabbing it first
/// when [`Source::is_grabbed`] says so.
pub fn open_source(path: &Path, source: Source) -> Result<evdev::EventStream> {
    let mut device = Device::open(path)
        .with_context(|| format!("Failed to open {} device at {}", source, path.display()))?;

    if source.is_grabbed() {
        device.grab().with_context(|| {
            format!(
                "Failed to grab {} device at {} for exclusive access. \
                 Is another remapper using this device?",
                source,
                path.display()
            )
        })?;
        tracing::debug!("Grabbed {} device at {}", source, path.display());
    } else {
        tracing::debug!("Observing {} device at {} without grabbing", source, path.display());
    }

    device.into_event_stream().with_context(|| {
        format!(
            "Failed to create event stream for {} device at {}",
            source,
            path.display()
        )
    })
}
