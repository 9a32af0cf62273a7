//! handymap daemon
//!
//! Grabs a handheld's extra-button keyboards and re-emits each button as its
//! configured gamepad or keyboard binding.

mod classifier;
mod device;
mod event_loop;
mod injector;
mod profile;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use handymap_config::{DeviceIdentity, DeviceInfo, ProfileConfig, DMI_PRODUCT_NAME};
use nix::unistd::Uid;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::classifier::{Classifier, ShutdownFlag, SignatureTable};
use crate::device::Source;
use crate::event_loop::{EventLoop, SourceEvent, EVENT_BUFFER};
use crate::injector::{OutputSink, VirtualDevice};
use crate::profile::ButtonTable;

/// Name of the uinput device the daemon emits on.
const VIRTUAL_DEVICE_NAME: &str = "handymap virtual controller";

#[derive(Parser, Debug)]
#[command(name = "handymapd")]
#[command(about = "Extra-button remapping daemon for Linux handhelds")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/handymap/config.kdl")]
    config: String,

    /// Profile to run instead of the configured or detected one
    #[arg(short, long)]
    profile: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&args.config).into_owned().into();

    let config = if config_path.exists() {
        Some(handymap_config::parse_config(&config_path)?)
    } else {
        None
    };

    let default_level = config
        .as_ref()
        .map(|c| c.global.log_level.as_filter())
        .unwrap_or("info");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = match config {
        Some(config) => {
            tracing::info!("Loaded configuration from {}", config_path.display());
            config
        }
        None => {
            tracing::info!(
                "No configuration at {}, using defaults",
                config_path.display()
            );
            Default::default()
        }
    };

    if !Uid::effective().is_root() {
        tracing::warn!(
            "Not running as root; grabbing input devices and creating the \
             virtual device will likely fail"
        );
    }

    let product = handymap_config::read_product_name(Path::new(DMI_PRODUCT_NAME));
    let profile = profile::select_profile(&config, args.profile.as_deref(), product.as_deref())?;
    let buttons = Arc::new(ButtonTable::from_config(&config.buttons)?);
    let spacing = Duration::from_millis(
        config
            .global
            .button_delay_ms
            .unwrap_or(profile.button_delay_ms),
    );

    tracing::info!(
        "Using profile '{}' ({} role(s), {:?} between reports)",
        profile.name,
        profile.roles.len(),
        spacing
    );

    let devices = handymap_config::enumerate_devices()?;

    let virtual_device = VirtualDevice::new(VIRTUAL_DEVICE_NAME)?;
    let (sink, emit_rx) = OutputSink::channel();
    let writer = tokio::spawn(injector::run_writer(emit_rx, virtual_device, spacing));

    let shutdown = ShutdownFlag::default();
    let table = Arc::new(SignatureTable::from_profile(&profile));
    let mut event_loop = EventLoop::new(shutdown.clone());
    let (tx, rx) = mpsc::channel::<SourceEvent>(EVENT_BUFFER);

    if profile.capture.controller {
        match profile
            .gamepad
            .as_ref()
            .and_then(|identity| handymap_config::find_device(&devices, identity))
        {
            Some(gamepad) => tracing::info!(
                "Found gamepad {} [{}] at {}",
                gamepad.name,
                gamepad.vendor_product(),
                gamepad.path.display()
            ),
            None => tracing::warn!("Gamepad for profile '{}' not found", profile.name),
        }
    }

    for (source, identity) in captured_sources(&profile) {
        let Some(info) = handymap_config::find_device(&devices, identity) else {
            tracing::warn!("No {} device matching '{}'", source, identity.name);
            continue;
        };
        attach_source(source, info, &tx)?;

        if source != Source::Power {
            event_loop.add_classifier(
                source,
                Classifier::new(
                    table.clone(),
                    buttons.clone(),
                    sink.clone(),
                    shutdown.clone(),
                ),
            );
        }
    }

    if !event_loop.has_classifiers() {
        bail!(
            "No keyboard device for profile '{}' was found; nothing to remap",
            profile.name
        );
    }

    // Readers and classifiers own the remaining handles
    drop(tx);
    drop(sink);

    tracing::info!("handymap daemon running");
    let loop_result = event_loop.run(rx).await;

    // The event loop dropped every sink, so the writer drains and exits
    writer.await??;
    loop_result
}

/// Sources the profile asks to capture, with the identity to look them up by.
fn captured_sources(profile: &ProfileConfig) -> Vec<(Source, &DeviceIdentity)> {
    let mut sources = Vec::new();
    if profile.capture.keyboard {
        if let Some(identity) = &profile.keyboard {
            sources.push((Source::Keyboard, identity));
        }
        if let Some(identity) = &profile.keyboard_2 {
            sources.push((Source::Keyboard2, identity));
        }
    }
    if profile.capture.power {
        if let Some(identity) = &profile.power {
            sources.push((Source::Power, identity));
        }
    }
    sources
}

fn attach_source(source: Source, info: &DeviceInfo, tx: &mpsc::Sender<SourceEvent>) -> Result<()> {
    tracing::info!(
        "{} {} device {} [{}] at {}",
        if source.is_grabbed() { "Capturing" } else { "Watching" },
        source,
        info.name,
        info.vendor_product(),
        info.path.display()
    );
    let stream = device::open_source(&info.path, source)?;
    event_loop::spawn_reader(source, stream, tx.clone());
    Ok(())
}
