//! Extra-button classification
//!
//! Handhelds report their extra buttons as scancodes on a keyboard device.
//! The codes are noisy: several buttons share a channel, some releases look
//! identical to other keys, and the power button firmware adds a stray Meta
//! press. The [`Classifier`] turns that stream into clean per-role
//! press/release pairs.
//!
//! # Per-Role State Machine
//!
//! ```text
//!                press signature matches, value=1
//!        ┌──────────┐ ─────────────────────────────► ┌─────────┐
//!        │ RELEASED │         emit down              │ PRESSED │
//!        └──────────┘ ◄───────────────────────────── └─────────┘
//!                release signature matches, value=0,
//!                code in release-codes: emit up
//!                         or
//!                forced sweep (momentary role): emit up
//! ```
//!
//! Matching a press while PRESSED, or a release while RELEASED, does nothing.
//! The state table ([`PendingQueue`]) is shared by every classifier in the
//! daemon, so a role can never be held twice through two keyboard channels.
//!
//! ## Signature Matching
//!
//! A signature matches when the device's active key set is EXACTLY the
//! signature set. With signature `{187}`:
//! - Matches: only 187 held
//! - No match: 187 and 29 held (extra key)
//! - No match: nothing held
//!
//! Repeats (value=2) never produce an edge.
//!
//! ## Per-Event Order
//!
//! 1. Pass-through codes are forwarded as-is and skip matching.
//! 2. Every role signature is matched and drives its state machine.
//! 3. The shutdown flag is cleared if this was the trailing Meta release.
//! 4. Every momentary role pressed by the previous event is released.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use evdev::InputEvent;
use handymap_config::{ProfileConfig, Role, RoleSignature};

use crate::device::Source;
use crate::injector::{event_value, EmitError, OutputSink};
use crate::profile::ButtonTable;

/// Scancodes currently held on a device, sampled right before classification.
pub type ActiveKeys = BTreeSet<u16>;

/// One raw key event from a physical keyboard channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawKeyEvent {
    pub source: Source,
    pub code: u16,
    /// 0 = release, 1 = press, 2 = repeat
    pub value: i32,
}

impl RawKeyEvent {
    pub fn new(source: Source, code: u16, value: i32) -> Self {
        Self {
            source,
            code,
            value,
        }
    }

    pub fn from_input(source: Source, event: &InputEvent) -> Self {
        Self::new(source, event.code(), event.value())
    }
}

/// The edge a signature match stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RoleState {
    #[default]
    Released,
    Pressed,
}

/// Which roles currently have a press with no matching release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingQueue {
    states: [RoleState; Role::COUNT],
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, role: Role) -> RoleState {
        self.states[role.index()]
    }

    pub fn is_pending(&self, role: Role) -> bool {
        self.state(role) == RoleState::Pressed
    }

    pub fn is_empty(&self) -> bool {
        self.states.iter().all(|s| *s == RoleState::Released)
    }

    /// Roles currently pressed, in role order.
    pub fn pending(&self) -> impl Iterator<Item = Role> + '_ {
        Role::ALL.into_iter().filter(|r| self.is_pending(*r))
    }

    /// Mark `role` pressed. Returns false if it already was.
    fn press(&mut self, role: Role) -> bool {
        let state = &mut self.states[role.index()];
        match state {
            RoleState::Pressed => false,
            RoleState::Released => {
                *state = RoleState::Pressed;
                true
            }
        }
    }

    /// Mark `role` released. Returns false if it was not pressed.
    fn release(&mut self, role: Role) -> bool {
        let state = &mut self.states[role.index()];
        match state {
            RoleState::Released => false,
            RoleState::Pressed => {
                *state = RoleState::Released;
                true
            }
        }
    }
}

/// Set while the daemon is handling a power button press.
///
/// The power handler raises it; classifiers clear it once the firmware's
/// trailing Meta release has been swallowed.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A profile's signatures, compiled for matching.
#[derive(Debug, Clone)]
pub struct SignatureTable {
    passthrough: Vec<u16>,
    meta_code: u16,
    signatures: Vec<RoleSignature>,
}

impl SignatureTable {
    pub fn from_profile(profile: &ProfileConfig) -> Self {
        Self {
            passthrough: profile.passthrough.clone(),
            meta_code: profile.meta_code,
            signatures: profile.roles.clone(),
        }
    }

    pub fn is_passthrough(&self, code: u16) -> bool {
        self.passthrough.contains(&code)
    }

    /// Every role whose signature this event matches, in profile order.
    pub fn classify<'a>(
        &'a self,
        event: &'a RawKeyEvent,
        active: &'a ActiveKeys,
    ) -> impl Iterator<Item = (&'a RoleSignature, Edge)> + 'a {
        self.signatures
            .iter()
            .filter_map(move |sig| match_signature(sig, event, active).map(|edge| (sig, edge)))
    }
}

/// Match one role's signature, ignoring the role's current state.
pub fn match_signature(
    sig: &RoleSignature,
    event: &RawKeyEvent,
    active: &ActiveKeys,
) -> Option<Edge> {
    match event.value {
        event_value::PRESS if *active == sig.press => Some(Edge::Down),
        event_value::RELEASE
            if *active == sig.release && sig.release_codes.contains(&event.code) =>
        {
            Some(Edge::Up)
        }
        _ => None,
    }
}

/// Per-device classifier.
///
/// Collaborators are injected at construction; the pending queue is borrowed
/// per event from the event loop that owns it.
pub struct Classifier {
    table: Arc<SignatureTable>,
    buttons: Arc<ButtonTable>,
    output: OutputSink,
    shutdown: ShutdownFlag,
    /// Momentary roles pressed by the previous event, released on the next one
    sweep: [bool; Role::COUNT],
}

impl Classifier {
    pub fn new(
        table: Arc<SignatureTable>,
        buttons: Arc<ButtonTable>,
        output: OutputSink,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            table,
            buttons,
            output,
            shutdown,
            sweep: [false; Role::COUNT],
        }
    }

    /// Momentary roles waiting for their forced release.
    #[cfg(test)]
    pub fn awaiting_sweep(&self) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|r| self.sweep[r.index()])
            .collect()
    }

    /// Process one raw event from this device.
    ///
    /// All effects go through the output sink, the pending queue and the
    /// shutdown flag. The only error is a dead output writer.
    pub fn classify_and_drive(
        &mut self,
        event: &RawKeyEvent,
        active: &ActiveKeys,
        queue: &mut PendingQueue,
    ) -> Result<(), EmitError> {
        let forced = std::mem::replace(&mut self.sweep, [false; Role::COUNT]);

        if self.table.is_passthrough(event.code) {
            self.output.emit_passthrough(event.code, event.value)?;
        } else {
            let table = Arc::clone(&self.table);
            let mut matched = false;
            for (sig, edge) in table.classify(event, active) {
                matched = true;
                self.drive(sig, edge, queue)?;
            }
            if !matched {
                tracing::trace!(
                    "Dropped {} code {} value {} (active {:?})",
                    event.source,
                    event.code,
                    event.value,
                    active
                );
            }
        }

        self.coordinate_shutdown(event, active, queue);

        for role in Role::ALL {
            if forced[role.index()] {
                self.force_release(role, queue)?;
            }
        }

        Ok(())
    }

    fn drive(
        &mut self,
        sig: &RoleSignature,
        edge: Edge,
        queue: &mut PendingQueue,
    ) -> Result<(), EmitError> {
        let role = sig.role;
        match edge {
            Edge::Down => {
                if !queue.press(role) {
                    tracing::trace!("{} already pressed, ignoring repeated press", role);
                    return Ok(());
                }
                tracing::debug!("{} down", role);
                self.output.emit_down(role, self.buttons.get(role))?;
                if sig.momentary {
                    self.sweep[role.index()] = true;
                }
            }
            Edge::Up => {
                if !queue.release(role) {
                    tracing::trace!("{} not pressed, ignoring release", role);
                    return Ok(());
                }
                tracing::debug!("{} up", role);
                self.output.emit_up(role, self.buttons.get(role))?;
            }
        }
        Ok(())
    }

    /// Clear the shutdown flag on the power button's trailing Meta release.
    fn coordinate_shutdown(&self, event: &RawKeyEvent, active: &ActiveKeys, queue: &PendingQueue) {
        if event.code == self.table.meta_code
            && event.value == event_value::RELEASE
            && active.is_empty()
            && queue.is_empty()
            && self.shutdown.is_raised()
        {
            tracing::info!("Power button Meta release swallowed, clearing pending shutdown");
            self.shutdown.clear();
        }
    }

    /// Release a momentary role whose hardware never reports a release.
    ///
    /// A role already released by its own signature is left alone so up
    /// events never outnumber downs.
    fn force_release(&mut self, role: Role, queue: &mut PendingQueue) -> Result<(), EmitError> {
        if queue.release(role) {
            tracing::debug!("{} up (forced)", role);
            self.output.emit_up(role, self.buttons.get(role))?;
        }
        Ok(())
    }
}
