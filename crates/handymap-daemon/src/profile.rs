//! Profile selection and button table resolution
//!
//! Everything here runs once at startup. Failures are configuration errors
//! and stop the daemon before any device is grabbed.

use anyhow::{bail, Context, Result};
use evdev::Key;
use handymap_config::{
    expand_binding, ButtonConfig, Config, ProfileConfig, ProfileSelection, Role,
};

/// The keys one role emits, in press order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    keys: Vec<Key>,
}

impl Binding {
    pub fn new(keys: Vec<Key>) -> Self {
        Self { keys }
    }

    /// Keys in press order.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }
}

/// Role -> binding lookup, fixed for the life of the daemon.
#[derive(Debug, Clone)]
pub struct ButtonTable {
    bindings: [Binding; Role::COUNT],
}

impl ButtonTable {
    /// Resolve every configured binding to evdev keys.
    ///
    /// Every role is resolved, bound by the profile or not, so a typo is
    /// reported no matter which handheld the config is loaded on. All bad
    /// bindings are reported together.
    pub fn from_config(buttons: &ButtonConfig) -> Result<Self> {
        let mut resolved = Vec::with_capacity(Role::COUNT);
        let mut errors = Vec::new();
        for role in Role::ALL {
            let spec = buttons.get(role);
            match expand_binding(spec) {
                Ok(keys) => {
                    tracing::debug!("{} -> {} ({:?})", role, spec, keys);
                    resolved.push(Binding::new(keys));
                }
                Err(reason) => errors.push(format!("{} \"{}\": {}", role, spec, reason)),
            }
        }

        if !errors.is_empty() {
            bail!("Invalid button bindings:\n  {}", errors.join("\n  "));
        }

        let bindings: [Binding; Role::COUNT] = resolved
            .try_into()
            .map_err(|_| anyhow::anyhow!("Button table size mismatch"))?;
        Ok(Self { bindings })
    }

    pub fn get(&self, role: Role) -> &Binding {
        &self.bindings[role.index()]
    }
}

/// Pick the profile to run.
///
/// An explicit name (from the command line, then the config) wins over
/// detection. Auto-detection matches the DMI product name.
pub fn select_profile(
    config: &Config,
    requested: Option<&str>,
    product: Option<&str>,
) -> Result<ProfileConfig> {
    let selection = match requested {
        Some(name) => ProfileSelection::from(name),
        None => config.global.profile.clone(),
    };

    match selection {
        ProfileSelection::Named(name) => config
            .find_profile(&name)
            .with_context(|| format!("No profile named '{}'", name)),
        ProfileSelection::Auto => {
            let Some(product) = product else {
                bail!(
                    "Cannot auto-detect the device profile: no DMI product name. \
                     Set `profile \"...\"` in the global config block."
                );
            };
            match config.detect_profile(product) {
                Some(profile) => {
                    tracing::info!("Detected '{}' as profile '{}'", product, profile.name);
                    Ok(profile)
                }
                None => bail!(
                    "No profile matches product '{}'. \
                     Define one with `profile \"...\" {{ product \"{}\" ... }}`.",
                    product,
                    product
                ),
            }
        }
    }
}
