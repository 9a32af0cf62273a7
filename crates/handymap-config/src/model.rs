//! Configuration data model

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

/// Root configuration structure
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub global: GlobalConfig,
    pub buttons: ButtonConfig,
    /// User-defined device profiles, checked before the built-in ones
    pub profiles: Vec<ProfileConfig>,
}

impl Config {
    /// Find a profile by name, preferring user-defined profiles over built-ins.
    pub fn find_profile(&self, name: &str) -> Option<ProfileConfig> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .or_else(|| {
                crate::builtin_profiles()
                    .into_iter()
                    .find(|p| p.name == name)
            })
    }

    /// Find the first profile that lists `product` as one of its DMI product names.
    pub fn detect_profile(&self, product: &str) -> Option<ProfileConfig> {
        let product = product.trim();
        self.profiles
            .iter()
            .find(|p| p.matches_product(product))
            .cloned()
            .or_else(|| {
                crate::builtin_profiles()
                    .into_iter()
                    .find(|p| p.matches_product(product))
            })
    }
}

/// Global settings
#[derive(Debug, Clone, Default)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
    pub profile: ProfileSelection,
    /// Overrides the profile's minimum spacing between emitted reports
    pub button_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// The directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// How the daemon picks the device profile to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProfileSelection {
    /// Detect from the DMI product name
    #[default]
    Auto,
    /// Use the profile with this name
    Named(String),
}

impl From<&str> for ProfileSelection {
    fn from(s: &str) -> Self {
        if s.eq_ignore_ascii_case("auto") {
            ProfileSelection::Auto
        } else {
            ProfileSelection::Named(s.to_string())
        }
    }
}

/// A logical, device-independent button.
///
/// The set of roles is fixed; each device profile decides which scancode
/// signatures drive which role, and the `buttons` block decides what each
/// role emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Button1,
    Button2,
    Button3,
    Button4,
    Button5,
}

impl Role {
    pub const COUNT: usize = 5;

    pub const ALL: [Role; Role::COUNT] = [
        Role::Button1,
        Role::Button2,
        Role::Button3,
        Role::Button4,
        Role::Button5,
    ];

    /// Position of this role in fixed-size per-role tables.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Role::Button1 => "button1",
            Role::Button2 => "button2",
            Role::Button3 => "button3",
            Role::Button4 => "button4",
            Role::Button5 => "button5",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown role: {}", s))
    }
}

/// What each role emits, as written in the `buttons` block.
///
/// Values are either a preset name (see [`crate::PRESETS`]) or evdev key
/// names joined with `+`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ButtonConfig {
    bindings: [String; Role::COUNT],
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            bindings: [
                "SCR".to_string(),
                "QAM".to_string(),
                "ESC".to_string(),
                "OSK".to_string(),
                "MODE".to_string(),
            ],
        }
    }
}

impl ButtonConfig {
    pub fn get(&self, role: Role) -> &str {
        &self.bindings[role.index()]
    }

    pub fn set(&mut self, role: Role, binding: impl Into<String>) {
        self.bindings[role.index()] = binding.into();
    }
}

/// Which physical sources the daemon takes over for a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureFlags {
    pub controller: bool,
    pub keyboard: bool,
    pub power: bool,
}

impl Default for CaptureFlags {
    fn default() -> Self {
        Self {
            controller: true,
            keyboard: true,
            power: true,
        }
    }
}

/// Stable identity of a physical input device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    /// Device name as reported by evdev
    pub name: String,
    /// Physical path (bus address), e.g. `isa0060/serio0/input0`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phys: Option<String>,
}

impl DeviceIdentity {
    pub fn new(name: impl Into<String>, phys: Option<&str>) -> Self {
        Self {
            name: name.into(),
            phys: phys.map(str::to_string),
        }
    }

    /// A device matches when its name is equal and, if this identity pins a
    /// physical path, that path is equal too.
    pub fn matches(&self, name: &str, phys: Option<&str>) -> bool {
        if self.name != name {
            return false;
        }
        match &self.phys {
            Some(expected) => phys == Some(expected.as_str()),
            None => true,
        }
    }
}

/// Scancode signatures that drive one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleSignature {
    pub role: Role,
    /// Exact active-key set required for a press edge
    pub press: BTreeSet<u16>,
    /// Exact active-key set required for a release edge
    pub release: BTreeSet<u16>,
    /// Codes whose release may end the press. Empty means the role never
    /// releases by signature.
    pub release_codes: Vec<u16>,
    /// The hardware never reports a usable release; release on the next event.
    pub momentary: bool,
}

impl RoleSignature {
    /// A role pressed and released by a single scancode, the common case.
    pub fn single(role: Role, code: u16) -> Self {
        Self {
            role,
            press: BTreeSet::from([code]),
            release: BTreeSet::new(),
            release_codes: vec![code],
            momentary: false,
        }
    }
}

/// A handheld model: where its devices live and how its extra buttons report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileConfig {
    pub name: String,
    /// DMI product names this profile applies to
    pub products: Vec<String>,
    /// Minimum spacing between emitted reports
    pub button_delay_ms: u64,
    pub capture: CaptureFlags,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamepad: Option<DeviceIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<DeviceIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyboard_2: Option<DeviceIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<DeviceIdentity>,
    /// Scancodes forwarded verbatim, never classified
    pub passthrough: Vec<u16>,
    /// The Meta scancode the power button firmware emits alongside KEY_POWER
    pub meta_code: u16,
    pub roles: Vec<RoleSignature>,
}

/// KEY_VOLUMEDOWN, KEY_VOLUMEUP
pub const DEFAULT_PASSTHROUGH: [u16; 2] = [114, 115];

/// KEY_LEFTMETA
pub const DEFAULT_META_CODE: u16 = 125;

pub const DEFAULT_BUTTON_DELAY_MS: u64 = 110;

impl ProfileConfig {
    /// An empty profile with the defaults shared by most handhelds.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            products: Vec::new(),
            button_delay_ms: DEFAULT_BUTTON_DELAY_MS,
            capture: CaptureFlags::default(),
            gamepad: None,
            keyboard: None,
            keyboard_2: None,
            power: None,
            passthrough: DEFAULT_PASSTHROUGH.to_vec(),
            meta_code: DEFAULT_META_CODE,
            roles: Vec::new(),
        }
    }

    pub fn matches_product(&self, product: &str) -> bool {
        self.products.iter().any(|p| p == product)
    }

    /// Roles this profile can drive, in declaration order.
    pub fn bound_roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.roles.iter().map(|sig| sig.role)
    }
}
