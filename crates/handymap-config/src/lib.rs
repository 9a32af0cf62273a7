//! Configuration parsing for handymap
//!
//! This crate handles parsing the KDL configuration file, the logical button
//! bindings and the device profiles (built-in and user-defined) that describe
//! which scancode signatures a handheld's extra buttons produce. It also
//! inspects the host (DMI product name, input devices) so profiles can be
//! detected and matched the same way by the daemon and the CLI.

mod binding;
mod builtin;
mod error;
mod host;
mod model;
mod parser;

pub use binding::{expand_binding, PRESETS};
pub use builtin::builtin_profiles;
pub use error::{ConfigError, InvalidKeyInfo, SourceLocation};
pub use host::{enumerate_devices, find_device, read_product_name, DeviceInfo, DMI_PRODUCT_NAME};
pub use model::*;
pub use parser::{parse_config, parse_config_str};
