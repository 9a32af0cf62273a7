//! KDL configuration parser

use std::collections::BTreeSet;
use std::path::Path;

use crate::binding::expand_binding;
use crate::error::{ConfigError, InvalidKeyInfo, SourceLocation};
use crate::model::*;

/// Extract source location from a KDL node's name span
fn get_node_location(node: &kdl::KdlNode, source: &str) -> SourceLocation {
    let span = node.name().span();
    let offset = span.offset();
    let len = span.len();

    let (line, column) = offset_to_line_col(source, offset);

    SourceLocation::new(line, column, offset, len)
}

/// Extract source location from a KDL entry (for binding values)
fn get_entry_location(entry: &kdl::KdlEntry, source: &str) -> SourceLocation {
    let span = entry.span();
    let offset = span.offset();
    let len = span.len();

    let (line, column) = offset_to_line_col(source, offset);

    SourceLocation::new(line, column, offset, len)
}

/// Convert byte offset to line and column (1-indexed)
fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;

    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }

    (line, col)
}

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl uses an older miette version, so we need to extract offset/len manually
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();
    let mut invalid_keys = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => {
                config.global = parse_global(node)?;
            }
            "buttons" => match parse_buttons(node, content) {
                Ok(buttons) => config.buttons = buttons,
                Err(ConfigError::InvalidKeys { invalid_keys: keys }) => {
                    invalid_keys.extend(keys);
                }
                Err(e) => return Err(e),
            },
            "profile" => {
                let profile = parse_profile(node)?;
                if config.profiles.iter().any(|p| p.name == profile.name) {
                    return Err(ConfigError::Invalid {
                        message: format!("Profile '{}' is defined more than once", profile.name),
                    });
                }
                config.profiles.push(profile);
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    if !invalid_keys.is_empty() {
        return Err(ConfigError::InvalidKeys { invalid_keys });
    }

    if let ProfileSelection::Named(name) = &config.global.profile {
        if config.find_profile(name).is_none() {
            return Err(ConfigError::UnknownProfile { name: name.clone() });
        }
    }

    Ok(config)
}

fn first_string(node: &kdl::KdlNode) -> Option<&str> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
}

fn property_string<'a>(node: &'a kdl::KdlNode, key: &str) -> Option<&'a str> {
    node.entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some(key))
        .and_then(|e| e.value().as_string())
}

fn parse_bool(node: &kdl::KdlNode) -> Result<bool, ConfigError> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_bool())
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("'{}' expects true or false", node.name().value()),
        })
}

fn parse_millis(node: &kdl::KdlNode) -> Result<u64, ConfigError> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_i64())
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| ConfigError::Invalid {
            message: format!(
                "'{}' expects a non-negative number of milliseconds",
                node.name().value()
            ),
        })
}

fn parse_scancode(value: i64, context: &str) -> Result<u16, ConfigError> {
    u16::try_from(value).map_err(|_| ConfigError::Invalid {
        message: format!("Scancode {} in '{}' is out of range", value, context),
    })
}

/// Read every positional integer of a node as a scancode.
fn parse_codes(node: &kdl::KdlNode) -> Result<Vec<u16>, ConfigError> {
    let context = node.name().value();
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| match e.value().as_i64() {
            Some(v) => parse_scancode(v, context),
            None => Err(ConfigError::Invalid {
                message: format!("'{}' expects scancodes, got {}", context, e.value()),
            }),
        })
        .collect()
}

fn parse_global(node: &kdl::KdlNode) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "log-level" => {
                    if let Some(val) = first_string(child) {
                        global.log_level = val
                            .parse()
                            .map_err(|e| ConfigError::Invalid { message: e })?;
                    }
                }
                "profile" => {
                    if let Some(val) = first_string(child) {
                        global.profile = ProfileSelection::from(val);
                    }
                }
                "button-delay-ms" => {
                    global.button_delay_ms = Some(parse_millis(child)?);
                }
                name => {
                    tracing::warn!("Unknown global config option: {}", name);
                }
            }
        }
    }

    Ok(global)
}

fn parse_buttons(node: &kdl::KdlNode, source: &str) -> Result<ButtonConfig, ConfigError> {
    let mut buttons = ButtonConfig::default();
    let mut invalid_keys = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let role: Role = child
                .name()
                .value()
                .parse()
                .map_err(|_| ConfigError::UnknownRole {
                    role: child.name().value().to_string(),
                })?;

            let Some(entry) = child.entries().first() else {
                return Err(ConfigError::MissingField {
                    field: format!("binding for {}", role),
                });
            };

            match entry.value().as_string() {
                Some(binding) => match expand_binding(binding) {
                    Ok(_) => buttons.set(role, binding),
                    Err(reason) => invalid_keys.push(InvalidKeyInfo {
                        key: binding.to_string(),
                        context: "buttons".to_string(),
                        reason,
                        location: get_entry_location(entry, source),
                    }),
                },
                None => invalid_keys.push(InvalidKeyInfo {
                    key: entry.value().to_string(),
                    context: "buttons".to_string(),
                    reason: "binding must be a string".to_string(),
                    location: get_node_location(child, source),
                }),
            }
        }
    }

    if !invalid_keys.is_empty() {
        return Err(ConfigError::InvalidKeys { invalid_keys });
    }

    Ok(buttons)
}

fn parse_identity(node: &kdl::KdlNode) -> Result<DeviceIdentity, ConfigError> {
    let name = property_string(node, "name")
        .or_else(|| first_string(node))
        .ok_or_else(|| ConfigError::MissingField {
            field: format!("{} name (e.g., `{} name=\"...\"`)", node.name().value(), node.name().value()),
        })?;

    Ok(DeviceIdentity::new(name, property_string(node, "phys")))
}

fn parse_profile(node: &kdl::KdlNode) -> Result<ProfileConfig, ConfigError> {
    let name = first_string(node).ok_or_else(|| ConfigError::MissingField {
        field: "profile name (e.g., `profile \"my-handheld\" { ... }`)".to_string(),
    })?;

    if ProfileSelection::from(name) == ProfileSelection::Auto {
        return Err(ConfigError::Invalid {
            message: "'auto' is reserved and cannot name a profile".to_string(),
        });
    }

    let mut profile = ProfileConfig::new(name);

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "product" => {
                    profile.products.extend(
                        child
                            .entries()
                            .iter()
                            .filter_map(|e| e.value().as_string())
                            .map(str::to_string),
                    );
                }
                "button-delay-ms" => profile.button_delay_ms = parse_millis(child)?,
                "capture-controller" => profile.capture.controller = parse_bool(child)?,
                "capture-keyboard" => profile.capture.keyboard = parse_bool(child)?,
                "capture-power" => profile.capture.power = parse_bool(child)?,
                "gamepad" => profile.gamepad = Some(parse_identity(child)?),
                "keyboard" => profile.keyboard = Some(parse_identity(child)?),
                "keyboard-2" => profile.keyboard_2 = Some(parse_identity(child)?),
                "power" => profile.power = Some(parse_identity(child)?),
                "passthrough" => profile.passthrough = parse_codes(child)?,
                "meta-code" => {
                    profile.meta_code = match parse_codes(child)?.as_slice() {
                        [code] => *code,
                        _ => {
                            return Err(ConfigError::Invalid {
                                message: "'meta-code' expects exactly one scancode".to_string(),
                            })
                        }
                    };
                }
                "role" => {
                    let signature = parse_role(child)?;
                    if profile.roles.iter().any(|r| r.role == signature.role) {
                        return Err(ConfigError::Invalid {
                            message: format!(
                                "Profile '{}' defines {} more than once",
                                profile.name, signature.role
                            ),
                        });
                    }
                    profile.roles.push(signature);
                }
                other => {
                    tracing::warn!("Unknown profile option: {}", other);
                }
            }
        }
    }

    if profile.capture.keyboard && profile.keyboard.is_none() {
        return Err(ConfigError::MissingField {
            field: format!("keyboard identity for profile '{}'", profile.name),
        });
    }

    Ok(profile)
}

fn parse_role(node: &kdl::KdlNode) -> Result<RoleSignature, ConfigError> {
    let role_name = first_string(node).ok_or_else(|| ConfigError::MissingField {
        field: "role name (e.g., `role \"button1\" { ... }`)".to_string(),
    })?;
    let role: Role = role_name.parse().map_err(|_| ConfigError::UnknownRole {
        role: role_name.to_string(),
    })?;

    let mut press: Option<BTreeSet<u16>> = None;
    let mut release = BTreeSet::new();
    let mut release_codes = Vec::new();
    let mut momentary = false;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "press" => press = Some(parse_codes(child)?.into_iter().collect()),
                "release" => release = parse_codes(child)?.into_iter().collect(),
                "release-codes" => release_codes = parse_codes(child)?,
                "momentary" => momentary = parse_bool(child)?,
                other => {
                    tracing::warn!("Unknown role option: {}", other);
                }
            }
        }
    }

    let press = press.ok_or_else(|| ConfigError::MissingField {
        field: format!("press signature for {}", role),
    })?;

    Ok(RoleSignature {
        role,
        press,
        release,
        release_codes,
        momentary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_config() {
        let config = r#"
            global {
                log-level "debug"
                profile "opi-gen1"
                button-delay-ms 80
            }

            buttons {
                button1 "ESC"
                button3 "KEY_LEFTALT+KEY_TAB"
            }
        "#;

        let result = parse_config_str(config).unwrap();
        assert_eq!(result.global.log_level, LogLevel::Debug);
        assert_eq!(
            result.global.profile,
            ProfileSelection::Named("opi-gen1".to_string())
        );
        assert_eq!(result.global.button_delay_ms, Some(80));
        assert_eq!(result.buttons.get(Role::Button1), "ESC");
        assert_eq!(result.buttons.get(Role::Button2), "QAM");
        assert_eq!(result.buttons.get(Role::Button3), "KEY_LEFTALT+KEY_TAB");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let result = parse_config_str("").unwrap();
        assert_eq!(result.global.profile, ProfileSelection::Auto);
        assert_eq!(result.global.button_delay_ms, None);
        assert_eq!(result.buttons, ButtonConfig::default());
        assert!(result.profiles.is_empty());
    }

    #[test]
    fn test_unknown_role_in_buttons_fails() {
        let config = r#"
            buttons {
                button9 "ESC"
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        match err {
            ConfigError::UnknownRole { role } => assert_eq!(role, "button9"),
            _ => panic!("Expected UnknownRole error, got: {:?}", err),
        }
    }

    #[test]
    fn test_all_invalid_bindings_reported() {
        let config = r#"
            buttons {
                button1 "Screenshot"
                button2 "QAM"
                button4 "KEY_A+"
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        match err {
            ConfigError::InvalidKeys { invalid_keys } => {
                assert_eq!(invalid_keys.len(), 2);
                let keys: Vec<&str> = invalid_keys.iter().map(|k| k.key.as_str()).collect();
                assert!(keys.contains(&"Screenshot"));
                assert!(keys.contains(&"KEY_A+"));
                assert_eq!(invalid_keys[0].location.line, 3);
            }
            _ => panic!("Expected InvalidKeys error, got: {:?}", err),
        }
    }

    #[test]
    fn test_unknown_evdev_names_reported_at_load() {
        let config = r#"
            buttons {
                button1 "KEY_NOTAKEY"
                button3 "KEY_LEFTCTRL+BTN_BOGUS"
                button5 "MODE"
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        match err {
            ConfigError::InvalidKeys { invalid_keys } => {
                assert_eq!(invalid_keys.len(), 2);
                assert_eq!(invalid_keys[0].key, "KEY_NOTAKEY");
                assert!(invalid_keys[0].reason.contains("KEY_NOTAKEY"));
                assert_eq!(invalid_keys[1].key, "KEY_LEFTCTRL+BTN_BOGUS");
                assert!(invalid_keys[1].reason.contains("BTN_BOGUS"));
                assert!(!invalid_keys[1].reason.contains("KEY_LEFTCTRL"));
            }
            _ => panic!("Expected InvalidKeys error, got: {:?}", err),
        }
    }

    #[test]
    fn test_parse_custom_profile() {
        let config = r#"
            profile "test-handheld" {
                product "Test Handheld" "Test Handheld Pro"
                button-delay-ms 90
                capture-controller false
                keyboard name="AT Translated Set 2 keyboard" phys="isa0060/serio0/input0"
                power "Power Button"
                passthrough 114 115 113
                meta-code 126
                role "button1" {
                    press 97 125
                    release 97
                    release-codes 125
                }
                role "button3" {
                    press 20
                    momentary true
                }
            }
        "#;

        let result = parse_config_str(config).unwrap();
        assert_eq!(result.profiles.len(), 1);
        let profile = &result.profiles[0];
        assert_eq!(profile.name, "test-handheld");
        assert!(profile.matches_product("Test Handheld Pro"));
        assert_eq!(profile.button_delay_ms, 90);
        assert!(!profile.capture.controller);
        assert!(profile.capture.keyboard);
        assert_eq!(
            profile.keyboard.as_ref().unwrap().phys.as_deref(),
            Some("isa0060/serio0/input0")
        );
        assert_eq!(profile.power.as_ref().unwrap().name, "Power Button");
        assert_eq!(profile.power.as_ref().unwrap().phys, None);
        assert_eq!(profile.passthrough, vec![114, 115, 113]);
        assert_eq!(profile.meta_code, 126);

        let button1 = &profile.roles[0];
        assert_eq!(button1.role, Role::Button1);
        assert_eq!(button1.press, BTreeSet::from([97, 125]));
        assert_eq!(button1.release, BTreeSet::from([97]));
        assert_eq!(button1.release_codes, vec![125]);
        assert!(!button1.momentary);

        let button3 = &profile.roles[1];
        assert!(button3.momentary);
        assert!(button3.release_codes.is_empty());
    }

    #[test]
    fn test_profile_missing_name_error() {
        let config = r#"
            profile {
                keyboard "kbd"
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        match err {
            ConfigError::MissingField { field } => assert!(field.contains("profile name")),
            _ => panic!("Expected MissingField error, got: {:?}", err),
        }
    }

    #[test]
    fn test_profile_needs_keyboard_when_capturing_it() {
        let config = r#"
            profile "no-keyboard" {
                role "button1" {
                    press 187
                }
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        match err {
            ConfigError::MissingField { field } => assert!(field.contains("keyboard")),
            _ => panic!("Expected MissingField error, got: {:?}", err),
        }
    }

    #[test]
    fn test_role_without_press_signature_fails() {
        let config = r#"
            profile "broken" {
                keyboard "kbd"
                role "button1" {
                    release-codes 187
                }
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        match err {
            ConfigError::MissingField { field } => assert!(field.contains("button1")),
            _ => panic!("Expected MissingField error, got: {:?}", err),
        }
    }

    #[test]
    fn test_duplicate_role_in_profile_fails() {
        let config = r#"
            profile "twice" {
                keyboard "kbd"
                role "button1" { press 187; }
                role "button1" { press 188; }
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        match err {
            ConfigError::Invalid { message } => assert!(message.contains("button1")),
            _ => panic!("Expected Invalid error, got: {:?}", err),
        }
    }

    #[test]
    fn test_out_of_range_scancode_fails() {
        let config = r#"
            profile "wide" {
                keyboard "kbd"
                role "button1" { press 70000; }
            }
        "#;

        assert!(matches!(
            parse_config_str(config),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_auto_is_reserved() {
        let config = r#"
            profile "auto" {
                keyboard "kbd"
            }
        "#;

        assert!(matches!(
            parse_config_str(config),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_unknown_selected_profile_fails() {
        let config = r#"
            global {
                profile "steam-deck"
            }
        "#;

        let err = parse_config_str(config).unwrap_err();
        match err {
            ConfigError::UnknownProfile { name } => assert_eq!(name, "steam-deck"),
            _ => panic!("Expected UnknownProfile error, got: {:?}", err),
        }
    }

    #[test]
    fn test_custom_profile_overrides_builtin() {
        let config = r#"
            profile "opi-gen1" {
                product "NEO-01"
                keyboard "AT Translated Set 2 keyboard"
                role "button1" { press 187; release-codes 187; }
            }
        "#;

        let result = parse_config_str(config).unwrap();
        let profile = result.find_profile("opi-gen1").unwrap();
        assert_eq!(profile.roles.len(), 1);

        let detected = result.detect_profile("NEO-01\n").unwrap();
        assert_eq!(detected.roles.len(), 1);
    }

    #[test]
    fn test_detect_builtin_profile() {
        let config = Config::default();
        let profile = config.detect_profile("NEO-01").unwrap();
        assert_eq!(profile.name, "opi-gen1");
        assert!(config.detect_profile("Unknown Laptop").is_none());
    }

    #[test]
    fn test_parse_config_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "global {{\n    log-level \"trace\"\n}}").unwrap();

        let config = parse_config(file.path()).unwrap();
        assert_eq!(config.global.log_level, LogLevel::Trace);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = parse_config(Path::new("/nonexistent/handymap/config.kdl")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
