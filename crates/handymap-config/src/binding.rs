//! Button binding expansion
//!
//! A binding is what a role emits when it is pressed. It is written either as
//! a preset name or as evdev key names joined with `+`:
//!
//! ```text
//! button1 "SCR"                  // preset: BTN_MODE+BTN_TR
//! button3 "KEY_LEFTALT+KEY_TAB"  // explicit chord
//! ```
//!
//! Keys are pressed in the order written and released in reverse order.

use std::str::FromStr;

use evdev::Key;

/// Named bindings for the actions handheld frontends expect.
pub const PRESETS: &[(&str, &[&str])] = &[
    ("ALT_TAB", &["KEY_LEFTALT", "KEY_TAB"]),
    ("ESC", &["KEY_ESC"]),
    ("KILL", &["KEY_LEFTCTRL", "KEY_LEFTMETA", "KEY_ESC"]),
    ("MODE", &["BTN_MODE"]),
    ("OSK", &["BTN_MODE", "BTN_NORTH"]),
    ("QAM", &["BTN_MODE", "BTN_SOUTH"]),
    ("SCR", &["BTN_MODE", "BTN_TR"]),
    ("TOGGLE_MOUSE", &["KEY_LEFTCTRL", "KEY_LEFTALT", "KEY_M"]),
    ("VOLDOWN", &["KEY_VOLUMEDOWN"]),
    ("VOLUP", &["KEY_VOLUMEUP"]),
];

/// Expand a binding into the evdev keys it emits, in press order.
///
/// Every unknown key name in a chord is reported, not just the first.
pub fn expand_binding(spec: &str) -> Result<Vec<Key>, String> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err("empty binding".to_string());
    }

    let upper = spec.to_uppercase();
    let names: Vec<&str> = match PRESETS.iter().find(|(name, _)| *name == upper) {
        Some((_, keys)) => keys.to_vec(),
        None => upper.split('+').map(str::trim).collect(),
    };

    let mut keys: Vec<Key> = Vec::with_capacity(names.len());
    let mut unknown: Vec<&str> = Vec::new();
    for name in names {
        if name.is_empty() {
            return Err("empty component in binding".to_string());
        }
        if !(name.starts_with("KEY_") || name.starts_with("BTN_")) {
            unknown.push(name);
            continue;
        }
        match Key::from_str(name) {
            Ok(key) if keys.contains(&key) => return Err(format!("duplicate key: {}", name)),
            Ok(key) => keys.push(key),
            Err(_) => unknown.push(name),
        }
    }

    if !unknown.is_empty() {
        return Err(format!(
            "not a preset or evdev KEY_*/BTN_* name: {}",
            unknown.join(", ")
        ));
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_preset() {
        assert_eq!(expand_binding("QAM").unwrap(), vec![Key::BTN_MODE, Key::BTN_SOUTH]);
        assert_eq!(expand_binding("esc").unwrap(), vec![Key::KEY_ESC]);
    }

    #[test]
    fn test_expand_chord_keeps_order() {
        let keys = expand_binding("KEY_LEFTCTRL + key_leftalt+KEY_DELETE").unwrap();
        assert_eq!(keys, vec![Key::KEY_LEFTCTRL, Key::KEY_LEFTALT, Key::KEY_DELETE]);
    }

    #[test]
    fn test_expand_rejects_garbage() {
        assert!(expand_binding("").is_err());
        assert!(expand_binding("Screenshot").is_err());
        assert!(expand_binding("KEY_A+").is_err());
        assert!(expand_binding("KEY_A+KEY_A").is_err());
    }

    #[test]
    fn test_expand_reports_every_unknown_key() {
        let err = expand_binding("KEY_NOTAKEY+KEY_A+BTN_BOGUS").unwrap_err();
        assert!(err.contains("KEY_NOTAKEY"), "{}", err);
        assert!(err.contains("BTN_BOGUS"), "{}", err);
        assert!(!err.contains("KEY_A,"), "{}", err);
    }

    #[test]
    fn test_every_preset_resolves() {
        for (name, keys) in PRESETS {
            assert_eq!(expand_binding(name).unwrap().len(), keys.len(), "{}", name);
        }
    }

    #[test]
    fn test_default_bindings_are_presets() {
        let buttons = crate::ButtonConfig::default();
        for role in crate::Role::ALL {
            assert!(
                expand_binding(buttons.get(role)).is_ok(),
                "default binding for {} should expand",
                role
            );
        }
    }
}
