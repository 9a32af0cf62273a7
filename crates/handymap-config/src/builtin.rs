//! Device profiles shipped with handymap

use crate::model::{DeviceIdentity, ProfileConfig, Role, RoleSignature};

/// All built-in profiles. User profiles with the same name take precedence.
pub fn builtin_profiles() -> Vec<ProfileConfig> {
    vec![orangepi_neo()]
}

/// OrangePi NEO-01.
///
/// The four extra buttons arrive on the AT keyboard as lone scancodes
/// 185..=188. Their releases are reported with the same code and an empty
/// active set. Nothing on this device drives button3.
fn orangepi_neo() -> ProfileConfig {
    let mut profile = ProfileConfig::new("opi-gen1");
    profile.products = vec!["NEO-01".to_string()];
    profile.button_delay_ms = 110;
    profile.gamepad = Some(DeviceIdentity::new(
        "Microsoft X-Box 360 pad",
        Some("usb-0000:c3:00.3-5/input0"),
    ));
    profile.keyboard = Some(DeviceIdentity::new(
        "AT Translated Set 2 keyboard",
        Some("isa0060/serio0/input0"),
    ));
    // The leading spaces are part of the name the firmware reports.
    profile.keyboard_2 = Some(DeviceIdentity::new(
        "  OrangePi USB Controller",
        Some("usb-0000:c3:00.3-5/input1"),
    ));
    profile.power = Some(DeviceIdentity::new(
        "Power Button",
        Some("LNXPWRBN/button/input0"),
    ));
    profile.roles = vec![
        // LC button
        RoleSignature::single(Role::Button1, 187),
        // Lower right inboard
        RoleSignature::single(Role::Button2, 185),
        // RC button
        RoleSignature::single(Role::Button4, 188),
        // Lower left inboard
        RoleSignature::single(Role::Button5, 186),
    ];
    profile
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_unique() {
        let profiles = builtin_profiles();
        for (i, a) in profiles.iter().enumerate() {
            for b in &profiles[i + 1..] {
                assert_ne!(a.name, b.name);
            }
        }
    }

    #[test]
    fn test_orangepi_signatures() {
        let profile = orangepi_neo();
        assert_eq!(profile.roles.len(), 4);
        assert!(profile.roles.iter().all(|sig| sig.release.is_empty()));
        assert!(profile.roles.iter().all(|sig| !sig.momentary));
        assert!(!profile.bound_roles().any(|role| role == Role::Button3));
        assert_eq!(profile.passthrough, vec![114, 115]);
        assert_eq!(profile.meta_code, 125);
    }
}
