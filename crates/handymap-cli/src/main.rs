//! handymap CLI
//!
//! Configuration and diagnostics tool for handymap.

use std::path::Path;

use clap::{Parser, Subcommand};
use handymap_config::{
    builtin_profiles, Config, DeviceIdentity, ProfileConfig, ProfileSelection, DMI_PRODUCT_NAME,
};
use miette::IntoDiagnostic;

#[derive(Parser, Debug)]
#[command(name = "handymap")]
#[command(about = "Extra-button remapping tool for Linux handhelds")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/handymap/config.kdl")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file
    Validate,

    /// List available input devices
    Devices,

    /// List built-in and configured device profiles
    Profiles {
        /// Print profiles as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which profile this machine would run
    Detect,
}

fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Expand tilde in config path
    let config_path = shellexpand::tilde(&cli.config).into_owned();
    let config_path = Path::new(&config_path);

    match cli.command {
        Commands::Validate => cmd_validate(config_path),
        Commands::Devices => cmd_devices(&load_config(config_path)?),
        Commands::Profiles { json } => cmd_profiles(&load_config(config_path)?, json),
        Commands::Detect => cmd_detect(&load_config(config_path)?),
    }
}

/// Parse the config if it exists, otherwise run on defaults.
fn load_config(config_path: &Path) -> miette::Result<Config> {
    if !config_path.exists() {
        tracing::debug!("{} not found, using defaults", config_path.display());
        return Ok(Config::default());
    }
    handymap_config::parse_config(config_path).map_err(miette::Report::new)
}

fn read_product_name() -> Option<String> {
    handymap_config::read_product_name(Path::new(DMI_PRODUCT_NAME))
}

/// The profile the daemon would pick on this machine, if any.
fn active_profile(config: &Config, product: Option<&str>) -> Option<ProfileConfig> {
    match &config.global.profile {
        ProfileSelection::Named(name) => config.find_profile(name),
        ProfileSelection::Auto => product.and_then(|p| config.detect_profile(p)),
    }
}

/// Every profile the daemon can run, user-defined ones shadowing built-ins.
fn all_profiles(config: &Config) -> Vec<ProfileConfig> {
    let mut profiles = config.profiles.clone();
    for builtin in builtin_profiles() {
        if !profiles.iter().any(|p| p.name == builtin.name) {
            profiles.push(builtin);
        }
    }
    profiles
}

fn cmd_validate(config_path: &Path) -> miette::Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config = handymap_config::parse_config(config_path).map_err(miette::Report::new)?;

    println!("Configuration is valid!");
    println!("  Log level: {}", config.global.log_level.as_filter());
    match &config.global.profile {
        ProfileSelection::Auto => println!("  Profile: auto"),
        ProfileSelection::Named(name) => println!("  Profile: {}", name),
    }
    for role in handymap_config::Role::ALL {
        println!("    {} -> {}", role, config.buttons.get(role));
    }
    println!("  Custom profiles: {}", config.profiles.len());
    for profile in &config.profiles {
        println!("    - {} ({} role(s))", profile.name, profile.roles.len());
    }
    Ok(())
}

fn cmd_devices(config: &Config) -> miette::Result<()> {
    let product = read_product_name();
    let profile = active_profile(config, product.as_deref());

    println!("Available input devices:\n");

    for device in handymap_config::enumerate_devices().into_diagnostic()? {
        let role = profile
            .as_ref()
            .and_then(|p| profile_role(p, &device.name, device.phys.as_deref()))
            .map(|role| format!(" <- {}", role))
            .unwrap_or_default();

        println!("  {}{}", device.name, role);
        println!("    Path: {}", device.path.display());
        println!("    Phys: {}", device.phys.as_deref().unwrap_or("-"));
        println!("    ID: {}", device.vendor_product());
        println!();
    }

    match profile {
        Some(profile) => println!("Devices marked with '<-' belong to profile '{}'", profile.name),
        None => println!("No active profile on this machine"),
    }

    Ok(())
}

/// Which of the profile's device slots a device fills.
fn profile_role(profile: &ProfileConfig, name: &str, phys: Option<&str>) -> Option<&'static str> {
    let slots: [(&'static str, &Option<DeviceIdentity>); 4] = [
        ("gamepad", &profile.gamepad),
        ("keyboard", &profile.keyboard),
        ("keyboard-2", &profile.keyboard_2),
        ("power", &profile.power),
    ];
    slots
        .into_iter()
        .find(|(_, identity)| {
            identity
                .as_ref()
                .map(|i| i.matches(name, phys))
                .unwrap_or(false)
        })
        .map(|(slot, _)| slot)
}

fn cmd_profiles(config: &Config, json: bool) -> miette::Result<()> {
    let profiles = all_profiles(config);

    if json {
        let out = serde_json::to_string_pretty(&profiles).into_diagnostic()?;
        println!("{}", out);
        return Ok(());
    }

    for profile in &profiles {
        println!("{}", profile.name);
        if !profile.products.is_empty() {
            println!("  Products: {}", profile.products.join(", "));
        }
        println!("  Button delay: {} ms", profile.button_delay_ms);
        let roles: Vec<String> = profile.bound_roles().map(|r| r.to_string()).collect();
        println!("  Roles: {}", roles.join(", "));
        println!();
    }
    Ok(())
}

fn cmd_detect(config: &Config) -> miette::Result<()> {
    let product = read_product_name();
    match &product {
        Some(product) => println!("Product name: {}", product),
        None => println!("Product name: unavailable ({})", DMI_PRODUCT_NAME),
    }

    match active_profile(config, product.as_deref()) {
        Some(profile) => {
            println!("Profile: {}", profile.name);
            Ok(())
        }
        None => Err(miette::miette!(
            help = "Add a `profile` block listing this product, or set `profile` in the global block",
            "No profile for this machine"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_role_marks_slots() {
        let profile = builtin_profiles().remove(0);
        assert_eq!(
            profile_role(&profile, "AT Translated Set 2 keyboard", Some("isa0060/serio0/input0")),
            Some("keyboard")
        );
        assert_eq!(
            profile_role(&profile, "Microsoft X-Box 360 pad", Some("usb-0000:c3:00.3-5/input0")),
            Some("gamepad")
        );
        assert_eq!(profile_role(&profile, "Some Mouse", None), None);
    }

    #[test]
    fn test_custom_profile_shadows_builtin() {
        let mut config = Config::default();
        let mut custom = ProfileConfig::new("opi-gen1");
        custom.button_delay_ms = 50;
        config.profiles.push(custom);

        let profiles = all_profiles(&config);
        assert_eq!(profiles.iter().filter(|p| p.name == "opi-gen1").count(), 1);
        assert_eq!(profiles[0].button_delay_ms, 50);
    }

    #[test]
    fn test_active_profile_named_and_auto() {
        let mut config = Config::default();
        assert_eq!(
            active_profile(&config, Some("NEO-01")).map(|p| p.name),
            Some("opi-gen1".to_string())
        );
        assert!(active_profile(&config, None).is_none());

        config.global.profile = ProfileSelection::Named("opi-gen1".to_string());
        assert!(active_profile(&config, None).is_some());
    }

    #[test]
    fn test_profiles_serialize_to_json() {
        let json = serde_json::to_value(builtin_profiles()).unwrap();
        assert_eq!(json[0]["name"], "opi-gen1");
        assert_eq!(json[0]["roles"][0]["role"], "button1");
    }
}
