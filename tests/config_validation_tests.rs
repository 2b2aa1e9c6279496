//! Config Validation Tests
//!
//! Exercises loading, cross-field validation, typo detection and hot reload
//! of `LineConfig` from the outside, the way the binary and the file
//! watcher use it.

use std::io::Write;

use lineguard::config::validation::{validate_physical_ranges, validate_unknown_keys};
use lineguard::config::{ConfigError, ConfigHandle, LineConfig};
use lineguard::types::{LampPolicy, Recipe};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn validation_errors(config: &LineConfig) -> Vec<String> {
    match config.validate() {
        Err(ConfigError::Validation(errors)) => errors,
        other => panic!("expected validation errors, got {other:?}"),
    }
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn default_config_is_valid() {
    assert!(LineConfig::default().validate().is_ok());
}

#[test]
fn partial_file_keeps_defaults_for_missing_sections() {
    let file = write_config(
        r#"
[line]
name = "Line 4"

[recipe]
name = "PVC-12"
preset_diameter = 12.0
max_lumps = 7

[analysis]
lamp_policy = "aggregate"
"#,
    );
    let config = LineConfig::load_from_file(file.path()).unwrap();
    let defaults = LineConfig::default();

    assert_eq!(config.line.name, "Line 4");
    assert_eq!(config.recipe.max_lumps, 7);
    assert_eq!(config.recipe.max_necks, Recipe::default().max_necks);
    assert_eq!(config.analysis.lamp_policy, LampPolicy::Aggregate);
    assert_eq!(config.router.batch_size, defaults.router.batch_size);
    assert_eq!(config.acquisition.cycle_ms, defaults.acquisition.cycle_ms);
}

#[test]
fn unparseable_file_is_a_parse_error() {
    let file = write_config("[router]\nbatch_size = \"lots\"\n");
    let err = LineConfig::load_from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(..)), "got {err:?}");
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = LineConfig::load_from_file(&dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(..)));
}

// ============================================================================
// Cross-field rules
// ============================================================================

#[test]
fn router_depths_must_be_ordered_and_fit_the_channel() {
    let mut config = LineConfig::default();
    config.router.warning_depth = 300;
    config.router.critical_depth = 280;
    config.acquisition.channel_capacity = 250;

    let errors = validation_errors(&config);
    assert!(errors.iter().any(|e| e.contains("warning_depth")));
    assert!(errors.iter().any(|e| e.contains("channel_capacity")));
}

#[test]
fn negative_recipe_limits_are_rejected() {
    let mut config = LineConfig::default();
    config.recipe.lower_tolerance = -0.1;
    config.recipe.max_std_dev = f64::NAN;

    let errors = validation_errors(&config);
    assert!(errors.iter().any(|e| e.contains("lower_tolerance")));
    assert!(errors.iter().any(|e| e.contains("max_std_dev")));
}

#[test]
fn overlapping_register_layout_is_rejected() {
    let mut config = LineConfig::default();
    config.plc.layout.d2 = config.plc.layout.d1 + 1;
    assert!(!validation_errors(&config).is_empty());
}

#[test]
fn speed_fluctuation_must_stay_below_100_percent() {
    let mut config = LineConfig::default();
    config.production.speed_fluctuation_percent = 100.0;
    let errors = validation_errors(&config);
    assert!(errors.iter().any(|e| e.contains("speed_fluctuation_percent")));
}

#[test]
fn implausible_preset_is_an_error_but_long_window_only_warns() {
    let mut config = LineConfig::default();
    config.recipe.flaw_window_m = 5_000.0;
    let (errors, warnings) = validate_physical_ranges(&config);
    assert!(errors.is_empty());
    assert!(warnings.iter().any(|w| w.field == "recipe.flaw_window_m"));

    config.recipe.preset_diameter = 900.0;
    let (errors, _) = validate_physical_ranges(&config);
    assert_eq!(errors.len(), 1);
}

// ============================================================================
// Typo detection
// ============================================================================

#[test]
fn typo_in_router_section_suggests_the_real_key() {
    let warnings = validate_unknown_keys("[router]\ncritcal_depth = 200\n");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].field, "router.critcal_depth");
    assert_eq!(warnings[0].suggestion.as_deref(), Some("router.critical_depth"));
}

#[test]
fn known_keys_produce_no_warnings() {
    let toml = LineConfig::default().to_toml().unwrap();
    assert!(validate_unknown_keys(&toml).is_empty());
}

// ============================================================================
// Live handle
// ============================================================================

#[test]
fn reload_swaps_valid_file_and_flags_restart_keys() {
    let file = write_config("[recipe]\nmax_lumps = 3\n[plc]\nendpoint = \"sim://a\"\n");
    let handle = ConfigHandle::new(LineConfig::load_from_file(file.path()).unwrap())
        .with_path(file.path());
    let reader = handle.clone();

    std::fs::write(
        file.path(),
        "[recipe]\nmax_lumps = 9\n[plc]\nendpoint = \"sim://b\"\n",
    )
    .unwrap();
    let changes = handle.reload().unwrap();

    assert_eq!(reader.snapshot().recipe.max_lumps, 9);
    let lumps = changes.iter().find(|c| c.key == "recipe.max_lumps").unwrap();
    assert!(!lumps.requires_restart);
    let endpoint = changes.iter().find(|c| c.key == "plc.endpoint").unwrap();
    assert!(endpoint.requires_restart);
}

#[test]
fn reload_keeps_previous_config_on_invalid_file() {
    let file = write_config("[recipe]\nmax_lumps = 4\n");
    let handle = ConfigHandle::new(LineConfig::load_from_file(file.path()).unwrap())
        .with_path(file.path());

    std::fs::write(file.path(), "[recipe]\nupper_tolerance = -2.0\n").unwrap();
    assert!(matches!(handle.reload(), Err(ConfigError::Validation(_))));
    assert_eq!(handle.snapshot().recipe.max_lumps, 4);
}

#[test]
fn reload_keeps_posted_recipe_when_file_recipe_is_unchanged() {
    let file = write_config("[production]\nspeed_m_per_min = 100.0\n[recipe]\nmax_lumps = 3\n");
    let handle = ConfigHandle::new(LineConfig::load_from_file(file.path()).unwrap())
        .with_path(file.path());

    let posted = Recipe {
        name: "PE-posted".to_string(),
        max_lumps: 9,
        settings_id: Some(7),
        ..handle.snapshot().recipe.clone()
    };
    handle.set_recipe(posted.clone()).unwrap();

    std::fs::write(
        file.path(),
        "[production]\nspeed_m_per_min = 140.0\n[recipe]\nmax_lumps = 3\n",
    )
    .unwrap();
    let changes = handle.reload().unwrap();

    let active = handle.snapshot();
    assert_eq!(active.production.speed_m_per_min, 140.0);
    assert_eq!(active.recipe, posted);
    assert!(changes.iter().all(|c| !c.key.starts_with("recipe.")));

    // editing the recipe section itself still wins
    std::fs::write(
        file.path(),
        "[production]\nspeed_m_per_min = 140.0\n[recipe]\nmax_lumps = 5\n",
    )
    .unwrap();
    handle.reload().unwrap();
    let active = handle.snapshot();
    assert_eq!(active.recipe.max_lumps, 5);
    assert_eq!(active.recipe.settings_id, None);
}

#[test]
fn reload_without_backing_file_is_refused() {
    let handle = ConfigHandle::new(LineConfig::default());
    assert!(matches!(handle.reload(), Err(ConfigError::NoBackingFile)));
}

#[test]
fn set_recipe_validates_before_swapping() {
    let handle = ConfigHandle::new(LineConfig::default());
    let bad = Recipe {
        pulsation_threshold: -1.0,
        ..Recipe::default()
    };
    assert!(handle.set_recipe(bad).is_err());
    assert_eq!(handle.snapshot().recipe, Recipe::default());

    let good = Recipe {
        name: "PE-25".to_string(),
        preset_diameter: 25.0,
        ..Recipe::default()
    };
    let changes = handle.set_recipe(good).unwrap();
    assert!(changes.iter().any(|c| c.key == "recipe.preset_diameter"));
    assert_eq!(handle.snapshot().recipe.name, "PE-25");
}
