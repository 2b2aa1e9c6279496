//! Config validation: unknown-key detection with Levenshtein suggestions
//! and physical range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, "; did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for LineConfig.
///
/// Maintained by hand to match the struct hierarchy in line_config.rs,
/// `types::Recipe` and `plc::RegisterLayout`.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [line]
        "line",
        "line.name",
        // [plc]
        "plc",
        "plc.endpoint",
        "plc.data_block",
        // [plc.layout]
        "plc.layout",
        "plc.layout.block_size",
        "plc.layout.status_byte",
        "plc.layout.d1",
        "plc.layout.d2",
        "plc.layout.d3",
        "plc.layout.d4",
        "plc.layout.lumps",
        "plc.layout.necks",
        "plc.layout.speed",
        "plc.layout.status_word",
        "plc.layout.control",
        "plc.layout.lump_threshold",
        "plc.layout.neck_threshold",
        // [acquisition]
        "acquisition",
        "acquisition.cycle_ms",
        "acquisition.counter_high_water",
        "acquisition.stable_cycles_before_reset",
        "acquisition.reset_attempts",
        "acquisition.reconnect_backoff_ms",
        "acquisition.max_reconnect_failures",
        "acquisition.busy_retries",
        "acquisition.busy_backoff_ms",
        "acquisition.channel_capacity",
        "acquisition.command_capacity",
        // [router]
        "router",
        "router.batch_size",
        "router.critical_depth",
        "router.warning_depth",
        "router.analysis_capacity",
        "router.history_max_samples",
        // [production]
        "production",
        "production.speed_m_per_min",
        "production.speed_fluctuation_percent",
        "production.batch",
        "production.product",
        // [recipe]
        "recipe",
        "recipe.settings_id",
        "recipe.name",
        "recipe.preset_diameter",
        "recipe.upper_tolerance",
        "recipe.lower_tolerance",
        "recipe.lump_threshold",
        "recipe.neck_threshold",
        "recipe.flaw_window_m",
        "recipe.max_lumps",
        "recipe.max_necks",
        "recipe.pulsation_threshold",
        "recipe.max_ovality",
        "recipe.max_std_dev",
        // [analysis]
        "analysis",
        "analysis.fft_min_samples",
        "analysis.default_sample_rate_hz",
        "analysis.min_prominence",
        "analysis.min_peak_distance",
        "analysis.std_dev_window",
        "analysis.lamp_policy",
        // [storage]
        "storage",
        "storage.enabled",
        "storage.path",
        "storage.recipe_id",
        // [server]
        "server",
        "server.addr",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (k, levenshtein(unknown, k)))
        .filter(|&(_, dist)| dist <= 3)
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys; it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are reported by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Physical Range Validation
// ============================================================================

/// Validate physical ranges on a parsed LineConfig.
///
/// Returns (errors, warnings): errors are impossible values that must
/// prevent startup; warnings are suspicious but not fatal.
pub fn validate_physical_ranges(
    config: &super::LineConfig,
) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // Preset diameter: 0.1-500 mm covers fine wire to large pipe
    let preset = config.recipe.preset_diameter;
    if preset != 0.0 && !(0.1..=500.0).contains(&preset) {
        errors.push(format!(
            "recipe.preset_diameter = {preset:.2} is outside physical range (0.1-500 mm)"
        ));
    }

    let speed = config.production.speed_m_per_min;
    if speed > 1_000.0 {
        warnings.push(ValidationWarning {
            field: "production.speed_m_per_min".to_string(),
            message: format!(
                "production.speed_m_per_min = {speed:.1} is above typical extrusion speeds (<= 1000 m/min)"
            ),
            suggestion: None,
        });
    }

    let cycle = config.acquisition.cycle_ms;
    if cycle > 0 && !(5..=1_000).contains(&cycle) {
        warnings.push(ValidationWarning {
            field: "acquisition.cycle_ms".to_string(),
            message: format!(
                "acquisition.cycle_ms = {cycle} is outside the usual scanner cadence (5-1000 ms)"
            ),
            suggestion: None,
        });
    }

    let window = config.recipe.flaw_window_m;
    if window > 1_000.0 {
        warnings.push(ValidationWarning {
            field: "recipe.flaw_window_m".to_string(),
            message: format!(
                "recipe.flaw_window_m = {window:.1} is unusually long (> 1000 m)"
            ),
            suggestion: None,
        });
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("hello", "hello"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("max_lumsp", "max_lumps"), 2);
        assert_eq!(levenshtein("max_lump", "max_lumps"), 1);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [plc]
            endpoint = "sim://a"
            [plc.layout]
            d1 = 2
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"plc".to_string()));
        assert!(keys.contains(&"plc.layout".to_string()));
        assert!(keys.contains(&"plc.layout.d1".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let toml_str = r#"
[recipe]
max_lumsp = 3
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].suggestion.as_deref(), Some("recipe.max_lumps"));
    }

    #[test]
    fn test_suggest_correction_no_match_for_garbage() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }

    #[test]
    fn test_known_keys_cover_default_config() {
        let config = crate::config::LineConfig::default();
        let value = toml::Value::try_from(&config).unwrap();
        let known = known_config_keys();
        for key in walk_toml_keys(&value, "") {
            assert!(known.contains(key.as_str()), "missing known key {key}");
        }
    }

    #[test]
    fn test_preset_diameter_out_of_range() {
        let mut config = crate::config::LineConfig::default();
        config.recipe.preset_diameter = 900.0;
        let (errors, _) = validate_physical_ranges(&config);
        assert!(errors.iter().any(|e| e.contains("preset_diameter")));
    }

    #[test]
    fn test_physical_range_defaults_clean() {
        let config = crate::config::LineConfig::default();
        let (errors, warnings) = validate_physical_ranges(&config);
        assert!(errors.is_empty(), "Defaults should produce no errors: {errors:?}");
        assert!(warnings.is_empty(), "Defaults should produce no warnings: {warnings:?}");
    }
}
