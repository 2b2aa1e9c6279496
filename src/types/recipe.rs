//! Recipe (product settings) types

use serde::{Deserialize, Serialize};

/// Alarm limits and scanner thresholds for the product being run.
///
/// Owned by the settings store; the pipeline only ever reads it, once per
/// evaluation cycle, from the live config snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Recipe {
    /// Id in the settings store, if the recipe was loaded from or saved to one
    pub settings_id: Option<u64>,
    pub name: String,
    /// Nominal diameter (mm). 0 centres the tolerance band on the channel mean.
    pub preset_diameter: f64,
    /// Allowed excursion above the centre (mm)
    pub upper_tolerance: f64,
    /// Allowed excursion below the centre (mm)
    pub lower_tolerance: f64,
    /// Scanner lump detection threshold written to the PLC (mm)
    pub lump_threshold: f32,
    /// Scanner neck detection threshold written to the PLC (mm)
    pub neck_threshold: f32,
    /// Trailing distance the defect counts are summed over (m)
    pub flaw_window_m: f64,
    /// Lumps tolerated inside the flaw window
    pub max_lumps: u32,
    /// Necks tolerated inside the flaw window
    pub max_necks: u32,
    /// Spectral peak magnitude that counts as pulsation (mm)
    pub pulsation_threshold: f64,
    /// Ovality limit (%)
    pub max_ovality: f64,
    /// Per-channel standard deviation limit (mm)
    pub max_std_dev: f64,
}

impl Default for Recipe {
    fn default() -> Self {
        Self {
            settings_id: None,
            name: "default".to_string(),
            preset_diameter: 18.0,
            upper_tolerance: 0.5,
            lower_tolerance: 0.5,
            lump_threshold: 0.3,
            neck_threshold: 0.3,
            flaw_window_m: 1.0,
            max_lumps: 3,
            max_necks: 3,
            pulsation_threshold: 0.05,
            max_ovality: 5.0,
            max_std_dev: 0.1,
        }
    }
}

impl Recipe {
    /// Return every violated rule. An empty list means the recipe is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let non_negative = [
            ("preset_diameter", self.preset_diameter),
            ("upper_tolerance", self.upper_tolerance),
            ("lower_tolerance", self.lower_tolerance),
            ("lump_threshold", f64::from(self.lump_threshold)),
            ("neck_threshold", f64::from(self.neck_threshold)),
            ("pulsation_threshold", self.pulsation_threshold),
            ("max_ovality", self.max_ovality),
            ("max_std_dev", self.max_std_dev),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                errors.push(format!(
                    "recipe.{field} = {value} must be a finite, non-negative number"
                ));
            }
        }

        if !self.flaw_window_m.is_finite() || self.flaw_window_m <= 0.0 {
            errors.push(format!(
                "recipe.flaw_window_m = {} must be > 0",
                self.flaw_window_m
            ));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_recipe_is_valid() {
        assert!(Recipe::default().validate().is_empty());
    }

    #[test]
    fn negative_tolerance_and_nan_threshold_are_both_reported() {
        let recipe = Recipe {
            lower_tolerance: -0.1,
            pulsation_threshold: f64::NAN,
            ..Recipe::default()
        };
        let errors = recipe.validate();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("lower_tolerance"));
        assert!(errors[1].contains("pulsation_threshold"));
    }
}
