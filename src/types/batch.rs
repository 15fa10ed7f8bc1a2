//! Batch context: externally supplied recipe and yeast metadata

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Default yeast tolerance band (°C) when no strain metadata is configured.
pub const DEFAULT_YEAST_MIN_TEMP_C: f64 = 16.0;
pub const DEFAULT_YEAST_MAX_TEMP_C: f64 = 24.0;

/// Read-only batch metadata.
///
/// Used only to bias the predictor's initial guess and to centre the
/// temperature-deviation band. Every field is optional: the core degrades
/// to data-driven behaviour when metadata is missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchContext {
    /// Original gravity (e.g. 1.050)
    pub og: Option<f64>,
    /// Target final gravity
    pub target_fg: Option<f64>,
    pub yeast_strain: Option<String>,
    /// Lower bound of the yeast's tolerance band, °C
    pub yeast_min_temp_c: Option<f64>,
    /// Upper bound of the yeast's tolerance band, °C
    pub yeast_max_temp_c: Option<f64>,
    /// Apparent attenuation, percent (e.g. 78.0)
    pub yeast_attenuation: Option<f64>,
    pub start_date: Option<NaiveDate>,
}

impl BatchContext {
    /// Strain name used to tag calibrated points.
    pub fn strain_or_unknown(&self) -> &str {
        self.yeast_strain
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("Unknown")
    }

    /// Midpoint of the yeast tolerance band, falling back to the default band.
    pub fn target_temp_c(&self) -> f64 {
        let min = self.yeast_min_temp_c.unwrap_or(DEFAULT_YEAST_MIN_TEMP_C);
        let max = self.yeast_max_temp_c.unwrap_or(DEFAULT_YEAST_MAX_TEMP_C);
        (min + max) / 2.0
    }

    /// Expected final gravity from OG and attenuation:
    /// `FG = OG − attenuation · (OG − 1)`.
    ///
    /// Only returned for plausible inputs (OG > 1.0, 50% < attenuation < 100%).
    pub fn expected_fg(&self) -> Option<f64> {
        let og = self.og?;
        let att = self.yeast_attenuation?;
        if og > 1.0 && att > 50.0 && att < 100.0 {
            Some(og - (att / 100.0) * (og - 1.0))
        } else {
            None
        }
    }

    /// ABV estimate for a current gravity reading.
    pub fn abv_at(&self, gravity: f64) -> Option<f64> {
        self.og.map(|og| ((og - gravity) * 131.25).max(0.0))
    }
}
