//! OSIRIS rules.
//!
//! The chopper phase and time-channel-boundary reference tables come from the
//! published OSIRIS user guide; runs are classified by matching their logged
//! values against them with a 5% tolerance.

use super::common::{require_f64, stitch_input_runs, within_5_percent, TitleSimilarity};
use super::{RuleContext, RuleError};
use rundet_common::{JobRequest, Value};
use std::collections::BTreeMap;
use tracing::info;

/// (phase6, phase10) pairs of known spectroscopy chopper settings.
const SPECTROSCOPY_PHASES: [(f64, f64); 10] = [
    (8573.0, 14250.0),
    (6052.0, 11250.0),
    (7500.0, 12500.0),
    (9738.0, 16166.0),
    (8964.0, 15211.0),
    (1500.0, 2805.0),
    (6569.0, 10861.0),
    (8207.0, 13502.0),
    (3717.0, 5675.0),
    (3217.0, 4904.0),
];

/// (phase6, phase10) pairs of known diffraction chopper settings.
const DIFFRACTION_PHASES: [(f64, f64); 11] = [
    (1011.0, 1566.0),
    (4599.0, 7715.0),
    (7590.0, 12859.0),
    (10407.0, 17715.0),
    (13015.0, 22800.0),
    (16100.0, 27973.0),
    (19480.0, 33251.0),
    (22571.0, 38130.0),
    (26062.0, 3609.0),
    (28953.0, 8228.0),
    (32144.0, 13367.0),
];

/// (detector min, detector max, monitor min, monitor max) -> reflection.
/// Settings for frequencies below 50 are omitted: they always resolve to
/// reflection 002 without consulting this table.
const REFLECTION_TIME_CHANNELS: [(f64, f64, f64, f64, &str); 7] = [
    (51500.0, 71500.0, 45900.0, 65900.0, "002"),
    (45500.0, 65500.0, 40400.0, 60400.0, "002"),
    (58700.0, 78700.0, 52000.0, 72000.0, "002"),
    (40500.0, 60500.0, 35300.0, 55300.0, "002"),
    (48500.0, 68500.0, 43600.0, 63600.0, "002"),
    (22500.0, 42500.0, 19000.03, 39000.0, "004"), // the .03 is not a typo
    (20500.0, 40500.0, 16700.0, 36700.0, "004"),
];

fn phases_match(table: &[(f64, f64)], phase6: f64, phase10: f64) -> bool {
    table
        .iter()
        .any(|(p6, p10)| within_5_percent(phase6, *p6) && within_5_percent(phase10, *p10))
}

/// Groups consecutive similar runs, except for diffraction runs, which
/// cannot be summed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsirisStitchRule {
    enabled: bool,
}

impl OsirisStitchRule {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn verify(
        &self,
        job_request: &mut JobRequest,
        ctx: &RuleContext<'_>,
    ) -> Result<(), RuleError> {
        if !self.enabled {
            return Ok(());
        }
        if job_request.additional_values.get("mode").and_then(|v| v.as_str()) == Some("diffraction")
        {
            info!("Diffraction run cannot be summed, skipping stitch");
            job_request
                .additional_values
                .insert("sum_runs".to_string(), Value::Bool(false));
            return Ok(());
        }
        stitch_input_runs(job_request, ctx, TitleSimilarity::MolSpec)
    }
}

/// Classifies the run as spectroscopy or diffraction from its chopper
/// frequency, phases, and detector time-channel boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsirisReductionModeRule {
    enabled: bool,
}

impl OsirisReductionModeRule {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    fn determine_mode(
        phase6: f64,
        phase10: f64,
        freq: f64,
        detector_min: f64,
        detector_max: f64,
    ) -> Result<&'static str, RuleError> {
        if freq.round() as i64 != 25 {
            return Ok("spectroscopy");
        }
        let is_spec = phases_match(&SPECTROSCOPY_PHASES, phase6, phase10);
        let is_diff = phases_match(&DIFFRACTION_PHASES, phase6, phase10);
        match (is_diff, is_spec) {
            (true, true) => {
                // Ambiguous phases: the detector time channel boundaries
                // disambiguate, matching either known spectroscopy window.
                let spectroscopy_windows = (within_5_percent(detector_min, 40200.0)
                    && within_5_percent(detector_max, 80200.0))
                    || (within_5_percent(detector_min, 57300.0)
                        && within_5_percent(detector_max, 97300.0));
                Ok(if spectroscopy_windows {
                    "spectroscopy"
                } else {
                    "diffraction"
                })
            }
            (true, false) => Ok("diffraction"),
            (false, true) => Ok("spectroscopy"),
            (false, false) => Err(RuleError::violation(
                "Phases match neither diffraction nor spectroscopy",
            )),
        }
    }

    pub fn verify(&self, job_request: &mut JobRequest) -> Result<(), RuleError> {
        if !self.enabled {
            return Ok(());
        }
        let mode = Self::determine_mode(
            require_f64(job_request, "phase6")?,
            require_f64(job_request, "phase10")?,
            require_f64(job_request, "freq10")?,
            require_f64(job_request, "tcb_detector_min")?,
            require_f64(job_request, "tcb_detector_max")?,
        )?;
        if mode == "diffraction" {
            // Diffraction runs cannot be summed: drop any grouped request
            // built from a summing assumption.
            job_request
                .additional_values
                .insert("sum_runs".to_string(), Value::Bool(false));
            job_request.additional_requests.clear();
        }
        job_request
            .additional_values
            .insert("mode".to_string(), Value::from(mode));
        Ok(())
    }
}

/// Resolves the analyser reflection and the calibration run configured for
/// it. The configured value maps reflection identifier to calibration run.
#[derive(Debug, Clone, PartialEq)]
pub struct OsirisReflectionCalibrationRule {
    calibration_runs: BTreeMap<String, Value>,
}

impl OsirisReflectionCalibrationRule {
    pub fn new(calibration_runs: BTreeMap<String, Value>) -> Self {
        Self { calibration_runs }
    }

    fn reflection_from_time_channels(
        detector_min: f64,
        detector_max: f64,
        monitor_min: f64,
        monitor_max: f64,
    ) -> Result<&'static str, RuleError> {
        for (d_min, d_max, m_min, m_max, reflection) in REFLECTION_TIME_CHANNELS {
            if within_5_percent(detector_min, d_min)
                && within_5_percent(detector_max, d_max)
                && within_5_percent(monitor_min, m_min)
                && within_5_percent(monitor_max, m_max)
            {
                return Ok(reflection);
            }
        }
        Err(RuleError::violation("Analyser cannot be determined"))
    }

    fn determine_reflection(job_request: &JobRequest) -> Result<&'static str, RuleError> {
        // No frequency below 50 uses reflection 004.
        if require_f64(job_request, "freq10")?.round() < 50.0 {
            return Ok("002");
        }
        Self::reflection_from_time_channels(
            require_f64(job_request, "tcb_detector_min")?,
            require_f64(job_request, "tcb_detector_max")?,
            require_f64(job_request, "tcb_monitor_min")?,
            require_f64(job_request, "tcb_monitor_max")?,
        )
    }

    pub fn verify(&self, job_request: &mut JobRequest) -> Result<(), RuleError> {
        if self.calibration_runs.is_empty() {
            return Ok(());
        }
        let reflection = Self::determine_reflection(job_request)?;
        let calibration_run = self.calibration_runs.get(reflection).ok_or_else(|| {
            RuleError::violation(format!(
                "No calibration run configured for reflection {reflection}"
            ))
        })?;
        job_request
            .additional_values
            .insert("reflection".to_string(), Value::from(reflection));
        job_request
            .additional_values
            .insert("calibration_run_number".to_string(), calibration_run.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsirisDefaultSpectroscopy {
    enabled: bool,
}

impl OsirisDefaultSpectroscopy {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn verify(&self, job_request: &mut JobRequest) -> Result<(), RuleError> {
        if self.enabled {
            job_request
                .additional_values
                .insert("spectroscopy_reduction".to_string(), Value::from("true"));
            job_request
                .additional_values
                .insert("diffraction_reduction".to_string(), Value::from("false"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsirisDefaultGraniteAnalyser {
    enabled: bool,
}

impl OsirisDefaultGraniteAnalyser {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn verify(&self, job_request: &mut JobRequest) -> Result<(), RuleError> {
        if self.enabled {
            job_request
                .additional_values
                .insert("analyser".to_string(), Value::from("graphite"));
        }
        Ok(())
    }
}
