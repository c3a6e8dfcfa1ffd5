//! IRIS rules.

use super::common::{require_f64, within_5_percent};
use super::RuleError;
use rundet_common::{JobRequest, Value};
use std::collections::BTreeMap;

struct GraphiteSetting {
    phases: (f64, f64),
    reflection: &'static str,
    detector_tcb: (f64, f64),
    monitor_tcb: (f64, f64),
}

/// Known graphite-analyser settings from the IRIS user guide: chopper phases
/// plus detector and monitor time-channel windows, each naming a reflection.
const GRAPHITE_DATA: [GraphiteSetting; 14] = [
    GraphiteSetting { phases: (8967.0, 14413.0), reflection: "002", detector_tcb: (56000.0, 76000.0), monitor_tcb: (52200.0, 72200.0) },
    GraphiteSetting { phases: (7996.0, 12868.0), reflection: "002", detector_tcb: (50000.0, 70000.0), monitor_tcb: (46700.0, 66700.0) },
    GraphiteSetting { phases: (7649.0, 12316.0), reflection: "002", detector_tcb: (48000.0, 68000.0), monitor_tcb: (44700.0, 64700.0) },
    GraphiteSetting { phases: (7336.0, 11967.0), reflection: "002", detector_tcb: (47000.0, 67000.0), monitor_tcb: (43200.0, 63200.0) },
    GraphiteSetting { phases: (5922.0, 9569.0), reflection: "002", detector_tcb: (38000.0, 58000.0), monitor_tcb: (35200.0, 55200.0) },
    GraphiteSetting { phases: (7133.0, 11493.0), reflection: "002", detector_tcb: (45000.0, 65000.0), monitor_tcb: (41900.0, 61900.0) },
    GraphiteSetting { phases: (1500.0, 2829.0), reflection: "002", detector_tcb: (14000.0, 74000.0), monitor_tcb: (16000.0, 76000.0) },
    GraphiteSetting { phases: (2655.0, 5148.0), reflection: "002", detector_tcb: (22000.0, 82000.0), monitor_tcb: (21500.0, 81500.0) },
    GraphiteSetting { phases: (7750.0, 12623.0), reflection: "002", detector_tcb: (50000.0, 90000.0), monitor_tcb: (46500.0, 86500.0) },
    GraphiteSetting { phases: (5919.0, 9712.0), reflection: "002", detector_tcb: (38500.0, 78500.0), monitor_tcb: (36500.0, 76500.0) },
    GraphiteSetting { phases: (4502.0, 7457.0), reflection: "002", detector_tcb: (30000.0, 70000.0), monitor_tcb: (28800.0, 68800.0) },
    GraphiteSetting { phases: (3500.0, 5800.0), reflection: "002", detector_tcb: (25000.0, 65000.0), monitor_tcb: (23500.0, 63500.0) },
    GraphiteSetting { phases: (3653.0, 5959.0), reflection: "004", detector_tcb: (24000.0, 44000.0), monitor_tcb: (22700.0, 42700.0) },
    GraphiteSetting { phases: (2850.0, 4275.0), reflection: "004", detector_tcb: (18000.0, 38000.0), monitor_tcb: (17500.0, 37500.0) },
];

fn pair_matches(actual: (f64, f64), reference: (f64, f64)) -> bool {
    within_5_percent(actual.0, reference.0) && within_5_percent(actual.1, reference.1)
}

/// Resolves the analyser reflection for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrisReductionRule {
    enabled: bool,
}

impl IrisReductionRule {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn verify(&self, job_request: &mut JobRequest) -> Result<(), RuleError> {
        if !self.enabled {
            return Ok(());
        }
        // Below 50Hz only the graphite analyser with reflection 002 is used.
        let reflection = if require_f64(job_request, "freq10")?.round() < 50.0 {
            "002"
        } else {
            let phases = (
                require_f64(job_request, "phase6")?,
                require_f64(job_request, "phase10")?,
            );
            let detector_tcb = (
                require_f64(job_request, "tcb_detector_min")?,
                require_f64(job_request, "tcb_detector_max")?,
            );
            let monitor_tcb = (
                require_f64(job_request, "tcb_monitor_min")?,
                require_f64(job_request, "tcb_monitor_max")?,
            );
            GRAPHITE_DATA
                .iter()
                .find(|setting| {
                    pair_matches(phases, setting.phases)
                        && pair_matches(detector_tcb, setting.detector_tcb)
                        && pair_matches(monitor_tcb, setting.monitor_tcb)
                })
                .map(|setting| setting.reflection)
                .unwrap_or("002")
        };
        job_request
            .additional_values
            .insert("reflection".to_string(), Value::from(reflection));
        job_request
            .additional_values
            .insert("analyser".to_string(), Value::from("graphite"));
        Ok(())
    }
}

/// Maps the resolved reflection to its calibration runs. Runs after
/// [`IrisReductionRule`] has written `reflection` into the bag.
#[derive(Debug, Clone, PartialEq)]
pub struct IrisCalibrationRule {
    calibration_runs: BTreeMap<String, Value>,
}

impl IrisCalibrationRule {
    pub fn new(calibration_runs: BTreeMap<String, Value>) -> Self {
        Self { calibration_runs }
    }

    pub fn verify(&self, job_request: &mut JobRequest) -> Result<(), RuleError> {
        if self.calibration_runs.is_empty() {
            return Ok(());
        }
        let reflection = job_request
            .additional_values
            .get("reflection")
            .and_then(|value| value.as_str())
            .ok_or_else(|| {
                RuleError::violation("Reflection is not resolved, reduction rule must run first")
            })?;
        let calibration_runs = self.calibration_runs.get(reflection).ok_or_else(|| {
            RuleError::violation(format!(
                "No calibration runs configured for reflection {reflection}"
            ))
        })?;
        job_request.additional_values.insert(
            "calibration_run_numbers".to_string(),
            calibration_runs.clone(),
        );
        Ok(())
    }
}
