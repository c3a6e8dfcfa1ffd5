//! SANS2D rules.

use super::RuleError;
use rundet_common::{JobRequest, Value};
use tracing::warn;

/// Rejects runs that are not scatter measurements: the title must carry the
/// `_SANS/TRANS` marker and must not describe a direct or empty-can run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckIfScatterSans {
    enabled: bool,
}

impl CheckIfScatterSans {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn verify(&self, job_request: &mut JobRequest) -> Result<(), RuleError> {
        if !self.enabled {
            return Ok(());
        }
        let title = &job_request.experiment_title;
        if !title.contains("_SANS/TRANS") {
            warn!("Not a scatter run, title carries no _SANS/TRANS marker");
            job_request.will_reduce = false;
        }
        if ["empty", "EMPTY", "direct", "DIRECT"]
            .iter()
            .any(|marker| title.contains(marker))
        {
            warn!("Scatter for an empty or direct can run, skipping");
            job_request.will_reduce = false;
        }
        Ok(())
    }
}

/// The user file for the reduction script. Runs first: the M4-monitor
/// detection it performs decides how later rules resolve transmission runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SansUserFile {
    user_file: String,
}

impl SansUserFile {
    pub fn new(user_file: String) -> Self {
        Self { user_file }
    }

    pub fn verify(&self, job_request: &mut JobRequest) -> Result<(), RuleError> {
        // With an M4 monitor the scatter run doubles as its own transmission.
        job_request.additional_values.insert(
            "included_trans_as_scatter".to_string(),
            Value::Bool(self.user_file.contains("_M4")),
        );
        job_request.additional_values.insert(
            "user_file".to_string(),
            Value::from(format!(
                "/extras/{}/{}",
                job_request.instrument.to_lowercase(),
                self.user_file
            )),
        );
        Ok(())
    }
}

/// Wavelength slices for the reduction script, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SansSliceWavs {
    slice_wavs: String,
}

impl SansSliceWavs {
    pub fn new(slice_wavs: String) -> Self {
        Self { slice_wavs }
    }

    pub fn verify(&self, job_request: &mut JobRequest) -> Result<(), RuleError> {
        job_request
            .additional_values
            .insert("slice_wavs".to_string(), Value::from(self.slice_wavs.as_str()));
        Ok(())
    }
}

/// Phi limits for the reduction script, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SansPhiLimits {
    phi_limits: String,
}

impl SansPhiLimits {
    pub fn new(phi_limits: String) -> Self {
        Self { phi_limits }
    }

    pub fn verify(&self, job_request: &mut JobRequest) -> Result<(), RuleError> {
        job_request
            .additional_values
            .insert("phi_limits".to_string(), Value::from(self.phi_limits.as_str()));
        Ok(())
    }
}
