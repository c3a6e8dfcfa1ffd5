//! VESUVIO rules.

use super::common::{stitch_input_runs, TitleSimilarity};
use super::{RuleContext, RuleError};
use rundet_common::{JobRequest, Value};

/// Groups consecutive runs whose titles match exactly. VESUVIO titles carry
/// no run counters, so anything looser would merge unrelated measurements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VesuvioStitchRule {
    enabled: bool,
}

impl VesuvioStitchRule {
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
        stitch_input_runs(job_request, ctx, TitleSimilarity::Strict)
    }
}

/// The configured empty-run numbers, passed straight through to the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VesuvioEmptyRunsRule {
    empty_runs: String,
}

impl VesuvioEmptyRunsRule {
    pub fn new(empty_runs: String) -> Self {
        Self { empty_runs }
    }

    pub fn verify(&self, job_request: &mut JobRequest) -> Result<(), RuleError> {
        job_request
            .additional_values
            .insert("empty_runs".to_string(), Value::from(self.empty_runs.as_str()));
        Ok(())
    }
}

/// The instrument parameter file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VesuvioIpFileRule {
    ip_file: String,
}

impl VesuvioIpFileRule {
    pub fn new(ip_file: String) -> Self {
        Self { ip_file }
    }

    pub fn verify(&self, job_request: &mut JobRequest) -> Result<(), RuleError> {
        job_request
            .additional_values
            .insert("ip_file".to_string(), Value::from(self.ip_file.as_str()));
        Ok(())
    }
}
