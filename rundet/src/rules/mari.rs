//! MARI rules.

use super::common::{stitch_run_numbers, TitleSimilarity};
use super::{RuleContext, RuleError};
use rundet_common::{JobRequest, Value};
use tracing::info;

/// Groups consecutive identically-titled runs into one summed request. Runs
/// last so the derived request snapshots a fully enriched bag (mask file and
/// wbvan included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MariStitchRule {
    enabled: bool,
}

impl MariStitchRule {
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
        let run_numbers = stitch_run_numbers(job_request, ctx, TitleSimilarity::Strict)?;
        if run_numbers.len() > 1 {
            info!(
                "Stitching {} MARI runs into a summed request",
                run_numbers.len()
            );
            let mut grouped_values = job_request.additional_values.clone();
            grouped_values.insert("runno".to_string(), Value::from(run_numbers));
            grouped_values.insert("sum_runs".to_string(), Value::Bool(true));
            let grouped = job_request.derive_with_values(grouped_values);
            job_request.additional_requests.push(grouped);
        }
        Ok(())
    }
}

/// Publishes the permalink of the cycle's mask file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MariMaskFileRule {
    mask_file_link: String,
}

impl MariMaskFileRule {
    pub fn new(mask_file_link: String) -> Self {
        Self { mask_file_link }
    }

    pub fn verify(&self, job_request: &mut JobRequest) -> Result<(), RuleError> {
        job_request
            .additional_values
            .insert("mask_file_link".to_string(), self.mask_file_link.as_str().into());
        Ok(())
    }
}

/// The white-beam vanadium run number, set by the instrument scientist once
/// per cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MariWbvanRule {
    wbvan: i64,
}

impl MariWbvanRule {
    pub fn new(wbvan: i64) -> Self {
        Self { wbvan }
    }

    pub fn verify(&self, job_request: &mut JobRequest) -> Result<(), RuleError> {
        job_request
            .additional_values
            .insert("wbvan".to_string(), Value::Int(self.wbvan));
        Ok(())
    }
}
