//! INTER rules.

use super::common::{stitch_input_runs, TitleSimilarity};
use super::{RuleContext, RuleError};
use rundet_common::JobRequest;

/// Groups consecutive runs of one reflectometry measurement series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterStitchRule {
    enabled: bool,
}

impl InterStitchRule {
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
        stitch_input_runs(job_request, ctx, TitleSimilarity::MolSpec)
    }
}
