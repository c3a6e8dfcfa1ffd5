//! IMAT rules.

use super::{RuleContext, RuleError};
use rundet_common::{JobRequest, Value};
use tracing::error;

/// Locates the experiment's image directory under the IMAT root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImatFindImagesRule {
    enabled: bool,
}

impl ImatFindImagesRule {
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
        let images_dir = ctx
            .imat_root
            .join(format!("RB{}", job_request.experiment_number));
        if !images_dir.exists() {
            error!(
                "Images dir could not be found for experiment number {}",
                job_request.experiment_number
            );
            return Err(RuleError::violation(format!(
                "Images dir could not be found for experiment number {}",
                job_request.experiment_number
            )));
        }
        job_request.additional_values.insert(
            "images_dir".to_string(),
            Value::from(images_dir.display().to_string()),
        );
        Ok(())
    }
}
