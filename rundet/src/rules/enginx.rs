//! ENGINX rules.

use super::{RuleContext, RuleError};
use rundet_common::{JobRequest, Value};
use tracing::{info, warn};

const VALID_GROUPS: [&str; 7] = [
    "both",
    "north",
    "south",
    "cropped",
    "custom",
    "texture20",
    "texture30",
];

/// Validates and publishes the detector grouping for the reduction script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginxGroupRule {
    group: String,
}

impl EnginxGroupRule {
    pub fn new(group: String) -> Self {
        Self { group }
    }

    pub fn verify(&self, job_request: &mut JobRequest) -> Result<(), RuleError> {
        if !VALID_GROUPS.contains(&self.group.to_lowercase().as_str()) {
            return Err(RuleError::violation(format!(
                "Invalid group type: {}",
                self.group
            )));
        }
        job_request
            .additional_values
            .insert("group".to_string(), Value::from(self.group.as_str()));
        Ok(())
    }
}

/// Resolves the archive path of a calibration reference run (ceria or
/// vanadium). The run number is always recorded; a missing file leaves the
/// path unset rather than failing the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginxPathRule {
    run: u32,
    run_key: &'static str,
    path_key: &'static str,
}

impl EnginxPathRule {
    pub fn ceria(run: u32) -> Self {
        Self {
            run,
            run_key: "ceria_run",
            path_key: "ceria_path",
        }
    }

    pub fn vanadium(run: u32) -> Self {
        Self {
            run,
            run_key: "vanadium_run",
            path_key: "vanadium_path",
        }
    }

    pub async fn verify(
        &self,
        job_request: &mut JobRequest,
        ctx: &RuleContext<'_>,
    ) -> Result<(), RuleError> {
        job_request
            .additional_values
            .insert(self.run_key.to_string(), Value::from(self.run));

        let outcome = ctx.finder.find(self.run).await;
        match outcome.path {
            Some(path) => {
                info!("Found {} {} at {}", self.run_key, self.run, path.display());
                job_request.additional_values.insert(
                    self.path_key.to_string(),
                    Value::from(path.display().to_string()),
                );
            }
            None => warn!(
                "Could not find a file for {} {} ({} directories scanned)",
                self.run_key, self.run, outcome.directories_scanned
            ),
        }
        Ok(())
    }
}
