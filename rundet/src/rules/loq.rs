//! LOQ rules.

use super::{RuleContext, RuleError};
use crate::journal::{
    find_can_scatter_file, find_can_trans_file, find_direct_file, find_trans_file, group_labels,
    strip_excess_records, JournalRecord,
};
use rundet_common::{JobRequest, Value};
use tracing::{info, warn};

/// The user file for the reduction script, with M4-monitor detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoqUserFile {
    user_file: String,
}

impl LoqUserFile {
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
            Value::from(format!("/extras/loq/{}", self.user_file)),
        );
        Ok(())
    }
}

/// Resolves the companion runs of a scatter measurement from the cycle
/// journal: transmission, can scatter, can transmission, and direct-beam
/// runs. Runs last, after the user-file rule has decided the M4 question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoqFindFiles {
    enabled: bool,
}

impl LoqFindFiles {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub async fn verify(
        &self,
        job_request: &mut JobRequest,
        ctx: &RuleContext<'_>,
    ) -> Result<(), RuleError> {
        if !self.enabled {
            return Ok(());
        }
        let labels = group_labels(&job_request.experiment_title);
        let sample_title = labels
            .first()
            .map(|label| label.to_string())
            .ok_or_else(|| {
                RuleError::violation("Title carries no bracketed sample label")
            })?;
        let can_title = labels.get(1).map(|label| label.to_string());

        let cycle = job_request
            .additional_values
            .get("cycle_string")
            .and_then(|value| value.as_str())
            .map(str::to_string)
            .ok_or_else(|| RuleError::violation("Cycle string is not set for this run"))?;
        let trans_as_scatter = job_request
            .additional_values
            .get("included_trans_as_scatter")
            .and_then(|value| value.as_bool())
            .ok_or_else(|| {
                RuleError::violation("User file rule must run before file resolution")
            })?;

        let records = ctx
            .journal
            .cycle_index(&job_request.instrument, &cycle)
            .await?;
        resolve_companions(
            job_request,
            &records,
            &cycle,
            &sample_title,
            can_title.as_deref(),
            trans_as_scatter,
        );
        Ok(())
    }
}

/// Populate the companion-run enrichment keys from a cycle's journal records.
/// Only records preceding the scatter run count; when none remain the run is
/// marked as not reducible.
fn resolve_companions(
    job_request: &mut JobRequest,
    records: &[JournalRecord],
    cycle: &str,
    sample_title: &str,
    can_title: Option<&str>,
    trans_as_scatter: bool,
) {
    let records = strip_excess_records(records, job_request.run_number);
    if records.is_empty() {
        warn!("No eligible journal records for cycle {cycle}");
        job_request.will_reduce = false;
        return;
    }

    job_request.additional_values.insert(
        "run_number".to_string(),
        Value::from(job_request.run_number),
    );

    let trans_run = if trans_as_scatter {
        info!("Scatter run doubles as transmission (M4 monitor)");
        Some(job_request.run_number)
    } else {
        find_trans_file(records, sample_title).map(|record| record.run_number)
    };
    if let Some(run) = trans_run {
        job_request
            .additional_values
            .insert("scatter_transmission".to_string(), Value::from(run));
    }

    if let Some(can_title) = can_title {
        let can_scatter = find_can_scatter_file(records, can_title);
        if let Some(record) = can_scatter {
            job_request
                .additional_values
                .insert("can_scatter".to_string(), Value::from(record.run_number));
        }
        let can_trans = if trans_as_scatter {
            can_scatter
        } else {
            find_can_trans_file(records, can_title)
        };
        if let (Some(trans), Some(_)) = (can_trans, can_scatter) {
            job_request
                .additional_values
                .insert("can_transmission".to_string(), Value::from(trans.run_number));
        }
    }

    if let Some(direct) = find_direct_file(records) {
        if job_request
            .additional_values
            .contains_key("scatter_transmission")
        {
            job_request
                .additional_values
                .insert("scatter_direct".to_string(), Value::from(direct.run_number));
        }
        if job_request.additional_values.contains_key("can_scatter")
            && job_request
                .additional_values
                .contains_key("can_transmission")
        {
            job_request
                .additional_values
                .insert("can_direct".to_string(), Value::from(direct.run_number));
        }
    }
}
