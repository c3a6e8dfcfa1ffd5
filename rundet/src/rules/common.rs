//! Helpers shared across instrument rules: the enablement gate, tolerance
//! comparison, and the backward stitch walk over neighbouring run files.

use super::{RuleContext, RuleError};
use crate::ingest::IngestError;
use rundet_common::instrument::run_filename;
use rundet_common::JobRequest;
use tracing::debug;

/// True when `value` lies within 5% of `reference`, bounds inclusive. For a
/// negative reference the band is below/above swapped so that it still
/// brackets the reference.
pub fn within_5_percent(value: f64, reference: f64) -> bool {
    let (low, high) = if reference >= 0.0 {
        (reference * 0.95, reference * 1.05)
    } else {
        (reference * 1.05, reference * 0.95)
    };
    value >= low && value <= high
}

/// How the stitch walk decides whether a neighbouring run belongs to the same
/// measurement series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleSimilarity {
    /// Titles must match exactly.
    Strict,
    /// Molecular-spectroscopy convention: exact match, or equal once a
    /// trailing run counter (last five characters) is dropped, or a shared
    /// seven-character prefix when either title mentions "run".
    MolSpec,
}

fn drop_last_chars(title: &str, count: usize) -> &str {
    match title.char_indices().rev().nth(count - 1) {
        Some((idx, _)) => &title[..idx],
        None => "",
    }
}

fn first_chars(title: &str, count: usize) -> &str {
    match title.char_indices().nth(count) {
        Some((idx, _)) => &title[..idx],
        None => title,
    }
}

impl TitleSimilarity {
    pub fn matches(&self, candidate: &str, reference: &str) -> bool {
        if candidate == reference {
            return true;
        }
        match self {
            TitleSimilarity::Strict => false,
            TitleSimilarity::MolSpec => {
                drop_last_chars(candidate, 5) == drop_last_chars(reference, 5)
                    || (first_chars(candidate, 7) == first_chars(reference, 7)
                        && (candidate.contains("run") || reference.contains("run")))
            }
        }
    }
}

/// Walk backward from the request's run, collecting consecutive run numbers
/// whose files exist beside the request's file and whose titles are similar.
/// The returned list always starts with the request's own run and stops at
/// the first gap, dissimilar title, or run zero.
pub fn stitch_run_numbers(
    job_request: &JobRequest,
    ctx: &RuleContext<'_>,
    similarity: TitleSimilarity,
) -> Result<Vec<u32>, RuleError> {
    let mut runs = vec![job_request.run_number];
    let parent = match job_request.filepath.parent() {
        Some(parent) => parent,
        None => return Ok(runs),
    };

    let mut run = job_request.run_number;
    while let Some(previous) = run.checked_sub(1).filter(|r| *r > 0) {
        let path = parent.join(run_filename(&job_request.instrument, previous));
        let title = match ctx.ingestor.run_title(&path) {
            Ok(title) => title,
            Err(IngestError::FileNotFound(_)) => break,
            Err(err) => return Err(err.into()),
        };
        if !similarity.matches(&title, &job_request.experiment_title) {
            debug!(
                run = previous,
                "stitch walk stopped at dissimilar title: {title:?}"
            );
            break;
        }
        runs.push(previous);
        run = previous;
    }
    Ok(runs)
}

/// Fetch a numeric enrichment value written by an earlier rule or by
/// ingestion. Absence means the run cannot be classified.
pub fn require_f64(job_request: &JobRequest, key: &str) -> Result<f64, RuleError> {
    job_request
        .additional_values
        .get(key)
        .and_then(|value| value.as_f64())
        .ok_or_else(|| {
            RuleError::violation(format!("Missing or non-numeric metadata value {key}"))
        })
}

/// The common stitch shape: the request itself always carries its own run as
/// `input_runs`; when the walk accumulates more than one run, a derived
/// grouped request carrying the full list is appended. The original request
/// stays a single-run request.
pub fn stitch_input_runs(
    job_request: &mut JobRequest,
    ctx: &RuleContext<'_>,
    similarity: TitleSimilarity,
) -> Result<(), RuleError> {
    job_request.additional_values.insert(
        "input_runs".to_string(),
        vec![job_request.run_number].into(),
    );
    let run_numbers = stitch_run_numbers(job_request, ctx, similarity)?;
    if run_numbers.len() > 1 {
        let mut grouped_values = job_request.additional_values.clone();
        grouped_values.insert("input_runs".to_string(), run_numbers.into());
        let grouped = job_request.derive_with_values(grouped_values);
        job_request.additional_requests.push(grouped);
    }
    Ok(())
}

/// The universal enablement gate. When configured off it clears `will_reduce`
/// with a violation; when on it is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnabledRule {
    enabled: bool,
}

impl EnabledRule {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn verify(&self, job_request: &mut JobRequest) -> Result<(), RuleError> {
        if self.enabled {
            Ok(())
        } else {
            job_request.will_reduce = false;
            Err(RuleError::violation(format!(
                "Reduction is disabled for {}",
                job_request.instrument
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::test_support::sample_job_request;

    #[test]
    fn test_within_5_percent_bounds_inclusive() {
        assert!(within_5_percent(95.0, 100.0));
        assert!(within_5_percent(105.0, 100.0));
        assert!(within_5_percent(100.0, 100.0));
        assert!(!within_5_percent(94.9, 100.0));
        assert!(!within_5_percent(105.1, 100.0));
    }

    #[test]
    fn test_within_5_percent_negative_reference() {
        assert!(within_5_percent(-95.0, -100.0));
        assert!(within_5_percent(-100.0, -100.0));
        assert!(within_5_percent(-105.0, -100.0));
        assert!(!within_5_percent(-94.9, -100.0));
        assert!(!within_5_percent(-105.1, -100.0));
        assert!(!within_5_percent(96.0, -100.0));
    }

    #[test]
    fn test_within_5_percent_zero_reference() {
        assert!(within_5_percent(0.0, 0.0));
        assert!(!within_5_percent(0.1, 0.0));
    }

    #[test]
    fn test_strict_similarity() {
        let strict = TitleSimilarity::Strict;
        assert!(strict.matches("Water 300K", "Water 300K"));
        assert!(!strict.matches("Water 300K run 2", "Water 300K run 1"));
    }

    #[test]
    fn test_molspec_similarity_drops_trailing_counter() {
        let molspec = TitleSimilarity::MolSpec;
        assert!(molspec.matches("Water 300K run 2", "Water 300K run 1"));
        assert!(!molspec.matches("Ethanol 10K", "Water 300K"));
    }

    #[test]
    fn test_molspec_similarity_shared_prefix_needs_run_marker() {
        let molspec = TitleSimilarity::MolSpec;
        assert!(molspec.matches("Sample1 continuation run", "Sample1 original measurement"));
        assert!(!molspec.matches("Sample1 continuation", "Sample1 original measurement"));
    }

    #[test]
    fn test_molspec_similarity_run_marker_in_either_title() {
        let molspec = TitleSimilarity::MolSpec;
        assert!(molspec.matches("Sample1B extra measurement", "Sample1B run 4 of series"));
    }

    #[test]
    fn test_molspec_similarity_run_marker_is_case_sensitive() {
        let molspec = TitleSimilarity::MolSpec;
        assert!(!molspec.matches("Sample1B extra measurement", "Sample1B RUN 4 of series"));
    }

    #[test]
    fn test_stitch_walk_collects_consecutive_similar_runs() {
        let mut tc = crate::rules::testing::TestContext::new();
        let job_request = sample_job_request("TOSCA", 100);
        let parent = job_request.filepath.parent().unwrap();
        tc.ingestor = crate::ingest::test_support::StubIngestor::default()
            .with_title(parent.join("TSC99.nxs"), "Test experiment run 2")
            .with_title(parent.join("TSC98.nxs"), "Unrelated measurement");

        let runs =
            stitch_run_numbers(&job_request, &tc.ctx(), TitleSimilarity::MolSpec).unwrap();
        assert_eq!(runs, vec![100, 99]);
    }

    #[test]
    fn test_stitch_walk_stops_at_missing_neighbour() {
        let tc = crate::rules::testing::TestContext::new();
        let job_request = sample_job_request("TOSCA", 100);
        let runs =
            stitch_run_numbers(&job_request, &tc.ctx(), TitleSimilarity::MolSpec).unwrap();
        assert_eq!(runs, vec![100]);
    }

    #[test]
    fn test_enabled_rule_clears_will_reduce() {
        let mut job_request = sample_job_request("MARI", 100);
        let err = EnabledRule::new(false).verify(&mut job_request).unwrap_err();
        assert!(matches!(err, RuleError::Violation(_)));
        assert!(!job_request.will_reduce);

        let mut job_request = sample_job_request("MARI", 100);
        EnabledRule::new(true).verify(&mut job_request).unwrap();
        assert!(job_request.will_reduce);
    }
}
