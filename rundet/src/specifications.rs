//! Instrument specifications
//!
//! A specification is the ordered rule list configured for one instrument,
//! fetched from the specification API and cached with a staleness bound.
//! Rules are kept in declaration order except for the ordering pass:
//! enrichment rules flagged first move to the front, grouping rules flagged
//! last move to the end, each partition keeping its relative order.

use crate::rules::{Rule, RuleConfigError, RuleContext, RuleError};
use rundet_common::{JobRequest, Value};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// How long a loaded specification stays fresh.
const STALENESS: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum SpecificationError {
    #[error("Specification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Specification is not a JSON object of rule values: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] RuleConfigError),
}

/// Failure modes of a full verification pass. Rule violations are not here:
/// they resolve to `will_reduce = false` inside `verify`.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Specification(#[from] SpecificationError),

    #[error(transparent)]
    Rule(RuleError),
}

/// Client for the specification API.
pub struct SpecificationApi {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SpecificationApi {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Fetch the instrument's rule configuration, in declaration order.
    pub async fn fetch(
        &self,
        instrument: &str,
    ) -> Result<Vec<(String, Value)>, SpecificationError> {
        let url = format!(
            "{}/instrument/{}/specification",
            self.base_url,
            instrument.to_uppercase()
        );
        info!("Fetching specification from {url}");
        let entries: serde_json::Map<String, serde_json::Value> = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        entries
            .into_iter()
            .map(|(key, value)| Ok((key, serde_json::from_value(value)?)))
            .collect()
    }
}

/// Stable three-way partition. `should_be_last` wins over `should_be_first`:
/// a grouping rule must never run before the enrichment it snapshots.
fn order_rules(rules: Vec<Rule>) -> Vec<Rule> {
    let mut ordered = Vec::with_capacity(rules.len());
    let mut middle = Vec::new();
    let mut tail = Vec::new();
    for rule in rules {
        if rule.should_be_last() {
            tail.push(rule);
        } else if rule.should_be_first() {
            ordered.push(rule);
        } else {
            middle.push(rule);
        }
    }
    ordered.extend(middle);
    ordered.extend(tail);
    ordered
}

/// One instrument's cached rule list.
pub struct InstrumentSpecification {
    instrument: String,
    rules: Vec<Rule>,
    loaded_at: Option<Instant>,
}

impl InstrumentSpecification {
    pub fn new(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            rules: Vec::new(),
            loaded_at: None,
        }
    }

    #[cfg(test)]
    pub fn with_rules(instrument: impl Into<String>, rules: Vec<Rule>) -> Self {
        Self {
            instrument: instrument.into(),
            rules: order_rules(rules),
            loaded_at: Some(Instant::now()),
        }
    }

    fn is_stale(&self) -> bool {
        self.loaded_at
            .map_or(true, |loaded| loaded.elapsed() >= STALENESS)
    }

    async fn load(&mut self, api: &SpecificationApi) -> Result<(), SpecificationError> {
        let entries = api.fetch(&self.instrument).await?;
        let rules = entries
            .iter()
            .map(|(key, value)| Rule::from_key(key, value))
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            "Loaded {} rules for {}",
            rules.len(),
            self.instrument
        );
        self.rules = order_rules(rules);
        self.loaded_at = Some(Instant::now());
        Ok(())
    }

    /// Run every rule against the request, reloading a stale rule list
    /// first. A specification with no rules never approves a run. The pass
    /// short-circuits as soon as `will_reduce` turns false; later rules are
    /// not consulted and cannot re-enable the run.
    pub async fn verify(
        &mut self,
        job_request: &mut JobRequest,
        ctx: &RuleContext<'_>,
        api: &SpecificationApi,
    ) -> Result<(), VerifyError> {
        if self.is_stale() {
            self.load(api).await?;
        }
        if self.rules.is_empty() {
            warn!("No rules configured for {}", self.instrument);
            job_request.will_reduce = false;
            return Ok(());
        }
        for rule in &self.rules {
            match rule.verify(job_request, ctx).await {
                Ok(()) => {}
                Err(RuleError::Violation(reason)) => {
                    info!(
                        "Rule violation for {} run {}: {reason}",
                        self.instrument, job_request.run_number
                    );
                    job_request.will_reduce = false;
                }
                Err(err) => return Err(VerifyError::Rule(err)),
            }
            if !job_request.will_reduce {
                info!(
                    "Run {} will not be reduced",
                    job_request.run_number
                );
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::test_support::sample_job_request;
    use crate::rules::probe::ProbeRule;
    use crate::rules::testing::TestContext;

    fn stub_api() -> SpecificationApi {
        SpecificationApi::new("http://127.0.0.1:9", "token")
    }

    fn probe_names(job_request: &JobRequest) -> Vec<String> {
        match job_request.additional_values.get("probe_order") {
            Some(Value::List(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_empty_specification_never_approves() {
        let mut spec = InstrumentSpecification::with_rules("MARI", Vec::new());
        let tc = TestContext::new();
        let mut job_request = sample_job_request("MARI", 100);
        spec.verify(&mut job_request, &tc.ctx(), &stub_api())
            .await
            .unwrap();
        assert!(!job_request.will_reduce);
    }

    #[tokio::test]
    async fn test_ordering_pass_partitions_first_and_last() {
        let rules = vec![
            Rule::Probe(ProbeRule::new("grouper").last()),
            Rule::Probe(ProbeRule::new("middle_a")),
            Rule::Probe(ProbeRule::new("enricher").first()),
            Rule::Probe(ProbeRule::new("middle_b")),
        ];
        let mut spec = InstrumentSpecification::with_rules("MARI", rules);
        let tc = TestContext::new();
        let mut job_request = sample_job_request("MARI", 100);
        spec.verify(&mut job_request, &tc.ctx(), &stub_api())
            .await
            .unwrap();
        assert_eq!(
            probe_names(&job_request),
            vec!["enricher", "middle_a", "middle_b", "grouper"]
        );
    }

    #[test]
    fn test_ordering_pass_is_idempotent() {
        let rules = vec![
            Rule::Probe(ProbeRule::new("grouper").last()),
            Rule::Probe(ProbeRule::new("middle")),
            Rule::Probe(ProbeRule::new("enricher").first()),
        ];
        let once = order_rules(rules);
        let twice = order_rules(once.clone());
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_rule_flagged_first_and_last_runs_last() {
        let rules = vec![
            Rule::Probe(ProbeRule::new("both").first().last()),
            Rule::Probe(ProbeRule::new("plain")),
        ];
        let mut spec = InstrumentSpecification::with_rules("MARI", rules);
        let tc = TestContext::new();
        let mut job_request = sample_job_request("MARI", 100);
        spec.verify(&mut job_request, &tc.ctx(), &stub_api())
            .await
            .unwrap();
        assert_eq!(probe_names(&job_request), vec!["plain", "both"]);
    }

    #[tokio::test]
    async fn test_violation_short_circuits_remaining_rules() {
        let unreached = ProbeRule::new("unreached");
        let rules = vec![
            Rule::Probe(ProbeRule::new("rejecting").violating()),
            Rule::Probe(unreached.clone()),
        ];
        let mut spec = InstrumentSpecification::with_rules("MARI", rules);
        let tc = TestContext::new();
        let mut job_request = sample_job_request("MARI", 100);
        spec.verify(&mut job_request, &tc.ctx(), &stub_api())
            .await
            .unwrap();
        assert!(!job_request.will_reduce);
        assert_eq!(unreached.call_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_specification_reload_failure_is_fatal() {
        // Never loaded, so verify must fetch, and the API is unreachable.
        let mut spec = InstrumentSpecification::new("MARI");
        let tc = TestContext::new();
        let mut job_request = sample_job_request("MARI", 100);
        let err = spec
            .verify(&mut job_request, &tc.ctx(), &stub_api())
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Specification(_)));
    }
}
