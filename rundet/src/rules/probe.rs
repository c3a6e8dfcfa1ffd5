//! A scriptable rule for exercising specification ordering and
//! short-circuiting without touching instrument logic.

use super::RuleError;
use rundet_common::JobRequest;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Pass,
    Violate,
}

#[derive(Debug, Clone)]
pub struct ProbeRule {
    pub name: &'static str,
    pub first: bool,
    pub last: bool,
    pub outcome: ProbeOutcome,
    pub calls: Arc<AtomicUsize>,
}

impl PartialEq for ProbeRule {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl ProbeRule {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            first: false,
            last: false,
            outcome: ProbeOutcome::Pass,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn first(mut self) -> Self {
        self.first = true;
        self
    }

    pub fn last(mut self) -> Self {
        self.last = true;
        self
    }

    pub fn violating(mut self) -> Self {
        self.outcome = ProbeOutcome::Violate;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn verify(&self, job_request: &mut JobRequest) -> Result<(), RuleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Record the visit order in the enrichment bag so tests can assert
        // on the sequence rules actually ran in.
        let order = job_request
            .additional_values
            .entry("probe_order".to_string())
            .or_insert_with(|| Vec::<String>::new().into());
        if let rundet_common::Value::List(items) = order {
            items.push(self.name.into());
        }
        match self.outcome {
            ProbeOutcome::Pass => Ok(()),
            ProbeOutcome::Violate => {
                job_request.will_reduce = false;
                Err(RuleError::violation(format!("probe {} rejected", self.name)))
            }
        }
    }
}
