//! The detection loop
//!
//! One message names one data file. The loop ingests it, verifies it against
//! the owning instrument's specification, publishes every approved request,
//! and only then settles the ingress message. A supervisory loop restarts
//! the whole cycle after a fixed backoff when anything escapes.

use crate::broker::{self, QueueConsumer};
use crate::ingest::Ingestor;
use crate::journal::JournalClient;
use crate::path_search::RunFileFinder;
use crate::rules::RuleContext;
use crate::specifications::{InstrumentSpecification, SpecificationApi, VerifyError};
use rundet_common::{Config, JobRequest};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

const RESTART_BACKOFF: Duration = Duration::from_secs(30);
const CONSUME_TIMEOUT: Duration = Duration::from_secs(30);

/// How a failed message must be settled.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The message can never succeed (unreadable data, broken
    /// configuration). Acknowledge it so it is not redelivered forever;
    /// dead-letter a copy when a dead-letter queue is configured.
    #[error("{0}")]
    Fatal(String),

    /// A transient failure; requeue for redelivery.
    #[error("{0}")]
    Retry(String),
}

/// Everything one detection loop owns. Each loop instance carries its own
/// specification cache; nothing here is shared across loops.
pub struct Dependencies {
    pub ingestor: Box<dyn Ingestor>,
    pub journal: JournalClient,
    pub finder: RunFileFinder,
    pub api: SpecificationApi,
    pub imat_root: PathBuf,
    specifications: HashMap<String, InstrumentSpecification>,
}

impl Dependencies {
    #[cfg(test)]
    pub fn preload_specification(&mut self, instrument: &str, spec: InstrumentSpecification) {
        self.specifications.insert(instrument.to_string(), spec);
    }

    pub fn new(config: &Config, ingestor: Box<dyn Ingestor>) -> Self {
        Self {
            ingestor,
            journal: JournalClient::new(config.journal_base_url.clone()),
            finder: RunFileFinder::new(config.enginx_data_root.clone(), config.search_workers),
            api: SpecificationApi::new(config.spec_api_url.clone(), config.spec_api_key.clone()),
            imat_root: config.imat_root.clone(),
            specifications: HashMap::new(),
        }
    }
}

fn serialize(job_request: &JobRequest) -> Result<String, ProcessError> {
    job_request
        .to_json_string()
        .map_err(|e| ProcessError::Fatal(format!("Could not serialize job request: {e}")))
}

/// Evaluate one ingress message (a filesystem path) and return the message
/// bodies to publish: the request itself and any derived grouped requests,
/// each only when approved.
pub async fn process_message(
    deps: &mut Dependencies,
    message: &str,
) -> Result<Vec<String>, ProcessError> {
    let path = Path::new(message.trim());
    info!("Processing {}", path.display());

    let mut job_request = deps
        .ingestor
        .ingest(path)
        .map_err(|e| ProcessError::Fatal(format!("Ingestion failed: {e}")))?;

    let instrument = job_request.instrument.to_uppercase();
    let specification = deps
        .specifications
        .entry(instrument.clone())
        .or_insert_with(|| InstrumentSpecification::new(instrument));
    let ctx = RuleContext {
        ingestor: deps.ingestor.as_ref(),
        journal: &deps.journal,
        finder: &deps.finder,
        imat_root: &deps.imat_root,
    };
    specification
        .verify(&mut job_request, &ctx, &deps.api)
        .await
        .map_err(|e| match e {
            VerifyError::Specification(e) => {
                ProcessError::Fatal(format!("Specification could not be built: {e}"))
            }
            VerifyError::Rule(e) => ProcessError::Retry(format!("Rule evaluation failed: {e}")),
        })?;

    let mut bodies = Vec::new();
    if job_request.will_reduce {
        bodies.push(serialize(&job_request)?);
    }
    for additional in &job_request.additional_requests {
        if additional.will_reduce {
            bodies.push(serialize(additional)?);
        }
    }
    if bodies.is_empty() {
        info!(
            "Run {} of {} will not be reduced",
            job_request.run_number, job_request.instrument
        );
    }
    Ok(bodies)
}

async fn detection_loop(config: &Config, deps: &mut Dependencies) -> anyhow::Result<()> {
    let uri = config.amqp_uri();
    let mut consumer = QueueConsumer::connect_with_retry(&uri, &config.ingress_queue).await;
    loop {
        let Some(delivery) = consumer.next(CONSUME_TIMEOUT).await? else {
            continue;
        };
        let message = String::from_utf8_lossy(&delivery.data).to_string();
        match process_message(deps, &message).await {
            Ok(bodies) => {
                broker::publish_all(&uri, &config.egress_queue, &bodies).await?;
                broker::ack(&delivery).await?;
            }
            Err(ProcessError::Fatal(reason)) => {
                error!("Skipping {message}: {reason}");
                if let Some(dead_letter_queue) = &config.dead_letter_queue {
                    // Best effort: losing the dead-letter copy must not stop
                    // the message from being settled.
                    let body = format!("{message}: {reason}");
                    if let Err(e) = broker::publish_all(&uri, dead_letter_queue, &[body]).await {
                        warn!("Could not dead-letter {message}: {e}");
                    }
                }
                broker::ack(&delivery).await?;
            }
            Err(ProcessError::Retry(reason)) => {
                warn!("Requeueing {message}: {reason}");
                broker::nack_requeue(&delivery).await?;
            }
        }
    }
}

/// Run detection forever. Any error escaping the inner loop is logged and
/// the loop restarts after a fixed backoff; the broker's redelivery of
/// unacknowledged messages is the recovery mechanism.
pub async fn run(config: Config, ingestor: Box<dyn Ingestor>) {
    let mut deps = Dependencies::new(&config, ingestor);
    loop {
        if let Err(e) = detection_loop(&config, &mut deps).await {
            error!(
                "Detection loop failed: {e:#}; restarting in {}s",
                RESTART_BACKOFF.as_secs()
            );
        }
        tokio::time::sleep(RESTART_BACKOFF).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::test_support::{sample_job_request, StubIngestor};

    fn deps_with(ingestor: StubIngestor, config: &Config) -> Dependencies {
        Dependencies::new(config, Box::new(ingestor))
    }

    fn test_config() -> Config {
        use clap::Parser;
        Config::parse_from(["rundet"])
    }

    #[tokio::test]
    async fn test_unreadable_file_is_fatal() {
        let config = test_config();
        let mut deps = deps_with(StubIngestor::default(), &config);
        let err = process_message(&mut deps, "/archive/missing.nxs")
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_unreachable_specification_source_is_fatal() {
        let config = test_config();
        let job_request = sample_job_request("MARI", 100);
        let path = job_request.filepath.display().to_string();
        let mut deps = deps_with(StubIngestor::default().with_request(job_request), &config);
        let err = process_message(&mut deps, &path).await.unwrap_err();
        assert!(matches!(err, ProcessError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_approved_request_and_grouped_copy_are_published() {
        use crate::rules::{common::EnabledRule, mari::MariStitchRule, Rule};

        let config = test_config();
        let job_request = sample_job_request("MARI", 25581);
        let path = job_request.filepath.display().to_string();
        let parent = job_request.filepath.parent().unwrap().to_path_buf();
        let ingestor = StubIngestor::default()
            .with_request(job_request)
            .with_title(parent.join("MAR25580.nxs"), "Test experiment");
        let mut deps = deps_with(ingestor, &config);
        deps.preload_specification(
            "MARI",
            InstrumentSpecification::with_rules(
                "MARI",
                vec![
                    Rule::Enabled(EnabledRule::new(true)),
                    Rule::MariStitch(MariStitchRule::new(true)),
                ],
            ),
        );

        let bodies = process_message(&mut deps, &path).await.unwrap();
        assert_eq!(bodies.len(), 2);
        for body in &bodies {
            assert!(!body.contains("will_reduce"));
            assert!(!body.contains("additional_requests"));
        }
        assert!(bodies[1].contains("sum_runs"));
    }

    #[tokio::test]
    async fn test_disabled_instrument_yields_no_bodies() {
        use crate::rules::{common::EnabledRule, Rule};

        let config = test_config();
        let job_request = sample_job_request("MARI", 25581);
        let path = job_request.filepath.display().to_string();
        let mut deps = deps_with(StubIngestor::default().with_request(job_request), &config);
        deps.preload_specification(
            "MARI",
            InstrumentSpecification::with_rules(
                "MARI",
                vec![Rule::Enabled(EnabledRule::new(false))],
            ),
        );

        let bodies = process_message(&mut deps, &path).await.unwrap();
        assert!(bodies.is_empty());
    }
}
