//! # rundet - Run Detection Service
//!
//! Sits between a file watcher and a job scheduler, both reached through
//! message queues. For each newly observed instrument data file the service
//! ingests a metadata record, evaluates the owning instrument's rule
//! specification and forwards zero or more job requests downstream.
//!
//! Module map:
//! - [`ingest`] - boundary to the data-file parser; builds [`rundet_common::JobRequest`]s
//! - [`rules`] - the closed rule set and its registry
//! - [`specifications`] - per-instrument, TTL-cached ordered rule lists
//! - [`journal`] - cycle journal fetching and companion-run resolution
//! - [`path_search`] - bounded concurrent archive search with cancellation
//! - [`broker`] - AMQP consumer/producer plumbing
//! - [`run_detection`] - the supervised orchestration loop
//! - [`health`] - liveness heartbeat

pub mod broker;
pub mod health;
pub mod ingest;
pub mod journal;
pub mod path_search;
pub mod rules;
pub mod run_detection;
pub mod specifications;
