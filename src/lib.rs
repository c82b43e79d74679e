//! Drives load experiments against a load manager fronting a pool of backend nodes.
//!
//! A sweep varies one parameter (node count, queue algorithm, selector or strategy) while the
//! others stay fixed. For every variant the datastore is reset, the services are started with
//! matching command lines, a fixed number of requests is sent and the latencies are reduced into
//! throughput and percentiles.

pub mod arguments;
pub mod clap_args;
pub mod config;
pub mod datastore;
pub mod errors;
pub mod experiment_runner;
pub mod load_generator;
pub mod process_control;
pub mod report;
pub mod stats;
pub mod variant;
