//! Logfabric - declarative log routing topology toolkit.

pub mod alarm;
pub mod assets;
pub mod config;
pub mod destination;
pub mod gateway;
pub mod init;
pub mod instance;
pub mod log_group;
pub mod metric_filter;
pub mod metrics;
pub mod naming;
pub mod network;
pub mod notify;
pub mod pattern;
pub mod pipeline;
pub mod policy;
pub mod second_account;
pub mod sink;
pub mod synth;
pub mod topology;
pub mod trail;
pub mod types;
pub mod workshop;
