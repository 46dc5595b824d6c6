//! Standard copy deployment engine: back up what is deployed, transform
//! configs, copy a release to every server and remote share in parallel
//! while stopping and restarting the services and app pools that use it,
//! clean up with a delete manifest, and promote the release to the next
//! environment.

pub mod cli;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod fsops;
pub mod journal;
pub mod lifecycle;
pub mod model;
pub mod object_store;
pub mod reporter;
pub mod resolve;
pub mod service;
pub mod storage;
pub mod transform;
pub mod validate;
pub mod workflow;
