//! `wireit`: upgrades manifest scripts into a dependency-aware,
//! content-addressed, parallel build graph with long-lived services and a
//! watch mode.
//!
//! The pieces, roughly in the order a build actually flows through them:
//! [`manifest`] reads manifest files, [`analyzer`] turns a root script
//! reference into a validated [`config::ScriptConfig`] graph,
//! [`fingerprint`] computes content hashes over that graph,
//! [`executor`] drives it to completion (consulting [`cache`] and
//! dispatching [`executor::service`] for long-lived scripts), and
//! [`watcher`] repeats the whole cycle on filesystem change.

pub mod analyzer;
pub mod cache;
pub mod config;
pub mod config_env;
pub mod error;
pub mod exec;
pub mod executor;
pub mod fingerprint;
pub mod manifest;
pub mod pool;
pub mod reference;
pub mod watcher;

pub use config::ScriptConfig;
pub use error::{Diagnostic, WireitResult};
pub use executor::{Executor, FailureMode};
pub use reference::ScriptReference;
