//! `RunConfig`: the environment-variable surface
//! (`WIREIT_PARALLEL`, `WIREIT_CACHE`, the credential custodian endpoint).
//!
//! Mirrors `util::config::mod.rs`'s pattern of env-var overlays on top of a
//! file-backed value, scaled down to env-vars-only: wireit has no
//! configuration file of its own, so there is nothing underneath the
//! environment to overlay onto.

use std::path::PathBuf;

use url::Url;

use crate::cache::Cache;

/// `WIREIT_PARALLEL`'s value: a specific cap, or `infinity` for "don't
/// bound the worker pool at all" (still subject to the OS's own process
/// limits, of course).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parallelism {
    Limited(usize),
    Infinity,
}

impl Parallelism {
    /// Resolves to a concrete worker-pool size; `Infinity` is represented as
    /// a very large but finite cap so the same `Semaphore` machinery works
    /// for both cases (the pool is, in practice, always bounded by
    /// something).
    pub fn as_limit(self) -> usize {
        match self {
            Parallelism::Limited(n) => n.max(1),
            Parallelism::Infinity => usize::MAX / 2,
        }
    }
}

/// The full set of run-time knobs read from the environment, resolved once
/// at startup.
pub struct RunConfig {
    pub parallelism: Parallelism,
    pub cache: Cache,
    /// `None` unless a remote cache backend's credential custodian endpoint
    /// was configured; parsed here for validation even though only the
    /// `local`/`none` backends are implemented in this crate (a remote HTTP
    /// backend is an external collaborator outside this build's scope).
    pub credential_endpoint: Option<Url>,
}

impl RunConfig {
    pub fn from_env(cache_dir: PathBuf) -> Self {
        RunConfig {
            parallelism: parse_parallelism(),
            cache: Cache::new(crate::cache::backend_from_env(cache_dir)),
            credential_endpoint: parse_credential_endpoint(),
        }
    }
}

fn default_parallelism() -> Parallelism {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    Parallelism::Limited(cpus.saturating_mul(4))
}

fn parse_parallelism() -> Parallelism {
    match std::env::var("WIREIT_PARALLEL") {
        Ok(raw) if raw.eq_ignore_ascii_case("infinity") => Parallelism::Infinity,
        Ok(raw) => match raw.parse::<usize>() {
            Ok(n) if n > 0 => Parallelism::Limited(n),
            _ => {
                log::warn!(
                    "WIREIT_PARALLEL=\"{raw}\" is not a positive integer or \"infinity\"; \
                     falling back to the default"
                );
                default_parallelism()
            }
        },
        Err(_) => default_parallelism(),
    }
}

/// The environment variable that, if set, names *another* environment
/// variable holding the URL the credential custodian endpoint lives at.
const CREDENTIAL_ENDPOINT_VAR: &str = "WIREIT_CACHE_CREDENTIAL_ENDPOINT_VAR";

fn parse_credential_endpoint() -> Option<Url> {
    let var_name = std::env::var(CREDENTIAL_ENDPOINT_VAR).ok()?;
    let raw = std::env::var(&var_name).ok()?;
    match Url::parse(&raw) {
        Ok(url) => Some(url),
        Err(e) => {
            log::warn!("{var_name}=\"{raw}\" is not a valid URL: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_limit_never_reports_zero() {
        assert_eq!(Parallelism::Limited(0).as_limit(), 1);
    }

    #[test]
    fn infinity_is_effectively_unbounded() {
        assert!(Parallelism::Infinity.as_limit() > 1_000_000);
    }
}
