//! The validated, in-memory data model produced by the analyzer: the
//! [`ScriptConfig`] tagged variant and its [`Dependency`] edges.
//!
//! Generalizes `core::Dependency` (name + version requirement) into
//! (reference + cascade flag), and borrows `core::compiler::UnitGraph`'s
//! split between "the node" (`ScriptConfig`) and "the edge" (`Dependency`)
//! rather than folding edge metadata into the node itself.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::SourcePosition;
use crate::reference::ScriptReference;

/// Whether a dependency's fingerprint propagates into its dependent's
/// fingerprint. `cascade = false` models a "run after, but output
/// independent" edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cascade(pub bool);

/// One edge in the dependency graph.
#[derive(Clone, Debug)]
pub struct Dependency {
    pub config: Arc<ScriptConfig>,
    pub position: SourcePosition,
    pub cascade: Cascade,
}

impl Dependency {
    pub fn reference(&self) -> &ScriptReference {
        &self.config.reference
    }
}

/// The `clean` policy controlling output deletion before a script runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanPolicy {
    #[default]
    Always,
    Never,
    IfFileDeleted,
}

/// A glob pattern with its polarity (`!pattern` excludes). Order is
/// significant: later patterns can re-include files excluded by an earlier
/// negated pattern, the way `.gitignore`-style matchers (and the `ignore`
/// crate wireit delegates glob matching to) interpret them.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct GlobPattern {
    pub pattern: String,
    pub exclude: bool,
}

impl GlobPattern {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('!') {
            Some(rest) => GlobPattern {
                pattern: rest.to_string(),
                exclude: true,
            },
            None => GlobPattern {
                pattern: raw.to_string(),
                exclude: false,
            },
        }
    }
}

/// Readiness detection for a service script: it is considered started once a
/// line of stdout matches this pattern, rather than on process exit (it is
/// not expected to exit).
#[derive(Clone, Debug)]
pub struct ReadyWhen {
    pub line_matches: regex::Regex,
}

impl PartialEq for ReadyWhen {
    fn eq(&self, other: &Self) -> bool {
        self.line_matches.as_str() == other.line_matches.as_str()
    }
}
impl Eq for ReadyWhen {}

/// The per-kind data that only one of the three variants carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptKind {
    /// A grouping node: no command of its own, exists to aggregate
    /// dependencies (e.g. an `npm run all` that depends on `build` and
    /// `test`).
    NoCommand,
    /// Runs to completion; eligible for freshness/caching when fully tracked.
    OneShot,
    /// Long-lived; managed by the service lifecycle state machine instead of
    /// run-to-completion semantics.
    Service { ready_when: Option<ReadyWhen> },
}

/// A fully validated, immutable script configuration. Created during
/// analysis and never mutated afterwards; shared via `Arc` so every
/// reference to the same script
/// points at the same object, which is itself an invariant ("at most one
/// config object per (packageDir, name)").
#[derive(Clone, Debug)]
pub struct ScriptConfig {
    pub reference: ScriptReference,
    pub kind: ScriptKind,
    pub command: Option<String>,
    /// Sorted by `(packageDir, name)` once analysis completes.
    pub dependencies: Vec<Dependency>,
    pub declaring_file: PathBuf,
    /// `None` means "unknown inputs": disables freshness/caching for this
    /// script and all transitive dependents.
    pub files: Option<Vec<GlobPattern>>,
    pub output: Option<Vec<GlobPattern>>,
    pub clean: CleanPolicy,
    pub env: BTreeMap<String, String>,
    pub extra_args: Vec<String>,
    pub position: SourcePosition,
}

impl ScriptConfig {
    pub fn is_service(&self) -> bool {
        matches!(self.kind, ScriptKind::Service { .. })
    }

    pub fn has_command(&self) -> bool {
        self.command.is_some()
    }

    /// Only cascading dependencies participate in fingerprinting, sorted by
    /// reference so the computed fingerprint is order-insensitive.
    pub fn cascading_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        let mut deps: Vec<&Dependency> = self
            .dependencies
            .iter()
            .filter(|d| d.cascade.0)
            .collect();
        deps.sort_by_key(|d| d.reference().sort_key());
        deps.into_iter()
    }
}
