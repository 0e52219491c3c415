//! Error and diagnostic types shared across the crate.
//!
//! Plumbing code returns [`WireitResult`], in the vein of `cargo`'s
//! `CargoResult` wrapping `anyhow`. User-facing problems that need a
//! source position and a severity are [`Diagnostic`]s instead, accumulated by
//! the analyzer rather than short-circuiting on the first one.

use std::fmt;
use std::path::PathBuf;

/// Plumbing-level result type, analogous to `cargo`'s `CargoResult<T>` alias.
pub type WireitResult<T> = anyhow::Result<T>;

/// A position in a manifest file, used to anchor diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourcePosition {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        f.write_str(s)
    }
}

/// The full set of diagnostic kinds this build engine can report. Kept as a
/// single enum (rather than one error type per module) so the analyzer and executor
/// can accumulate a homogeneous `Vec<Diagnostic>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DiagnosticKind {
    #[error("launched incorrectly")]
    LaunchedIncorrectly,
    #[error("missing manifest file")]
    MissingPackageJson,
    #[error("invalid JSON syntax")]
    InvalidJsonSyntax,
    #[error("no scripts in manifest")]
    NoScriptsInPackageJson,
    #[error("script not found")]
    ScriptNotFound,
    #[error("wireit config but no script")]
    WireitConfigButNoScript,
    #[error("script not wireit")]
    ScriptNotWireit,
    #[error("invalid wireit config syntax")]
    InvalidConfigSyntax,
    #[error("duplicate dependency")]
    DuplicateDependency,
    #[error("dependency cycle")]
    Cycle,
    #[error("dependency on missing manifest")]
    DependencyOnMissingPackageJson,
    #[error("dependency on missing script")]
    DependencyOnMissingScript,
    #[error("invalid usage")]
    InvalidUsage,
    #[error("command exited non-zero")]
    ExitNonZero,
    #[error("command terminated by signal")]
    Signal,
    #[error("failed to spawn command")]
    SpawnError,
    #[error("start cancelled")]
    StartCancelled,
    #[error("killed")]
    Killed,
    #[error("unknown error thrown")]
    UnknownErrorThrown,
    #[error("dependency invalid")]
    DependencyInvalid,
    #[error("service exited unexpectedly")]
    ServiceExitedUnexpectedly,
    #[error("dependency service exited unexpectedly")]
    DependencyServiceExitedUnexpectedly,
    #[error("aborted")]
    Aborted,
}

/// A single accumulated diagnostic, with optional related locations (e.g. both
/// sides of a duplicate-dependency conflict, or every hop of a cycle).
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
    pub location: Option<SourcePosition>,
    pub related: Vec<(String, SourcePosition)>,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            severity: Severity::Error,
            message: message.into(),
            location: None,
            related: Vec::new(),
        }
    }

    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            severity: Severity::Warning,
            message: message.into(),
            location: None,
            related: Vec::new(),
        }
    }

    pub fn at(mut self, location: SourcePosition) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_related(mut self, label: impl Into<String>, location: SourcePosition) -> Self {
        self.related.push((label.into(), location));
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if let Some(loc) = &self.location {
            write!(f, "\n  --> {}", loc)?;
        }
        for (label, loc) in &self.related {
            write!(f, "\n  {} at {}", label, loc)?;
        }
        Ok(())
    }
}

/// Raised when an internal invariant is violated (e.g. an unknown service
/// state transition, or two fingerprints that differ with no detected
/// difference). Always a bug; never expected to be handled by a caller.
/// Mirrors `cargo`'s own `internal()` helper, which marks an error as "this
/// should never happen" rather than a normal, user-facing failure.
pub fn internal(message: impl fmt::Display) -> anyhow::Error {
    anyhow::anyhow!("internal error (this is a bug): {}", message)
}
