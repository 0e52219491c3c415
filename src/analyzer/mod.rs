//! The analyzer: resolves a root [`ScriptReference`] into a validated,
//! cycle-free build graph rooted at a [`ScriptConfig`], or a list of
//! [`Diagnostic`]s.
//!
//! Two passes:
//!
//! 1. [`raw`] — a parallel placeholder walk over a flat table keyed by
//!    `ScriptReference`, tolerant of cycles because no task ever awaits
//!    another task's result ("arenas + stable identifiers").
//! 2. [`cycles`] — a depth-first walk with a trail set that rejects cycles
//!    and sorts each node's dependencies, followed by a memoized bottom-up
//!    build of the final `Arc<ScriptConfig>` graph (safe exactly because the
//!    cycle check already proved the graph is a DAG).

mod raw;
mod validate;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Dependency, ScriptConfig};
use crate::error::{Diagnostic, DiagnosticKind, SourcePosition};
use crate::manifest::ManifestReader;
use crate::reference::ScriptReference;

pub use raw::RawScriptConfig;

pub struct Analyzer {
    manifests: Arc<ManifestReader>,
}

/// Outcome of a successful analysis: the root config plus every warning
/// collected along the way (a successful analysis may still carry
/// warnings).
pub struct AnalysisReport {
    pub root: Arc<ScriptConfig>,
    pub warnings: Vec<Diagnostic>,
    /// Every manifest file touched during analysis, for the watcher to
    /// subscribe to.
    pub manifest_files: Vec<std::path::PathBuf>,
}

impl Analyzer {
    pub fn new(manifests: Arc<ManifestReader>) -> Self {
        Analyzer { manifests }
    }

    pub fn analyze(
        &self,
        root: ScriptReference,
        extra_args: Vec<String>,
    ) -> Result<AnalysisReport, Vec<Diagnostic>> {
        let mut warnings = Vec::new();

        // Pass 1: parallel placeholder walk over the flat table.
        let table = raw::walk(&self.manifests, root.clone(), extra_args, &mut warnings);

        let mut errors = collect_errors(&table, &root);
        if !errors.is_empty() {
            errors.extend(warnings);
            return Err(errors);
        }

        // Pass 2a: DFS cycle check.
        if let Some(cycle_diag) = cycles::detect(&table, &root) {
            return Err(vec![cycle_diag]);
        }

        // Pass 2b: duplicate-dependency check (needs the raw table, not yet
        // the built graph, since it inspects each node's own dependency
        // list before dependencies are deduplicated into sorted order).
        let dup_errors = validate::duplicate_dependencies(&table);
        if !dup_errors.is_empty() {
            return Err(dup_errors);
        }

        // Pass 2c: memoized bottom-up build of the final, sorted, Arc-shared
        // graph. Safe because pass 2a already proved there are no cycles.
        let mut built: HashMap<ScriptReference, Arc<ScriptConfig>> = HashMap::new();
        let root_config = build(&root, &table, &mut built);

        let manifest_files = table
            .values()
            .filter_map(|r| r.as_ref().ok())
            .map(|c| c.declaring_file.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(AnalysisReport {
            root: root_config,
            warnings,
            manifest_files,
        })
    }
}

/// Turns the raw table's per-reference failures into user-facing
/// diagnostics. The root's own failure (if any) is reported as-is; every
/// other failure is reported once per dependent that named it, wrapped as
/// `DependencyOnMissingPackageJson`/`DependencyOnMissingScript` so the
/// message points at the dependency declaration rather than the target
/// manifest the user may never have opened.
fn collect_errors(
    table: &HashMap<ScriptReference, Result<RawScriptConfig, Diagnostic>>,
    root: &ScriptReference,
) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    if let Some(Err(root_diag)) = table.get(root) {
        out.push(root_diag.clone());
    }
    for raw in table.values().filter_map(|r| r.as_ref().ok()) {
        for dep in &raw.dependencies {
            if let Some(Err(dep_diag)) = table.get(&dep.reference) {
                let kind = match dep_diag.kind {
                    DiagnosticKind::MissingPackageJson
                    | DiagnosticKind::InvalidJsonSyntax
                    | DiagnosticKind::NoScriptsInPackageJson => {
                        DiagnosticKind::DependencyOnMissingPackageJson
                    }
                    _ => DiagnosticKind::DependencyOnMissingScript,
                };
                out.push(
                    Diagnostic::error(
                        kind,
                        format!(
                            "\"{}\" depends on \"{}\", which failed: {}",
                            raw.reference, dep.reference, dep_diag.message
                        ),
                    )
                    .at(dep.position.clone())
                    .with_related(
                        "failure detail",
                        dep_diag.location.clone().unwrap_or_else(synthetic_position),
                    ),
                );
            }
        }
    }
    out
}

/// Recursively (but memoized, so each node is built exactly once) converts
/// the flat `raw` table into the final `Arc<ScriptConfig>` graph, sorting
/// each node's dependencies by `(packageDir, name)` as it goes.
fn build(
    reference: &ScriptReference,
    table: &HashMap<ScriptReference, Result<RawScriptConfig, Diagnostic>>,
    built: &mut HashMap<ScriptReference, Arc<ScriptConfig>>,
) -> Arc<ScriptConfig> {
    if let Some(existing) = built.get(reference) {
        return Arc::clone(existing);
    }
    let raw = table
        .get(reference)
        .and_then(|r| r.as_ref().ok())
        .expect("build() called on a reference that failed validation");

    let mut dependencies: Vec<Dependency> = raw
        .dependencies
        .iter()
        .map(|d| Dependency {
            config: build(&d.reference, table, built),
            position: d.position.clone(),
            cascade: d.cascade,
        })
        .collect();
    dependencies.sort_by(|a, b| a.reference().sort_key().cmp(&b.reference().sort_key()));

    let config = Arc::new(ScriptConfig {
        reference: raw.reference.clone(),
        kind: raw.kind.clone(),
        command: raw.command.clone(),
        dependencies,
        declaring_file: raw.declaring_file.clone(),
        files: raw.files.clone(),
        output: raw.output.clone(),
        clean: raw.clean,
        env: raw.env.clone(),
        extra_args: raw.extra_args.clone(),
        position: raw.position.clone(),
    });
    built.insert(reference.clone(), Arc::clone(&config));
    config
}

mod cycles {
    use super::*;

    /// DFS from `root` with a trail set; returns the first cycle found, as a
    /// single `Diagnostic` listing every hop in source order (e.g. `a, b, a`
    /// for a two-node cycle).
    pub fn detect(
        table: &HashMap<ScriptReference, Result<RawScriptConfig, Diagnostic>>,
        root: &ScriptReference,
    ) -> Option<Diagnostic> {
        let mut trail: Vec<ScriptReference> = Vec::new();
        walk(table, root, &mut trail)
    }

    fn walk(
        table: &HashMap<ScriptReference, Result<RawScriptConfig, Diagnostic>>,
        current: &ScriptReference,
        trail: &mut Vec<ScriptReference>,
    ) -> Option<Diagnostic> {
        if let Some(pos) = trail.iter().position(|r| r == current) {
            let mut hops: Vec<ScriptReference> = trail[pos..].to_vec();
            hops.push(current.clone());
            let message = hops
                .iter()
                .map(|r| r.to_canonical_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            let mut diag = Diagnostic::error(
                DiagnosticKind::Cycle,
                format!("dependency cycle detected: {message}"),
            );
            let raw = table.get(current).and_then(|r| r.as_ref().ok());
            if let Some(raw) = raw {
                diag = diag.at(raw.position.clone());
                for hop in &hops {
                    if let Some(Ok(raw_hop)) = table.get(hop) {
                        diag = diag.with_related(hop.to_canonical_string(), raw_hop.position.clone());
                    }
                }
            }
            return Some(diag);
        }

        trail.push(current.clone());
        let raw = match table.get(current).and_then(|r| r.as_ref().ok()) {
            Some(raw) => raw,
            None => {
                trail.pop();
                return None;
            }
        };
        for dep in &raw.dependencies {
            if let Some(diag) = walk(table, &dep.reference, trail) {
                return Some(diag);
            }
        }
        trail.pop();
        None
    }
}

/// A helper used by callers (e.g. the CLI harness or tests) to build the
/// `SourcePosition` a diagnostic should anchor to when no finer-grained
/// location is available yet (e.g. the root script reference, passed in
/// from outside any manifest).
pub fn synthetic_position() -> SourcePosition {
    SourcePosition {
        file: std::path::PathBuf::from("<root>"),
        line: 0,
        column: 0,
    }
}
