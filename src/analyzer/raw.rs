//! Pass 1 of the analyzer: the parallel placeholder walk.
//!
//! A flat table, keyed by [`ScriptReference`], is the "arena" Design Notes
//! §9 calls for: every dependency is stored as a reference into the table,
//! never as a nested `ScriptConfig`, so cyclic manifests can be walked
//! without ever constructing a cyclic object graph. Claiming a reference
//! (inserting it into `claimed`) and enqueuing its upgrade task are the same
//! atomic step, so a script mentioned by two different dependents is only
//! ever read and validated once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use serde_json::Value;

use crate::config::{Cascade, CleanPolicy, GlobPattern, ScriptKind};
use crate::error::{Diagnostic, DiagnosticKind, SourcePosition};
use crate::manifest::{ManifestReader, WIREIT_RUNNER_COMMAND};
use crate::reference::ScriptReference;

use super::validate;

/// The not-yet-finalized, not-yet-sorted counterpart to [`crate::config::ScriptConfig`].
/// Dependencies are plain references rather than `Arc<ScriptConfig>` so the
/// table can represent cycles during pass 1.
#[derive(Clone, Debug)]
pub struct RawScriptConfig {
    pub reference: ScriptReference,
    pub kind: ScriptKind,
    pub command: Option<String>,
    pub dependencies: Vec<RawDependency>,
    pub declaring_file: PathBuf,
    pub files: Option<Vec<GlobPattern>>,
    pub output: Option<Vec<GlobPattern>>,
    pub clean: CleanPolicy,
    pub env: std::collections::BTreeMap<String, String>,
    pub extra_args: Vec<String>,
    pub position: SourcePosition,
}

#[derive(Clone, Debug)]
pub struct RawDependency {
    pub reference: ScriptReference,
    pub position: SourcePosition,
    pub cascade: Cascade,
}

struct Task {
    reference: ScriptReference,
    extra_args: Vec<String>,
}

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    cv: Condvar,
    pending: AtomicUsize,
    claimed: Mutex<HashSet<ScriptReference>>,
    results: Mutex<HashMap<ScriptReference, Result<RawScriptConfig, Diagnostic>>>,
    warnings: Mutex<Vec<Diagnostic>>,
    manifests: std::sync::Arc<ManifestReader>,
}

/// Drains the task queue to completion, returning the flat table of results.
/// Collected warnings (non-fatal diagnostics) are appended to `warnings_out`.
pub(super) fn walk(
    manifests: &std::sync::Arc<ManifestReader>,
    root: ScriptReference,
    root_extra_args: Vec<String>,
    warnings_out: &mut Vec<Diagnostic>,
) -> HashMap<ScriptReference, Result<RawScriptConfig, Diagnostic>> {
    let shared = Shared {
        queue: Mutex::new(VecDeque::new()),
        cv: Condvar::new(),
        pending: AtomicUsize::new(1),
        claimed: Mutex::new(HashSet::from([root.clone()])),
        results: Mutex::new(HashMap::new()),
        warnings: Mutex::new(Vec::new()),
        manifests: std::sync::Arc::clone(manifests),
    };
    shared.queue.lock().unwrap().push_back(Task {
        reference: root,
        extra_args: root_extra_args,
    });

    let worker_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(8);

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            scope.spawn(|| worker_loop(&shared));
        }
    });

    warnings_out.extend(shared.warnings.into_inner().unwrap());
    shared.results.into_inner().unwrap()
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(task) = queue.pop_front() {
                    break Some(task);
                }
                if shared.pending.load(Ordering::SeqCst) == 0 {
                    break None;
                }
                queue = shared.cv.wait(queue).unwrap();
            }
        };
        let Some(task) = task else { return };

        let (result, new_refs, warnings) = upgrade(&shared.manifests, &task);
        shared.warnings.lock().unwrap().extend(warnings);
        shared
            .results
            .lock()
            .unwrap()
            .insert(task.reference.clone(), result);

        {
            let mut claimed = shared.claimed.lock().unwrap();
            let mut queue = shared.queue.lock().unwrap();
            for new_ref in new_refs {
                if claimed.insert(new_ref.clone()) {
                    shared.pending.fetch_add(1, Ordering::SeqCst);
                    queue.push_back(Task {
                        reference: new_ref,
                        extra_args: Vec::new(),
                    });
                }
            }
        }
        shared.pending.fetch_sub(1, Ordering::SeqCst);
        shared.cv.notify_all();
    }
}

/// Reads the manifest for one script reference, validates its `wireit`
/// config (if any), and returns the new dependency references discovered so
/// the caller can enqueue their own upgrade tasks.
fn upgrade(
    manifests: &ManifestReader,
    task: &Task,
) -> (
    Result<RawScriptConfig, Diagnostic>,
    Vec<ScriptReference>,
    Vec<Diagnostic>,
) {
    let mut warnings = Vec::new();
    let manifest_result = manifests.read(task.reference.package_dir());
    let manifest = match manifest_result.as_ref() {
        Ok(m) => m,
        Err(diag) => return (Err(diag.clone()), Vec::new(), warnings),
    };

    let name = task.reference.script_name();
    let script_command = manifest.script_command(name);
    let wireit_value = manifest.wireit_config(name);

    if wireit_value.is_some() && script_command.is_none() {
        return (
            Err(Diagnostic::error(
                DiagnosticKind::WireitConfigButNoScript,
                format!("\"{name}\" has a wireit config but no script entry"),
            )
            .at(manifest.position())),
            Vec::new(),
            warnings,
        );
    }

    let Some(script_command) = script_command else {
        return (
            Err(Diagnostic::error(
                DiagnosticKind::ScriptNotFound,
                format!("script \"{name}\" not found in {}", manifest.path.display()),
            )
            .at(manifest.position())),
            Vec::new(),
            warnings,
        );
    };

    let Some(wireit_value) = wireit_value else {
        return (
            Err(Diagnostic::error(
                DiagnosticKind::ScriptNotWireit,
                format!("script \"{name}\" does not run through wireit"),
            )
            .at(manifest.position())),
            Vec::new(),
            warnings,
        );
    };

    if script_command != WIREIT_RUNNER_COMMAND {
        warnings.push(
            Diagnostic::warning(
                DiagnosticKind::ScriptNotWireit,
                format!(
                    "script \"{name}\" has a wireit config, but its command is `{script_command}` \
                     instead of `{WIREIT_RUNNER_COMMAND}`"
                ),
            )
            .at(manifest.position()),
        );
    }

    match validate::parse_wireit_config(manifest, name, wireit_value) {
        Ok(parsed) => {
            let new_refs = parsed
                .dependencies
                .iter()
                .map(|d| d.reference.clone())
                .collect();
            (Ok(parsed), new_refs, warnings)
        }
        Err(diag) => (Err(diag), Vec::new(), warnings),
    }
}
