//! The watcher: re-analyzes and re-executes a script graph whenever a
//! manifest or a declared input file changes.
//!
//! Debounce state machine:
//!
//! ```text
//! initial -> running -> watching
//! watching -> debouncing -> running        (a change arrived; debounce window passed)
//! running  -> queued    -> running         (a change arrived while already running)
//! any state -> aborted                     (external stop request)
//! ```
//!
//! Grounded on `other_examples/b6e67c4a_..._deployment_watcher.rs.rs`'s
//! channel-fed `notify` watcher. That example is
//! async (`tokio`, a `futures::mpsc::Sender` fed from the `notify` event
//! callback); this crate has no async runtime anywhere else in it, so the
//! same shape is expressed with `std::sync::mpsc` and
//! `notify-debouncer-mini`'s debounced event stream instead of raw
//! `notify` events, which folds a burst of saves from one editor
//! keystroke into a single re-run rather than one per file.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;

use crate::analyzer::Analyzer;
use crate::config::ScriptConfig;
use crate::config_env::RunConfig;
use crate::error::Diagnostic;
use crate::exec::looks_like_package_dir;
use crate::executor::{Executor, FailureMode, ServiceHandle};
use crate::fingerprint::Fingerprint;
use crate::manifest::{ManifestReader, MANIFEST_FILE_NAME};
use crate::reference::ScriptReference;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchState {
    Initial,
    Running,
    Watching,
    Debouncing,
    Queued,
    Aborted,
}

/// One iteration's result, handed to the caller's callback (the CLI
/// harness prints it; tests can just inspect it).
pub struct Iteration {
    pub result: Result<Fingerprint, Vec<Diagnostic>>,
}

pub struct Watcher {
    root: ScriptReference,
    extra_args: Vec<String>,
    manifests: Arc<ManifestReader>,
    state_root: PathBuf,
    failure_mode: FailureMode,
    debounce: Duration,
    state: Mutex<WatchState>,
    abort: Arc<AtomicBool>,
}

impl Watcher {
    pub fn new(root: ScriptReference, extra_args: Vec<String>, state_root: PathBuf) -> Self {
        Watcher {
            root,
            extra_args,
            manifests: Arc::new(ManifestReader::new()),
            state_root,
            failure_mode: FailureMode::default(),
            debounce: Duration::from_millis(200),
            state: Mutex::new(WatchState::Initial),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn state(&self) -> WatchState {
        *self.state.lock().unwrap()
    }

    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: WatchState) {
        *self.state.lock().unwrap() = state;
    }

    /// Runs analyze-execute-watch iterations until aborted, calling
    /// `on_iteration` after each execution. Services left running at the
    /// end of the final iteration are stopped before returning.
    pub fn run(&self, mut on_iteration: impl FnMut(&Iteration)) {
        let (tx, rx) = mpsc::channel();
        let mut debouncer = match new_debouncer(self.debounce, tx) {
            Ok(d) => d,
            Err(e) => {
                log::error!("failed to create filesystem watcher: {e}");
                return;
            }
        };
        let mut watched_dirs: HashSet<PathBuf> = HashSet::new();
        let mut previous_services: HashMap<ScriptReference, Arc<ServiceHandle>> = HashMap::new();

        self.set_state(WatchState::Running);
        loop {
            if self.is_aborted() {
                break;
            }

            // Events that arrived while the previous iteration was still
            // running sit buffered in the channel; draining them here
            // models the `running -> queued -> running` transition: the
            // change is noticed, but doesn't interrupt work already under
            // way, and simply starts the next iteration immediately
            // instead of waiting at `watching` again.
            let mut queued = false;
            while rx.try_recv().is_ok() {
                queued = true;
            }
            if queued {
                self.set_state(WatchState::Queued);
                self.manifests.invalidate_all();
                self.set_state(WatchState::Running);
            }

            let analyzer = Analyzer::new(Arc::clone(&self.manifests));
            let analysis = analyzer.analyze(self.root.clone(), self.extra_args.clone());

            let watch_targets = match &analysis {
                Ok(report) => {
                    let mut targets: BTreeSet<PathBuf> = report.manifest_files.iter().cloned().collect();
                    collect_package_dirs(&report.root, &mut HashSet::new(), &mut targets);
                    targets
                }
                Err(_) => {
                    // Analysis failed before a graph was built; at minimum
                    // watch the root's own manifest so fixing the syntax
                    // error triggers a retry.
                    let mut targets = BTreeSet::new();
                    targets.insert(self.root.package_dir().join(MANIFEST_FILE_NAME));
                    targets
                }
            };
            for dir in &watch_targets {
                let watch_root = if dir.is_dir() { dir.clone() } else {
                    dir.parent().map(PathBuf::from).unwrap_or_else(|| dir.clone())
                };
                if watched_dirs.insert(watch_root.clone()) {
                    if let Err(e) = debouncer.watcher().watch(&watch_root, RecursiveMode::Recursive) {
                        log::warn!("failed to watch {}: {e}", watch_root.display());
                    }
                }
            }

            match analysis {
                Ok(report) => {
                    for warning in &report.warnings {
                        log::warn!("{warning}");
                    }
                    let run_config = RunConfig::from_env(self.state_root.join("cache"));
                    let executor = Executor::new(run_config, self.state_root.clone(), self.failure_mode)
                        .with_previous_services(previous_services.clone());
                    let execute_report = executor.execute(&report.root);

                    // Detach every service this iteration started so the
                    // next iteration's `ServiceHandle::fingerprint` can
                    // decide, per service, whether to adopt it unchanged or
                    // stop it and start fresh.
                    for handle in execute_report.services.values() {
                        handle.detach();
                    }
                    previous_services = execute_report.services;

                    on_iteration(&Iteration {
                        result: execute_report.result,
                    });
                }
                Err(diagnostics) => {
                    on_iteration(&Iteration {
                        result: Err(diagnostics),
                    });
                }
            }

            if self.is_aborted() {
                break;
            }
            self.set_state(WatchState::Watching);
            let Some(changed) = self.wait_for_change(&rx) else {
                break;
            };
            self.set_state(WatchState::Debouncing);
            // Per spec: "if the change is on a manifest, discard the cached
            // analysis". Cheaply filter the batch down to paths that
            // plausibly touched a manifest (`looks_like_package_dir`) before
            // paying for a blanket cache invalidation — a change to some
            // other file under a recursively-watched package directory
            // (a generated artifact, an editor swap file) still triggers the
            // next iteration below, but doesn't force every manifest in the
            // graph to be re-read from disk.
            if changed.iter().any(|path| {
                let dir = if path.is_dir() {
                    path.as_path()
                } else {
                    path.parent().unwrap_or(path.as_path())
                };
                looks_like_package_dir(dir)
            }) {
                self.manifests.invalidate_all();
            }
            self.set_state(WatchState::Running);
        }

        self.set_state(WatchState::Aborted);
        for handle in previous_services.values() {
            handle.stop();
        }
    }

    /// Blocks until a debounced filesystem event arrives, or this watcher
    /// is aborted. Returns the changed paths, or `None` on abort or a
    /// disconnected channel (the underlying watcher died).
    fn wait_for_change(
        &self,
        rx: &mpsc::Receiver<notify_debouncer_mini::DebounceEventResult>,
    ) -> Option<Vec<PathBuf>> {
        loop {
            if self.is_aborted() {
                return None;
            }
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(Ok(events)) if !events.is_empty() => {
                    return Some(events.into_iter().map(|e| e.path).collect())
                }
                Ok(Ok(_)) => continue,
                Ok(Err(errors)) => {
                    for e in errors {
                        log::warn!("filesystem watch error: {e}");
                    }
                    continue;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

/// Every distinct package directory reachable from `root`, for watching:
/// a script's declared `files` all live under its own package directory,
/// so watching that whole directory (recursively) covers them without
/// needing to translate each glob into its own watch subscription.
fn collect_package_dirs(
    config: &Arc<ScriptConfig>,
    seen: &mut HashSet<ScriptReference>,
    dirs: &mut BTreeSet<PathBuf>,
) {
    if !seen.insert(config.reference.clone()) {
        return;
    }
    dirs.insert(config.reference.package_dir().to_path_buf());
    for dep in &config.dependencies {
        collect_package_dirs(&dep.config, seen, dirs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn write_manifest(dir: &std::path::Path, contents: &str) {
        fs::write(dir.join(MANIFEST_FILE_NAME), contents).unwrap();
    }

    #[test]
    fn collect_package_dirs_dedupes_shared_dependencies() {
        let tmp = tempfile::tempdir().unwrap();
        let shared = Arc::new(ScriptConfig {
            reference: ScriptReference::new(tmp.path(), "shared"),
            kind: crate::config::ScriptKind::NoCommand,
            command: None,
            dependencies: Vec::new(),
            declaring_file: tmp.path().join(MANIFEST_FILE_NAME),
            files: None,
            output: None,
            clean: crate::config::CleanPolicy::Never,
            env: Default::default(),
            extra_args: Vec::new(),
            position: crate::error::SourcePosition {
                file: tmp.path().join(MANIFEST_FILE_NAME),
                line: 1,
                column: 1,
            },
        });
        let root = Arc::new(ScriptConfig {
            reference: ScriptReference::new(tmp.path(), "root"),
            kind: crate::config::ScriptKind::NoCommand,
            command: None,
            dependencies: vec![
                crate::config::Dependency {
                    config: Arc::clone(&shared),
                    position: shared.position.clone(),
                    cascade: crate::config::Cascade(true),
                },
                crate::config::Dependency {
                    config: Arc::clone(&shared),
                    position: shared.position.clone(),
                    cascade: crate::config::Cascade(false),
                },
            ],
            declaring_file: tmp.path().join(MANIFEST_FILE_NAME),
            files: None,
            output: None,
            clean: crate::config::CleanPolicy::Never,
            env: Default::default(),
            extra_args: Vec::new(),
            position: shared.position.clone(),
        });

        let mut dirs = BTreeSet::new();
        collect_package_dirs(&root, &mut HashSet::new(), &mut dirs);
        assert_eq!(dirs.len(), 1);
        assert!(dirs.contains(tmp.path()));
    }

    #[test]
    fn a_manifest_edit_triggers_another_iteration() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            tmp.path(),
            r#"{"scripts": {"build": "wireit"}, "wireit": {"build": {"command": "true"}}}"#,
        );

        let root = ScriptReference::new(tmp.path(), "build");
        let watcher = Arc::new(
            Watcher::new(root, Vec::new(), tmp.path().join("state"))
                .with_debounce(Duration::from_millis(20)),
        );
        let iterations = Arc::new(AtomicUsize::new(0));

        let abort = watcher.abort_handle();
        let watcher_for_thread = Arc::clone(&watcher);
        let iterations_for_thread = Arc::clone(&iterations);
        let handle = thread::spawn(move || {
            watcher_for_thread.run(|_iteration| {
                iterations_for_thread.fetch_add(1, Ordering::SeqCst);
            });
        });

        // Wait for the first iteration to complete and start watching.
        let mut waited = Duration::ZERO;
        while iterations.load(Ordering::SeqCst) < 1 && waited < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(20));
            waited += Duration::from_millis(20);
        }
        assert!(iterations.load(Ordering::SeqCst) >= 1);

        write_manifest(
            tmp.path(),
            r#"{"scripts": {"build": "wireit"}, "wireit": {"build": {"command": "true", "files": []}}}"#,
        );

        let mut waited = Duration::ZERO;
        while iterations.load(Ordering::SeqCst) < 2 && waited < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(20));
            waited += Duration::from_millis(20);
        }

        abort.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        assert!(iterations.load(Ordering::SeqCst) >= 2);
    }
}
