//! The executor: drives a validated build graph to completion.
//! Grounded on `ops/cargo_compile.rs`'s "read, resolve, drive
//! compilation" shape, generalized from a linear pipeline into a graph
//! walk, combined with `custom_build.rs`'s dirty/fresh `Work` split (a
//! script's "what to do if dirty" and "what to do if fresh" are chosen
//! between once a fingerprint comparison is available, rather than
//! branching ad hoc at every call site).

pub mod service;
mod store;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use rand::seq::SliceRandom;

use crate::cache::Cache;
use crate::config::{CleanPolicy, Dependency, ScriptConfig, ScriptKind};
use crate::config_env::RunConfig;
use crate::error::{internal, Diagnostic, DiagnosticKind, WireitResult};
use crate::exec::ProcessBuilder;
use crate::fingerprint::{self, Fingerprint};
use crate::pool::ResourcePools;
use crate::reference::ScriptReference;

pub use service::{ServiceHandle, ServiceState, Termination};

/// How other in-flight work reacts to a script failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Let running scripts finish; do not start new ones.
    #[default]
    NoNew,
    /// Let running scripts finish; start new ones unless a dependency of
    /// that new work has failed.
    Continue,
    /// Immediately signal running children; do not start new ones.
    Kill,
}

/// What the fresh/cached/run decision resolved to for one script
/// `Grouped` is this crate's addition for no-command
/// nodes, which never reach the decision at all — they have nothing to
/// run or cache, only dependencies to aggregate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Grouped,
    Fresh,
    Cached,
    Ran,
    ServiceStarted,
}

pub struct ScriptOutcome {
    pub fingerprint: Fingerprint,
    pub decision: Decision,
}

type ScriptResult = Result<Arc<ScriptOutcome>, Vec<Diagnostic>>;

/// A blocking single-flight memoization cell: the first caller to reach
/// [`Self::run_or_wait`] runs the closure; every other concurrent caller
/// for the same key blocks until that result is available and receives a
/// clone of it ("concurrent callers await the same handle", realized as a
/// map from key to a future/once-cell).
struct OnceBarrier<T> {
    state: Mutex<Slot<T>>,
    cv: Condvar,
}

enum Slot<T> {
    NotStarted,
    InProgress,
    Done(T),
}

impl<T: Clone> OnceBarrier<T> {
    fn new() -> Self {
        OnceBarrier {
            state: Mutex::new(Slot::NotStarted),
            cv: Condvar::new(),
        }
    }

    fn run_or_wait(&self, f: impl FnOnce() -> T) -> T {
        {
            let mut guard = self.state.lock().unwrap();
            match &*guard {
                Slot::NotStarted => *guard = Slot::InProgress,
                Slot::Done(v) => return v.clone(),
                Slot::InProgress => loop {
                    guard = self.cv.wait(guard).unwrap();
                    if let Slot::Done(v) = &*guard {
                        return v.clone();
                    }
                },
            }
        }
        let result = f();
        let mut guard = self.state.lock().unwrap();
        *guard = Slot::Done(result.clone());
        self.cv.notify_all();
        result
    }
}

#[derive(Default, Clone, Copy, Debug)]
pub struct Counters {
    pub fresh: u64,
    pub cached: u64,
    pub ran: u64,
    pub services_started: u64,
    pub failed: u64,
}

impl Counters {
    pub fn total(&self) -> u64 {
        self.fresh + self.cached + self.ran + self.services_started + self.failed
    }

    /// A naive summary-logger implementation could integer-divide before
    /// multiplying, effectively always producing 0% or 100%; percentages
    /// are computed in floating point instead to avoid that trap.
    pub fn percent(count: u64, total: u64) -> f64 {
        if total == 0 {
            0.0
        } else {
            (count as f64 / total as f64) * 100.0
        }
    }
}

pub struct ExecuteReport {
    pub result: Result<Fingerprint, Vec<Diagnostic>>,
    pub services: HashMap<ScriptReference, Arc<ServiceHandle>>,
    pub counters: Counters,
}

/// Drives one build graph to completion. One instance is used for one
/// `execute()` call (or one watch-mode iteration); the watcher constructs a
/// fresh `Executor` per iteration, moving the previous iteration's service
/// map in via [`Executor::with_previous_services`] so unchanged services
/// can be adopted rather than restarted.
pub struct Executor {
    pools: ResourcePools,
    cache: Cache,
    state_root: PathBuf,
    failure_mode: FailureMode,
    abort: Arc<AtomicBool>,
    any_failure: AtomicBool,
    memo: Mutex<HashMap<ScriptReference, Arc<OnceBarrier<ScriptResult>>>>,
    services: Mutex<HashMap<ScriptReference, Arc<ServiceHandle>>>,
    previous_services: HashMap<ScriptReference, Arc<ServiceHandle>>,
    counters: Mutex<Counters>,
}

impl Executor {
    pub fn new(run_config: RunConfig, state_root: PathBuf, failure_mode: FailureMode) -> Self {
        let permits = run_config.parallelism.as_limit();
        Executor {
            pools: ResourcePools::new(permits, crate::pool::default_file_descriptor_capacity()),
            cache: run_config.cache,
            state_root,
            failure_mode,
            abort: Arc::new(AtomicBool::new(false)),
            any_failure: AtomicBool::new(false),
            memo: Mutex::new(HashMap::new()),
            services: Mutex::new(HashMap::new()),
            previous_services: HashMap::new(),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn with_previous_services(
        mut self,
        previous: HashMap<ScriptReference, Arc<ServiceHandle>>,
    ) -> Self {
        self.previous_services = previous;
        self
    }

    /// A cooperative cancellation handle: the watcher or a
    /// SIGINT handler flips this to request that the executor stop
    /// starting new work and (in `Kill` mode) signal running children.
    /// Cancellation is idempotent and `execute()` still resolves normally
    /// once in-flight work completes.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn execute(&self, root: &Arc<ScriptConfig>) -> ExecuteReport {
        let outcome = self.execute_script(root);
        let services = self.services.lock().unwrap().clone();
        let counters = *self.counters.lock().unwrap();
        let result = match outcome {
            Ok(o) => Ok(o.fingerprint.clone()),
            Err(diags) => Err(diags),
        };
        ExecuteReport {
            result,
            services,
            counters,
        }
    }

    fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Whether a *brand-new* script execution should be refused before it
    /// does any work, per the failure-mode policy. A script
    /// already in flight (already in `memo`) is never cancelled this way;
    /// this only gates scripts that have not started yet.
    fn should_refuse_new_start(&self) -> Option<&'static str> {
        if self.is_aborted() {
            return Some("the build was aborted");
        }
        if matches!(self.failure_mode, FailureMode::NoNew | FailureMode::Kill)
            && self.any_failure.load(Ordering::SeqCst)
        {
            return Some("another script failed and the failure mode forbids starting new work");
        }
        None
    }

    fn execute_script(&self, config: &Arc<ScriptConfig>) -> ScriptResult {
        let barrier = {
            let mut memo = self.memo.lock().unwrap();
            Arc::clone(
                memo.entry(config.reference.clone())
                    .or_insert_with(|| Arc::new(OnceBarrier::new())),
            )
        };
        barrier.run_or_wait(|| self.execute_script_uncached(config))
    }

    fn execute_script_uncached(&self, config: &Arc<ScriptConfig>) -> ScriptResult {
        if let Some(reason) = self.should_refuse_new_start() {
            return Err(vec![Diagnostic::error(
                DiagnosticKind::StartCancelled,
                format!("not starting \"{}\": {reason}", config.reference),
            )
            .at(config.position.clone())]);
        }

        // Dependency order is randomized so users don't inadvertently
        // depend on implicit sequencing between siblings.
        let mut deps = config.dependencies.clone();
        deps.shuffle(&mut rand::thread_rng());

        let dep_results: Vec<(Dependency, ScriptResult)> = std::thread::scope(|scope| {
            let handles: Vec<_> = deps
                .iter()
                .map(|dep| {
                    let dep_config = Arc::clone(&dep.config);
                    scope.spawn(move || self.execute_script(&dep_config))
                })
                .collect();
            deps.iter()
                .cloned()
                .zip(handles)
                .map(|(dep, handle)| {
                    let result = handle
                        .join()
                        .unwrap_or_else(|_| Err(internal_panic_diagnostic(&dep)));
                    (dep, result)
                })
                .collect()
        });

        let mut dep_fingerprints: HashMap<ScriptReference, Fingerprint> = HashMap::new();
        let mut failures = Vec::new();
        for (dep, result) in &dep_results {
            match result {
                Ok(outcome) => {
                    dep_fingerprints.insert(dep.reference().clone(), outcome.fingerprint.clone());
                }
                Err(diags) => failures.extend(diags.clone()),
            }
        }
        if !failures.is_empty() {
            self.any_failure.store(true, Ordering::SeqCst);
            let kind = if config.is_service() {
                DiagnosticKind::DependencyServiceExitedUnexpectedly
            } else {
                DiagnosticKind::DependencyInvalid
            };
            failures.push(
                Diagnostic::error(
                    kind,
                    format!(
                        "\"{}\" was not run because a dependency failed",
                        config.reference
                    ),
                )
                .at(config.position.clone()),
            );
            return Err(failures);
        }

        let fingerprint = fingerprint::compute(config, &dep_fingerprints, &self.pools.file_descriptors).map_err(|e| {
            vec![Diagnostic::error(DiagnosticKind::UnknownErrorThrown, e.to_string())
                .at(config.position.clone())]
        })?;

        if config.is_service() {
            return self.execute_service(config, &dep_results, fingerprint);
        }

        if matches!(config.kind, ScriptKind::NoCommand) {
            return Ok(Arc::new(ScriptOutcome {
                fingerprint,
                decision: Decision::Grouped,
            }));
        }

        self.execute_one_shot(config, fingerprint)
    }

    fn execute_one_shot(&self, config: &Arc<ScriptConfig>, fingerprint: Fingerprint) -> ScriptResult {
        let state_dir = store::script_state_dir(&self.state_root, &config.reference);
        let previous = store::read_fingerprint(&state_dir);

        if fingerprint.fully_tracked {
            if let Some(prev) = &previous {
                if prev.hash() == fingerprint.hash() {
                    self.counters.lock().unwrap().fresh += 1;
                    log::info!("\"{}\": success/fresh", config.reference);
                    return Ok(Arc::new(ScriptOutcome {
                        fingerprint,
                        decision: Decision::Fresh,
                    }));
                }
            }
        }

        if fingerprint::cache_eligible(config, &fingerprint) {
            match self.cache.get(&config.reference, &fingerprint.hash()) {
                Ok(Some(hit)) => {
                    if let Err(e) = hit.apply(config.reference.package_dir()) {
                        return Err(vec![Diagnostic::error(
                            DiagnosticKind::UnknownErrorThrown,
                            format!("failed to restore cached outputs: {e}"),
                        )
                        .at(config.position.clone())]);
                    }
                    store::write_fingerprint(&state_dir, &fingerprint).ok();
                    self.counters.lock().unwrap().cached += 1;
                    log::info!("\"{}\": success/cached", config.reference);
                    return Ok(Arc::new(ScriptOutcome {
                        fingerprint,
                        decision: Decision::Cached,
                    }));
                }
                Ok(None) => {}
                Err(e) => log::warn!("cache lookup failed for \"{}\": {e}", config.reference),
            }
        }

        if let Err(e) = apply_clean_policy(config, previous.as_ref(), &self.pools.file_descriptors) {
            return Err(vec![Diagnostic::error(
                DiagnosticKind::UnknownErrorThrown,
                format!("failed to clean outputs before running: {e}"),
            )
            .at(config.position.clone())]);
        }

        // Deleted at spawn time and only rewritten on clean exit, so an
        // interrupted build is never mistaken for fresh.
        store::clear_fingerprint(&state_dir).ok();

        let _permit = self.pools.processes.acquire();
        if self.is_aborted() {
            return Err(vec![Diagnostic::error(
                DiagnosticKind::Aborted,
                format!("\"{}\" was not started: build aborted", config.reference),
            )]);
        }
        if matches!(self.failure_mode, FailureMode::Kill) && self.any_failure.load(Ordering::SeqCst)
        {
            return Err(vec![Diagnostic::error(
                DiagnosticKind::StartCancelled,
                format!("not starting \"{}\": another script failed", config.reference),
            )]);
        }

        let command = config
            .command
            .clone()
            .expect("non-grouper script always has a command");
        let command_line = if config.extra_args.is_empty() {
            command
        } else {
            format!("{command} {}", config.extra_args.join(" "))
        };
        let builder = ProcessBuilder::new(command_line, config.reference.package_dir().to_path_buf())
            .envs(config.env.clone());

        log::info!("\"{}\": running", config.reference);
        let mut combined_log = String::new();
        let exec_result = builder.exec_with_streaming(
            &mut |line| {
                log::info!("[{}] {line}", config.reference.script_name());
                combined_log.push_str(line);
                combined_log.push('\n');
            },
            &mut |line| {
                log::warn!("[{}] {line}", config.reference.script_name());
                combined_log.push_str(line);
                combined_log.push('\n');
            },
        );
        store::write_log(&state_dir, &combined_log).ok();

        let status = match exec_result {
            Ok(status) => status,
            Err(e) => {
                self.any_failure.store(true, Ordering::SeqCst);
                self.counters.lock().unwrap().failed += 1;
                return Err(vec![Diagnostic::error(
                    DiagnosticKind::SpawnError,
                    format!("failed to spawn \"{}\": {e}", config.reference),
                )
                .at(config.position.clone())]);
            }
        };

        if !status.success() {
            self.any_failure.store(true, Ordering::SeqCst);
            self.counters.lock().unwrap().failed += 1;
            return Err(vec![exit_diagnostic(config, status)]);
        }

        store::write_fingerprint(&state_dir, &fingerprint).ok();
        if fingerprint::cache_eligible(config, &fingerprint) {
            match matched_output_files(config, &self.pools.file_descriptors) {
                Ok(files) => {
                    if let Err(e) = self.cache.set(
                        &config.reference,
                        &fingerprint.hash(),
                        config.reference.package_dir(),
                        &files,
                    ) {
                        log::warn!("failed to populate cache for \"{}\": {e}", config.reference);
                    }
                }
                Err(e) => log::warn!("failed to list outputs for \"{}\": {e}", config.reference),
            }
        }

        self.counters.lock().unwrap().ran += 1;
        log::info!("\"{}\": success/ran", config.reference);
        Ok(Arc::new(ScriptOutcome {
            fingerprint,
            decision: Decision::Ran,
        }))
    }

    fn execute_service(
        &self,
        config: &Arc<ScriptConfig>,
        dep_results: &[(Dependency, ScriptResult)],
        fingerprint: Fingerprint,
    ) -> ScriptResult {
        let handle = Arc::new(ServiceHandle::new(config.reference.clone(), false));
        self.services
            .lock()
            .unwrap()
            .insert(config.reference.clone(), Arc::clone(&handle));

        handle.begin();
        handle.deps_resolved(true); // dep failures already short-circuited above

        let adoptee = self.previous_services.get(&config.reference).cloned();
        handle.fingerprint(fingerprint.clone(), adoptee.as_deref());
        handle.add_consumer();

        let upstream_handles: Vec<Arc<ServiceHandle>> = dep_results
            .iter()
            .filter(|(dep, _)| dep.config.is_service())
            .filter_map(|(dep, _)| self.services.lock().unwrap().get(dep.reference()).cloned())
            .collect();
        let upstream: Vec<&ServiceHandle> = upstream_handles.iter().map(Arc::as_ref).collect();

        let ready_when = match &config.kind {
            ScriptKind::Service { ready_when } => ready_when.clone(),
            _ => None,
        };
        let command = config
            .command
            .clone()
            .expect("service scripts always have a command");
        let builder = ProcessBuilder::new(command, config.reference.package_dir().to_path_buf())
            .envs(config.env.clone());

        match handle.start(&upstream, &builder, ready_when.as_ref()) {
            Ok(()) => {
                self.counters.lock().unwrap().services_started += 1;
                log::info!("service \"{}\": started", config.reference);
                Ok(Arc::new(ScriptOutcome {
                    fingerprint,
                    decision: Decision::ServiceStarted,
                }))
            }
            Err(e) => {
                self.any_failure.store(true, Ordering::SeqCst);
                self.counters.lock().unwrap().failed += 1;
                Err(vec![Diagnostic::error(
                    DiagnosticKind::ServiceExitedUnexpectedly,
                    format!("service \"{}\" failed to start: {e}", config.reference),
                )
                .at(config.position.clone())])
            }
        }
    }

    /// Stops every still-running service this executor started, in no
    /// particular order (called when the whole build is torn down, e.g.
    /// on final shutdown rather than a watch-mode hand-off — a hand-off
    /// calls `detach()` on each instead, via the watcher).
    pub fn stop_all_services(&self) {
        for handle in self.services.lock().unwrap().values() {
            handle.stop();
        }
    }
}

fn internal_panic_diagnostic(dep: &Dependency) -> Vec<Diagnostic> {
    vec![internal(format!(
        "executing dependency {} panicked",
        dep.reference()
    ))
    .into()]
}

impl From<anyhow::Error> for Diagnostic {
    fn from(e: anyhow::Error) -> Self {
        Diagnostic::error(DiagnosticKind::UnknownErrorThrown, e.to_string())
    }
}

#[cfg(unix)]
fn exit_diagnostic(config: &ScriptConfig, status: std::process::ExitStatus) -> Diagnostic {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = status.signal() {
        Diagnostic::error(
            DiagnosticKind::Signal,
            format!(
                "\"{}\" was terminated by signal {signal}",
                config.reference
            ),
        )
        .at(config.position.clone())
    } else {
        Diagnostic::error(
            DiagnosticKind::ExitNonZero,
            format!(
                "\"{}\" exited with code {}",
                config.reference,
                status.code().unwrap_or(-1)
            ),
        )
        .at(config.position.clone())
    }
}

#[cfg(not(unix))]
fn exit_diagnostic(config: &ScriptConfig, status: std::process::ExitStatus) -> Diagnostic {
    Diagnostic::error(
        DiagnosticKind::ExitNonZero,
        format!(
            "\"{}\" exited with code {}",
            config.reference,
            status.code().unwrap_or(-1)
        ),
    )
    .at(config.position.clone())
}

/// Deletes output files before a run, per the `clean` policy: `always`
/// unconditionally; `if-file-deleted` only when the set of
/// currently declared input files lacks something the previous run saw
/// (modeling "the user deleted a generated input, so stale outputs
/// referencing it should go too"); `never` is a no-op. Only empty
/// directories left behind are removed; non-empty directories are left
/// alone even if every file wireit knows about was deleted.
fn apply_clean_policy(
    config: &ScriptConfig,
    previous: Option<&Fingerprint>,
    fd_pool: &crate::pool::Semaphore,
) -> WireitResult<()> {
    let Some(output_patterns) = &config.output else {
        return Ok(());
    };

    let should_clean = match config.clean {
        CleanPolicy::Always => true,
        CleanPolicy::Never => false,
        CleanPolicy::IfFileDeleted => {
            let current_files = match &config.files {
                Some(patterns) => {
                    current_file_set(config.reference.package_dir(), patterns, fd_pool)?
                }
                None => BTreeMap::new(),
            };
            match previous {
                Some(prev) => prev.files.keys().any(|f| !current_files.contains_key(f)),
                None => false,
            }
        }
    };
    if !should_clean {
        return Ok(());
    }

    for file in matched_output_files(config, fd_pool)? {
        let absolute = config.reference.package_dir().join(&file);
        if absolute.is_file() {
            let _permit = fd_pool.acquire();
            std::fs::remove_file(&absolute)?;
        }
    }
    for pattern in output_patterns {
        if pattern.exclude {
            continue;
        }
        remove_empty_ancestors(config.reference.package_dir(), &pattern.pattern);
    }
    Ok(())
}

/// Best-effort removal of directories left empty by a clean pass, walking
/// from the glob pattern's non-wildcard leading directory component
/// downward is unnecessary here: `remove_dir` only succeeds on directories
/// that are already empty, so a shallow sweep from the package root is
/// sufficient and never deletes anything still in use.
fn remove_empty_ancestors(package_dir: &Path, pattern: &str) {
    let first_component = Path::new(pattern)
        .components()
        .take_while(|c| !matches!(c, std::path::Component::Normal(s) if s.to_string_lossy().contains('*')))
        .collect::<PathBuf>();
    let root = package_dir.join(first_component);
    if let Ok(entries) = walkdir::WalkDir::new(&root)
        .contents_first(true)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
    {
        for entry in entries {
            if entry.file_type().is_dir() {
                let _ = std::fs::remove_dir(entry.path());
            }
        }
    }
}

fn current_file_set(
    package_dir: &Path,
    patterns: &[crate::config::GlobPattern],
    fd_pool: &crate::pool::Semaphore,
) -> WireitResult<BTreeMap<String, ()>> {
    let mut overrides = ignore::overrides::OverrideBuilder::new(package_dir);
    for pattern in patterns {
        let spec = if pattern.exclude {
            format!("!{}", pattern.pattern)
        } else {
            pattern.pattern.clone()
        };
        overrides.add(&spec)?;
    }
    let overrides = overrides.build()?;
    let mut files = BTreeMap::new();
    let walker = ignore::WalkBuilder::new(package_dir)
        .hidden(false)
        .git_ignore(false)
        .git_exclude(false)
        .overrides(overrides)
        .build();
    for entry in walker {
        let _permit = fd_pool.acquire();
        let entry = entry?;
        if entry.file_type().map_or(false, |t| t.is_file()) {
            let relative = entry
                .path()
                .strip_prefix(package_dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            files.insert(relative, ());
        }
    }
    Ok(files)
}

/// Every file matching `config.output`'s glob patterns, relative to the
/// package directory, for cache archiving and for `clean`. `fd_pool` bounds
/// how many directory entries this walk may have open at once, the same
/// budget `hash_files` draws from.
fn matched_output_files(
    config: &ScriptConfig,
    fd_pool: &crate::pool::Semaphore,
) -> WireitResult<Vec<PathBuf>> {
    let Some(patterns) = &config.output else {
        return Ok(Vec::new());
    };
    let package_dir = config.reference.package_dir();
    let mut overrides = ignore::overrides::OverrideBuilder::new(package_dir);
    for pattern in patterns {
        let spec = if pattern.exclude {
            format!("!{}", pattern.pattern)
        } else {
            pattern.pattern.clone()
        };
        overrides.add(&spec)?;
    }
    let overrides = overrides.build()?;
    let mut files = Vec::new();
    let walker = ignore::WalkBuilder::new(package_dir)
        .hidden(false)
        .git_ignore(false)
        .git_exclude(false)
        .overrides(overrides)
        .build();
    for entry in walker {
        let _permit = fd_pool.acquire();
        let entry = entry?;
        if entry.file_type().map_or(false, |t| t.is_file()) {
            let relative = entry.path().strip_prefix(package_dir).unwrap_or(entry.path());
            files.push(relative.to_path_buf());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{backend_from_env, Cache};
    use crate::config::{GlobPattern, ScriptKind};
    use crate::error::SourcePosition;
    use crate::reference::ScriptReference;
    use std::fs;

    fn run_config(state_root: &Path) -> RunConfig {
        std::env::set_var("WIREIT_CACHE", "local");
        RunConfig {
            parallelism: crate::config_env::Parallelism::Limited(4),
            cache: Cache::new(backend_from_env(state_root.join("cache"))),
            credential_endpoint: None,
        }
    }

    fn one_shot(dir: &Path, files: Vec<GlobPattern>, output: Option<Vec<GlobPattern>>) -> Arc<ScriptConfig> {
        Arc::new(ScriptConfig {
            reference: ScriptReference::new(dir, "build"),
            kind: ScriptKind::OneShot,
            command: Some(format!("touch {}", dir.join("out.txt").display())),
            dependencies: Vec::new(),
            declaring_file: dir.join("package.json"),
            files: Some(files),
            output,
            clean: CleanPolicy::Always,
            env: BTreeMap::new(),
            extra_args: Vec::new(),
            position: SourcePosition {
                file: dir.join("package.json"),
                line: 1,
                column: 1,
            },
        })
    }

    #[test]
    fn second_run_with_unchanged_inputs_is_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), b"hi").unwrap();
        let config = one_shot(tmp.path(), vec![GlobPattern::parse("a.txt")], None);
        let state_root = tmp.path().join("state");

        let executor = Executor::new(run_config(&state_root), state_root.clone(), FailureMode::NoNew);
        let first = executor.execute(&config);
        assert!(first.result.is_ok());

        let executor2 = Executor::new(run_config(&state_root), state_root, FailureMode::NoNew);
        let second = executor2.execute(&config);
        assert!(second.result.is_ok());
        assert_eq!(second.counters.fresh, 1);
        assert_eq!(second.counters.ran, 0);
    }

    #[test]
    fn grouping_node_never_runs_a_command() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Arc::new(ScriptConfig {
            reference: ScriptReference::new(tmp.path(), "all"),
            kind: ScriptKind::NoCommand,
            command: None,
            dependencies: Vec::new(),
            declaring_file: tmp.path().join("package.json"),
            files: None,
            output: None,
            clean: CleanPolicy::Never,
            env: BTreeMap::new(),
            extra_args: Vec::new(),
            position: SourcePosition {
                file: tmp.path().join("package.json"),
                line: 1,
                column: 1,
            },
        });
        let state_root = tmp.path().join("state");
        let executor = Executor::new(run_config(&state_root), state_root, FailureMode::NoNew);
        let report = executor.execute(&config);
        assert!(report.result.is_ok());
        assert_eq!(report.counters.total(), 0); // grouped, not counted as fresh/cached/ran
    }

    #[test]
    fn percent_handles_zero_total_without_dividing_by_zero() {
        assert_eq!(Counters::percent(0, 0), 0.0);
        assert_eq!(Counters::percent(1, 2), 50.0);
    }

    #[test]
    fn failing_dependency_prevents_dependent_from_running() {
        let tmp = tempfile::tempdir().unwrap();
        let failing = Arc::new(ScriptConfig {
            reference: ScriptReference::new(tmp.path(), "fail"),
            kind: ScriptKind::OneShot,
            command: Some("exit 1".to_string()),
            dependencies: Vec::new(),
            declaring_file: tmp.path().join("package.json"),
            files: Some(vec![]),
            output: None,
            clean: CleanPolicy::Never,
            env: BTreeMap::new(),
            extra_args: Vec::new(),
            position: SourcePosition {
                file: tmp.path().join("package.json"),
                line: 1,
                column: 1,
            },
        });
        let dependent = Arc::new(ScriptConfig {
            reference: ScriptReference::new(tmp.path(), "dependent"),
            kind: ScriptKind::OneShot,
            command: Some("touch ok.txt".to_string()),
            dependencies: vec![Dependency {
                config: Arc::clone(&failing),
                position: SourcePosition {
                    file: tmp.path().join("package.json"),
                    line: 1,
                    column: 1,
                },
                cascade: crate::config::Cascade(true),
            }],
            declaring_file: tmp.path().join("package.json"),
            files: Some(vec![]),
            output: None,
            clean: CleanPolicy::Never,
            env: BTreeMap::new(),
            extra_args: Vec::new(),
            position: SourcePosition {
                file: tmp.path().join("package.json"),
                line: 1,
                column: 1,
            },
        });

        let state_root = tmp.path().join("state");
        let executor = Executor::new(run_config(&state_root), state_root, FailureMode::Continue);
        let report = executor.execute(&dependent);
        assert!(report.result.is_err());
        let diags = report.result.unwrap_err();
        assert!(diags.iter().any(|d| d.kind == DiagnosticKind::DependencyInvalid));
    }
}
