//! The service lifecycle state machine: one [`ServiceHandle`]
//! per service-per-executor-instance, driving a long-lived child process
//! through the states a run-to-completion script never visits.
//!
//! Grounded on `custom_build.rs`'s output streaming: a build script's stdout
//! is read line-by-line and interpreted live (`BuildOutput::parse_file`
//! reacting to each `cargo:` directive as it arrives). `readyWhen.lineMatches`
//! generalizes that same shape from "run once, parse all output, done" to
//! "stay running, watch for one matching line, then treat as started."

use std::process::Child;
use std::sync::{Condvar, Mutex};

use crate::config::ReadyWhen;
use crate::error::{internal, WireitResult};
use crate::exec::{Line, ProcessBuilder};
use crate::fingerprint::Fingerprint;
use crate::reference::ScriptReference;

/// The full service state graph. Terminal states: `Stopped`,
/// `Failed`, `Detached`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
    Initial,
    ExecutingDeps,
    Fingerprinting,
    StoppingAdoptee,
    Unstarted,
    DepsStarting,
    Starting,
    Started,
    Stopping,
    Stopped,
    Failing,
    Failed,
    Detached,
}

impl ServiceState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ServiceState::Stopped | ServiceState::Failed | ServiceState::Detached
        )
    }

    /// A service's fingerprint is observable only in these states.
    fn fingerprint_observable(self) -> bool {
        matches!(
            self,
            ServiceState::StoppingAdoptee
                | ServiceState::Unstarted
                | ServiceState::DepsStarting
                | ServiceState::Starting
                | ServiceState::Started
        )
    }
}

/// Resolves a service's "terminated" promise exactly once, in either
/// direction.
#[derive(Clone, Debug)]
pub enum Termination {
    Stopped,
    Failed(String),
}

struct Inner {
    state: ServiceState,
    fingerprint: Option<Fingerprint>,
    child: Option<Child>,
    termination: Option<Termination>,
    consumers: usize,
}

/// One service's state machine, for the lifetime of one executor instance.
/// Shared (`Arc`) between every consumer that depends on it, so all of them
/// observe the same child process and the same started/terminated signals.
pub struct ServiceHandle {
    pub reference: ScriptReference,
    /// Started as soon as analysis completes, independent of any consumer
    /// calling `start()` — the root script itself being a service, or
    /// `--watch`'s "keep it running across iterations" mode, imply this.
    persistent: bool,
    inner: Mutex<Inner>,
    cv: Condvar,
}

impl ServiceHandle {
    pub fn new(reference: ScriptReference, persistent: bool) -> Self {
        ServiceHandle {
            reference,
            persistent,
            inner: Mutex::new(Inner {
                state: ServiceState::Initial,
                fingerprint: None,
                child: None,
                termination: None,
                consumers: 0,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn state(&self) -> ServiceState {
        self.inner.lock().unwrap().state
    }

    fn transition(&self, inner: &mut Inner, to: ServiceState) {
        inner.state = to;
        self.cv.notify_all();
    }

    /// `initial -> executingDeps`, called as soon as the executor starts
    /// working on this service at all (independent of whether any consumer
    /// has asked for it to actually run yet).
    pub fn begin(&self) {
        let mut inner = self.inner.lock().unwrap();
        assert_eq!(inner.state, ServiceState::Initial, "service already begun");
        self.transition(&mut inner, ServiceState::ExecutingDeps);
    }

    /// `executingDeps -> fingerprinting` on dependency success, or
    /// `executingDeps -> failed` on dependency failure.
    pub fn deps_resolved(&self, ok: bool) {
        let mut inner = self.inner.lock().unwrap();
        assert_eq!(inner.state, ServiceState::ExecutingDeps);
        if ok {
            self.transition(&mut inner, ServiceState::Fingerprinting);
        } else {
            inner.termination = Some(Termination::Failed(
                "a dependency failed before this service could start".to_string(),
            ));
            self.transition(&mut inner, ServiceState::Failed);
        }
    }

    /// `fingerprinting -> unstarted`, possibly adopting a previous
    /// iteration's running child if `adoptee` reports a matching
    /// fingerprint. If the adoptee's fingerprint
    /// differs, it is stopped first (`stoppingAdoptee`) before this
    /// service settles into `unstarted` with a fresh (not-yet-started)
    /// slate.
    pub fn fingerprint(&self, fp: Fingerprint, adoptee: Option<&ServiceHandle>) {
        let mut inner = self.inner.lock().unwrap();
        assert_eq!(inner.state, ServiceState::Fingerprinting);

        if let Some(adoptee) = adoptee {
            let mut adoptee_inner = adoptee.inner.lock().unwrap();
            if adoptee_inner.fingerprint.as_ref() == Some(&fp) {
                // Hand the running child over directly; no restart.
                inner.child = adoptee_inner.child.take();
                adoptee.transition(&mut adoptee_inner, ServiceState::Detached);
                inner.fingerprint = Some(fp);
                self.transition(&mut inner, ServiceState::Unstarted);
                return;
            }
            drop(adoptee_inner);
            self.transition(&mut inner, ServiceState::StoppingAdoptee);
            drop(inner);
            adoptee.stop();
            inner = self.inner.lock().unwrap();
        }

        inner.fingerprint = Some(fp);
        self.transition(&mut inner, ServiceState::Unstarted);
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// A consumer registers interest in this service being up. Returns the
    /// new consumer count.
    pub fn add_consumer(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.consumers += 1;
        inner.consumers
    }

    /// A consumer is done with this service. Returns `true` if this was the
    /// last consumer and the service is not `persistent` (the caller should
    /// then call [`Self::stop`]).
    pub fn remove_consumer(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.consumers = inner.consumers.saturating_sub(1);
        inner.consumers == 0 && !self.persistent
    }

    /// `unstarted -> depsStarting -> starting -> started`. Blocks until
    /// every entry in `upstream` reports `Started`, then spawns the child
    /// and blocks again until it is considered started: either the process
    /// itself started successfully (no readiness pattern configured), or a
    /// line of its stdout matches `ready_when`.
    pub fn start(
        &self,
        upstream: &[&ServiceHandle],
        builder: &ProcessBuilder,
        ready_when: Option<&ReadyWhen>,
    ) -> WireitResult<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                ServiceState::Started | ServiceState::DepsStarting | ServiceState::Starting => {
                    return Ok(());
                }
                ServiceState::Unstarted => {
                    self.transition(&mut inner, ServiceState::DepsStarting);
                }
                other => return Err(internal(format!("start() called in state {other:?}"))),
            }
        }

        for dep in upstream {
            dep.wait_for_started()?;
        }

        {
            let mut inner = self.inner.lock().unwrap();
            self.transition(&mut inner, ServiceState::Starting);
        }

        let (child, rx) = builder.spawn_streaming()?;

        let became_ready = match ready_when {
            None => true,
            Some(pattern) => {
                let mut ready = false;
                for line in rx.iter() {
                    if let Line::Stdout(text) = &line {
                        if pattern.line_matches.is_match(text) {
                            ready = true;
                            break;
                        }
                    }
                }
                ready
            }
        };

        let mut inner = self.inner.lock().unwrap();
        inner.child = Some(child);
        if became_ready {
            self.transition(&mut inner, ServiceState::Started);
            Ok(())
        } else {
            inner.termination = Some(Termination::Failed(
                "service exited before its readiness pattern ever matched".to_string(),
            ));
            self.transition(&mut inner, ServiceState::Failed);
            Err(internal(format!(
                "service {} exited before becoming ready",
                self.reference
            )))
        }
    }

    /// Blocks until this service reaches `Started` (or a terminal state, in
    /// which case this returns an error — an upstream service that never
    /// started cannot unblock a downstream consumer).
    fn wait_for_started(&self) -> WireitResult<()> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            match inner.state {
                ServiceState::Started => return Ok(()),
                s if s.is_terminal() => {
                    return Err(internal(format!(
                        "upstream service {} never started",
                        self.reference
                    )))
                }
                _ => inner = self.cv.wait(inner).unwrap(),
            }
        }
    }

    /// `started -> stopping -> stopped`. Idempotent: stopping an
    /// already-stopped/failed/detached service is a no-op.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.is_terminal() {
            return;
        }
        self.transition(&mut inner, ServiceState::Stopping);
        if let Some(mut child) = inner.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        inner.termination = Some(Termination::Stopped);
        self.transition(&mut inner, ServiceState::Stopped);
    }

    /// `started -> failing -> failed`, triggered when an upstream service
    /// this one depends on exits unexpectedly. `failing` is transient:
    /// this call kills the child (if still running) and settles directly
    /// into `failed` once it exits, since nothing else can observe the
    /// brief intermediate state from outside this call.
    pub fn upstream_exited(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.is_terminal() {
            return;
        }
        self.transition(&mut inner, ServiceState::Failing);
        if let Some(mut child) = inner.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        inner.termination = Some(Termination::Failed(
            "an upstream service this one depends on exited unexpectedly".to_string(),
        ));
        self.transition(&mut inner, ServiceState::Failed);
    }

    /// `started -> detached`: the child is handed off intact to the next
    /// executor iteration's watcher continuity, rather than
    /// being stopped. Returns the live child so the caller (the next
    /// iteration's `ServiceHandle::fingerprint`) can adopt it; see
    /// [`Self::fingerprint`]'s `adoptee` handling, which is the only other
    /// caller that reaches into a sibling handle's child slot.
    pub fn detach(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == ServiceState::Started {
            self.transition(&mut inner, ServiceState::Detached);
        }
    }

    /// The fingerprint this service was last computed with, if currently in
    /// one of the states where that is observable. Returns `None` outside
    /// that window, even if a
    /// fingerprint was previously recorded.
    pub fn observed_fingerprint(&self) -> Option<Fingerprint> {
        let inner = self.inner.lock().unwrap();
        if inner.state.fingerprint_observable() {
            inner.fingerprint.clone()
        } else {
            None
        }
    }

    /// Blocks until the service resolves its terminated promise
    /// (`Stopped` or `Failed`), exactly once.
    pub fn wait_terminated(&self) -> Termination {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(t) = &inner.termination {
                return t.clone();
            }
            inner = self.cv.wait(inner).unwrap();
        }
    }
}
