//! Thin CLI harness: resolve one script reference, analyze it, execute (or
//! watch) it, print a summary, propagate the exit code.
//!
//! Argument parsing proper is an out-of-scope external collaborator —
//! ordinarily `wireit` is invoked as a manifest script's own command
//! (`"build": "wireit"`), so the only input this harness actually needs is
//! the script's own name, which the caller's script-runner already supplies
//! as `argv[1]` by convention. No `clap` here, matching `cargo`'s own
//! `src/bin/cargo/main.rs` in spirit (a thin dispatcher) if not its scale.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use wireit::analyzer::Analyzer;
use wireit::config_env::RunConfig;
use wireit::error::Diagnostic;
use wireit::executor::{Counters, Executor, FailureMode};
use wireit::manifest::ManifestReader;
use wireit::reference::ScriptReference;
use wireit::watcher::Watcher;

fn main() -> ExitCode {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let mut watch = false;
    let mut script_name = None;
    let mut extra_args = Vec::new();

    while let Some(arg) = args.next() {
        if arg == "--watch" {
            watch = true;
        } else if arg == "--" {
            extra_args.extend(args);
            break;
        } else if script_name.is_none() {
            script_name = Some(arg);
        } else {
            extra_args.push(arg);
        }
    }

    let Some(script_name) = script_name else {
        eprintln!("usage: wireit [--watch] <script-name> [-- extra args...]");
        return ExitCode::from(2);
    };

    let package_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("wireit: failed to read the current directory: {e}");
            return ExitCode::from(2);
        }
    };
    let state_root = package_dir.join(".wireit");
    let root = ScriptReference::new(package_dir, script_name);

    if watch {
        run_watch(root, extra_args, state_root)
    } else {
        run_once(root, extra_args, state_root)
    }
}

fn run_once(root: ScriptReference, extra_args: Vec<String>, state_root: std::path::PathBuf) -> ExitCode {
    let manifests = Arc::new(ManifestReader::new());
    let analysis = match Analyzer::new(manifests).analyze(root, extra_args) {
        Ok(report) => report,
        Err(diags) => {
            print_diagnostics(&diags);
            return ExitCode::from(1);
        }
    };
    for warning in &analysis.warnings {
        eprintln!("{warning}");
    }

    let run_config = RunConfig::from_env(state_root.join("cache"));
    let executor = Executor::new(run_config, state_root, FailureMode::default());
    let report = executor.execute(&analysis.root);
    print_summary(&report.counters);
    executor.stop_all_services();

    match report.result {
        Ok(_) => ExitCode::SUCCESS,
        Err(diags) => {
            print_diagnostics(&diags);
            ExitCode::from(1)
        }
    }
}

fn run_watch(root: ScriptReference, extra_args: Vec<String>, state_root: std::path::PathBuf) -> ExitCode {
    // No SIGINT handling of our own (no signal-handling dependency is
    // carried for it either): the process's default disposition already tears
    // down the whole tree, including any still-running service children,
    // on Ctrl+C. `Watcher::abort_handle` exists for embedders that want a
    // cleaner stop (e.g. an IDE host driving this loop on a worker thread).
    let watcher = Watcher::new(root, extra_args, state_root).with_debounce(Duration::from_millis(200));

    watcher.run(|iteration| match &iteration.result {
        Ok(_) => eprintln!("wireit: build succeeded, watching for changes..."),
        Err(diags) => {
            print_diagnostics(diags);
            eprintln!("wireit: build failed, watching for changes...");
        }
    });
    ExitCode::SUCCESS
}

fn print_diagnostics(diags: &[Diagnostic]) {
    for diag in diags {
        eprintln!("{diag}");
    }
}

fn print_summary(counters: &Counters) {
    let total = counters.total();
    eprintln!(
        "wireit: {} fresh ({:.0}%), {} cached ({:.0}%), {} ran ({:.0}%), {} services started, {} failed",
        counters.fresh,
        Counters::percent(counters.fresh, total),
        counters.cached,
        Counters::percent(counters.cached, total),
        counters.ran,
        Counters::percent(counters.ran, total),
        counters.services_started,
        counters.failed,
    );
}
