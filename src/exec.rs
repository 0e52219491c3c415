//! A thin wrapper over [`std::process::Command`] that streams stdout/stderr
//! to the caller line by line while the child is still running, instead of
//! buffering the whole output until exit.
//!
//! Grounded on `cargo`'s `cmd.exec_with_streaming(...)` call in
//! `core/compiler/custom_build.rs`: a build script's output is read live so
//! its directives can be interpreted as they arrive. Wireit needs the exact
//! same shape twice — a one-shot script's stdout/stderr forwarded live to
//! the terminal, and a service's stdout matched line-by-line against
//! `readyWhen.lineMatches` without waiting for the (possibly never
//! happening) process exit.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;

use anyhow::Context as _;

use crate::error::WireitResult;

/// One configured-but-not-yet-spawned command. `env` is applied on top of
/// the parent process's environment, matching `cargo`'s
/// `ProcessBuilder::env`.
pub struct ProcessBuilder {
    command_line: String,
    cwd: std::path::PathBuf,
    env: BTreeMap<String, String>,
}

impl ProcessBuilder {
    pub fn new(command_line: impl Into<String>, cwd: impl Into<std::path::PathBuf>) -> Self {
        ProcessBuilder {
            command_line: command_line.into(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    fn to_command(&self) -> Command {
        let (shell, flag) = shell();
        let mut cmd = Command::new(shell);
        cmd.arg(flag)
            .arg(&self.command_line)
            .current_dir(&self.cwd)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Runs the command to completion, calling `on_stdout`/`on_stderr` for
    /// every line as soon as it is produced. Returns the exit status once
    /// the child exits and both pipe-reading threads have finished.
    pub fn exec_with_streaming(
        &self,
        on_stdout: &mut dyn FnMut(&str),
        on_stderr: &mut dyn FnMut(&str),
    ) -> WireitResult<ExitStatus> {
        let mut child = self
            .to_command()
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.command_line))?;
        let status = stream_to_completion(&mut child, on_stdout, on_stderr)?;
        Ok(status)
    }

    /// Spawns the command and hands back the live [`Child`] plus a channel
    /// of interleaved stdout/stderr lines, for callers (the service
    /// lifecycle state machine) that need to watch output *while the
    /// process is still running* rather than block until it exits.
    pub fn spawn_streaming(&self) -> WireitResult<(Child, mpsc::Receiver<Line>)> {
        let mut child = self
            .to_command()
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.command_line))?;
        let (tx, rx) = mpsc::channel();
        spawn_pipe_reader(child.stdout.take().expect("stdout was piped"), tx.clone(), Line::Stdout);
        spawn_pipe_reader(child.stderr.take().expect("stderr was piped"), tx, Line::Stderr);
        Ok((child, rx))
    }
}

/// One line of output from a running child, tagged by the stream it came
/// from so a consumer can color or route stdout/stderr differently.
pub enum Line {
    Stdout(String),
    Stderr(String),
}

fn spawn_pipe_reader<R>(pipe: R, tx: mpsc::Sender<Line>, wrap: fn(String) -> Line)
where
    R: std::io::Read + Send + 'static,
{
    thread::spawn(move || {
        let reader = BufReader::new(pipe);
        for line in reader.lines().map_while(Result::ok) {
            if tx.send(wrap(line)).is_err() {
                return;
            }
        }
    });
}

fn stream_to_completion(
    child: &mut Child,
    on_stdout: &mut dyn FnMut(&str),
    on_stderr: &mut dyn FnMut(&str),
) -> WireitResult<ExitStatus> {
    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    thread::scope(|scope| -> WireitResult<ExitStatus> {
        let stderr_handle = scope.spawn(move || -> WireitResult<Vec<String>> {
            let mut lines = Vec::new();
            for line in BufReader::new(stderr).lines() {
                lines.push(line?);
            }
            Ok(lines)
        });

        for line in BufReader::new(stdout).lines() {
            on_stdout(&line?);
        }
        for line in stderr_handle
            .join()
            .map_err(|_| crate::error::internal("stderr reader thread panicked"))??
        {
            on_stderr(&line);
        }

        Ok(child.wait()?)
    })
}

#[cfg(unix)]
fn shell() -> (&'static str, &'static str) {
    ("/bin/sh", "-c")
}

#[cfg(windows)]
fn shell() -> (&'static str, &'static str) {
    ("cmd", "/C")
}

/// Whether a directory looks like it could contain a manifest at all,
/// cheaply, before handing it to the (more expensive) manifest reader.
/// Used by the watcher to filter filesystem events down to plausible
/// package directories.
pub fn looks_like_package_dir(dir: &Path) -> bool {
    dir.join(crate::manifest::MANIFEST_FILE_NAME).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_stdout_lines() {
        let builder = ProcessBuilder::new("echo one && echo two", std::env::temp_dir());
        let mut out = Vec::new();
        let mut err = Vec::new();
        let status = builder
            .exec_with_streaming(&mut |l| out.push(l.to_string()), &mut |l| err.push(l.to_string()))
            .unwrap();
        assert!(status.success());
        assert_eq!(out, vec!["one".to_string(), "two".to_string()]);
        assert!(err.is_empty());
    }

    #[test]
    fn reports_nonzero_exit() {
        let builder = ProcessBuilder::new("exit 7", std::env::temp_dir());
        let status = builder
            .exec_with_streaming(&mut |_| {}, &mut |_| {})
            .unwrap();
        assert_eq!(status.code(), Some(7));
    }
}
