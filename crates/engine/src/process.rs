// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One managed child process: shell spawn, stream capture, kill tree,
//! restart policy.

use clier_core::{Clock, ProcessConfig, ProcessKind, ProcessStatus};
use parking_lot::Mutex;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

/// A service must stay up this long before its restart counter resets.
const STABILITY_WINDOW: Duration = Duration::from_secs(10);

/// Raw per-process signals, before event-bus normalization.
///
/// Channel ordering is the contract: every `Stdout`/`Stderr` for a spawn
/// precedes its `Exited`, and `Exited` carries the complete captured output.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessSignal {
    Started {
        name: String,
        pid: u32,
        at_ms: u64,
    },
    Stdout {
        name: String,
        line: String,
        at_ms: u64,
    },
    Stderr {
        name: String,
        line: String,
        at_ms: u64,
    },
    Exited {
        name: String,
        code: Option<i32>,
        signal: Option<i32>,
        stdout: Vec<String>,
        stderr: Vec<String>,
        at_ms: u64,
    },
    Restarting {
        name: String,
        attempt: u32,
        at_ms: u64,
    },
    Failed {
        name: String,
        reason: String,
        at_ms: u64,
    },
}

impl ProcessSignal {
    pub fn name(&self) -> &str {
        match self {
            ProcessSignal::Started { name, .. }
            | ProcessSignal::Stdout { name, .. }
            | ProcessSignal::Stderr { name, .. }
            | ProcessSignal::Exited { name, .. }
            | ProcessSignal::Restarting { name, .. }
            | ProcessSignal::Failed { name, .. } => name,
        }
    }
}

struct ProcState {
    status: ProcessStatus,
    pid: Option<u32>,
    started_at_ms: Option<u64>,
    running_since: Option<Instant>,
    restarts: u32,
}

/// Shared core of one managed process. The manager hands out `Arc`s; the
/// spawn task, stop calls, and status queries all go through here.
pub(crate) struct ProcessInner<C: Clock> {
    pub(crate) cfg: ProcessConfig,
    clock: C,
    /// Spawn without a dedicated process group (prevents orphans in tests).
    test_mode: bool,
    signal_tx: mpsc::UnboundedSender<ProcessSignal>,
    state: Mutex<ProcState>,
    /// Bumped every time the process settles; stop() waits on this.
    exit_watch: watch::Sender<u64>,
}

enum StopAction {
    AlreadyDown,
    NothingToKill,
    Kill,
}

impl<C: Clock> ProcessInner<C> {
    pub(crate) fn new(
        cfg: ProcessConfig,
        clock: C,
        test_mode: bool,
        signal_tx: mpsc::UnboundedSender<ProcessSignal>,
    ) -> Self {
        let (exit_watch, _) = watch::channel(0);
        Self {
            cfg,
            clock,
            test_mode,
            signal_tx,
            state: Mutex::new(ProcState {
                status: ProcessStatus::Idle,
                pid: None,
                started_at_ms: None,
                running_since: None,
                restarts: 0,
            }),
            exit_watch,
        }
    }

    pub(crate) fn status(&self) -> ProcessStatus {
        self.state.lock().status
    }

    pub(crate) fn is_running(&self) -> bool {
        matches!(
            self.status(),
            ProcessStatus::Starting | ProcessStatus::Running
        )
    }

    pub(crate) fn info(&self) -> (ProcessStatus, Option<u32>, Option<u64>, u32) {
        let st = self.state.lock();
        (st.status, st.pid, st.started_at_ms, st.restarts)
    }

    /// Begin the spawn loop. Fails only if the process is already up;
    /// spawn errors are reported as `Failed` + `Exited` signals instead.
    pub(crate) fn start(self: &std::sync::Arc<Self>) -> Result<(), crate::ProcessError> {
        {
            let mut st = self.state.lock();
            match st.status {
                ProcessStatus::Starting | ProcessStatus::Running | ProcessStatus::Stopping => {
                    return Err(crate::ProcessError::AlreadyRunning(self.cfg.name.clone()));
                }
                _ => st.status = ProcessStatus::Starting,
            }
        }
        let inner = std::sync::Arc::clone(self);
        tokio::spawn(async move { inner.run().await });
        Ok(())
    }

    /// SIGTERM the process group, escalate to SIGKILL after `timeout`,
    /// and resolve once the exit has been observed. `force` skips straight
    /// to SIGKILL.
    pub(crate) async fn stop(&self, force: bool, timeout: Duration) {
        let mut exited = self.exit_watch.subscribe();
        let action = {
            let mut st = self.state.lock();
            match st.status {
                ProcessStatus::Idle | ProcessStatus::Stopped | ProcessStatus::Crashed => {
                    StopAction::AlreadyDown
                }
                // Between restarts (or mid-spawn) there is no child yet;
                // the run loop observes the status flip and backs off.
                ProcessStatus::Starting if st.pid.is_none() => {
                    st.status = ProcessStatus::Stopped;
                    StopAction::NothingToKill
                }
                _ => {
                    st.status = ProcessStatus::Stopping;
                    StopAction::Kill
                }
            }
        };

        match action {
            StopAction::AlreadyDown => {}
            StopAction::NothingToKill => {
                self.exit_watch.send_modify(|v| *v += 1);
            }
            StopAction::Kill => {
                self.send_signal(force);
                if !force {
                    let timed_out = tokio::select! {
                        _ = exited.changed() => false,
                        _ = tokio::time::sleep(timeout) => true,
                    };
                    if !timed_out {
                        return;
                    }
                    self.send_signal(true);
                }
                let _ = exited.changed().await;
            }
        }
    }

    /// Stop, bump the attempt counter, emit `Restarting`, start again.
    pub(crate) async fn restart(
        self: &std::sync::Arc<Self>,
        force: bool,
    ) -> Result<(), crate::ProcessError> {
        self.stop(force, Duration::from_millis(self.cfg.stop_timeout_ms))
            .await;
        let attempt = {
            let mut st = self.state.lock();
            st.restarts += 1;
            st.restarts
        };
        self.send(ProcessSignal::Restarting {
            name: self.cfg.name.clone(),
            attempt,
            at_ms: self.clock.epoch_ms(),
        });
        self.start()
    }

    fn send(&self, signal: ProcessSignal) {
        let _ = self.signal_tx.send(signal);
    }

    /// Signal the child: the whole process group in production, the shell
    /// alone in test mode.
    #[cfg(unix)]
    fn send_signal(&self, kill: bool) {
        use nix::sys::signal::{kill as kill_pid, killpg, Signal};
        use nix::unistd::Pid;

        let pid = match self.state.lock().pid {
            Some(pid) => pid as i32,
            None => return,
        };
        let sig = if kill { Signal::SIGKILL } else { Signal::SIGTERM };
        let result = if self.test_mode {
            kill_pid(Pid::from_raw(pid), sig)
        } else {
            killpg(Pid::from_raw(pid), sig)
        };
        if let Err(e) = result {
            tracing::debug!(process = %self.cfg.name, pid, ?sig, error = %e, "signal failed");
        }
    }

    #[cfg(not(unix))]
    fn send_signal(&self, _kill: bool) {
        tracing::warn!(process = %self.cfg.name, "kill tree unsupported on this platform");
    }

    /// Spawn loop: one iteration per child, looping on auto-restart.
    async fn run(self: std::sync::Arc<Self>) {
        loop {
            let mut child = match self.spawn_child() {
                Ok(child) => child,
                Err(e) => {
                    let at_ms = self.clock.epoch_ms();
                    self.send(ProcessSignal::Failed {
                        name: self.cfg.name.clone(),
                        reason: e.to_string(),
                        at_ms,
                    });
                    self.send(ProcessSignal::Exited {
                        name: self.cfg.name.clone(),
                        code: None,
                        signal: None,
                        stdout: vec![],
                        stderr: vec![],
                        at_ms,
                    });
                    let mut st = self.state.lock();
                    st.status = ProcessStatus::Stopped;
                    st.pid = None;
                    drop(st);
                    self.exit_watch.send_modify(|v| *v += 1);
                    return;
                }
            };

            let pid = child.id().unwrap_or_default();
            let stop_requested = {
                let mut st = self.state.lock();
                let was_stopped = matches!(
                    st.status,
                    ProcessStatus::Stopping | ProcessStatus::Stopped
                );
                st.status = ProcessStatus::Running;
                st.pid = Some(pid);
                st.started_at_ms = Some(self.clock.epoch_ms());
                st.running_since = Some(self.clock.now());
                was_stopped
            };
            self.send(ProcessSignal::Started {
                name: self.cfg.name.clone(),
                pid,
                at_ms: self.clock.epoch_ms(),
            });
            if stop_requested {
                // stop() raced the spawn; put the child down immediately.
                self.state.lock().status = ProcessStatus::Stopping;
                self.send_signal(true);
            }

            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let out_pump = self.pump(stdout, false);
            let err_pump = self.pump(stderr, true);

            let status = child.wait().await;
            // Pipes drain to EOF before the exit is reported; the exit
            // signal must carry everything the readers saw.
            let stdout_lines = out_pump.await.unwrap_or_default();
            let stderr_lines = err_pump.await.unwrap_or_default();

            let (code, signal) = match status {
                Ok(status) => (status.code(), unix_signal(&status)),
                Err(e) => {
                    tracing::warn!(process = %self.cfg.name, error = %e, "wait failed");
                    (None, None)
                }
            };

            let plan = self.settle(code, signal, stdout_lines, stderr_lines);
            let Some((attempt, delay)) = plan else {
                return;
            };

            tokio::time::sleep(delay).await;
            if self.state.lock().status != ProcessStatus::Starting {
                // Stopped while waiting out the restart delay.
                return;
            }
            self.send(ProcessSignal::Restarting {
                name: self.cfg.name.clone(),
                attempt,
                at_ms: self.clock.epoch_ms(),
            });
        }
    }

    fn spawn_child(&self) -> std::io::Result<tokio::process::Child> {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&self.cfg.command);
        if !self.cfg.inherit_env {
            cmd.env_clear();
        }
        cmd.envs(&self.cfg.env);
        if let Some(cwd) = &self.cfg.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        if !self.test_mode {
            // Own process group so stop() can signal every descendant.
            cmd.process_group(0);
        }
        cmd.spawn()
    }

    /// Read one pipe to EOF, emitting a signal per line and returning the
    /// accumulated lines. UTF-8-safe: invalid bytes are replaced, and a
    /// final unterminated line is flushed at EOF.
    fn pump<R>(
        &self,
        reader: Option<R>,
        is_stderr: bool,
    ) -> tokio::task::JoinHandle<Vec<String>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let name = self.cfg.name.clone();
        let tx = self.signal_tx.clone();
        let clock = self.clock.clone();
        tokio::spawn(async move {
            let Some(reader) = reader else {
                return vec![];
            };
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            let mut lines = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if buf.last() == Some(&b'\n') {
                            buf.pop();
                            if buf.last() == Some(&b'\r') {
                                buf.pop();
                            }
                        }
                        let line = String::from_utf8_lossy(&buf).into_owned();
                        let at_ms = clock.epoch_ms();
                        let signal = if is_stderr {
                            ProcessSignal::Stderr {
                                name: name.clone(),
                                line: line.clone(),
                                at_ms,
                            }
                        } else {
                            ProcessSignal::Stdout {
                                name: name.clone(),
                                line: line.clone(),
                                at_ms,
                            }
                        };
                        let _ = tx.send(signal);
                        lines.push(line);
                    }
                    Err(e) => {
                        tracing::debug!(process = %name, error = %e, "pipe read error");
                        break;
                    }
                }
            }
            lines
        })
    }

    /// Record the exit, emit `Exited`, and decide whether to auto-restart.
    /// Returns `(attempt, delay)` when another spawn iteration should run.
    fn settle(
        &self,
        code: Option<i32>,
        signal: Option<i32>,
        stdout: Vec<String>,
        stderr: Vec<String>,
    ) -> Option<(u32, Duration)> {
        let clean = code == Some(0) && signal.is_none();
        let at_ms = self.clock.epoch_ms();
        let mut max_retries_hit = false;

        let plan = {
            let mut st = self.state.lock();
            let was_stopping = st.status == ProcessStatus::Stopping;
            if let Some(since) = st.running_since.take() {
                if self.clock.now().duration_since(since) >= STABILITY_WINDOW {
                    st.restarts = 0;
                }
            }
            st.pid = None;

            let policy = self.cfg.restart.as_ref().filter(|r| {
                r.enabled && self.cfg.kind == ProcessKind::Service && !clean && !was_stopping
            });
            match policy {
                Some(policy) if st.restarts < policy.max_retries => {
                    st.restarts += 1;
                    st.status = ProcessStatus::Starting;
                    Some((st.restarts, Duration::from_millis(policy.delay_ms)))
                }
                Some(_) => {
                    max_retries_hit = true;
                    st.status = ProcessStatus::Crashed;
                    None
                }
                None => {
                    st.status = if was_stopping || clean {
                        ProcessStatus::Stopped
                    } else {
                        ProcessStatus::Crashed
                    };
                    None
                }
            }
        };

        self.send(ProcessSignal::Exited {
            name: self.cfg.name.clone(),
            code,
            signal,
            stdout,
            stderr,
            at_ms,
        });
        if max_retries_hit {
            self.send(ProcessSignal::Failed {
                name: self.cfg.name.clone(),
                reason: "max retries exceeded".to_string(),
                at_ms,
            });
        }
        if plan.is_none() {
            self.exit_watch.send_modify(|v| *v += 1);
        }
        plan
    }
}

#[cfg(unix)]
fn unix_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn unix_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
