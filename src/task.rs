//! Runs edge commands, potentially in parallel.  Unaware of the build
//! graph; just command execution.

use crate::graph::{EdgeId, RspFile};
use std::process::Command;
use std::sync::mpsc;
use std::time::Instant;

#[derive(Debug, PartialEq)]
pub enum Termination {
    Success,
    Interrupted,
    Failure,
}

/// The result of executing one edge's command.
pub struct TaskResult {
    pub termination: Termination,
    /// Console output, stdout and stderr combined.
    pub output: Vec<u8>,
}

pub struct FinishedTask {
    pub edge: EdgeId,
    pub span: (Instant, Instant),
    pub result: TaskResult,
}

/// The capability the build driver uses to run commands.  The driver itself
/// is single threaded; implementations provide whatever parallelism they
/// like behind this seam, and tests substitute an executor that does not
/// spawn processes at all.
pub trait Executor {
    fn can_start_more(&self) -> bool;
    fn is_running(&self) -> bool;
    fn start(&mut self, edge: EdgeId, cmdline: String, rspfile: Option<RspFile>);
    /// Wait for some started task to complete.  May block for a long time.
    fn wait(&mut self) -> FinishedTask;
}

fn write_rspfile(rspfile: &RspFile) -> anyhow::Result<()> {
    let path = std::path::Path::new(&rspfile.path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &rspfile.content)?;
    Ok(())
}

#[cfg(unix)]
fn shell_command(cmdline: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(cmdline);
    cmd
}

#[cfg(windows)]
fn shell_command(cmdline: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/c").arg(cmdline);
    cmd
}

fn run_command(cmdline: &str) -> anyhow::Result<TaskResult> {
    let out = shell_command(cmdline).output()?;

    let mut output = out.stdout;
    output.extend_from_slice(&out.stderr);

    let mut termination = Termination::Success;
    if !out.status.success() {
        termination = Termination::Failure;
        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = out.status.signal() {
                match sig {
                    libc::SIGINT => {
                        write!(output, "interrupted").unwrap();
                        termination = Termination::Interrupted;
                    }
                    _ => write!(output, "signal {}", sig).unwrap(),
                }
            }
        }
        #[cfg(windows)]
        {
            // 0xC000013A: STATUS_CONTROL_C_EXIT
            if out.status.code() == Some(-1073741510) {
                termination = Termination::Interrupted;
            }
        }
    }

    Ok(TaskResult {
        termination,
        output,
    })
}

/// Executes one task start to finish: response file, subprocess, cleanup.
fn run_task(cmdline: &str, rspfile: Option<&RspFile>) -> TaskResult {
    if let Some(rspfile) = rspfile {
        if let Err(err) = write_rspfile(rspfile) {
            return TaskResult {
                termination: Termination::Failure,
                output: format!("write {}: {}", rspfile.path, err).into_bytes(),
            };
        }
    }
    let result = run_command(cmdline).unwrap_or_else(|err| TaskResult {
        termination: Termination::Failure,
        output: err.to_string().into_bytes(),
    });
    if result.termination == Termination::Success {
        if let Some(rspfile) = rspfile {
            let _ = std::fs::remove_file(&rspfile.path);
        }
    }
    result
}

/// The production Executor: one thread per running task, completions
/// funneled over a channel to the waiting dispatcher.
pub struct Runner {
    finished_send: mpsc::Sender<FinishedTask>,
    finished_recv: mpsc::Receiver<FinishedTask>,
    running: usize,
    parallelism: usize,
}

impl Runner {
    pub fn new(parallelism: usize) -> Self {
        let (tx, rx) = mpsc::channel();
        Runner {
            finished_send: tx,
            finished_recv: rx,
            running: 0,
            parallelism,
        }
    }
}

impl Executor for Runner {
    fn can_start_more(&self) -> bool {
        self.running < self.parallelism
    }

    fn is_running(&self) -> bool {
        self.running > 0
    }

    fn start(&mut self, edge: EdgeId, cmdline: String, rspfile: Option<RspFile>) {
        let tx = self.finished_send.clone();
        std::thread::spawn(move || {
            let start = Instant::now();
            let result = run_task(&cmdline, rspfile.as_ref());
            let finish = Instant::now();
            // The send only fails if the receiver disappeared, e.g. due to
            // shutting down.
            let _ = tx.send(FinishedTask {
                edge,
                span: (start, finish),
                result,
            });
        });
        self.running += 1;
    }

    fn wait(&mut self) -> FinishedTask {
        let task = self.finished_recv.recv().unwrap();
        self.running -= 1;
        task
    }
}
