//! Build progress tracking and reporting, for the purpose of display to the
//! user.

use crate::graph::EdgeId;
use crate::plan::{BuildState, StateCounts};
use crate::task::{TaskResult, Termination};
use crate::terminal;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Trait for build progress notifications.
pub trait Progress {
    /// Called as individual tasks progress through build states.
    fn update(&mut self, counts: &StateCounts);

    /// Called when a task starts; the message is the edge's description or
    /// command, the cmdline its exact command.
    fn task_started(&mut self, id: EdgeId, message: &str, cmdline: &str);

    /// Called when a task completes.
    fn task_finished(&mut self, id: EdgeId, message: &str, result: &TaskResult);

    /// Log a line of output without corrupting the progress display.
    fn log(&mut self, msg: &str);
}

/// Progress implementation that prints nothing at all, for -t queries and
/// tests.
#[derive(Default)]
pub struct SilentProgress {}

impl Progress for SilentProgress {
    fn update(&mut self, _counts: &StateCounts) {}
    fn task_started(&mut self, _id: EdgeId, _message: &str, _cmdline: &str) {}
    fn task_finished(&mut self, _id: EdgeId, _message: &str, _result: &TaskResult) {}
    fn log(&mut self, _msg: &str) {}
}

/// Progress implementation for "dumb" consoles, without any overprinting.
pub struct DumbConsoleProgress {
    /// Whether to print command lines of started programs.
    verbose: bool,

    /// The id of the last command printed, used to avoid printing it twice
    /// when we have two updates from the same command in a row.
    last_started: Option<EdgeId>,
}

impl DumbConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            last_started: None,
        }
    }
}

impl Progress for DumbConsoleProgress {
    fn update(&mut self, _counts: &StateCounts) {
        // ignore
    }

    fn task_started(&mut self, id: EdgeId, message: &str, cmdline: &str) {
        self.log(if self.verbose { cmdline } else { message });
        self.last_started = Some(id);
    }

    fn task_finished(&mut self, id: EdgeId, message: &str, result: &TaskResult) {
        match result.termination {
            Termination::Success => {
                if result.output.is_empty() || self.last_started == Some(id) {
                    // Output is empty, or we just printed the command.
                } else {
                    self.log(message)
                }
            }
            Termination::Interrupted => self.log(&format!("interrupted: {}", message)),
            Termination::Failure => self.log(&format!("failed: {}", message)),
        };
        if !result.output.is_empty() {
            std::io::stdout().write_all(&result.output).unwrap();
        }
    }

    fn log(&mut self, msg: &str) {
        println!("{}", msg);
    }
}

/// Progress implementation for "fancy" consoles, with a progress bar.
/// Each time it prints, it clears from the cursor to the end of the console,
/// prints the status text, and then moves the cursor back up to the start
/// position.  This means on errors etc. we can clear any status by clearing
/// the console too.
pub struct FancyConsoleProgress {
    state: Arc<Mutex<FancyState>>,
    dirty_cond: Arc<Condvar>,
}

/// Screen updates happen after this duration passes, to reduce the amount
/// of printing in the case of rapid updates.  This helps with terminal
/// flicker.
const UPDATE_DELAY: Duration = Duration::from_millis(50);

impl FancyConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        let dirty_cond = Arc::new(Condvar::new());
        let state = Arc::new(Mutex::new(FancyState {
            done: false,
            dirty: false,
            counts: StateCounts::default(),
            tasks: VecDeque::new(),
            verbose,
        }));

        // Thread to debounce status updates -- waits a bit, then prints
        // after any dirty state.
        std::thread::spawn({
            let state = state.clone();
            let dirty_cond = dirty_cond.clone();
            move || loop {
                // Wait to be notified of a display update, or time out at
                // 500ms so long-running tasks can show elapsed time.
                {
                    let (state, _) = dirty_cond
                        .wait_timeout_while(
                            state.lock().unwrap(),
                            Duration::from_millis(500),
                            |state| !state.dirty,
                        )
                        .unwrap();
                    if state.done {
                        break;
                    }
                }

                // Delay a little bit in case more display updates come in.
                std::thread::sleep(UPDATE_DELAY);

                state.lock().unwrap().print_progress();
            }
        });

        FancyConsoleProgress { state, dirty_cond }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FancyState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        let result = f(&mut state);
        if state.dirty {
            self.dirty_cond.notify_one();
        }
        result
    }
}

impl Progress for FancyConsoleProgress {
    fn update(&mut self, counts: &StateCounts) {
        self.with_state(|state| state.update(counts));
    }

    fn task_started(&mut self, id: EdgeId, message: &str, cmdline: &str) {
        self.with_state(|state| state.task_started(id, message, cmdline));
    }

    fn task_finished(&mut self, id: EdgeId, message: &str, result: &TaskResult) {
        self.with_state(|state| state.task_finished(id, message, result));
    }

    fn log(&mut self, msg: &str) {
        self.with_state(|state| state.log(msg));
    }
}

impl Drop for FancyConsoleProgress {
    fn drop(&mut self) {
        self.with_state(|state| state.cleanup());
        self.dirty_cond.notify_one();
    }
}

/// Currently running build task, as tracked for progress updates.
struct Task {
    id: EdgeId,
    /// When the task started running.
    start: Instant,
    /// Build status message for the task.
    message: String,
}

struct FancyState {
    done: bool,
    dirty: bool,

    /// Counts of tasks in each state.
    counts: StateCounts,
    /// Build tasks that are currently executing.
    /// Pushed to as tasks are started, so it's always in order of age.
    tasks: VecDeque<Task>,
    /// Whether to print command lines of started programs.
    verbose: bool,
}

impl FancyState {
    fn dirty(&mut self) {
        self.dirty = true;
    }

    fn update(&mut self, counts: &StateCounts) {
        self.counts = counts.clone();
        self.dirty();
    }

    fn task_started(&mut self, id: EdgeId, message: &str, cmdline: &str) {
        if self.verbose {
            self.log(cmdline);
        }
        self.tasks.push_back(Task {
            id,
            start: Instant::now(),
            message: message.to_string(),
        });
        self.dirty();
    }

    fn task_finished(&mut self, id: EdgeId, message: &str, result: &TaskResult) {
        if let Some(pos) = self.tasks.iter().position(|t| t.id == id) {
            self.tasks.remove(pos);
        }
        match result.termination {
            Termination::Success => {
                if result.output.is_empty() {
                    // Common case: don't show anything.
                } else {
                    self.log(message)
                }
            }
            Termination::Interrupted => self.log(&format!("interrupted: {}", message)),
            Termination::Failure => self.log(&format!("failed: {}", message)),
        };
        if !result.output.is_empty() {
            self.clear_progress();
            std::io::stdout().write_all(&result.output).unwrap();
        }
        self.dirty();
    }

    fn log(&mut self, msg: &str) {
        self.clear_progress();
        println!("{}", msg);
        self.dirty();
    }

    fn cleanup(&mut self) {
        self.clear_progress();
        self.done = true;
        self.dirty(); // let the debounce thread quit
    }

    fn clear_progress(&self) {
        // If the user hit ctl-c, it may have printed something on the line.
        // So \r to go to first column first, then clear anything below.
        std::io::stdout().write_all(b"\r\x1b[J").unwrap();
    }

    fn print_progress(&mut self) {
        self.clear_progress();
        let failed = self.counts.get(BuildState::Failed);
        let mut progress_line = format!(
            "[{}] {}/{} done, ",
            progress_bar(&self.counts, 40),
            self.counts.get(BuildState::Done) + failed,
            self.counts.total()
        );
        if failed > 0 {
            progress_line.push_str(&format!("{} failed, ", failed));
        }
        progress_line.push_str(&format!(
            "{}/{} running",
            self.tasks.len(),
            self.counts.get(BuildState::Ready) + self.counts.get(BuildState::Running),
        ));
        println!("{}", progress_line);
        let mut lines = 1;

        let max_cols = terminal::get_cols().unwrap_or(80);
        let max_tasks = 8;
        let now = Instant::now();
        for task in self.tasks.iter().take(max_tasks) {
            let delta = now.duration_since(task.start).as_secs() as usize;
            println!("{}", task_message(&task.message, delta, max_cols));
            lines += 1;
        }

        if self.tasks.len() > max_tasks {
            println!("...and {} more", self.tasks.len() - max_tasks);
            lines += 1;
        }

        // Move cursor up to the first printed line, for overprinting.
        print!("\x1b[{}A", lines);
        std::io::stdout().flush().unwrap();
        self.dirty = false;
    }
}

/// Format a task's status message to optionally include how long it has been
/// running and also to fit within a maximum number of terminal columns.
fn task_message(message: &str, seconds: usize, max_cols: usize) -> String {
    let time_note = if seconds > 2 {
        format!(" ({}s)", seconds)
    } else {
        "".into()
    };
    let mut out = message.to_owned();
    if out.len() + time_note.len() >= max_cols {
        out.truncate(max_cols - time_note.len() - 3);
        out.push_str("...");
    }
    out.push_str(&time_note);
    out
}

/// Render a StateCounts as an ASCII progress bar.
fn progress_bar(counts: &StateCounts, bar_size: usize) -> String {
    let mut bar = String::with_capacity(bar_size);
    let mut sum: usize = 0;
    let total = counts.total();
    if total == 0 {
        return " ".repeat(bar_size);
    }
    for (count, ch) in [
        (
            counts.get(BuildState::Done) + counts.get(BuildState::Failed),
            '=',
        ),
        (
            counts.get(BuildState::Ready) + counts.get(BuildState::Running),
            '-',
        ),
        (counts.get(BuildState::Want), ' '),
    ] {
        sum += count;
        let mut target_size = sum * bar_size / total;
        if count > 0 && target_size == bar.len() && target_size < bar_size {
            // Non-zero count always gets at least one tick.
            target_size += 1;
        }
        while bar.len() < target_size {
            bar.push(ch);
        }
    }
    bar
}
