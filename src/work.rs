//! The build driver: owns the graph, stat cache, plan, and build log, and
//! pushes edges through the executor as they become ready.
//!
//! Everything here runs on one thread.  Parallelism lives behind the
//! Executor seam; between waits, all mutation of build state is serial, so
//! the graph invariants need no locks.

use crate::build_log::BuildLog;
use crate::dirty::{self, DirtyCheck};
use crate::fs::{FileSystem, MTime};
use crate::graph::{EdgeId, NodeId, State, StatCache};
use crate::plan::{BuildState, Plan};
use crate::progress::Progress;
use crate::signal;
use crate::task::{Executor, FinishedTask, Termination};
use anyhow::bail;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct Options {
    /// Number of commands to run in parallel.
    pub parallelism: usize,
    /// Stop starting new work after this many failures; 0 means never stop.
    pub keep_going: usize,
    /// Plan and report, but run nothing and record nothing.
    pub dry_run: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            parallelism: 1,
            keep_going: 1,
            dry_run: false,
        }
    }
}

pub struct Work<'a> {
    state: &'a State,
    fs: &'a dyn FileSystem,
    cache: StatCache,
    log: &'a mut BuildLog,
    plan: Plan,
    executor: &'a mut dyn Executor,
    progress: &'a mut dyn Progress,
    options: Options,
    start: Instant,
    failures: usize,
    tasks_ran: usize,
    interrupted: bool,
}

impl<'a> Work<'a> {
    pub fn new(
        state: &'a State,
        fs: &'a dyn FileSystem,
        log: &'a mut BuildLog,
        executor: &'a mut dyn Executor,
        progress: &'a mut dyn Progress,
        options: Options,
    ) -> Self {
        let plan = Plan::new(state);
        Work {
            state,
            fs,
            cache: StatCache::new(),
            log,
            plan,
            executor,
            progress,
            options,
            start: Instant::now(),
            failures: 0,
            tasks_ran: 0,
            interrupted: false,
        }
    }

    /// Bring the named file into the desired work.  Graph problems (unknown
    /// target, dangling dependency, cycle) surface here, before any command
    /// runs.
    pub fn want_file(&mut self, path: &str) -> anyhow::Result<()> {
        match self.state.lookup(path) {
            Some(node) => self.want_node(node),
            None => bail!("unknown target '{}'", path),
        }
    }

    pub fn want_node(&mut self, node: NodeId) -> anyhow::Result<()> {
        let mut check = DirtyCheck::new(self.state, &mut self.cache, self.fs, self.log);
        self.plan.add_target(self.state, &mut check, node)
    }

    /// Run the plan to completion.  Returns the number of tasks executed,
    /// or None if the build failed or was interrupted.
    pub fn run(&mut self) -> anyhow::Result<Option<usize>> {
        loop {
            if !self.interrupted && signal::was_interrupted() {
                self.interrupted = true;
                self.progress.log("interrupted by user");
            }

            if self.can_start_more() {
                if let Some(id) = self.plan.find_work() {
                    self.start_edge(id)?;
                    continue;
                }
            }

            if self.executor.is_running() {
                let task = self.executor.wait();
                self.finish_task(task)?;
                continue;
            }

            // Nothing startable and nothing running: finished, or wedged by
            // failures.
            break;
        }

        if self.interrupted || self.failures > 0 {
            return Ok(None);
        }
        if self.plan.more_to_do() {
            // Everything the plan still wants is downstream of a failure;
            // with failures == 0 this is a bug, not a build problem.
            bail!("plan wedged with no failures");
        }
        Ok(Some(self.tasks_ran))
    }

    fn can_start_more(&self) -> bool {
        if self.interrupted {
            return false;
        }
        if self.options.keep_going > 0 && self.failures >= self.options.keep_going {
            return false;
        }
        self.options.dry_run || self.executor.can_start_more()
    }

    fn start_edge(&mut self, id: EdgeId) -> anyhow::Result<()> {
        let cmdline = self.state.evaluate_command(id, false);
        let message = self.state.edge_message(id);
        self.progress.task_started(id, &message, &cmdline);
        self.progress.update(self.plan.counts());

        if self.options.dry_run {
            // Pretend the command ran and changed nothing on disk.
            self.tasks_ran += 1;
            self.plan.edge_finished(self.state, id);
            self.progress.update(self.plan.counts());
            return Ok(());
        }

        self.executor.start(id, cmdline, self.state.rspfile(id));
        Ok(())
    }

    fn finish_task(&mut self, task: FinishedTask) -> anyhow::Result<()> {
        let id = task.edge;
        let message = self.state.edge_message(id);
        self.progress.task_finished(id, &message, &task.result);

        match task.result.termination {
            Termination::Success => {
                self.tasks_ran += 1;
                self.finish_edge(id, task.span.0, task.span.1)?;
            }
            Termination::Interrupted => {
                self.interrupted = true;
                self.plan.edge_failed(id);
            }
            Termination::Failure => {
                self.failures += 1;
                self.plan.edge_failed(id);
            }
        }
        self.progress.update(self.plan.counts());
        Ok(())
    }

    /// Post-execution bookkeeping for a successful edge: refresh output
    /// stats, record the command, and reconcile restat edges.
    fn finish_edge(&mut self, id: EdgeId, started: Instant, ended: Instant) -> anyhow::Result<()> {
        let edge = self.state.edge(id);

        // Remember the pre-execution mtimes, then invalidate so consumers
        // observe the fresh state.
        let before: Vec<(NodeId, Option<MTime>)> = edge
            .outs()
            .iter()
            .map(|&out| (out, self.cache.peek(out)))
            .collect();
        for &(out, _) in &before {
            self.cache.invalidate(out);
            self.cache.stat(self.state, self.fs, out)?;
        }

        let restat_mtime = dirty::max_input_stamp(self.state, &mut self.cache, self.fs, id)?;
        let start_ms = started.duration_since(self.start).as_millis() as i32;
        let end_ms = ended.duration_since(self.start).as_millis() as i32;
        if let Err(err) = self.log.record_command(self.state, id, start_ms, end_ms, restat_mtime) {
            // Not fatal: the build is correct, only persistence suffered.
            self.progress
                .log(&format!("warning: writing build log: {}", err));
        }

        if self.state.rule(edge.rule).restat {
            let unchanged: Vec<NodeId> = before
                .iter()
                .filter(|&&(out, prev)| prev.is_some() && self.cache.peek(out) == prev)
                .map(|&(out, _)| out)
                .collect();
            self.demote_clean_consumers(unchanged)?;
        }

        self.plan.edge_finished(self.state, id);
        Ok(())
    }

    /// An edge's outputs came out identical, so consumers that were only
    /// dirty because of this edge may no longer need to run.  Check them
    /// and their downstreams while they are still waiting.
    fn demote_clean_consumers(&mut self, mut unchanged: Vec<NodeId>) -> anyhow::Result<()> {
        while let Some(node) = unchanged.pop() {
            for i in 0..self.state.node(node).out_edges.len() {
                let consumer = self.state.node(node).out_edges[i];
                if self.plan.state(consumer) != BuildState::Want {
                    continue;
                }
                let Some(&out) = self.state.edge(consumer).outs().first() else {
                    continue;
                };
                let mut check = DirtyCheck::new(self.state, &mut self.cache, self.fs, self.log);
                check.check_dirty(out)?;
                if check.outputs_ready(consumer) {
                    self.plan.edge_clean(self.state, consumer);
                    unchanged.extend(self.state.edge(consumer).outs());
                }
            }
        }
        Ok(())
    }
}
