//! Determines which outputs are out of date, by recursive traversal from a
//! target over the producing edges of its inputs.

use crate::build_log::BuildLog;
use crate::densemap::DenseMap;
use crate::fs::{FileSystem, MTime};
use crate::graph::{EdgeId, NodeId, State, StatCache};
use anyhow::bail;

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    None,
    /// On the traversal stack; revisiting means the graph has a cycle.
    InProgress,
    Done,
}

/// One dirty-computation traversal.  Each edge is visited at most once per
/// traversal, and the mtimes observed through the StatCache are stable for
/// its duration.
pub struct DirtyCheck<'a> {
    state: &'a State,
    cache: &'a mut StatCache,
    fs: &'a dyn FileSystem,
    log: &'a BuildLog,
    visited: DenseMap<EdgeId, Visit>,
    node_dirty: DenseMap<NodeId, bool>,
    outputs_ready: DenseMap<EdgeId, bool>,
}

impl<'a> DirtyCheck<'a> {
    pub fn new(
        state: &'a State,
        cache: &'a mut StatCache,
        fs: &'a dyn FileSystem,
        log: &'a BuildLog,
    ) -> Self {
        DirtyCheck {
            state,
            cache,
            fs,
            log,
            visited: DenseMap::new_sized(state.edge_count(), Visit::None),
            node_dirty: DenseMap::new_sized(state.node_count(), false),
            outputs_ready: DenseMap::new_sized(state.edge_count(), true),
        }
    }

    /// Compute dirtiness for a node, recursing through its producing edge.
    /// A source node is dirty only if it was explicitly touched; an output
    /// node is dirty if its producing edge must run.
    pub fn check_dirty(&mut self, id: NodeId) -> anyhow::Result<bool> {
        match self.state.node(id).in_edge {
            None => {
                self.cache.stat(self.state, self.fs, id)?;
                Ok(self.cache.is_touched(id))
            }
            Some(edge) => {
                self.check_edge(edge)?;
                Ok(*self.node_dirty.get(id))
            }
        }
    }

    /// Whether an edge's outputs were all up to date as of this traversal.
    /// Valid after check_dirty has reached the edge.
    pub fn outputs_ready(&self, id: EdgeId) -> bool {
        *self.outputs_ready.get(id)
    }

    fn check_edge(&mut self, id: EdgeId) -> anyhow::Result<()> {
        match *self.visited.get(id) {
            Visit::Done => return Ok(()),
            Visit::InProgress => {
                let edge = self.state.edge(id);
                let out = edge
                    .outs()
                    .first()
                    .map(|&o| self.state.node(o).name.as_str())
                    .unwrap_or("?");
                bail!("dependency cycle involving '{}'", out);
            }
            Visit::None => {}
        }
        self.visited.set_grow(id, Visit::InProgress, Visit::None);

        let edge = self.state.edge(id);

        // Recurse into every input.  Order-only inputs are walked so their
        // producers are discovered, but they never contribute to dirtiness.
        let mut input_dirty = false;
        for &input in edge.depend_ins() {
            input_dirty |= self.check_dirty(input)?;
            self.check_source_present(id, input)?;
        }
        for &input in edge.order_only_ins() {
            self.check_dirty(input)?;
            self.check_source_present(id, input)?;
        }

        // Observe output mtimes regardless of the verdict; the scheduler
        // needs pre-execution values for restat reconciliation.
        let mut outputs_missing = false;
        let mut min_output = u64::MAX;
        for &out in edge.outs() {
            match self.cache.stat(self.state, self.fs, out)? {
                MTime::Missing => outputs_missing = true,
                MTime::Stamp(t) => min_output = min_output.min(t),
            }
        }

        let max_input = self.max_input_stamp(id)?;
        let rule = self.state.rule(edge.rule);
        let mut dirty = input_dirty || outputs_missing;

        if !dirty {
            let command = self.state.evaluate_command(id, true);
            for &out in edge.outs() {
                let entry = self.log.lookup_by_output(&self.state.node(out).name);
                // An edge whose recorded command differs must rerun; generator
                // edges are exempt, and an output never recorded is judged by
                // mtimes alone.
                if !rule.generator {
                    if let Some(entry) = entry {
                        if entry.command != command {
                            dirty = true;
                            break;
                        }
                    }
                }
                if min_output < max_input {
                    // Out of date by mtime, unless a restat run already
                    // established that these inputs produce identical output.
                    let demoted = rule.restat
                        && entry.map(|e| e.restat_mtime >= max_input).unwrap_or(false);
                    if !demoted {
                        dirty = true;
                        break;
                    }
                }
            }
        }

        for &out in edge.outs() {
            self.node_dirty.set_grow(out, dirty, false);
        }
        self.outputs_ready.set_grow(id, !dirty, true);
        self.visited.set_grow(id, Visit::Done, Visit::None);
        Ok(())
    }

    /// A missing input that nothing produces can never be brought up to
    /// date: a dangling dependency, reported against the consuming edge.
    fn check_source_present(&mut self, edge: EdgeId, input: NodeId) -> anyhow::Result<()> {
        let node = self.state.node(input);
        if node.in_edge.is_some() {
            return Ok(());
        }
        if self.cache.peek(input) == Some(MTime::Missing) {
            let out = self
                .state
                .edge(edge)
                .outs()
                .first()
                .map(|&o| self.state.node(o).name.as_str())
                .unwrap_or("?");
            bail!("'{}', needed by '{}', is missing", node.name, out);
        }
        Ok(())
    }

    /// Max mtime over the dirtying inputs, as cached by the recursion above.
    fn max_input_stamp(&mut self, id: EdgeId) -> anyhow::Result<u64> {
        let mut max = 0;
        for &input in self.state.edge(id).depend_ins() {
            let mtime = self.cache.stat(self.state, self.fs, input)?;
            max = max.max(mtime.to_stamp());
        }
        Ok(max)
    }
}

/// Max mtime over an edge's dirtying inputs, for recording in the build log
/// after execution.
pub fn max_input_stamp(
    state: &State,
    cache: &mut StatCache,
    fs: &dyn FileSystem,
    id: EdgeId,
) -> std::io::Result<u64> {
    let mut max = 0;
    for &input in state.edge(id).depend_ins() {
        max = max.max(cache.stat(state, fs, input)?.to_stamp());
    }
    Ok(max)
}
