//! The build plan: the frontier of wanted-but-not-yet-done edges, and the
//! bookkeeping that decides which of them are ready to run.

use crate::densemap::DenseMap;
use crate::dirty::DirtyCheck;
use crate::graph::{EdgeId, NodeId, State};
use std::collections::VecDeque;

/// The lifecycle of an edge during a build.  Transitions are monotonic:
/// want -> ready -> running -> done/failed, with clean demotion allowed to
/// jump straight to done.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
    /// Not part of the desired work.
    Unknown,
    /// Must run, but some input is not ready yet.
    Want,
    /// All inputs ready; in the FIFO queue for find_work.
    Ready,
    /// Handed out by find_work.
    Running,
    Done,
    Failed,
}

const STATE_COUNT: usize = 6;

fn state_index(state: BuildState) -> usize {
    match state {
        BuildState::Unknown => 0,
        BuildState::Want => 1,
        BuildState::Ready => 2,
        BuildState::Running => 3,
        BuildState::Done => 4,
        BuildState::Failed => 5,
    }
}

/// Counts of edges in each state, for progress display.
#[derive(Clone, Debug, Default)]
pub struct StateCounts([usize; STATE_COUNT]);

impl StateCounts {
    pub fn add(&mut self, state: BuildState, delta: isize) {
        let slot = &mut self.0[state_index(state)];
        *slot = slot.checked_add_signed(delta).unwrap();
    }

    pub fn get(&self, state: BuildState) -> usize {
        self.0[state_index(state)]
    }

    /// All edges participating in the build.
    pub fn total(&self) -> usize {
        self.0.iter().sum::<usize>() - self.get(BuildState::Unknown)
    }
}

pub struct Plan {
    states: DenseMap<EdgeId, BuildState>,
    /// Per wanted edge, the number of its input nodes whose producing edge
    /// has not finished yet.  An edge becomes ready when this reaches zero.
    unready: DenseMap<EdgeId, usize>,
    ready: VecDeque<EdgeId>,
    counts: StateCounts,
    /// Wanted edges that have not reached done or failed.
    pending: usize,
}

impl Plan {
    pub fn new(state: &State) -> Self {
        Plan {
            states: DenseMap::new_sized(state.edge_count(), BuildState::Unknown),
            unready: DenseMap::new_sized(state.edge_count(), 0),
            ready: VecDeque::new(),
            counts: StateCounts::default(),
            pending: 0,
        }
    }

    pub fn state(&self, id: EdgeId) -> BuildState {
        *self.states.get(id)
    }

    pub fn counts(&self) -> &StateCounts {
        &self.counts
    }

    fn set_state(&mut self, id: EdgeId, to: BuildState) {
        let from = *self.states.get(id);
        if from != BuildState::Unknown {
            self.counts.add(from, -1);
        }
        self.counts.add(to, 1);
        *self.states.get_mut(id) = to;
    }

    /// Mark the target's producing edge wanted, along with any input edges
    /// required to make it ready.  Only dirty edges are added; re-adding an
    /// already-wanted target is a no-op.  The dirty computation for the
    /// target must already have run within the passed check.
    pub fn add_target(
        &mut self,
        state: &State,
        check: &mut DirtyCheck,
        target: NodeId,
    ) -> anyhow::Result<()> {
        check.check_dirty(target)?;
        if let Some(edge) = state.node(target).in_edge {
            if !check.outputs_ready(edge) {
                self.want_edge(state, check, edge);
            }
        }
        Ok(())
    }

    fn want_edge(&mut self, state: &State, check: &DirtyCheck, id: EdgeId) {
        if self.state(id) != BuildState::Unknown {
            return;
        }
        self.set_state(id, BuildState::Want);
        self.pending += 1;

        // Count the inputs we must wait for, recursing to want their
        // producers.  Order-only inputs gate readiness here even though
        // they never contribute to dirtiness.
        let mut unready = 0;
        for &input in state.edge(id).all_ins() {
            if let Some(producer) = state.node(input).in_edge {
                if !check.outputs_ready(producer) {
                    unready += 1;
                    self.want_edge(state, check, producer);
                }
            }
        }
        *self.unready.get_mut(id) = unready;

        if unready == 0 {
            self.make_ready(id);
        }
    }

    fn make_ready(&mut self, id: EdgeId) {
        self.set_state(id, BuildState::Ready);
        self.ready.push_back(id);
    }

    /// The next edge to run: FIFO among eligible edges.  Returns None when
    /// the frontier is empty, which is distinct from the build being done;
    /// see more_to_do.
    pub fn find_work(&mut self) -> Option<EdgeId> {
        let id = self.ready.pop_front()?;
        self.set_state(id, BuildState::Running);
        Some(id)
    }

    /// Transition a finished edge to done and unblock any consumer that was
    /// waiting only on its outputs.
    pub fn edge_finished(&mut self, state: &State, id: EdgeId) {
        self.set_state(id, BuildState::Done);
        self.pending -= 1;
        for &out in state.edge(id).outs() {
            for &consumer in &state.node(out).out_edges {
                if self.state(consumer) != BuildState::Want {
                    continue;
                }
                let n = self.unready.get_mut(consumer);
                *n -= 1;
                if *n == 0 {
                    self.make_ready(consumer);
                }
            }
        }
    }

    /// A wanted edge found to be clean after all (restat demotion): counts
    /// as finished without ever running.  Valid from want or ready.
    pub fn edge_clean(&mut self, state: &State, id: EdgeId) {
        if self.state(id) == BuildState::Ready {
            self.ready.retain(|&e| e != id);
        }
        self.edge_finished(state, id);
    }

    /// A failed edge is terminal and releases nothing: its consumers can
    /// never become ready this run.
    pub fn edge_failed(&mut self, id: EdgeId) {
        self.set_state(id, BuildState::Failed);
        self.pending -= 1;
    }

    /// True while at least one wanted edge has not reached done or failed.
    pub fn more_to_do(&self) -> bool {
        self.pending > 0
    }
}
