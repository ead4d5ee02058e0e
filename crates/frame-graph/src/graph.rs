use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use marker_loc_core::{Iso3, Stamp};

use crate::history::{EdgeHistory, SampleOutcome};

/// Errors reported by [`FrameGraph`] operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The requested edge would close a loop in the frame forest. This is a
    /// configuration or programming error, never a per-frame condition.
    #[error("inserting edge {parent} -> {child} would close a cycle")]
    CycleDetected { parent: String, child: String },
    /// The two frames live in different trees (or one of them is unknown).
    #[error("no path connects frame {from} to frame {to}")]
    DisconnectedFrames { from: String, to: String },
    /// No sample satisfied the requested stamp before the lookup deadline.
    #[error("transform {from} -> {to} unavailable at stamp {stamp:?}")]
    TransformUnavailable {
        from: String,
        to: String,
        stamp: Stamp,
    },
}

#[derive(Clone, Debug)]
pub struct GraphConfig {
    /// How long dynamic edge samples are retained for time-indexed lookups.
    /// Doubles as the staleness bound when a lookup stamp is newer than the
    /// newest stored sample.
    pub retention: Duration,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(10),
        }
    }
}

struct Link {
    parent: usize,
    history: EdgeHistory,
}

struct FrameNode {
    name: String,
    link: Option<Link>,
}

#[derive(Default)]
struct GraphState {
    ids: HashMap<String, usize>,
    nodes: Vec<FrameNode>,
}

impl GraphState {
    fn intern(&mut self, name: &str) -> usize {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(FrameNode {
            name: name.to_owned(),
            link: None,
        });
        self.ids.insert(name.to_owned(), id);
        id
    }

    fn resolve(&self, name: &str) -> Option<usize> {
        self.ids.get(name).copied()
    }

    /// Frame ids from `id` up to its root, inclusive.
    fn ancestry(&self, mut id: usize) -> Vec<usize> {
        let mut chain = vec![id];
        while let Some(link) = &self.nodes[id].link {
            id = link.parent;
            chain.push(id);
        }
        chain
    }

    fn would_cycle(&self, parent: usize, child: usize) -> bool {
        // Walking up from `parent`: reaching `child` means the new edge
        // would close a loop.
        let mut cur = parent;
        loop {
            if cur == child {
                return true;
            }
            match &self.nodes[cur].link {
                Some(link) => cur = link.parent,
                None => return false,
            }
        }
    }
}

enum ComposeOutcome {
    Done(Iso3),
    Disconnected,
    Expired,
    Wait,
}

/// Time-indexed forest of named frames: single writer, many blocking readers.
///
/// Readers never observe a half-updated transform: the edges of a lookup
/// path are sampled and composed inside one critical section, and waiting
/// readers release the lock so they never stall the writer.
pub struct FrameGraph {
    config: GraphConfig,
    state: Mutex<GraphState>,
    inserted: Condvar,
}

impl Default for FrameGraph {
    fn default() -> Self {
        Self::new(GraphConfig::default())
    }
}

impl FrameGraph {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            state: Mutex::new(GraphState::default()),
            inserted: Condvar::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_link<F>(&self, parent: &str, child: &str, apply: F) -> Result<(), GraphError>
    where
        F: FnOnce(&mut Option<Link>, usize),
    {
        let mut state = self.lock_state();
        let parent_id = state.intern(parent);
        let child_id = state.intern(child);
        if state.would_cycle(parent_id, child_id) {
            return Err(GraphError::CycleDetected {
                parent: parent.to_owned(),
                child: child.to_owned(),
            });
        }
        apply(&mut state.nodes[child_id].link, parent_id);
        drop(state);
        self.inserted.notify_all();
        Ok(())
    }

    /// Record a static edge: `pose` places `child` in `parent` at any time.
    ///
    /// Re-inserting the same pair overwrites the stored transform.
    pub fn insert_static(&self, parent: &str, child: &str, pose: Iso3) -> Result<(), GraphError> {
        self.with_link(parent, child, |link, parent_id| {
            *link = Some(Link {
                parent: parent_id,
                history: EdgeHistory::Static(pose),
            });
        })
    }

    /// Record a stamped dynamic sample for the `parent` -> `child` edge.
    ///
    /// A sample replaces any previous value at the same stamp; older stamps
    /// are kept in a retention-bounded history. Changing the parent of
    /// `child` replaces the edge entirely.
    pub fn insert(
        &self,
        parent: &str,
        child: &str,
        pose: Iso3,
        stamp: Stamp,
    ) -> Result<(), GraphError> {
        let retention = self.config.retention;
        self.with_link(parent, child, |link, parent_id| match link {
            Some(l) if l.parent == parent_id => l.history.push(stamp, pose, retention),
            _ => {
                *link = Some(Link {
                    parent: parent_id,
                    history: EdgeHistory::dynamic(stamp, pose),
                })
            }
        })
    }

    /// Compose the transform that expresses `to`-frame coordinates in the
    /// `from` frame at the requested stamp.
    ///
    /// The path runs through the nearest common ancestor of the two frames;
    /// edges traversed upward from `to` are composed directly, edges on the
    /// `from` side are inverted. When a dynamic edge on the path has no
    /// usable sample yet, the call blocks until the next relevant insertion
    /// or the `timeout` deadline, whichever comes first.
    pub fn lookup(
        &self,
        from: &str,
        to: &str,
        stamp: Stamp,
        timeout: Duration,
    ) -> Result<Iso3, GraphError> {
        if from == to {
            return Ok(Iso3::identity());
        }
        let deadline = Instant::now() + timeout;
        let mut state = self.lock_state();
        loop {
            match compose(&state, from, to, stamp, self.config.retention) {
                ComposeOutcome::Done(pose) => return Ok(pose),
                ComposeOutcome::Disconnected => {
                    return Err(GraphError::DisconnectedFrames {
                        from: from.to_owned(),
                        to: to.to_owned(),
                    })
                }
                ComposeOutcome::Expired => {
                    return Err(GraphError::TransformUnavailable {
                        from: from.to_owned(),
                        to: to.to_owned(),
                        stamp,
                    })
                }
                ComposeOutcome::Wait => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(GraphError::TransformUnavailable {
                            from: from.to_owned(),
                            to: to.to_owned(),
                            stamp,
                        });
                    }
                    let (guard, _) = self
                        .inserted
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = guard;
                }
            }
        }
    }

    /// Names of all frames currently known to the graph.
    pub fn frame_names(&self) -> Vec<String> {
        let state = self.lock_state();
        state.nodes.iter().map(|n| n.name.clone()).collect()
    }
}

fn compose(
    state: &GraphState,
    from: &str,
    to: &str,
    stamp: Stamp,
    retention: Duration,
) -> ComposeOutcome {
    let (Some(from_id), Some(to_id)) = (state.resolve(from), state.resolve(to)) else {
        return ComposeOutcome::Disconnected;
    };
    let from_chain = state.ancestry(from_id);
    let to_chain = state.ancestry(to_id);

    // Nearest common ancestor: the first frame on the `from` ancestry that
    // also appears on the `to` ancestry.
    let mut meet = None;
    for (i, id) in from_chain.iter().enumerate() {
        if let Some(j) = to_chain.iter().position(|x| x == id) {
            meet = Some((i, j));
            break;
        }
    }
    let Some((from_steps, to_steps)) = meet else {
        return ComposeOutcome::Disconnected;
    };

    let chain_to_ancestor = |chain: &[usize]| -> Result<Iso3, ComposeOutcome> {
        let mut acc = Iso3::identity();
        for &id in chain {
            let Some(link) = state.nodes[id].link.as_ref() else {
                return Err(ComposeOutcome::Disconnected);
            };
            match link.history.sample(stamp, retention) {
                SampleOutcome::Found(pose) => acc = pose * acc,
                SampleOutcome::Waitable => return Err(ComposeOutcome::Wait),
                SampleOutcome::Expired => return Err(ComposeOutcome::Expired),
            }
        }
        Ok(acc)
    };

    let ancestor_from = match chain_to_ancestor(&from_chain[..from_steps]) {
        Ok(pose) => pose,
        Err(outcome) => return outcome,
    };
    let ancestor_to = match chain_to_ancestor(&to_chain[..to_steps]) {
        Ok(pose) => pose,
        Err(outcome) => return outcome,
    };

    ComposeOutcome::Done(ancestor_from.inverse() * ancestor_to)
}
