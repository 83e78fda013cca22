//! The registered state hierarchy: an arena of nodes with precomputed
//! ancestor chains.

use std::fmt;

use crate::error::ConfigError;

/// Handle to a state registered with a machine.
///
/// Returned by [`StateMachine::add_state`](crate::StateMachine::add_state);
/// only meaningful for the machine that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub(crate) usize);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Node {
    parent: Option<StateId>,
    /// Ancestor chain, self first, root last.
    chain: Vec<StateId>,
    active: bool,
}

/// Topology and active-set bookkeeping for one machine.
///
/// The hierarchy is a forest: nodes may have no parent, and nothing requires
/// a single root. Parents must be registered before their children, so the
/// parent graph cannot contain cycles.
pub(crate) struct StateTree {
    nodes: Vec<Node>,
    initial: Option<StateId>,
}

impl StateTree {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            initial: None,
        }
    }

    /// Registers a node and precomputes its ancestor chain.
    pub(crate) fn add(&mut self, parent: Option<StateId>) -> Result<StateId, ConfigError> {
        if let Some(p) = parent {
            if !self.contains(p) {
                return Err(ConfigError::UnknownParent(p));
            }
        }
        let id = StateId(self.nodes.len());
        let mut chain = vec![id];
        if let Some(p) = parent {
            chain.extend_from_slice(&self.nodes[p.0].chain);
        }
        self.nodes.push(Node {
            parent,
            chain,
            active: false,
        });
        Ok(id)
    }

    pub(crate) fn set_initial(&mut self, id: StateId) -> Result<(), ConfigError> {
        if !self.contains(id) {
            return Err(ConfigError::UnknownState(id));
        }
        self.initial = Some(id);
        Ok(())
    }

    pub(crate) fn initial(&self) -> Option<StateId> {
        self.initial
    }

    pub(crate) fn contains(&self, id: StateId) -> bool {
        id.0 < self.nodes.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn parent(&self, id: StateId) -> Option<StateId> {
        self.nodes[id.0].parent
    }

    /// Ancestor chain of `id`, self first, root last.
    pub(crate) fn chain(&self, id: StateId) -> &[StateId] {
        &self.nodes[id.0].chain
    }

    pub(crate) fn is_active(&self, id: StateId) -> bool {
        self.nodes[id.0].active
    }

    pub(crate) fn set_active(&mut self, id: StateId, active: bool) {
        self.nodes[id.0].active = active;
    }

    /// Plans the entry side of a transition to `target`.
    ///
    /// Returns the states to enter (target first, shallowest last is
    /// reversed by the caller) and the pivot: the first *active* ancestor
    /// strictly above `target`, `None` when the target's chain reaches a
    /// root without meeting one. Exits run from the active leaf up to,
    /// excluding, the pivot. Collecting the target unconditionally is what
    /// makes a self-transition exit and re-enter, and a transition to an
    /// active ancestor re-enter that ancestor.
    pub(crate) fn plan_entry(&self, target: StateId) -> (Vec<StateId>, Option<StateId>) {
        let mut path = vec![target];
        let mut cur = self.parent(target);
        while let Some(id) = cur {
            if self.is_active(id) {
                return (path, Some(id));
            }
            path.push(id);
            cur = self.parent(id);
        }
        (path, None)
    }
}
