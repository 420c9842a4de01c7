//! Reactive nodes.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};

use slotmap::new_key_type;
use smallvec::SmallVec;

use crate::policy::{Invalidate, Trigger};

new_key_type! {
    /// Generational key identifying a node in its graph's arena.
    ///
    /// A key whose slot has been freed simply fails to resolve, which is what
    /// gives handles their weak-reference behavior.
    pub struct NodeId;
}

pub(crate) type NodeValue = Box<dyn Any + Send + Sync>;
pub(crate) type NodeCallback = Box<dyn FnMut(&mut NodeValue) -> bool + Send + Sync>;
pub(crate) type FilterFn = Box<dyn FnMut() -> bool + Send + Sync>;

/// Hands out process-unique serial numbers for nodes, batches and field
/// owners. Monotone, never reused.
pub(crate) fn next_serial() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A vertex of the dependency graph.
pub(crate) struct Node {
    /// Monotone unique id; breaks depth ties when ordering batch commits.
    pub serial: u64,
    /// The value cell. `None` means the node was never written.
    pub value: Option<NodeValue>,
    /// Recomputation closure returning whether the value changed.
    /// Absent for plain sources.
    pub callback: Option<NodeCallback>,
    /// Nodes this node reads (edges out).
    pub dependencies: SmallVec<[NodeId; 4]>,
    /// Nodes that read this node (edges in). Mirrors `dependencies` exactly.
    pub dependents: SmallVec<[NodeId; 4]>,
    /// Longest observed downstream chain length. Monotone while the node is
    /// alive; a conservative bound used only to order batch commits.
    pub depth: u32,
    /// Ids of the active batches this node is enrolled in. While non-empty
    /// the node may not be rebound or explicitly closed.
    pub batches: SmallVec<[u64; 2]>,
    /// Number of live user handles referring to this node.
    pub ref_count: u32,
    /// Decides whether an incoming notification recomputes this node.
    pub trigger: Trigger,
    /// Predicate backing [`Trigger::Filter`], installed via the handle.
    pub filter: Option<FilterFn>,
    /// Applied exactly once when `ref_count` drops to zero.
    pub invalidate: Invalidate,
    /// Id of the field-owning object wrapped by this node, if any. Used to
    /// drop the field-index entry when the container closes.
    pub object_id: Option<u64>,
    /// Dirty flag driving the scheduler.
    pub state: NodeState,
    /// DFS bookkeeping for the topological sort.
    pub mark: Mark,
}

impl Node {
    /// A fresh unlinked node. The initial `ref_count` of 1 accounts for the
    /// handle the factory is about to return.
    pub fn new(trigger: Trigger, invalidate: Invalidate) -> Self {
        Self {
            serial: next_serial(),
            value: None,
            callback: None,
            dependencies: SmallVec::new(),
            dependents: SmallVec::new(),
            depth: 0,
            batches: SmallVec::new(),
            ref_count: 1,
            trigger,
            filter: None,
            invalidate,
            object_id: None,
            state: NodeState::Clean,
            mark: Mark::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeState {
    Clean,
    Dirty,
}

/// A mark used for DFS traversal of the reactive graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mark {
    /// Mark when DFS reaches node.
    Temp,
    /// Mark when DFS is done with node.
    Permanent,
    /// No mark.
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serials_are_unique_and_monotone() {
        let a = next_serial();
        let b = next_serial();
        assert!(b > a);
    }

    #[test]
    fn fresh_node_is_clean_and_singly_referenced() {
        let node = Node::new(Trigger::OnChange, Invalidate::Keep);
        assert_eq!(node.ref_count, 1);
        assert_eq!(node.state, NodeState::Clean);
        assert!(node.value.is_none());
        assert!(node.batches.is_empty());
    }
}
