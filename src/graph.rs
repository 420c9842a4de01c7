//! The dependency graph and its change-propagation scheduler.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use slotmap::{SecondaryMap, SlotMap};
use smallvec::SmallVec;

use crate::cache::{CacheStats, VersionedCache};
use crate::error::{Error, ErrorKind, Result};
use crate::node::{Mark, Node, NodeId, NodeState};
use crate::policy::Invalidate;
use crate::threading;

const CACHE_CAPACITY: usize = 1024;
const CACHE_TTL: Duration = Duration::from_secs(300);

/// The structure managing the state of the reactive system.
///
/// There is one process-wide instance reachable through [`Graph::global`];
/// tests and embedded uses can install a fresh instance for a scope with
/// [`create_graph`]. A `Graph` holds only structural bookkeeping — values and
/// callbacks live in the nodes themselves.
pub(crate) struct Graph {
    /// All the nodes created in this graph.
    pub(crate) nodes: RwLock<SlotMap<NodeId, Node>>,
    /// Human-readable debug names.
    names: RwLock<SecondaryMap<NodeId, String>>,
    /// Bumped on every structural mutation; stale cache entries are ignored.
    version: AtomicU64,
    /// Cached cycle-check results keyed by (observer, dependency).
    cycle_cache: Mutex<VersionedCache<(NodeId, NodeId), bool>>,
    /// Cached direct-observer lists used by batch collection.
    observer_cache: Mutex<VersionedCache<NodeId, SmallVec<[NodeId; 8]>>>,
    /// Cached per-node (observer count, dependency count) pairs.
    metrics_cache: Mutex<VersionedCache<NodeId, (usize, usize)>>,
    /// Ids of batches currently alive.
    batch_ids: Mutex<HashSet<u64>>,
    /// Field index: object id -> nodes registered as fields of that object.
    fields: Mutex<HashMap<u64, Vec<NodeId>>>,
    /// A shared buffer for `update_transitive` to avoid reallocating the
    /// topological sort output on every propagation.
    rev_sorted_buf: Mutex<Vec<NodeId>>,
}

static DEFAULT_GRAPH: OnceLock<&'static Graph> = OnceLock::new();

thread_local! {
    /// Graph override installed by [`GraphHandle::run_in`].
    static LOCAL_GRAPH: Cell<Option<&'static Graph>> = const { Cell::new(None) };
    /// The active dependency tracker, if a computed is currently evaluating.
    static TRACKER: RefCell<Option<DependencyTracker>> = const { RefCell::new(None) };
}

impl Graph {
    fn new() -> Self {
        Self {
            nodes: RwLock::new(SlotMap::default()),
            names: RwLock::new(SecondaryMap::new()),
            version: AtomicU64::new(0),
            cycle_cache: Mutex::new(VersionedCache::new(CACHE_CAPACITY, CACHE_TTL)),
            observer_cache: Mutex::new(VersionedCache::new(CACHE_CAPACITY, CACHE_TTL)),
            metrics_cache: Mutex::new(VersionedCache::new(CACHE_CAPACITY, CACHE_TTL)),
            batch_ids: Mutex::new(HashSet::new()),
            fields: Mutex::new(HashMap::new()),
            rev_sorted_buf: Mutex::new(Vec::new()),
        }
    }

    fn new_static() -> &'static Self {
        Box::leak(Box::new(Self::new()))
    }

    /// The graph the current thread should use: the scoped override if one is
    /// installed, the process-wide instance otherwise.
    pub(crate) fn global() -> &'static Graph {
        threading::register_thread();
        if let Some(local) = LOCAL_GRAPH.with(Cell::get) {
            return local;
        }
        DEFAULT_GRAPH.get_or_init(Graph::new_static)
    }

    /// Sets the scoped graph override. Returns the previous override.
    pub(crate) fn set_local(graph: Option<&'static Graph>) -> Option<&'static Graph> {
        LOCAL_GRAPH.with(|g| g.replace(graph))
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    // ---- node lifecycle -------------------------------------------------

    pub(crate) fn insert_node(&self, node: Node) -> NodeId {
        self.nodes.write().insert(node)
    }

    pub(crate) fn add_ref(&self, id: NodeId) {
        if let Some(n) = self.nodes.write().get_mut(id) {
            n.ref_count += 1;
        }
    }

    /// Drops one external reference; firing the invalidation policy when the
    /// count reaches zero.
    pub(crate) fn release_ref(&'static self, id: NodeId) {
        let decision = {
            let mut nodes = self.nodes.write();
            match nodes.get_mut(id) {
                None => None,
                Some(n) => {
                    n.ref_count = n.ref_count.saturating_sub(1);
                    (n.ref_count == 0).then_some(n.invalidate)
                }
            }
        };
        match decision {
            Some(Invalidate::Close) => self.close_node(id),
            Some(Invalidate::LastValue) => self.freeze_last_value(id),
            Some(Invalidate::Keep) | None => {}
        }
    }

    /// Replace the node's computation with a frozen constant serving its
    /// current value, detaching it from everything upstream. Nodes that were
    /// never written fall back to closing.
    fn freeze_last_value(&'static self, id: NodeId) {
        let has_value = {
            let nodes = self.nodes.read();
            match nodes.get(id) {
                None => return,
                Some(n) => n.value.is_some(),
            }
        };
        if !has_value {
            self.close_node(id);
            return;
        }
        let old_deps = self.take_dependencies(id);
        let old_callback = {
            let mut nodes = self.nodes.write();
            nodes.get_mut(id).map(|n| {
                n.state = NodeState::Clean;
                std::mem::replace(&mut n.callback, Some(Box::new(|_| false)))
            })
        };
        self.bump_version();
        // Displaced closure may hold handles; drop it outside the lock.
        drop(old_callback);
        drop(old_deps);
    }

    /// Cascade-remove `id` and every node transitively observing it.
    /// Closing an already-removed node is a no-op.
    pub(crate) fn close_node(&'static self, id: NodeId) {
        let removed: Vec<(NodeId, Node)> = {
            let mut nodes = self.nodes.write();
            let mut order = Vec::new();
            let mut seen = HashSet::new();
            Self::cascade_collect(&nodes, id, &mut order, &mut seen);
            order
                .iter()
                .filter_map(|&cid| {
                    let node = nodes.remove(cid)?;
                    for &d in &node.dependencies {
                        if let Some(dep) = nodes.get_mut(d) {
                            dep.dependents.retain(|x| *x != cid);
                        }
                    }
                    for &ob in &node.dependents {
                        if let Some(o) = nodes.get_mut(ob) {
                            o.dependencies.retain(|x| *x != cid);
                        }
                    }
                    Some((cid, node))
                })
                .collect()
        };
        if removed.is_empty() {
            return;
        }
        {
            let mut names = self.names.write();
            let mut fields = self.fields.lock();
            for (cid, node) in &removed {
                names.remove(*cid);
                if let Some(object_id) = node.object_id {
                    fields.remove(&object_id);
                }
            }
        }
        self.bump_version();
        // Dropping the removed nodes releases handles captured in their
        // callbacks, which may recursively fire invalidation policies.
        drop(removed);
    }

    /// Post-order over `id` and its transitive observers: observers first.
    fn cascade_collect(
        nodes: &SlotMap<NodeId, Node>,
        id: NodeId,
        order: &mut Vec<NodeId>,
        seen: &mut HashSet<NodeId>,
    ) {
        let Some(node) = nodes.get(id) else { return };
        if !seen.insert(id) {
            return;
        }
        for &ob in &node.dependents {
            Self::cascade_collect(nodes, ob, order, seen);
        }
        order.push(id);
    }

    // ---- edges ----------------------------------------------------------

    /// Install the edge observer -> dependency, rejecting self-observation
    /// and anything that would make the graph cyclic. Duplicate edges are
    /// idempotent.
    pub(crate) fn add_edge(&self, observer: NodeId, dependency: NodeId) -> Result<()> {
        if observer == dependency {
            return Err(Error::new(
                ErrorKind::SelfObservation,
                format!("node \"{}\" may not observe itself", self.name_or_id(observer)),
            ));
        }
        let version = self.version();
        let cached = { self.cycle_cache.lock().get(&(observer, dependency), version) };

        let outcome = {
            let mut nodes = self.nodes.write();
            if nodes.get(observer).is_none() {
                return Err(Error::new(
                    ErrorKind::NullPointer,
                    "observer node has been closed",
                ));
            }
            if nodes.get(dependency).is_none() {
                return Err(Error::new(
                    ErrorKind::NullPointer,
                    "dependency node has been closed",
                ));
            }
            if nodes[observer].dependencies.contains(&dependency) {
                return Ok(());
            }
            let cyclic = cached.unwrap_or_else(|| Self::reaches(&nodes, dependency, observer));
            if !cyclic {
                nodes[observer].dependencies.push(dependency);
                nodes[dependency].dependents.push(observer);
            }
            cyclic
        };

        if cached.is_none() {
            self.cycle_cache
                .lock()
                .insert((observer, dependency), outcome, version);
        }
        if outcome {
            return Err(Error::new(
                ErrorKind::DependencyCycle,
                format!(
                    "\"{}\" observing \"{}\" would create a cycle",
                    self.name_or_id(observer),
                    self.name_or_id(dependency)
                ),
            ));
        }
        self.bump_version();
        Ok(())
    }

    /// Whether `target` is reachable from `from` along dependency edges.
    fn reaches(nodes: &SlotMap<NodeId, Node>, from: NodeId, target: NodeId) -> bool {
        let mut stack: SmallVec<[NodeId; 16]> = SmallVec::new();
        let mut visited = HashSet::new();
        stack.push(from);
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if visited.insert(id) {
                if let Some(n) = nodes.get(id) {
                    stack.extend(n.dependencies.iter().copied());
                }
            }
        }
        false
    }

    /// Detach all dependency edges of `id` (both sides), returning the old
    /// list. Callers pair this with `relink`/`restore_unchecked` or bump the
    /// version themselves.
    pub(crate) fn take_dependencies(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut nodes = self.nodes.write();
        let Some(n) = nodes.get_mut(id) else {
            return SmallVec::new();
        };
        let deps = std::mem::take(&mut n.dependencies);
        for &d in &deps {
            if let Some(dep) = nodes.get_mut(d) {
                dep.dependents.retain(|x| *x != id);
            }
        }
        deps
    }

    /// Reinstall a dependency list without cycle checks or a version bump.
    /// Only used to restore a previously valid state.
    fn restore_unchecked(&self, id: NodeId, deps: &[NodeId]) {
        let mut nodes = self.nodes.write();
        if nodes.get(id).is_none() {
            return;
        }
        nodes[id].dependencies = SmallVec::from_slice(deps);
        for &d in deps {
            if let Some(dep) = nodes.get_mut(d) {
                if !dep.dependents.contains(&id) {
                    dep.dependents.push(id);
                }
            }
        }
    }

    /// A closure that restores `id`'s dependency set to its state at the time
    /// of this call.
    pub(crate) fn save_rollback(&'static self, id: NodeId) -> impl FnOnce() + Send {
        let old: SmallVec<[NodeId; 4]> = self
            .nodes
            .read()
            .get(id)
            .map(|n| n.dependencies.clone())
            .unwrap_or_default();
        move || {
            let _ = self.take_dependencies(id);
            self.restore_unchecked(id, &old);
            self.bump_version();
        }
    }

    /// Install the dependencies discovered by a factory's initial tracked
    /// evaluation. A fresh node cannot be part of a cycle and dead
    /// dependencies cannot notify, so failures here are ignorable.
    pub(crate) fn link_tracked(&self, observer: NodeId, deps: &[NodeId]) {
        for &d in deps {
            let _ = self.add_edge(observer, d);
        }
    }

    /// Install `deps` as the dependency set of `observer`, checking every
    /// edge. On failure every partially installed edge is removed and the
    /// error is returned; the caller owns restoring the previous set.
    pub(crate) fn link_checked(&self, observer: NodeId, deps: &[NodeId]) -> Result<()> {
        for &d in deps {
            if let Err(err) = self.add_edge(observer, d) {
                let _ = self.take_dependencies(observer);
                self.bump_version();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Reconnect a node after recomputation. When the re-tracked list equals
    /// the previous one the edges are reinstated wholesale — no checks, no
    /// version bump, caches stay warm. A genuinely new list goes through the
    /// checked path; dependencies that died mid-flight are skipped.
    fn relink(&self, id: NodeId, old: &[NodeId], new: &[NodeId]) -> Result<()> {
        if old == new {
            self.restore_unchecked(id, new);
            return Ok(());
        }
        for &d in new {
            match self.add_edge(id, d) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NullPointer => continue,
                Err(err) => {
                    let _ = self.take_dependencies(id);
                    self.restore_unchecked(id, old);
                    self.bump_version();
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    // ---- names ----------------------------------------------------------

    pub(crate) fn set_name(&self, id: NodeId, name: &str) {
        let alive = self.nodes.read().contains_key(id);
        if alive {
            self.names.write().insert(id, name.to_string());
        }
    }

    pub(crate) fn name(&self, id: NodeId) -> Option<String> {
        self.names.read().get(id).cloned()
    }

    fn name_or_id(&self, id: NodeId) -> String {
        self.name(id).unwrap_or_else(|| format!("{id:?}"))
    }

    // ---- batches --------------------------------------------------------

    pub(crate) fn register_active_batch(&self, batch_id: u64, members: &[NodeId]) {
        self.batch_ids.lock().insert(batch_id);
        let mut nodes = self.nodes.write();
        for &m in members {
            if let Some(n) = nodes.get_mut(m) {
                if !n.batches.contains(&batch_id) {
                    n.batches.push(batch_id);
                }
            }
        }
    }

    pub(crate) fn unregister_active_batch(&self, batch_id: u64, members: &[NodeId]) {
        self.batch_ids.lock().remove(&batch_id);
        let mut nodes = self.nodes.write();
        for &m in members {
            if let Some(n) = nodes.get_mut(m) {
                n.batches.retain(|b| *b != batch_id);
            }
        }
    }

    pub(crate) fn in_active_batch(&self, id: NodeId) -> bool {
        self.nodes
            .read()
            .get(id)
            .is_some_and(|n| !n.batches.is_empty())
    }

    // ---- field index ----------------------------------------------------

    pub(crate) fn register_field(&self, object_id: u64, node: NodeId) {
        self.fields.lock().entry(object_id).or_default().push(node);
    }

    /// Wire every field registered under `object_id` as a dependency of the
    /// container node. The index entry is snapshotted and the index lock
    /// released before the graph lock is taken.
    pub(crate) fn bind_fields(&self, object_id: u64, container: NodeId) {
        let snapshot: Vec<NodeId> = self
            .fields
            .lock()
            .get(&object_id)
            .cloned()
            .unwrap_or_default();
        for field in snapshot {
            // A fresh container cannot form a cycle; dead fields are skipped.
            let _ = self.add_edge(container, field);
        }
    }

    // ---- observer collection (batching) ---------------------------------

    /// Transitively collect the observers of `id`, raising each visited
    /// node's depth to at least its distance from the collection origin.
    /// Revisits a node's subtree only when its depth actually increased.
    pub(crate) fn collect_observers(
        &self,
        id: NodeId,
        out: &mut Vec<NodeId>,
        seen: &mut HashSet<NodeId>,
        depth: u32,
    ) {
        let version = self.version();
        let cached = { self.observer_cache.lock().get(&id, version) };
        let direct: SmallVec<[NodeId; 8]> = match cached {
            Some(d) => d,
            None => {
                let d: SmallVec<[NodeId; 8]> = self
                    .nodes
                    .read()
                    .get(id)
                    .map(|n| n.dependents.iter().copied().collect())
                    .unwrap_or_default();
                self.observer_cache.lock().insert(id, d.clone(), version);
                d
            }
        };
        let mut recurse: SmallVec<[NodeId; 8]> = SmallVec::new();
        {
            let mut nodes = self.nodes.write();
            for &ob in &direct {
                if let Some(n) = nodes.get_mut(ob) {
                    let increased = n.depth < depth;
                    if increased {
                        n.depth = depth;
                    }
                    let first = seen.insert(ob);
                    if first {
                        out.push(ob);
                    }
                    if first || increased {
                        recurse.push(ob);
                    }
                }
            }
        }
        for ob in recurse {
            self.collect_observers(ob, out, seen, depth + 1);
        }
    }

    /// Clone a node's value out by id. Backs the explicit dependency lists,
    /// which read without holding a counted handle.
    pub(crate) fn read_value<T: Clone + 'static>(&self, id: NodeId) -> Result<T> {
        let nodes = self.nodes.read();
        let node = nodes
            .get(id)
            .ok_or_else(|| Error::new(ErrorKind::NullPointer, "dependency node has been closed"))?;
        let value = node.value.as_ref().ok_or_else(|| {
            Error::new(
                ErrorKind::ResourceNotInitialized,
                "dependency read before first write",
            )
        })?;
        let v = value.downcast_ref::<T>().ok_or_else(|| {
            Error::new(
                ErrorKind::TypeMismatch,
                "dependency value has a different type",
            )
        })?;
        Ok(v.clone())
    }

    /// (observer count, dependency count) for a node, via the metrics cache.
    pub(crate) fn node_metrics(&self, id: NodeId) -> (usize, usize) {
        let version = self.version();
        if let Some(m) = self.metrics_cache.lock().get(&id, version) {
            return m;
        }
        let m = self
            .nodes
            .read()
            .get(id)
            .map(|n| (n.dependents.len(), n.dependencies.len()))
            .unwrap_or((0, 0));
        self.metrics_cache.lock().insert(id, m, version);
        m
    }

    // ---- tracking -------------------------------------------------------

    /// Run `f` with a fresh dependency tracker installed, returning what it
    /// produced together with every node it read.
    pub(crate) fn tracked_scope<T>(&self, f: impl FnOnce() -> T) -> (T, DependencyTracker) {
        let prev = TRACKER.with(|t| {
            t.replace(Some(DependencyTracker {
                graph: self as *const _,
                dependencies: SmallVec::new(),
            }))
        });
        let ret = f();
        let tracker = TRACKER
            .with(|t| t.replace(prev))
            .expect("tracker removed during tracked scope");
        (ret, tracker)
    }

    /// Record `id` in the current tracker, if one is installed for this
    /// graph. Called by every tracked read.
    pub(crate) fn register_dependency(&self, id: NodeId) {
        TRACKER.with(|t| {
            if let Some(tracker) = t.borrow_mut().as_mut() {
                if std::ptr::eq(tracker.graph, self) && !tracker.dependencies.contains(&id) {
                    tracker.dependencies.push(id);
                }
            }
        });
    }

    // ---- propagation ----------------------------------------------------

    /// Call this after `start` has been written with change flag `changed`.
    /// Marks observers per their trigger policies, then updates everything
    /// downstream in topological order, each node at most once.
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    pub(crate) fn propagate_from(&'static self, start: NodeId, changed: bool) {
        self.mark_dependents(start, changed);
        self.update_transitive(start);
    }

    /// Mark the direct observers of `id` dirty where their trigger policy
    /// fires for a notification carrying `changed`.
    pub(crate) fn mark_dependents(&self, id: NodeId, changed: bool) {
        let targets: SmallVec<[(NodeId, crate::policy::Trigger); 8]> = {
            let nodes = self.nodes.read();
            match nodes.get(id) {
                None => return,
                Some(n) => n
                    .dependents
                    .iter()
                    .filter_map(|&d| nodes.get(d).map(|dn| (d, dn.trigger)))
                    .collect(),
            }
        };
        for (dep, trigger) in targets {
            let fire = match trigger.fires_on(changed) {
                Some(f) => f,
                None => self.run_filter(dep),
            };
            if fire {
                if let Some(n) = self.nodes.write().get_mut(dep) {
                    n.state = NodeState::Dirty;
                }
            }
        }
    }

    /// Evaluate a filter-trigger node's predicate with no locks held.
    /// A node with no predicate installed fires unconditionally.
    fn run_filter(&self, id: NodeId) -> bool {
        let pred = self.nodes.write().get_mut(id).and_then(|n| n.filter.take());
        match pred {
            None => true,
            Some(mut p) => {
                let fire = p();
                let leftover = {
                    let mut nodes = self.nodes.write();
                    match nodes.get_mut(id) {
                        Some(n) if n.filter.is_none() => {
                            n.filter = Some(p);
                            None
                        }
                        _ => Some(p),
                    }
                };
                drop(leftover);
                fire
            }
        }
    }

    /// If there are no cyclic dependencies then the reactive graph is a DAG,
    /// so DFS yields a topological sorting of everything reachable from
    /// `start`. Walk it once, recomputing only the nodes whose trigger fired.
    fn update_transitive(&'static self, start: NodeId) {
        let mut local = Vec::new();
        let mut guard = self.rev_sorted_buf.try_lock();
        let rev_sorted: &mut Vec<NodeId> = match guard.as_deref_mut() {
            Some(buf) => {
                buf.clear();
                buf
            }
            // Re-entrant or concurrent propagation: fall back to a local
            // buffer rather than blocking.
            None => &mut local,
        };
        {
            let mut nodes = self.nodes.write();
            Self::dfs(start, &mut nodes, rev_sorted);
        }
        #[cfg(feature = "trace")]
        tracing::trace!(reachable = rev_sorted.len(), "propagating updates");

        for i in (0..rev_sorted.len()).rev() {
            let id = rev_sorted[i];
            let dirty = {
                let mut nodes = self.nodes.write();
                match nodes.get_mut(id) {
                    // Only run if node is still alive.
                    None => continue,
                    Some(n) => {
                        n.mark = Mark::None;
                        n.state == NodeState::Dirty
                    }
                }
            };
            if dirty {
                self.run_node_update(id);
            }
        }
    }

    /// Depth-first search over observer edges, pushing nodes in post-order.
    fn dfs(current: NodeId, nodes: &mut SlotMap<NodeId, Node>, buf: &mut Vec<NodeId>) {
        let Some(node) = nodes.get_mut(current) else {
            return;
        };
        match node.mark {
            Mark::Temp => {
                panic!("dependency graph corrupted: cycle encountered during propagation")
            }
            Mark::Permanent => return,
            Mark::None => {}
        }
        node.mark = Mark::Temp;
        let children = node.dependents.clone();
        for child in children {
            Self::dfs(child, nodes, buf);
        }
        nodes[current].mark = Mark::Permanent;
        buf.push(current);
    }

    /// Recompute one dirty node: detach its dependency edges, run the
    /// callback in a tracked scope, relink, and mark its own observers per
    /// their triggers. Does not itself recurse — the caller walks the
    /// topological order.
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    pub(crate) fn run_node_update(&'static self, current: NodeId) {
        let old_deps = self.take_dependencies(current);
        let mut cb;
        let mut val;
        {
            let mut nodes = self.nodes.write();
            let Some(n) = nodes.get_mut(current) else {
                return;
            };
            match (n.callback.take(), n.value.take()) {
                (Some(c), Some(v)) => {
                    cb = c;
                    val = v;
                }
                (c, v) => {
                    // A source (or field container): nothing to recompute,
                    // the change is forwarded as-is.
                    n.callback = c;
                    n.value = v;
                    n.state = NodeState::Clean;
                    drop(nodes);
                    self.restore_unchecked(current, &old_deps);
                    self.mark_dependents(current, true);
                    return;
                }
            }
        }

        let (changed, tracker) = self.tracked_scope(|| cb(&mut val));
        let relinked = self.relink(current, &old_deps, &tracker.dependencies);
        {
            let mut nodes = self.nodes.write();
            if let Some(n) = nodes.get_mut(current) {
                n.callback = Some(cb);
                n.value = Some(val);
                n.state = NodeState::Clean;
            } else {
                // Closed from inside its own callback; nothing left to do.
                return;
            }
        }
        if let Err(err) = relinked {
            panic!("recomputation created a dependency cycle: {err}");
        }
        self.mark_dependents(current, changed);
    }
}

/// Tracks nodes that are read inside a tracked scope.
pub(crate) struct DependencyTracker {
    graph: *const Graph,
    pub(crate) dependencies: SmallVec<[NodeId; 4]>,
}

/// Run the passed closure with dependency tracking suspended.
///
/// Reads performed inside `f` are not registered as dependencies of the
/// computed currently evaluating.
///
/// # Example
/// ```
/// # use reflux::*;
/// # let _ = create_graph(|| {
/// let state = var(1);
/// let double = calc({
///     let state = state.clone();
///     move || untrack(|| state.get() * 2)
/// });
/// assert_eq!(double.get(), 2);
///
/// state.set(2);
/// // Still the old value: `state` was read untracked.
/// assert_eq!(double.get(), 2);
/// # });
/// ```
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    let prev = TRACKER.with(|t| t.take());
    let ret = f();
    TRACKER.with(|t| *t.borrow_mut() = prev);
    ret
}

/// A handle to a graph created with [`create_graph`]. Lets you run further
/// code against that graph or dispose of everything it holds.
#[derive(Clone, Copy)]
pub struct GraphHandle {
    graph: &'static Graph,
}

impl GraphHandle {
    /// Runs the closure with this graph installed as the current one.
    pub fn run_in<T>(&self, f: impl FnOnce() -> T) -> T {
        let prev = Graph::set_local(Some(self.graph));
        let ret = f();
        Graph::set_local(prev);
        ret
    }

    /// Close every node and drop all bookkeeping held by this graph.
    /// Handles into the graph become inert.
    pub fn dispose(&self) {
        let removed: Vec<Node> = {
            let mut nodes = self.graph.nodes.write();
            nodes.drain().map(|(_, node)| node).collect()
        };
        self.graph.names.write().clear();
        self.graph.fields.lock().clear();
        self.graph.batch_ids.lock().clear();
        self.graph.cycle_cache.lock().clear();
        self.graph.observer_cache.lock().clear();
        self.graph.metrics_cache.lock().clear();
        self.graph.bump_version();
        drop(removed);
    }
}

/// Create a fresh reactive graph and run `f` inside it.
///
/// Everything created in `f` (and in later [`GraphHandle::run_in`] scopes)
/// lives in this graph instead of the process-wide one — the standard way to
/// isolate tests from each other.
///
/// # Example
/// ```
/// # use reflux::*;
/// let graph = create_graph(|| {
///     let count = var(0);
///     count.set(1);
///     assert_eq!(count.get(), 1);
/// });
/// graph.dispose();
/// ```
#[must_use = "graph should be disposed"]
pub fn create_graph(f: impl FnOnce()) -> GraphHandle {
    let graph = Graph::new_static();
    let handle = GraphHandle { graph };
    handle.run_in(f);
    handle
}

/// Size and cache counters of the current graph.
#[derive(Debug, Clone, Copy)]
pub struct GraphStats {
    /// Live nodes in the graph.
    pub nodes: usize,
    /// Cycle-check cache counters.
    pub cycle_checks: CacheStats,
    /// Direct-observer cache counters.
    pub observer_lists: CacheStats,
    /// Node-metrics cache counters.
    pub node_metrics: CacheStats,
}

/// Snapshot the current graph's size and cache statistics.
pub fn graph_stats() -> GraphStats {
    let graph = Graph::global();
    GraphStats {
        nodes: graph.nodes.read().len(),
        cycle_checks: graph.cycle_cache.lock().stats(),
        observer_lists: graph.observer_cache.lock().stats(),
        node_metrics: graph.metrics_cache.lock().stats(),
    }
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn cascade_close_removes_exactly_the_downstream_chain() {
        let _ = create_graph(|| {
            let a = var(1);
            let b = calc_on((&a,), |x: i32| x + 1);
            let c = calc_on((&b,), |x: i32| x + 1);
            let d = calc_on((&c,), |x: i32| x + 1);
            let e = calc_on((&d,), |x: i32| x + 1);
            assert_eq!(e.get(), 5);

            b.close().unwrap();

            assert!(a.is_alive());
            assert!(!b.is_alive());
            assert!(!c.is_alive());
            assert!(!d.is_alive());
            assert!(!e.is_alive());
            assert_eq!(c.try_get().unwrap_err().kind(), ErrorKind::NullPointer);
            assert_eq!(e.try_get().unwrap_err().kind(), ErrorKind::NullPointer);

            // The surviving source still works.
            a.set(10);
            assert_eq!(a.get(), 10);
        });
    }

    #[test]
    fn close_is_idempotent() {
        let _ = create_graph(|| {
            let a = var(1);
            let b = calc_on((&a,), |x: i32| x * 2);
            b.close().unwrap();
            b.close().unwrap();
            assert!(!b.is_alive());
        });
    }

    #[test]
    fn failed_edge_add_leaves_graph_unchanged() {
        let _ = create_graph(|| {
            let a = var(1);
            let b = calc_on((&a,), |x: i32| x + 1);
            let c = calc_on((&b,), |x: i32| x + 1);

            // b -> c would close the loop b -> c -> b.
            let err = b.reset_on((&c,), |x: i32| x).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::DependencyCycle);

            // Propagation still flows through the untouched edges.
            a.set(5);
            assert_eq!(b.get(), 6);
            assert_eq!(c.get(), 7);
        });
    }

    #[test]
    fn name_round_trip() {
        let _ = create_graph(|| {
            let a = var(1);
            assert_eq!(a.name(), None);
            a.set_name("input");
            assert_eq!(a.name().as_deref(), Some("input"));
        });
    }

    #[test]
    fn stats_report_live_nodes() {
        let graph = create_graph(|| {
            let _a = var(1);
            let _b = var(2);
            let stats = graph_stats();
            assert_eq!(stats.nodes, 2);
        });
        graph.dispose();
        graph.run_in(|| {
            assert_eq!(graph_stats().nodes, 0);
        });
    }

    #[test]
    fn dispose_makes_handles_inert() {
        let mut probe = None;
        let graph = create_graph(|| {
            probe = Some(var(7));
        });
        let probe = probe.unwrap();
        assert!(graph.run_in(|| probe.is_alive()));
        graph.dispose();
        assert!(!probe.is_alive());
        assert_eq!(probe.try_get().unwrap_err().kind(), ErrorKind::NullPointer);
    }
}
