//! Batched updates: group several source writes so each affected observer
//! recomputes at most once.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use crate::error::{Error, ErrorKind, Result};
use crate::graph::Graph;
use crate::node::{next_serial, NodeId, NodeState};

thread_local! {
    /// Set while a batch's collection pass runs; variable writes report here
    /// instead of storing.
    static COLLECTOR: RefCell<Option<Collector>> = const { RefCell::new(None) };
    /// Set while a batch executes; variable writes store silently.
    static EXECUTING: Cell<bool> = const { Cell::new(false) };
}

struct Collector {
    graph: *const Graph,
    observers: Vec<NodeId>,
    seen: HashSet<NodeId>,
}

/// Report a variable write. During a collection pass the write is absorbed:
/// the variable's transitive observers are collected (raising their depths)
/// and `true` is returned so the caller skips the store.
pub(crate) fn note_write(graph: &'static Graph, id: NodeId) -> bool {
    COLLECTOR.with(|slot| {
        let mut slot = slot.borrow_mut();
        match slot.as_mut() {
            Some(c) if std::ptr::eq(c.graph, graph) => {
                graph.collect_observers(id, &mut c.observers, &mut c.seen, 1);
                true
            }
            _ => false,
        }
    })
}

/// Whether a batch is currently executing on this thread.
pub(crate) fn is_executing() -> bool {
    EXECUTING.with(Cell::get)
}

/// Installs a fresh collector and restores the previous one on drop, so a
/// panicking batch closure discards its half-collected set instead of
/// leaving the hook installed.
struct CollectGuard {
    prev: Option<Collector>,
    done: bool,
}

impl CollectGuard {
    fn enter(graph: &'static Graph) -> Self {
        let prev = COLLECTOR.with(|slot| {
            slot.replace(Some(Collector {
                graph,
                observers: Vec::new(),
                seen: HashSet::new(),
            }))
        });
        Self { prev, done: false }
    }

    fn finish(mut self) -> Collector {
        self.done = true;
        COLLECTOR
            .with(|slot| slot.replace(self.prev.take()))
            .expect("batch collector removed during collection")
    }
}

impl Drop for CollectGuard {
    fn drop(&mut self) {
        if !self.done {
            COLLECTOR.with(|slot| *slot.borrow_mut() = self.prev.take());
        }
    }
}

/// Restores the previous executing flag even if the batch closure panics.
struct ExecuteGuard {
    prev: bool,
}

impl ExecuteGuard {
    fn enter() -> Self {
        let prev = EXECUTING.with(|e| e.replace(true));
        Self { prev }
    }
}

impl Drop for ExecuteGuard {
    fn drop(&mut self) {
        EXECUTING.with(|e| e.set(self.prev));
    }
}

/// A batched update over one user closure.
///
/// Construction runs the closure once in *collection* mode: variable writes
/// are intercepted (values stay untouched) and the transitive observers of
/// every touched variable are gathered and ordered by `(depth, serial)`.
/// Every collected node is enrolled against this batch, which blocks `reset`
/// and explicit `close` on it until the batch is dropped or
/// [`closed`](Batch::close).
///
/// [`execute`](Batch::execute) runs the closure a second time performing the
/// real writes with notifications suppressed, then commits: the collected
/// observers are visited once each in depth order, recomputing exactly those
/// whose trigger fired.
pub struct Batch {
    f: Box<dyn FnMut() + Send>,
    graph: &'static Graph,
    members: Vec<NodeId>,
    ordered: Vec<NodeId>,
    id: u64,
    closed: bool,
}

/// Construct a [`Batch`] around `f` without executing it.
///
/// # Example
/// ```
/// # use reflux::*;
/// # let _ = create_graph(|| {
/// let a = var(1);
/// let b = var(2);
/// let sum = calc_on((&a, &b), |x: i32, y: i32| x + y);
///
/// let mut update = batch({
///     let (a, b) = (a.clone(), b.clone());
///     move || {
///         a.set(10);
///         b.set(20);
///     }
/// });
/// // Nothing written yet: the construction pass only collected observers.
/// assert_eq!(sum.get(), 3);
///
/// update.execute().unwrap();
/// assert_eq!(sum.get(), 30);
/// # });
/// ```
pub fn batch(f: impl FnMut() + Send + 'static) -> Batch {
    let graph = Graph::global();
    let mut f: Box<dyn FnMut() + Send> = Box::new(f);

    let guard = CollectGuard::enter(graph);
    f();
    let collector = guard.finish();

    let members = collector.observers;
    let mut ordered = members.clone();
    {
        let nodes = graph.nodes.read();
        ordered.sort_by_key(|&id| {
            nodes
                .get(id)
                .map_or((u32::MAX, u64::MAX), |n| (n.depth, n.serial))
        });
    }
    let id = next_serial();
    graph.register_active_batch(id, &members);
    Batch {
        f,
        graph,
        members,
        ordered,
        id,
        closed: false,
    }
}

/// Construct a batch around `f` and execute it immediately.
pub fn batch_execute(f: impl FnMut() + Send + 'static) -> Result<()> {
    batch(f).execute()
}

impl Batch {
    /// Perform the batched writes and commit.
    ///
    /// Writes land immediately (a read inside the closure after a write sees
    /// the new value) but notify no one; the commit pass then visits every
    /// collected observer once in non-decreasing depth order, recomputing
    /// those whose trigger fired.
    ///
    /// Fails with [`ErrorKind::InvalidState`] once the batch has been closed.
    pub fn execute(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::new(ErrorKind::InvalidState, "batch has been closed"));
        }
        {
            let guard = ExecuteGuard::enter();
            (self.f)();
            drop(guard);
        }
        for &id in &self.ordered {
            let dirty = {
                let nodes = self.graph.nodes.read();
                nodes.get(id).is_some_and(|n| n.state == NodeState::Dirty)
            };
            if dirty {
                self.graph.run_node_update(id);
            }
        }
        Ok(())
    }

    /// Release the batch's hold on its collected nodes, allowing `reset` and
    /// `close` on them again. Idempotent; also performed on drop.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.graph.unregister_active_batch(self.id, &self.members);
        }
    }

    /// Whether [`close`](Batch::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::*;

    #[test]
    fn batch_collapses_updates_to_one_recomputation() {
        let _ = create_graph(|| {
            let a = var(1);
            let b = var(2);
            let s = calc_on((&a, &b), |x: i32, y: i32| x + y);
            let count = Arc::new(AtomicUsize::new(0));
            let _obs = action_on((&s,), {
                let count = count.clone();
                move |_v: i32| {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            });
            assert_eq!(count.load(Ordering::SeqCst), 1); // initial run

            let mut update = batch({
                let (a, b) = (a.clone(), b.clone());
                move || {
                    a.set(10);
                    b.set(20);
                }
            });
            assert_eq!(s.get(), 3);
            update.execute().unwrap();

            assert_eq!(s.get(), 30);
            assert_eq!(count.load(Ordering::SeqCst), 2); // exactly once more
        });
    }

    #[test]
    fn executing_twice_is_idempotent() {
        let _ = create_graph(|| {
            let a = var(1);
            let s = calc_on((&a,), |x: i32| x * 2);
            let count = Arc::new(AtomicUsize::new(0));
            let _obs = action_on((&s,), {
                let count = count.clone();
                move |_v: i32| {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            });

            let run = {
                let a = a.clone();
                move || a.set(5)
            };
            batch_execute(run.clone()).unwrap();
            assert_eq!(s.get(), 10);
            assert_eq!(count.load(Ordering::SeqCst), 2);

            // Same writes again: same final state, no further recomputation.
            batch_execute(run).unwrap();
            assert_eq!(s.get(), 10);
            assert_eq!(count.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn dropped_batch_never_fires() {
        let _ = create_graph(|| {
            let a = var(1);
            let s = calc_on((&a,), |x: i32| x * 2);
            {
                let update = batch({
                    let a = a.clone();
                    move || a.set(5)
                });
                drop(update);
            }
            assert_eq!(a.get(), 1);
            assert_eq!(s.get(), 2);
        });
    }

    #[test]
    fn reset_conflicts_with_enrolled_batch() {
        let _ = create_graph(|| {
            let a = var(1);
            let s = calc_on((&a,), |x: i32| x * 2);

            let mut update = batch({
                let a = a.clone();
                move || a.set(5)
            });
            let err = s.reset(|| 0).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BatchConflict);
            let err = s.close().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BatchConflict);

            update.close();
            s.reset(|| 0).unwrap();
            assert_eq!(s.get(), 0);
        });
    }

    #[test]
    fn collection_pass_defers_writes_execute_applies_them() {
        let _ = create_graph(|| {
            let a = var(1);
            let seen = Arc::new(AtomicI32::new(0));
            let mut update = batch({
                let a = a.clone();
                let seen = seen.clone();
                move || {
                    a.set(5);
                    seen.store(a.get_untracked(), Ordering::SeqCst);
                }
            });
            // Collection pass intercepted the write: reads saw the old value.
            assert_eq!(a.get(), 1);
            assert_eq!(seen.load(Ordering::SeqCst), 1);

            update.execute().unwrap();
            // During execute the write landed before the read.
            assert_eq!(seen.load(Ordering::SeqCst), 5);
            assert_eq!(a.get(), 5);
        });
    }

    #[test]
    fn execute_after_close_is_invalid() {
        let _ = create_graph(|| {
            let a = var(1);
            let mut update = batch({
                let a = a.clone();
                move || a.set(5)
            });
            update.close();
            assert!(update.is_closed());
            let err = update.execute().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidState);
            assert_eq!(a.get(), 1);
        });
    }

    #[test]
    fn batch_commits_in_depth_order() {
        let _ = create_graph(|| {
            let a = var(1);
            let b = calc_on((&a,), |x: i32| x + 1);
            let c = calc_on((&b,), |x: i32| x * 10);
            let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
            let _watch_b = action_on((&b,), {
                let order = order.clone();
                move |v: i32| order.lock().push(("b", v))
            });
            let _watch_c = action_on((&c,), {
                let order = order.clone();
                move |v: i32| order.lock().push(("c", v))
            });
            order.lock().clear();

            batch_execute({
                let a = a.clone();
                move || a.set(2)
            })
            .unwrap();

            let seen = order.lock().clone();
            assert_eq!(seen, vec![("b", 3), ("c", 30)]);
        });
    }
}
