//! Computed values (eagerly derived nodes).

use std::fmt;
use std::hash::Hash;
use std::ops::Deref;

use crate::error::{Error, ErrorKind, Result};
use crate::graph::Graph;
use crate::node::{Node, NodeCallback, NodeState};
use crate::policy::{Invalidate, Trigger};
use crate::utils::DepList;
use crate::vars::ReadVar;

/// A handle to a computed node: a value that is a pure function of its
/// dependencies and recomputes at most once per upstream update.
///
/// Dereferences to [`ReadVar`], so all read accessors, naming, and `close`
/// are available. Computeds additionally support [`reset`](Calc::reset)
/// (transactional rebind) and [`filter`](Calc::filter).
pub struct Calc<T: 'static>(pub(crate) ReadVar<T>);

/// Create a computed value. Dependencies are registered implicitly: every
/// tracked read the closure performs becomes an edge, re-discovered on each
/// recomputation.
///
/// The closure runs once immediately to produce the initial value.
/// Recomputed values are compared with `PartialEq`; an equal result does not
/// notify on-change observers downstream.
///
/// # Example
/// ```
/// # use reflux::*;
/// # let _ = create_graph(|| {
/// let state = var(1);
/// let double = calc({
///     let state = state.clone();
///     move || state.get() * 2
/// });
/// assert_eq!(double.get(), 2);
/// state.set(3);
/// assert_eq!(double.get(), 6);
/// # });
/// ```
#[cfg_attr(debug_assertions, track_caller)]
pub fn calc<T, F>(f: F) -> Calc<T>
where
    T: PartialEq + Send + Sync + 'static,
    F: FnMut() -> T + Send + Sync + 'static,
{
    calc_with(f, Trigger::OnChange, Invalidate::Keep)
}

/// [`calc`] with explicit trigger and invalidation policies.
#[cfg_attr(debug_assertions, track_caller)]
pub fn calc_with<T, F>(mut f: F, trigger: Trigger, invalidate: Invalidate) -> Calc<T>
where
    T: PartialEq + Send + Sync + 'static,
    F: FnMut() -> T + Send + Sync + 'static,
{
    let graph = Graph::global();
    let id = graph.insert_node(Node::new(trigger, invalidate));
    let (initial, tracker) = graph.tracked_scope(&mut f);
    graph.link_tracked(id, &tracker.dependencies);
    {
        let mut nodes = graph.nodes.write();
        let node = &mut nodes[id];
        node.value = Some(Box::new(initial));
        node.callback = Some(change_callback(f));
    }
    Calc(ReadVar::from_parts(id, graph))
}

/// Create a computed value with an explicit dependency list.
///
/// The closure receives the dependencies' current values as arguments — the
/// listed handles are the node's exact dependency set and nothing read inside
/// the closure body is tracked. The closure holds no handles, so the listed
/// nodes' invalidation policies still fire when their own last user handle
/// drops.
///
/// # Example
/// ```
/// # use reflux::*;
/// # let _ = create_graph(|| {
/// let a = var(1);
/// let b = var(2);
/// let sum = calc_on((&a, &b), |x: i32, y: i32| x + y);
/// assert_eq!(sum.get(), 3);
/// a.set(10);
/// assert_eq!(sum.get(), 12);
/// # });
/// ```
#[cfg_attr(debug_assertions, track_caller)]
pub fn calc_on<D, F, T>(deps: D, f: F) -> Calc<T>
where
    D: DepList<F, T>,
    T: PartialEq + Send + Sync + 'static,
{
    calc(deps.bind(f))
}

/// [`calc_on`] with explicit trigger and invalidation policies.
#[cfg_attr(debug_assertions, track_caller)]
pub fn calc_on_with<D, F, T>(deps: D, f: F, trigger: Trigger, invalidate: Invalidate) -> Calc<T>
where
    D: DepList<F, T>,
    T: PartialEq + Send + Sync + 'static,
{
    calc_with(deps.bind(f), trigger, invalidate)
}

/// Wrap a user computation in the equality-gated node callback.
pub(crate) fn change_callback<T, F>(mut f: F) -> NodeCallback
where
    T: PartialEq + Send + Sync + 'static,
    F: FnMut() -> T + Send + Sync + 'static,
{
    Box::new(move |value| {
        let v = value
            .downcast_mut::<T>()
            .expect("wrong value type for computed node");
        let new = f();
        if new == *v {
            false
        } else {
            *v = new;
            true
        }
    })
}

impl<T: 'static> Calc<T> {
    /// Transactionally rebind this computed to a new closure.
    ///
    /// Either the new closure, its value, and its dependency set are all in
    /// effect afterwards, or — on any error — the previous closure, value,
    /// and dependency set remain exactly as they were.
    ///
    /// Errors: [`ErrorKind::BatchConflict`] while the node is enrolled in an
    /// active batch, [`ErrorKind::NullPointer`] on a closed node (or when a
    /// new dependency's node has been closed), [`ErrorKind::DependencyCycle`]
    /// / [`ErrorKind::SelfObservation`] when the new dependency set is
    /// invalid. On success, downstream observers are notified once with
    /// `changed = true`.
    pub fn reset<F>(&self, mut f: F) -> Result<()>
    where
        T: PartialEq + Send + Sync,
        F: FnMut() -> T + Send + Sync + 'static,
    {
        let graph = self.graph;
        {
            let nodes = graph.nodes.read();
            let node = nodes
                .get(self.id)
                .ok_or_else(|| Error::new(ErrorKind::NullPointer, "reset on a closed node"))?;
            if !node.batches.is_empty() {
                return Err(Error::new(
                    ErrorKind::BatchConflict,
                    "node is enrolled in an active batch",
                ));
            }
        }
        // Evaluate first: a panicking closure must leave the node untouched.
        let (new_value, tracker) = graph.tracked_scope(&mut f);

        let rollback = graph.save_rollback(self.id);
        let _ = graph.take_dependencies(self.id);
        if let Err(err) = graph.link_checked(self.id, &tracker.dependencies) {
            rollback();
            return Err(err);
        }
        let displaced = {
            let mut nodes = graph.nodes.write();
            match nodes.get_mut(self.id) {
                Some(node) => {
                    let old_callback = node.callback.replace(change_callback(f));
                    let old_value = node.value.replace(Box::new(new_value));
                    node.state = NodeState::Clean;
                    Some((old_callback, old_value))
                }
                None => None,
            }
        };
        drop(displaced);
        graph.propagate_from(self.id, true);
        Ok(())
    }

    /// [`reset`](Calc::reset) with an explicit dependency list; the closure
    /// receives the dependencies' values as arguments.
    pub fn reset_on<D, F>(&self, deps: D, f: F) -> Result<()>
    where
        D: DepList<F, T>,
        T: PartialEq + Send + Sync,
    {
        self.reset(deps.bind(f))
    }

    /// Install (or replace) the predicate consulted by this node's
    /// [`Trigger::Filter`] policy, switching the node to filter triggering.
    /// The predicate is re-evaluated on every incoming notification;
    /// recomputation proceeds iff it returns `true`.
    pub fn filter(&self, pred: impl FnMut() -> bool + Send + Sync + 'static) {
        let displaced = {
            let mut nodes = self.graph.nodes.write();
            match nodes.get_mut(self.id) {
                Some(node) => {
                    node.trigger = Trigger::Filter;
                    node.filter.replace(Box::new(pred))
                }
                None => None,
            }
        };
        drop(displaced);
    }
}

impl<T> Clone for Calc<T> {
    fn clone(&self) -> Self {
        Calc(self.0.clone())
    }
}

impl<T> Deref for Calc<T> {
    type Target = ReadVar<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> PartialEq for Calc<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for Calc<T> {}
impl<T> Hash for Calc<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for Calc<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl<T: fmt::Display> fmt::Display for Calc<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::*;

    #[test]
    fn diamond_recomputes_join_exactly_once() {
        let _ = create_graph(|| {
            let a = var(1);
            let b = calc_on((&a,), |x: i32| x + 1);
            let c = calc_on((&a,), |x: i32| x * 2);
            let runs = Arc::new(AtomicUsize::new(0));
            let d = {
                let runs = runs.clone();
                calc_on((&b, &c), move |x: i32, y: i32| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    x + y
                })
            };
            assert_eq!(d.get(), 4);
            assert_eq!(runs.load(Ordering::SeqCst), 1);

            a.set(3);
            assert_eq!(d.get(), (3 + 1) + (3 * 2));
            assert_eq!(runs.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn same_value_write_does_not_recompute_on_change_observers() {
        let _ = create_graph(|| {
            let v = var(5);
            let runs = Arc::new(AtomicUsize::new(0));
            let k = {
                let runs = runs.clone();
                calc_on((&v,), move |x: i32| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    x
                })
            };
            assert_eq!(k.get(), 5);
            assert_eq!(runs.load(Ordering::SeqCst), 1);

            v.set(5);
            v.set(5);
            assert_eq!(runs.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn unchanged_intermediate_does_not_wake_downstream() {
        let _ = create_graph(|| {
            let v = var(4);
            let parity = calc_on((&v,), |x: i32| x % 2);
            let runs = Arc::new(AtomicUsize::new(0));
            let _watch = {
                let runs = runs.clone();
                calc_on((&parity,), move |p: i32| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    p
                })
            };
            assert_eq!(runs.load(Ordering::SeqCst), 1);
            v.set(6); // parity recomputes to the same value
            assert_eq!(runs.load(Ordering::SeqCst), 1);
            v.set(7);
            assert_eq!(runs.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn always_trigger_recomputes_on_unchanged_upstream() {
        let _ = create_graph(|| {
            let v = var(4);
            let parity = calc_on((&v,), |x: i32| x % 2);
            let runs = Arc::new(AtomicUsize::new(0));
            let _watch = {
                let runs = runs.clone();
                calc_on_with(
                    (&parity,),
                    move |p: i32| {
                        runs.fetch_add(1, Ordering::SeqCst);
                        p
                    },
                    Trigger::Always,
                    Invalidate::Keep,
                )
            };
            assert_eq!(runs.load(Ordering::SeqCst), 1);
            v.set(6); // parity unchanged, but the watcher fires always
            assert_eq!(runs.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn filter_trigger_counts_predicate_hits() {
        let _ = create_graph(|| {
            let price = var(100.0_f64);
            let runs = Arc::new(AtomicUsize::new(0));
            let recommendation = {
                let runs = runs.clone();
                calc_on_with(
                    (&price,),
                    move |p: f64| {
                        runs.fetch_add(1, Ordering::SeqCst);
                        if p > 105.0 {
                            "sell"
                        } else {
                            "hold"
                        }
                    },
                    Trigger::Filter,
                    Invalidate::Keep,
                )
            };
            recommendation.filter({
                let price = price.clone();
                move || {
                    let p = price.get_untracked();
                    !(95.0..=105.0).contains(&p)
                }
            });
            assert_eq!(runs.load(Ordering::SeqCst), 1);

            price.set(101.0); // predicate false
            assert_eq!(runs.load(Ordering::SeqCst), 1);
            price.set(106.0); // predicate true
            assert_eq!(runs.load(Ordering::SeqCst), 2);
            assert_eq!(recommendation.get(), "sell");
        });
    }

    #[test]
    fn auto_tracking_rediscovers_dependencies_each_run() {
        let _ = create_graph(|| {
            let condition = var(true);
            let state1 = var(0);
            let state2 = var(1);
            let runs = Arc::new(AtomicUsize::new(0));
            let _switch = calc({
                let runs = runs.clone();
                let (condition, state1, state2) =
                    (condition.clone(), state1.clone(), state2.clone());
                move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    if condition.get() {
                        state1.get()
                    } else {
                        state2.get()
                    }
                }
            });
            assert_eq!(runs.load(Ordering::SeqCst), 1);

            state1.set(1);
            assert_eq!(runs.load(Ordering::SeqCst), 2);

            state2.set(2);
            assert_eq!(runs.load(Ordering::SeqCst), 2); // not tracked

            condition.set(false);
            assert_eq!(runs.load(Ordering::SeqCst), 3);

            state1.set(2);
            assert_eq!(runs.load(Ordering::SeqCst), 3); // no longer tracked

            state2.set(3);
            assert_eq!(runs.load(Ordering::SeqCst), 4);
        });
    }

    #[test]
    fn chained_computeds() {
        let _ = create_graph(|| {
            let state = var(0);
            let double = calc_on((&state,), |x: i32| x * 2);
            let quadruple = calc_on((&double,), |x: i32| x * 2);

            assert_eq!(quadruple.get(), 0);
            state.set(1);
            assert_eq!(quadruple.get(), 4);
        });
    }

    #[test]
    fn reset_installs_new_closure_and_notifies() {
        let _ = create_graph(|| {
            let a = var(2);
            let b = var(10);
            let c = calc_on((&a,), |x: i32| x + 1);
            let downstream = calc_on((&c,), |x: i32| x * 100);
            assert_eq!(c.get(), 3);
            assert_eq!(downstream.get(), 300);

            c.reset_on((&b,), |y: i32| y * 2).unwrap();
            assert_eq!(c.get(), 20);
            assert_eq!(downstream.get(), 2000);

            // The old dependency is detached...
            a.set(100);
            assert_eq!(c.get(), 20);
            // ...and the new one live.
            b.set(11);
            assert_eq!(c.get(), 22);
            assert_eq!(downstream.get(), 2200);
        });
    }

    #[test]
    fn reset_rejects_cycles_and_rolls_back() {
        let _ = create_graph(|| {
            let b = var(2);
            let ca = calc_on((&b,), |y: i32| y);
            let cb = calc_on((&ca,), |x: i32| x);
            assert_eq!(cb.get(), 2);

            // ca observing cb would close the loop ca -> cb -> ca.
            let err = ca.reset_on((&cb,), |x: i32| x).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::DependencyCycle);

            // ca's dependencies and value are exactly as before.
            assert_eq!(ca.get(), 2);
            b.set(5);
            assert_eq!(ca.get(), 5);
            assert_eq!(cb.get(), 5);
        });
    }

    #[test]
    fn reset_rejects_self_observation() {
        let _ = create_graph(|| {
            let a = var(1);
            let c = calc_on((&a,), |x: i32| x);
            let err = c.reset_on((&c,), |x: i32| x).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SelfObservation);
            assert_eq!(c.get(), 1);
            a.set(2);
            assert_eq!(c.get(), 2);
        });
    }

    #[test]
    fn reset_on_closed_node_reports_null_pointer() {
        let _ = create_graph(|| {
            let a = var(1);
            let c = calc_on((&a,), |x: i32| x);
            c.close().unwrap();
            let err = c.reset(|| 0).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NullPointer);
        });
    }
}
