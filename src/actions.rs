//! Side-effect actions.

use crate::calcs::Calc;
use crate::graph::Graph;
use crate::node::Node;
use crate::policy::{Invalidate, Trigger};
use crate::utils::DepList;
use crate::vars::ReadVar;

/// A unit-valued computed used for side effects. It produces no value for
/// observers, but other actions and computeds may observe it for ordering.
pub type Action = Calc<()>;

/// Create an action: the closure runs once immediately and again whenever a
/// tracked dependency notifies it (subject to its trigger policy).
/// Notifications an action forwards downstream always read as changed.
///
/// # Example
/// ```
/// # use reflux::*;
/// # use std::sync::atomic::{AtomicUsize, Ordering};
/// # use std::sync::Arc;
/// # let _ = create_graph(|| {
/// let state = var(0);
/// let seen = Arc::new(AtomicUsize::new(0));
/// let _log = action({
///     let state = state.clone();
///     let seen = seen.clone();
///     move || {
///         seen.store(state.get() as usize, Ordering::SeqCst);
///     }
/// });
/// state.set(7);
/// assert_eq!(seen.load(Ordering::SeqCst), 7);
/// # });
/// ```
#[cfg_attr(debug_assertions, track_caller)]
pub fn action<F>(f: F) -> Action
where
    F: FnMut() + Send + Sync + 'static,
{
    action_with(f, Trigger::OnChange, Invalidate::Keep)
}

/// [`action`] with explicit trigger and invalidation policies.
#[cfg_attr(debug_assertions, track_caller)]
pub fn action_with<F>(mut f: F, trigger: Trigger, invalidate: Invalidate) -> Action
where
    F: FnMut() + Send + Sync + 'static,
{
    let graph = Graph::global();
    let id = graph.insert_node(Node::new(trigger, invalidate));
    let ((), tracker) = graph.tracked_scope(&mut f);
    graph.link_tracked(id, &tracker.dependencies);
    {
        let mut nodes = graph.nodes.write();
        let node = &mut nodes[id];
        node.value = Some(Box::new(()));
        node.callback = Some(Box::new(move |_value| {
            f();
            true
        }));
    }
    Calc(ReadVar::from_parts(id, graph))
}

/// Create an action with an explicit dependency list; the closure receives
/// the dependencies' current values as arguments and holds no handles.
///
/// # Example
/// ```
/// # use reflux::*;
/// # use std::sync::atomic::{AtomicUsize, Ordering};
/// # use std::sync::Arc;
/// # let _ = create_graph(|| {
/// let total = var(0);
/// let hits = Arc::new(AtomicUsize::new(0));
/// let _count = action_on((&total,), {
///     let hits = hits.clone();
///     move |_total: i32| {
///         hits.fetch_add(1, Ordering::SeqCst);
///     }
/// });
/// total.set(5);
/// assert_eq!(hits.load(Ordering::SeqCst), 2); // initial run + one update
/// # });
/// ```
#[cfg_attr(debug_assertions, track_caller)]
pub fn action_on<D, F>(deps: D, f: F) -> Action
where
    D: DepList<F, ()>,
{
    action(deps.bind(f))
}

/// [`action_on`] with explicit trigger and invalidation policies.
#[cfg_attr(debug_assertions, track_caller)]
pub fn action_on_with<D, F>(deps: D, f: F, trigger: Trigger, invalidate: Invalidate) -> Action
where
    D: DepList<F, ()>,
{
    action_with(deps.bind(f), trigger, invalidate)
}
