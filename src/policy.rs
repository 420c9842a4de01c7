//! Per-node trigger and invalidation policies.

/// Decides whether an incoming upstream notification recomputes a node.
///
/// The policy is a per-node property chosen at construction (the `*_with`
/// factories); it does not change the contract of any operation. The default
/// everywhere is [`Trigger::OnChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trigger {
    /// Recompute on every notification, even when the upstream value is
    /// unchanged.
    Always,
    /// Recompute only when the upstream notification carries a real value
    /// change.
    #[default]
    OnChange,
    /// Recompute when the node's predicate returns `true`. The predicate is
    /// installed or replaced with [`Calc::filter`](crate::Calc::filter); until
    /// one is installed the node fires on every notification.
    Filter,
}

impl Trigger {
    /// Whether a notification carrying `changed` should fire, ignoring any
    /// filter predicate (the graph evaluates predicates out of line).
    pub(crate) fn fires_on(self, changed: bool) -> Option<bool> {
        match self {
            Trigger::Always => Some(true),
            Trigger::OnChange => Some(changed),
            Trigger::Filter => None,
        }
    }
}

/// What happens to a node when its last user handle is dropped.
///
/// Applied exactly once, at the moment the external reference count reaches
/// zero. The default everywhere is [`Invalidate::Keep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Invalidate {
    /// Remove the node from the graph, cascade-closing all of its observers.
    Close,
    /// Leave the node in place; its observers keep receiving updates.
    #[default]
    Keep,
    /// Freeze the node at its last value: upstream edges are detached and the
    /// node behaves as a constant from then on. Falls back to [`Close`] when
    /// the node holds no value.
    ///
    /// [`Close`]: Invalidate::Close
    LastValue,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::*;

    #[test]
    fn defaults() {
        assert_eq!(Trigger::default(), Trigger::OnChange);
        assert_eq!(Invalidate::default(), Invalidate::Keep);
    }

    #[test]
    fn close_policy_removes_node_when_last_handle_drops() {
        let _ = create_graph(|| {
            let a = var(1);
            let doubled = calc_on_with(
                (&a,),
                |x: i32| x * 2,
                Trigger::OnChange,
                Invalidate::Close,
            );
            let alias = doubled.clone();
            drop(doubled);
            // Another handle to the computed is still alive: node survives.
            assert!(alias.is_alive());
            drop(alias);
            assert_eq!(graph_stats().nodes, 1); // only `a` remains

            // The surviving source still propagates to fresh observers.
            let tripled = calc_on((&a,), |x: i32| x * 3);
            a.set(2);
            assert_eq!(tripled.get(), 6);
        });
    }

    #[test]
    fn keep_policy_leaves_node_running() {
        let _ = create_graph(|| {
            let a = var(1);
            let runs = Arc::new(AtomicUsize::new(0));
            {
                let _watcher = action_on((&a,), {
                    let runs = runs.clone();
                    move |_x: i32| {
                        runs.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
            // Handle dropped, Keep policy: the action still fires.
            assert_eq!(runs.load(Ordering::SeqCst), 1);
            a.set(2);
            assert_eq!(runs.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn last_value_policy_freezes_node() {
        let _ = create_graph(|| {
            let a = var(2);
            let downstream;
            {
                let frozen = calc_on_with(
                    (&a,),
                    |x: i32| x * 2,
                    Trigger::OnChange,
                    Invalidate::LastValue,
                );
                downstream = calc_on((&frozen,), |x: i32| x + 1);
                assert_eq!(downstream.get(), 5);
            }
            // The temporary expired: the frozen node keeps serving its last
            // value and no longer follows `a`.
            a.set(10);
            assert_eq!(downstream.get(), 5);
        });
    }

    #[test]
    fn last_value_with_a_value_keeps_the_node() {
        let _ = create_graph(|| {
            let v = var_with(1, Trigger::OnChange, Invalidate::LastValue);
            drop(v);
            // Frozen, not closed.
            assert_eq!(graph_stats().nodes, 1);
        });
    }

    #[test]
    fn last_value_without_a_value_closes_instead() {
        let _ = create_graph(|| {
            let v = var_uninit_with::<i32>(Trigger::OnChange, Invalidate::LastValue);
            drop(v);
            // Nothing to capture: fell back to the Close policy.
            assert_eq!(graph_stats().nodes, 0);
        });
    }
}
