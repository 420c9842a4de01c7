//! Dependency-list helpers shared by the factories.

use std::marker::PhantomData;

use crate::calcs::Calc;
use crate::graph::{untrack, Graph};
use crate::node::NodeId;
use crate::vars::{ReadVar, Var};

/// Implemented by every reactive handle; lets the explicit-dependency
/// factories read a handle's value without holding on to the handle itself.
pub trait Readable {
    /// The value type produced by reading the handle.
    type Value;

    #[doc(hidden)]
    fn dep(&self) -> Dep<Self::Value>;
}

impl<T> Readable for ReadVar<T> {
    type Value = T;

    fn dep(&self) -> Dep<T> {
        Dep {
            id: self.id,
            graph: self.graph,
            _phantom: PhantomData,
        }
    }
}

impl<T> Readable for Var<T> {
    type Value = T;

    fn dep(&self) -> Dep<T> {
        (**self).dep()
    }
}

impl<T> Readable for Calc<T> {
    type Value = T;

    fn dep(&self) -> Dep<T> {
        (**self).dep()
    }
}

/// An uncounted reference to a node, used by bound dependency closures.
/// Unlike a handle it does not keep the node's invalidation policy at bay.
#[doc(hidden)]
pub struct Dep<T> {
    id: NodeId,
    graph: &'static Graph,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Clone for Dep<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Dep<T> {}

impl<T: Clone + 'static> Dep<T> {
    /// Tracked read. The node is alive whenever this runs: closing a
    /// dependency cascade-closes the computed holding this `Dep`.
    fn get(&self) -> T {
        self.graph.register_dependency(self.id);
        match self.graph.read_value::<T>(self.id) {
            Ok(v) => v,
            Err(err) => panic!("dependency read failed: {err}"),
        }
    }
}

/// An explicit dependency list: a tuple of handle references whose values are
/// passed to the computation closure as arguments.
///
/// Implemented for tuples of `&Var<_>` / `&ReadVar<_>` / `&Calc<_>` up to
/// arity 8. The listed handles become the node's exact dependency set; the
/// closure body runs untracked, and the closure does not keep the listed
/// nodes' handles alive.
pub trait DepList<F, Out> {
    #[doc(hidden)]
    fn bind(self, f: F) -> Box<dyn FnMut() -> Out + Send + Sync>;
}

macro_rules! impl_dep_list {
    ($(($H:ident, $idx:tt)),+) => {
        impl<'a, Out, Fun, $($H),+> DepList<Fun, Out> for ($(&'a $H,)+)
        where
            Fun: FnMut($($H::Value),+) -> Out + Send + Sync + 'static,
            $($H: Readable, $H::Value: Clone + Send + Sync + 'static,)+
        {
            fn bind(self, mut f: Fun) -> Box<dyn FnMut() -> Out + Send + Sync> {
                paste::paste! {
                    {
                        $(let [<dep_ $idx>] = self.$idx.dep();)+
                        Box::new(move || {
                            $(let [<value_ $idx>] = [<dep_ $idx>].get();)+
                            untrack(|| f($([<value_ $idx>]),+))
                        })
                    }
                }
            }
        }
    };
}

impl_dep_list!((A, 0));
impl_dep_list!((A, 0), (B, 1));
impl_dep_list!((A, 0), (B, 1), (C, 2));
impl_dep_list!((A, 0), (B, 1), (C, 2), (D, 3));
impl_dep_list!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));
impl_dep_list!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5));
impl_dep_list!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6));
impl_dep_list!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6), (H, 7));

/// Reactive data that can be tracked explicitly. Also implemented for tuples
/// of `Depends` values.
pub trait Depends {
    /// Track the data in the current reactive scope.
    fn track_all(&self);
}

impl<T> Depends for ReadVar<T> {
    fn track_all(&self) {
        self.track();
    }
}

impl<T> Depends for Var<T> {
    fn track_all(&self) {
        self.track();
    }
}

impl<T> Depends for Calc<T> {
    fn track_all(&self) {
        self.track();
    }
}

macro_rules! impl_depends_for_tuple {
    ($($T:tt),*) => {
        paste::paste! {
            impl<$($T,)*> Depends for ($($T,)*)
            where
                $($T: Depends,)*
            {
                fn track_all(&self) {
                    let ($([<$T:lower>],)*) = self;
                    $(
                        [<$T:lower>].track_all();
                    )*
                }
            }
        }
    }
}

impl_depends_for_tuple!(A);
impl_depends_for_tuple!(A, B);
impl_depends_for_tuple!(A, B, C);
impl_depends_for_tuple!(A, B, C, D);
impl_depends_for_tuple!(A, B, C, D, E);
impl_depends_for_tuple!(A, B, C, D, E, F);
impl_depends_for_tuple!(A, B, C, D, E, F, G);
impl_depends_for_tuple!(A, B, C, D, E, F, G, H);

/// A helper for making a zero-argument closure's dependencies explicit.
///
/// The listed handles are tracked and the body runs untracked, so the
/// dependency set is exactly `deps`. Note that the returned closure owns the
/// handles it was given: the listed nodes stay externally referenced for as
/// long as the closure lives. When that matters (invalidation policies),
/// prefer the value-passing forms [`calc_on`](crate::calc_on) /
/// [`action_on`](crate::action_on).
///
/// # Example
/// ```
/// # use reflux::*;
/// # let _ = create_graph(|| {
/// let state = var(0);
/// let other = var(100);
/// let tracked = calc(on(state.clone(), {
///     let other = other.clone();
///     let state = state.clone();
///     move || other.get_untracked() + state.get_untracked()
/// }));
/// assert_eq!(tracked.get(), 100);
///
/// other.set(200); // Not a dependency: no recomputation.
/// assert_eq!(tracked.get(), 100);
///
/// state.set(1);
/// assert_eq!(tracked.get(), 201);
/// # });
/// ```
pub fn on<T>(
    deps: impl Depends + Send + Sync + 'static,
    mut f: impl FnMut() -> T + Send + Sync + 'static,
) -> impl FnMut() -> T + Send + Sync + 'static {
    move || {
        deps.track_all();
        untrack(&mut f)
    }
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn on_tracks_exactly_the_listed_deps() {
        let _ = create_graph(|| {
            let a = var(1);
            let b = var(10);
            let sum = calc(on((a.clone(), b.clone()), {
                let (a, b) = (a.clone(), b.clone());
                move || a.get_untracked() + b.get_untracked()
            }));
            assert_eq!(sum.get(), 11);
            a.set(2);
            assert_eq!(sum.get(), 12);
            b.set(20);
            assert_eq!(sum.get(), 22);
        });
    }

    #[test]
    fn dep_list_closure_does_not_keep_handles_alive() {
        let _ = create_graph(|| {
            let upstream = var_with(1, Trigger::OnChange, Invalidate::Close);
            let double = calc_on((&upstream,), |x: i32| x * 2);
            assert_eq!(double.get(), 2);
            assert_eq!(upstream.observer_count(), 1);
            // Dropping the only user handle fires the Close policy even
            // though `double`'s closure still reads the node: the computed
            // is cascade-closed along with it.
            drop(upstream);
            assert!(!double.is_alive());
        });
    }
}
