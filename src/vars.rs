//! Reactive variables (sources).

use std::fmt;
use std::fmt::Formatter;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ops::{AddAssign, Deref, DivAssign, MulAssign, RemAssign, SubAssign};

use crate::batch;
use crate::error::{Error, ErrorKind, Result};
use crate::graph::Graph;
use crate::node::{Node, NodeId};
use crate::policy::{Invalidate, Trigger};

/// A read-only handle to a reactive value.
///
/// The underlying data is not immutable — it can be written through the
/// corresponding [`Var`] (every `Var` derefs to a `ReadVar`) and the change
/// shows up through every `ReadVar` pointing at the same node.
///
/// Handles are reference counted: cloning one registers another external
/// reference on the node, and when the last handle is dropped the node's
/// [`Invalidate`] policy runs. A handle whose node has been closed is inert;
/// the `try_` accessors report [`ErrorKind::NullPointer`] for it.
///
/// # Example
/// ```
/// # use reflux::*;
/// # let _ = create_graph(|| {
/// let value: Var<i32> = var(123);
/// let read_only: ReadVar<i32> = (*value).clone();
/// assert_eq!(read_only.get(), 123);
/// value.set(456);
/// assert_eq!(read_only.get(), 456);
/// # });
/// ```
pub struct ReadVar<T: 'static> {
    pub(crate) id: NodeId,
    pub(crate) graph: &'static Graph,
    /// Keep track of where the handle was created for diagnostics.
    #[cfg(debug_assertions)]
    pub(crate) created_at: &'static std::panic::Location<'static>,
    pub(crate) _phantom: PhantomData<T>,
}

/// A reactive variable: a source node whose value is set directly.
///
/// Reads are shared and writes exclusive; a write propagates to every
/// computed and action downstream, recomputing each at most once per update.
///
/// # Example
/// ```
/// # use reflux::*;
/// # let _ = create_graph(|| {
/// let count = var(1);
/// let double = calc_on((&count,), |n: i32| n * 2);
/// assert_eq!(double.get(), 2);
/// count.set(10);
/// assert_eq!(double.get(), 20);
/// # });
/// ```
pub struct Var<T: 'static>(pub(crate) ReadVar<T>);

impl<T> ReadVar<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    pub(crate) fn from_parts(id: NodeId, graph: &'static Graph) -> Self {
        Self {
            id,
            graph,
            #[cfg(debug_assertions)]
            created_at: std::panic::Location::caller(),
            _phantom: PhantomData,
        }
    }

    /// Returns `true` while the node has not been closed.
    pub fn is_alive(&self) -> bool {
        self.graph.nodes.read().contains_key(self.id)
    }

    /// Record this node as a dependency of the computed currently
    /// evaluating, if any. Done automatically by every tracked read.
    pub fn track(&self) {
        self.graph.register_dependency(self.id);
    }

    /// Borrow the value without tracking, reporting failures instead of
    /// panicking.
    pub fn try_with_untracked<U>(&self, f: impl FnOnce(&T) -> U) -> Result<U> {
        let nodes = self.graph.nodes.read();
        let node = nodes
            .get(self.id)
            .ok_or_else(|| Error::new(ErrorKind::NullPointer, "handle refers to a closed node"))?;
        let value = node.value.as_ref().ok_or_else(|| {
            Error::new(
                ErrorKind::ResourceNotInitialized,
                "value read before first write",
            )
        })?;
        let v = value.downcast_ref::<T>().ok_or_else(|| {
            Error::new(
                ErrorKind::TypeMismatch,
                "stored value has a different type than the handle",
            )
        })?;
        Ok(f(v))
    }

    /// Borrow the value without tracking it.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn with_untracked<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        match self.try_with_untracked(f) {
            Ok(v) => v,
            Err(err) => self.access_failed(err),
        }
    }

    /// Borrow the value. When called inside a computed's closure the node is
    /// automatically tracked as a dependency.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn with<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        self.track();
        self.with_untracked(f)
    }

    /// Get a copy of the value without tracking it.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn get_untracked(&self) -> T
    where
        T: Copy,
    {
        self.with_untracked(|v| *v)
    }

    /// Get a copy of the value. Tracked.
    ///
    /// Panics if the node was closed or never written; use [`try_get`] for
    /// the fallible form.
    ///
    /// [`try_get`]: ReadVar::try_get
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn get(&self) -> T
    where
        T: Copy,
    {
        self.track();
        self.get_untracked()
    }

    /// Get a clone of the value without tracking it.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn get_clone_untracked(&self) -> T
    where
        T: Clone,
    {
        self.with_untracked(Clone::clone)
    }

    /// Get a clone of the value. Tracked.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn get_clone(&self) -> T
    where
        T: Clone,
    {
        self.track();
        self.get_clone_untracked()
    }

    /// Fallible [`get`](ReadVar::get): reports `NullPointer` for a closed
    /// node, `ResourceNotInitialized` for a value never written.
    pub fn try_get(&self) -> Result<T>
    where
        T: Copy,
    {
        self.track();
        self.try_with_untracked(|v| *v)
    }

    /// Fallible [`get_clone`](ReadVar::get_clone).
    pub fn try_get_clone(&self) -> Result<T>
    where
        T: Clone,
    {
        self.track();
        self.try_with_untracked(Clone::clone)
    }

    /// Assign a debug name to the node.
    pub fn set_name(&self, name: &str) {
        self.graph.set_name(self.id, name);
    }

    /// The debug name assigned to the node, if any.
    pub fn name(&self) -> Option<String> {
        self.graph.name(self.id)
    }

    /// Remove the node from the graph, cascade-closing everything that
    /// observes it. Closing an already-closed node is a no-op.
    ///
    /// Fails with [`ErrorKind::BatchConflict`] while the node is enrolled in
    /// an active batch.
    pub fn close(&self) -> Result<()> {
        if self.graph.in_active_batch(self.id) {
            return Err(Error::new(
                ErrorKind::BatchConflict,
                "node is enrolled in an active batch",
            ));
        }
        self.graph.close_node(self.id);
        Ok(())
    }

    /// Number of nodes directly observing this one.
    pub fn observer_count(&self) -> usize {
        self.graph.node_metrics(self.id).0
    }

    /// Number of nodes this one directly depends on.
    pub fn dependency_count(&self) -> usize {
        self.graph.node_metrics(self.id).1
    }

    #[cold]
    pub(crate) fn access_failed(&self, err: Error) -> ! {
        #[cfg(debug_assertions)]
        panic!("{err} (handle created at {})", self.created_at);
        #[cfg(not(debug_assertions))]
        panic!("{err}");
    }
}

impl<T> Var<T> {
    /// Set a new value and propagate to everything downstream.
    ///
    /// The changed flag handed to downstream trigger policies is computed
    /// with `PartialEq` on a local copy, so writing an equal value does not
    /// recompute on-change observers.
    ///
    /// Inside a batch's collection pass the write is intercepted: observers
    /// are collected and the store is deferred to `execute`. A `set` from
    /// inside a recomputing closure cannot re-enter the node being
    /// recomputed (its dependency edges are detached for the duration of its
    /// callback), making re-entrant writes deterministic.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn set(&self, new: T)
    where
        T: PartialEq + Send + Sync,
    {
        if batch::note_write(self.graph, self.id) {
            return;
        }
        match self.write_value(new) {
            Ok(changed) => self.after_write(changed),
            Err(err) => self.0.access_failed(err),
        }
    }

    /// Fallible [`set`](Var::set).
    pub fn try_set(&self, new: T) -> Result<()>
    where
        T: PartialEq + Send + Sync,
    {
        if batch::note_write(self.graph, self.id) {
            return Ok(());
        }
        let changed = self.write_value(new)?;
        self.after_write(changed);
        Ok(())
    }

    /// Set a new value without notifying anyone. Generally not recommended
    /// as it easily leads to state inconsistencies.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn set_silent(&self, new: T)
    where
        T: PartialEq + Send + Sync,
    {
        if let Err(err) = self.write_value(new) {
            self.0.access_failed(err);
        }
    }

    /// Swap in a new value, returning the previous one, and propagate.
    ///
    /// Unlike [`set`](Var::set), in-place mutators apply their write even
    /// during a batch's collection pass (the touched observers are still
    /// collected and notification still waits for `execute`).
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn replace(&self, new: T) -> T
    where
        T: PartialEq,
    {
        let (old, changed) = self.update_silent(|v| {
            let old = std::mem::replace(v, new);
            let changed = old != *v;
            (old, changed)
        });
        if batch::note_write(self.graph, self.id) {
            return old;
        }
        self.after_write(changed);
        old
    }

    /// Swap in a new value, returning the previous one, without notifying.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn replace_silent(&self, new: T) -> T {
        self.update_silent(|v| std::mem::replace(v, new))
    }

    /// Take the value out, leaving `T::default()`, and propagate.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn take(&self) -> T
    where
        T: Default + PartialEq,
    {
        self.replace(T::default())
    }

    /// Take the value out, leaving `T::default()`, without notifying.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn take_silent(&self) -> T
    where
        T: Default,
    {
        self.replace_silent(T::default())
    }

    /// Mutate the value in place and propagate. The cell is written once;
    /// the changed flag comes from comparing against a pre-mutation clone.
    /// Batch behavior matches [`replace`](Var::replace).
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn update<U>(&self, f: impl FnOnce(&mut T) -> U) -> U
    where
        T: PartialEq + Clone,
    {
        let (ret, changed) = self.update_silent(|v| {
            let before = v.clone();
            let ret = f(v);
            let changed = *v != before;
            (ret, changed)
        });
        if batch::note_write(self.graph, self.id) {
            return ret;
        }
        self.after_write(changed);
        ret
    }

    /// Mutate the value in place without notifying anyone.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn update_silent<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        match self.try_update_silent(f) {
            Ok(v) => v,
            Err(err) => self.0.access_failed(err),
        }
    }

    /// Fallible [`update_silent`](Var::update_silent).
    pub fn try_update_silent<U>(&self, f: impl FnOnce(&mut T) -> U) -> Result<U> {
        // Take the value out so user code runs without the graph lock held.
        let mut boxed = {
            let mut nodes = self.graph.nodes.write();
            let node = nodes.get_mut(self.id).ok_or_else(|| {
                Error::new(ErrorKind::NullPointer, "handle refers to a closed node")
            })?;
            node.value.take().ok_or_else(|| {
                Error::new(
                    ErrorKind::ResourceNotInitialized,
                    "value updated before first write",
                )
            })?
        };
        let ret = match boxed.downcast_mut::<T>() {
            Some(v) => Ok(f(v)),
            None => Err(Error::new(
                ErrorKind::TypeMismatch,
                "stored value has a different type than the handle",
            )),
        };
        let leftover = {
            let mut nodes = self.graph.nodes.write();
            match nodes.get_mut(self.id) {
                Some(node) => {
                    node.value = Some(boxed);
                    None
                }
                None => Some(boxed),
            }
        };
        drop(leftover);
        ret
    }

    fn write_value(&self, new: T) -> Result<bool>
    where
        T: PartialEq + Send + Sync,
    {
        let mut slot = Some(new);
        match self.try_update_silent(|v| {
            let new = slot.take().expect("value slot emptied twice");
            if *v == new {
                false
            } else {
                *v = new;
                true
            }
        }) {
            Ok(changed) => Ok(changed),
            Err(err) if err.kind() == ErrorKind::ResourceNotInitialized => {
                // First write to an uninitialized variable.
                let new = slot.take().expect("value slot emptied twice");
                let mut nodes = self.graph.nodes.write();
                match nodes.get_mut(self.id) {
                    Some(node) => {
                        node.value = Some(Box::new(new));
                        Ok(true)
                    }
                    None => Err(Error::new(
                        ErrorKind::NullPointer,
                        "handle refers to a closed node",
                    )),
                }
            }
            Err(err) => Err(err),
        }
    }

    fn after_write(&self, changed: bool) {
        if batch::is_executing() {
            self.graph.mark_dependents(self.id, changed);
        } else {
            self.graph.propagate_from(self.id, changed);
        }
    }
}

/// Create a reactive variable holding `value`.
///
/// The default policies are on-change triggering and the `Keep` invalidation
/// policy; pick others with [`var_with`].
///
/// # Example
/// ```
/// # use reflux::*;
/// # let _ = create_graph(|| {
/// let state = var(0);
/// assert_eq!(state.get(), 0);
/// state.set(1);
/// assert_eq!(state.get(), 1);
/// # });
/// ```
#[cfg_attr(debug_assertions, track_caller)]
pub fn var<T>(value: T) -> Var<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    var_with(value, Trigger::OnChange, Invalidate::Keep)
}

/// [`var`] with explicit trigger and invalidation policies.
#[cfg_attr(debug_assertions, track_caller)]
pub fn var_with<T>(value: T, trigger: Trigger, invalidate: Invalidate) -> Var<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    let graph = Graph::global();
    let mut node = Node::new(trigger, invalidate);
    node.value = Some(Box::new(value));
    let id = graph.insert_node(node);
    Var(ReadVar::from_parts(id, graph))
}

/// Create a variable with no initial value. Reading it before the first
/// [`set`](Var::set) reports [`ErrorKind::ResourceNotInitialized`].
#[cfg_attr(debug_assertions, track_caller)]
pub fn var_uninit<T>() -> Var<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    var_uninit_with(Trigger::OnChange, Invalidate::Keep)
}

/// [`var_uninit`] with explicit policies.
#[cfg_attr(debug_assertions, track_caller)]
pub fn var_uninit_with<T>(trigger: Trigger, invalidate: Invalidate) -> Var<T>
where
    T: PartialEq + Send + Sync + 'static,
{
    let graph = Graph::global();
    let id = graph.insert_node(Node::new(trigger, invalidate));
    Var(ReadVar::from_parts(id, graph))
}

/// Create an immutable variable: a source whose value can never be written.
#[cfg_attr(debug_assertions, track_caller)]
pub fn const_var<T>(value: T) -> ReadVar<T>
where
    T: Send + Sync + 'static,
{
    let graph = Graph::global();
    let mut node = Node::new(Trigger::OnChange, Invalidate::Keep);
    node.value = Some(Box::new(value));
    let id = graph.insert_node(node);
    ReadVar::from_parts(id, graph)
}

/// Cloning a handle registers another external reference on the node.
impl<T> Clone for ReadVar<T> {
    fn clone(&self) -> Self {
        self.graph.add_ref(self.id);
        Self {
            id: self.id,
            graph: self.graph,
            #[cfg(debug_assertions)]
            created_at: self.created_at,
            _phantom: PhantomData,
        }
    }
}

/// Dropping the last handle to a node fires its invalidation policy.
impl<T> Drop for ReadVar<T> {
    fn drop(&mut self) {
        self.graph.release_ref(self.id);
    }
}

impl<T> Clone for Var<T> {
    fn clone(&self) -> Self {
        Var(self.0.clone())
    }
}

impl<T> Deref for Var<T> {
    type Target = ReadVar<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: Default + PartialEq + Send + Sync> Default for Var<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn default() -> Self {
        var(T::default())
    }
}

// Handles compare and hash by node identity, not by value.
impl<T> PartialEq for ReadVar<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && std::ptr::eq(self.graph, other.graph)
    }
}
impl<T> Eq for ReadVar<T> {}
impl<T> Hash for ReadVar<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> PartialEq for Var<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for Var<T> {}
impl<T> Hash for Var<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

// Formatting forwards to the current value.
impl<T: fmt::Debug> fmt::Debug for ReadVar<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.with(|value| value.fmt(f))
    }
}
impl<T: fmt::Debug> fmt::Debug for Var<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl<T: fmt::Display> fmt::Display for ReadVar<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.with(|value| value.fmt(f))
    }
}
impl<T: fmt::Display> fmt::Display for Var<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<T: AddAssign<Rhs> + PartialEq + Clone + Send + Sync, Rhs> AddAssign<Rhs> for Var<T> {
    fn add_assign(&mut self, rhs: Rhs) {
        self.update(|this| *this += rhs);
    }
}
impl<T: SubAssign<Rhs> + PartialEq + Clone + Send + Sync, Rhs> SubAssign<Rhs> for Var<T> {
    fn sub_assign(&mut self, rhs: Rhs) {
        self.update(|this| *this -= rhs);
    }
}
impl<T: MulAssign<Rhs> + PartialEq + Clone + Send + Sync, Rhs> MulAssign<Rhs> for Var<T> {
    fn mul_assign(&mut self, rhs: Rhs) {
        self.update(|this| *this *= rhs);
    }
}
impl<T: DivAssign<Rhs> + PartialEq + Clone + Send + Sync, Rhs> DivAssign<Rhs> for Var<T> {
    fn div_assign(&mut self, rhs: Rhs) {
        self.update(|this| *this /= rhs);
    }
}
impl<T: RemAssign<Rhs> + PartialEq + Clone + Send + Sync, Rhs> RemAssign<Rhs> for Var<T> {
    fn rem_assign(&mut self, rhs: Rhs) {
        self.update(|this| *this %= rhs);
    }
}

#[cfg(feature = "serde")]
impl<T: serde::Serialize> serde::Serialize for ReadVar<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.with(|value| value.serialize(serializer))
    }
}
#[cfg(feature = "serde")]
impl<'de, T> serde::Deserialize<'de> for Var<T>
where
    T: serde::Deserialize<'de> + PartialEq + Send + Sync + 'static,
{
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(var(T::deserialize(deserializer)?))
    }
}
#[cfg(feature = "serde")]
impl<T: serde::Serialize> serde::Serialize for Var<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}
