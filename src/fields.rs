//! Aggregating reactive fields under an owning object.
//!
//! A payload type embeds a [`Fields`] value and creates its reactive members
//! through [`Fields::field`]. Wrapping the payload with [`var_with_fields`]
//! then wires every registered field as a dependency of the wrapping
//! variable, so a write to any field notifies observers of the container.

use crate::node::next_serial;
use crate::vars::{var, Var};

/// The stable identity of a field-owning object, embedded in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fields {
    id: u64,
}

impl Fields {
    /// A fresh object identity.
    pub fn new() -> Self {
        Self { id: next_serial() }
    }

    /// The object id fields are registered under.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Create a variable registered as a field of this object.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn field<T>(&self, value: T) -> Var<T>
    where
        T: PartialEq + Send + Sync + 'static,
    {
        let v = var(value);
        v.graph.register_field(self.id, v.id);
        v
    }
}

impl Default for Fields {
    fn default() -> Self {
        Self::new()
    }
}

/// Implemented by payload types whose reactive fields should re-bind to the
/// container created by [`var_with_fields`].
pub trait FieldOwner {
    /// The field identity embedded in the object.
    fn fields(&self) -> &Fields;
}

/// Like [`var`], but for payloads owning reactive fields.
///
/// Every field previously created through the payload's [`Fields`] becomes a
/// dependency of the returned container variable, through the ordinary
/// checked edge API. Closing the container drops the whole field-index entry
/// for the object.
///
/// # Example
/// ```
/// # use reflux::*;
/// #[derive(Clone, PartialEq)]
/// struct Sensor {
///     fields: Fields,
///     unit: &'static str,
/// }
/// impl FieldOwner for Sensor {
///     fn fields(&self) -> &Fields {
///         &self.fields
///     }
/// }
///
/// # let _ = create_graph(|| {
/// let fields = Fields::new();
/// let reading = fields.field(20.0_f64);
/// let sensor = var_with_fields(Sensor { fields, unit: "C" });
/// let display = calc_on((&sensor,), |s: Sensor| s.unit);
/// assert_eq!(display.get(), "C");
/// // Writing the field flows through the container to its observers.
/// reading.set(21.5);
/// # });
/// ```
#[cfg_attr(debug_assertions, track_caller)]
pub fn var_with_fields<P>(payload: P) -> Var<P>
where
    P: FieldOwner + PartialEq + Send + Sync + 'static,
{
    let object_id = payload.fields().id();
    let v = var(payload);
    {
        let mut nodes = v.graph.nodes.write();
        if let Some(node) = nodes.get_mut(v.id) {
            node.object_id = Some(object_id);
        }
    }
    v.graph.bind_fields(object_id, v.id);
    v
}
