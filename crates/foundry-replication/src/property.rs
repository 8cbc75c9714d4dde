//! Dirty-tracked replicated values.

use std::any::{Any, type_name};
use std::fmt;
use std::marker::PhantomData;

use crate::codec::SharedCodec;
use crate::error::CodecError;
use crate::listener::{EventSource, ListenerId, Listeners};

/// A single typed value replicated from its entity's owner to every peer.
///
/// `set` does not check ownership. Callers that must not write on a
/// non-owned entity either check [`NetworkEntity::is_owner`] first or use
/// [`NetworkEntity::set_property_checked`].
///
/// [`NetworkEntity::is_owner`]: crate::NetworkEntity::is_owner
/// [`NetworkEntity::set_property_checked`]: crate::NetworkEntity::set_property_checked
pub struct NetworkProperty<T> {
    value: T,
    codec: SharedCodec<T>,
    dirty: bool,
    listeners: Listeners<T>,
}

impl<T: 'static> NetworkProperty<T> {
    /// A clean property holding `initial`.
    pub fn new(initial: T, codec: SharedCodec<T>) -> Self {
        Self {
            value: initial,
            codec,
            dirty: false,
            listeners: Listeners::new(),
        }
    }

    /// Store `value`, mark the property dirty, and notify listeners as `Local`.
    pub fn set(&mut self, value: T) {
        self.value = value;
        self.dirty = true;
        self.listeners.notify(EventSource::Local, &self.value);
    }

    /// Last value set locally or received from the owner.
    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Force the current value into the next sync pass.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Encode the value into `out` if dirty.
    ///
    /// Returns whether anything was written. The dirty flag is cleared even
    /// when encoding fails, so a value that cannot be encoded is skipped once
    /// rather than retried every tick.
    pub fn serialize_if_dirty(&mut self, out: &mut Vec<u8>) -> Result<bool, CodecError> {
        if !self.dirty {
            return Ok(false);
        }
        self.dirty = false;
        self.codec.encode(&self.value, out)?;
        Ok(true)
    }

    /// Encode the value regardless of the dirty flag.
    pub fn serialize(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        self.codec.encode(&self.value, out)
    }

    /// Overwrite the value with the decoded bytes and notify listeners as
    /// `Remote`. Leaves the value untouched if decoding fails.
    pub fn deserialize(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.value = self.codec.decode(bytes)?;
        self.listeners.notify(EventSource::Remote, &self.value);
        Ok(())
    }

    /// Called with the new value after every `set` and every applied update.
    pub fn on_changed(&mut self, listener: impl FnMut(EventSource, &T) + 'static) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

impl<T: fmt::Debug> fmt::Debug for NetworkProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkProperty")
            .field("value", &self.value)
            .field("dirty", &self.dirty)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Type-erased view used by entities to drive properties by index.
pub(crate) trait ErasedProperty {
    fn serialize_if_dirty(&mut self, out: &mut Vec<u8>) -> Result<bool, CodecError>;
    fn serialize(&self, out: &mut Vec<u8>) -> Result<(), CodecError>;
    fn apply(&mut self, bytes: &[u8]) -> Result<(), CodecError>;
    fn mark_dirty(&mut self);
    fn value_type(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static> ErasedProperty for NetworkProperty<T> {
    fn serialize_if_dirty(&mut self, out: &mut Vec<u8>) -> Result<bool, CodecError> {
        NetworkProperty::serialize_if_dirty(self, out)
    }

    fn serialize(&self, out: &mut Vec<u8>) -> Result<(), CodecError> {
        NetworkProperty::serialize(self, out)
    }

    fn apply(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.deserialize(bytes)
    }

    fn mark_dirty(&mut self) {
        NetworkProperty::mark_dirty(self);
    }

    fn value_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Typed handle to a property slot on an entity.
///
/// Keys are plain indices, so every peer that registers the same components
/// in the same order derives the same keys.
pub struct PropertyKey<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PropertyKey<T> {
    /// Key for the property at `index`.
    pub const fn at(index: u32) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    pub fn index(self) -> u32 {
        self.index
    }
}

impl<T> Clone for PropertyKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PropertyKey<T> {}

impl<T> PartialEq for PropertyKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for PropertyKey<T> {}

impl<T> fmt::Debug for PropertyKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyKey<{}>({})", type_name::<T>(), self.index)
    }
}
