//! Binary codecs and the registry that maps value types to them.
//!
//! Every replicated type resolves to exactly one [`Codec`], in a fixed order:
//! an explicit codec supplied at registration, then the type's own
//! [`SelfDescribing`] codec, then the [`CodecRegistry`]. A type that resolves
//! to none of these fails entity construction with
//! [`ReplicationError::MissingCodec`](crate::ReplicationError::MissingCodec).

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

/// Stateless encode/decode pair for one value type.
///
/// Implementations must be bijective and deterministic: equal values encode
/// to equal bytes, and `decode(encode(v)) == v`.
pub trait Codec<T>: Send + Sync {
    /// Append the encoding of `value` to `out`.
    fn encode(&self, value: &T, out: &mut Vec<u8>) -> Result<(), CodecError>;

    /// Decode exactly one value from `bytes`. Trailing bytes are an error.
    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Shared handle to a codec.
pub type SharedCodec<T> = Arc<dyn Codec<T>>;

/// A type that knows its own codec, taking precedence over the registry.
pub trait SelfDescribing: Sized + 'static {
    /// The codec for this type.
    fn codec() -> SharedCodec<Self>;
}

/// [`postcard`]-backed codec for any serde type.
///
/// Postcard writes integers as varints and sequences with a length prefix,
/// with no padding or map reordering, so output is deterministic.
pub struct PostcardCodec<T>(PhantomData<fn() -> T>);

impl<T> PostcardCodec<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    /// A shared postcard codec for `T`.
    pub fn shared() -> SharedCodec<T> {
        Arc::new(Self(PhantomData))
    }
}

impl<T> Codec<T> for PostcardCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T, out: &mut Vec<u8>) -> Result<(), CodecError> {
        let bytes = postcard::to_allocvec(value).map_err(|e| CodecError::Encode {
            type_name: type_name::<T>(),
            reason: e.to_string(),
        })?;
        out.extend_from_slice(&bytes);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        let (value, rest) = postcard::take_from_bytes(bytes).map_err(|e| CodecError::Decode {
            type_name: type_name::<T>(),
            reason: e.to_string(),
        })?;
        if !rest.is_empty() {
            return Err(CodecError::Decode {
                type_name: type_name::<T>(),
                reason: format!("{} trailing bytes", rest.len()),
            });
        }
        Ok(value)
    }
}

/// Pick the codec for `T`: explicit first, then the registry.
///
/// Self-describing types pass `Some(T::codec())` as the explicit codec.
pub fn resolve_codec<T: 'static>(
    explicit: Option<SharedCodec<T>>,
    registry: &CodecRegistry,
) -> Result<SharedCodec<T>, CodecError> {
    match explicit {
        Some(codec) => Ok(codec),
        None => registry.lookup::<T>(),
    }
}

/// Maps a value's static type to its codec.
#[derive(Default)]
pub struct CodecRegistry {
    codecs: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    names: HashMap<TypeId, &'static str>,
}

impl CodecRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with postcard codecs for primitives,
    /// `String`, and `Vec<u8>`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_serde::<bool>();
        registry.register_serde::<u8>();
        registry.register_serde::<u16>();
        registry.register_serde::<u32>();
        registry.register_serde::<u64>();
        registry.register_serde::<i8>();
        registry.register_serde::<i16>();
        registry.register_serde::<i32>();
        registry.register_serde::<i64>();
        registry.register_serde::<f32>();
        registry.register_serde::<f64>();
        registry.register_serde::<String>();
        registry.register_serde::<Vec<u8>>();
        registry
    }

    /// Register `codec` for exactly `T`. Returns `true` if it replaced one.
    pub fn register<T: 'static>(&mut self, codec: SharedCodec<T>) -> bool {
        let id = TypeId::of::<T>();
        self.names.insert(id, type_name::<T>());
        let replaced = self.codecs.insert(id, Box::new(codec)).is_some();
        if replaced {
            tracing::debug!("Replaced codec for {}", type_name::<T>());
        }
        replaced
    }

    /// Register a [`PostcardCodec`] for `T`.
    pub fn register_serde<T>(&mut self) -> bool
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        self.register(PostcardCodec::<T>::shared())
    }

    /// Register the self-describing codec of `T` in the registry.
    pub fn register_self_describing<T: SelfDescribing>(&mut self) -> bool {
        self.register(T::codec())
    }

    /// The codec registered for `T`.
    pub fn lookup<T: 'static>(&self) -> Result<SharedCodec<T>, CodecError> {
        self.codecs
            .get(&TypeId::of::<T>())
            .and_then(|codec| codec.downcast_ref::<SharedCodec<T>>())
            .cloned()
            .ok_or(CodecError::NotFound {
                type_name: type_name::<T>(),
            })
    }

    /// Whether `T` has a registered codec.
    pub fn contains<T: 'static>(&self) -> bool {
        self.codecs.contains_key(&TypeId::of::<T>())
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Names of registered types, sorted, for startup diagnostics.
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.names.values().copied().collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}
