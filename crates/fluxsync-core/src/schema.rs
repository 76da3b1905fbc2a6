//! Channel schemas.
//!
//! A [`Schema`] turns a decoded sample (a `serde_json::Value`) into a typed
//! value or rejects it. A [`Channel`] binds a channel name to one schema at
//! compile time, so bindings can be declared as `const` items:
//!
//! ```rust,ignore
//! use fluxsync_core::{Channel, JsonSchema};
//!
//! const STATUS_SET: Channel<JsonSchema<Status>> =
//!     Channel::new("sy_status_set", JsonSchema::new());
//! ```
//!
//! Each channel name is bound to a single schema for the lifetime of a
//! registry; see [`SyncError::SchemaMismatch`](crate::SyncError::SchemaMismatch).

use std::any::{Any, TypeId, type_name};
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

// ── ValidationError ──────────────────────────────────────────────────

/// A sample did not satisfy its channel's schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

// ── Schema ───────────────────────────────────────────────────────────

/// Parses raw samples into typed values.
pub trait Schema: Send + Sync + 'static {
    type Value: Send + Sync + 'static;

    /// Human-readable name, used in mismatch reports.
    fn name(&self) -> Cow<'static, str>;

    fn parse(&self, raw: &Value) -> Result<Self::Value, ValidationError>;
}

/// Serde-derived schema: a sample is valid if it deserializes into `T`.
pub struct JsonSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSchema<T> {
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonSchema<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for JsonSchema<T> {}

impl<T> fmt::Debug for JsonSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonSchema<{}>", type_name::<T>())
    }
}

impl<T> Schema for JsonSchema<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    type Value = T;

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(type_name::<T>())
    }

    fn parse(&self, raw: &Value) -> Result<T, ValidationError> {
        T::deserialize(raw).map_err(|e| ValidationError::new(e.to_string()))
    }
}

/// Accepts any sample as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawJson;

impl Schema for RawJson {
    type Value = Value;

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed("json")
    }

    fn parse(&self, raw: &Value) -> Result<Value, ValidationError> {
        Ok(raw.clone())
    }
}

/// Serde-derived schema with an extra predicate over the parsed value.
///
/// The `name` identifies the predicate: two `Validated` schemas over the
/// same type with different names are different schemas. Give every
/// predicate its own name. Two schemas that share a name and type are
/// treated as one, and a channel keeps the predicate it was first
/// registered with.
pub struct Validated<T> {
    name: &'static str,
    check: fn(&T) -> Result<(), String>,
}

impl<T> Validated<T> {
    pub const fn new(name: &'static str, check: fn(&T) -> Result<(), String>) -> Self {
        Self { name, check }
    }
}

impl<T> Clone for Validated<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Validated<T> {}

impl<T> fmt::Debug for Validated<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validated").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<T> Schema for Validated<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    type Value = T;

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(self.name)
    }

    fn parse(&self, raw: &Value) -> Result<T, ValidationError> {
        let value = T::deserialize(raw).map_err(|e| ValidationError::new(e.to_string()))?;
        (self.check)(&value).map_err(ValidationError::new)?;
        Ok(value)
    }
}

// ── Channel ──────────────────────────────────────────────────────────

/// A channel name bound to its schema.
#[derive(Debug, Clone)]
pub struct Channel<S> {
    name: Cow<'static, str>,
    schema: S,
}

impl<S: Schema> Channel<S> {
    pub const fn new(name: &'static str, schema: S) -> Self {
        Self {
            name: Cow::Borrowed(name),
            schema,
        }
    }

    /// Bind a channel name only known at runtime.
    pub fn named(name: impl Into<String>, schema: S) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            schema,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &S {
        &self.schema
    }
}

// ── Type-erased schema ───────────────────────────────────────────────

/// Identity of a schema: its concrete type plus its reported name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SchemaKey {
    type_id: TypeId,
    name: Cow<'static, str>,
}

impl SchemaKey {
    pub(crate) fn of<S: Schema>(schema: &S) -> Self {
        Self {
            type_id: TypeId::of::<S>(),
            name: schema.name(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}

pub(crate) type ErasedValue = Arc<dyn Any + Send + Sync>;

/// Object-safe view of a [`Schema`], stored per channel in the registry.
pub(crate) trait ErasedSchema: Send + Sync {
    fn parse_erased(&self, raw: &Value) -> Result<ErasedValue, ValidationError>;
}

impl<S: Schema> ErasedSchema for S {
    fn parse_erased(&self, raw: &Value) -> Result<ErasedValue, ValidationError> {
        Ok(Arc::new(self.parse(raw)?))
    }
}
