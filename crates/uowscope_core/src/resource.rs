//! Resource capabilities the scope manager drives.
//!
//! Concrete handles (connection pooling, mapping, in-memory doubles) live
//! outside this crate. A scope only needs three capabilities from them:
//! - [`ResourceHandle`] - one unit of transactional work per resource type
//! - [`TransactionHandle`] - the optional explicit transaction of a handle
//! - [`ResourceFactory`] - creates handles on first use

use crate::error::HandleResult;
use crate::notify::PendingChange;
use crate::types::IsolationLevel;
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Downcasting support for handle trait objects.
pub trait AsAny: Any {
    /// Returns `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;

    /// Returns `self` as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// An opaque unit of transactional work for one resource type.
///
/// A registry owns at most one handle per resource type and drives it
/// through persist, transaction and dispose calls.
#[async_trait]
pub trait ResourceHandle: AsAny + Send {
    /// Persists pending changes and returns the number of affected entries.
    fn persist_changes(&mut self) -> HandleResult<usize>;

    /// Asynchronous [`ResourceHandle::persist_changes`].
    ///
    /// The default runs the synchronous path.
    async fn persist_changes_async(&mut self, cancel: &CancellationToken) -> HandleResult<usize> {
        let _ = cancel;
        self.persist_changes()
    }

    /// Opens a transaction at `isolation`.
    fn begin_transaction(
        &mut self,
        isolation: IsolationLevel,
    ) -> HandleResult<Box<dyn TransactionHandle>>;

    /// Enables or disables automatic change detection.
    ///
    /// Read-only registries switch detection off right after creation.
    fn set_auto_detect_changes(&mut self, enabled: bool) {
        let _ = enabled;
    }

    /// Returns the mutations that the next persist would write.
    fn pending_changes(&self) -> Vec<PendingChange> {
        Vec::new()
    }

    /// Releases the handle.
    fn dispose(&mut self) -> HandleResult<()> {
        Ok(())
    }
}

/// Explicit transaction opened alongside a resource handle.
pub trait TransactionHandle: Send {
    /// Commits the transaction.
    fn commit(&mut self) -> HandleResult<()>;

    /// Rolls the transaction back.
    fn rollback(&mut self) -> HandleResult<()>;

    /// Releases the transaction. Rolls back if still open.
    fn dispose(&mut self) -> HandleResult<()> {
        Ok(())
    }
}

/// Runtime identity of a resource type.
#[derive(Clone, Copy)]
pub struct ResourceKind {
    id: TypeId,
    name: &'static str,
}

impl ResourceKind {
    /// Returns the identity of `R`.
    #[must_use]
    pub fn of<R: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<R>(),
            name: std::any::type_name::<R>(),
        }
    }

    /// Returns the type ID.
    #[must_use]
    pub const fn id(&self) -> TypeId {
        self.id
    }

    /// Returns the type name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns true if this is the identity of `R`.
    #[must_use]
    pub fn is<R: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<R>()
    }
}

impl PartialEq for ResourceKind {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ResourceKind {}

impl std::hash::Hash for ResourceKind {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceKind({})", self.name)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Creates resource handles on first use.
///
/// The returned handle must be of the concrete type named by `kind`;
/// registries reject anything else.
pub trait ResourceFactory: Send + Sync {
    /// Creates a handle for `kind`.
    fn create(&self, kind: ResourceKind) -> HandleResult<Box<dyn ResourceHandle>>;
}

impl<F> ResourceFactory for F
where
    F: Fn(ResourceKind) -> HandleResult<Box<dyn ResourceHandle>> + Send + Sync,
{
    fn create(&self, kind: ResourceKind) -> HandleResult<Box<dyn ResourceHandle>> {
        self(kind)
    }
}

/// Error returned by [`TypedResourceFactory`] for an unregistered type.
#[derive(Debug, thiserror::Error)]
#[error("no constructor registered for resource {resource}")]
pub struct UnknownResource {
    /// Type name of the requested resource.
    pub resource: &'static str,
}

type Constructor = Box<dyn Fn() -> HandleResult<Box<dyn ResourceHandle>> + Send + Sync>;

/// A [`ResourceFactory`] with one constructor per resource type.
///
/// # Example
///
/// ```rust,ignore
/// let factory = TypedResourceFactory::new()
///     .with(|| Ok(OrdersStore::connect(&url)?))
///     .with(|| Ok(AuditLog::default()));
/// ```
#[derive(Default)]
pub struct TypedResourceFactory {
    constructors: HashMap<TypeId, Constructor>,
}

impl TypedResourceFactory {
    /// Creates a factory with no constructors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the constructor of `R`, replacing any previous one.
    #[must_use]
    pub fn with<R, F>(mut self, constructor: F) -> Self
    where
        R: ResourceHandle,
        F: Fn() -> HandleResult<R> + Send + Sync + 'static,
    {
        self.constructors.insert(
            TypeId::of::<R>(),
            Box::new(move || constructor().map(|r| Box::new(r) as Box<dyn ResourceHandle>)),
        );
        self
    }

    /// Returns true if `R` has a constructor.
    #[must_use]
    pub fn knows<R: ResourceHandle>(&self) -> bool {
        self.constructors.contains_key(&TypeId::of::<R>())
    }

    /// Returns the number of registered constructors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    /// Returns true if no constructor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl ResourceFactory for TypedResourceFactory {
    fn create(&self, kind: ResourceKind) -> HandleResult<Box<dyn ResourceHandle>> {
        match self.constructors.get(&kind.id()) {
            Some(constructor) => constructor(),
            None => Err(Box::new(UnknownResource {
                resource: kind.name(),
            })),
        }
    }
}

impl fmt::Debug for TypedResourceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedResourceFactory")
            .field("constructors", &self.constructors.len())
            .finish()
    }
}
