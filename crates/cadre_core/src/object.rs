//! Managed objects and their runtime containers.
//!
//! A managed object is a resource with a scope, a lifecycle and a set of
//! dependencies. Its [`ManagedObjectSource`] provides the instance, possibly
//! asynchronously, through a [`ManagedObjectUser`]. The
//! [`ManagedObjectContainer`] tracks the lifecycle:
//!
//! ```text
//! Unsourced ─► Sourcing ─► Loaded ─► Coordinating ─► Ready ─► Released
//!                  │                      │
//!                  └──────► Failed ◄──────┘
//! ```
//!
//! Sourcing and coordination happen at most once per container no matter how
//! many functions load it or how often they are resumed.

use core::any::Any;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use downcast_rs::{Downcast, DowncastSync, impl_downcast};
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::escalation::{Escalation, ExecutionError};
use crate::index::{ManagedObjectIndex, TypeInfo};
use crate::operation::{AsyncOperation, Progress};

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// A resource managed by the engine.
///
/// # Example
///
/// ```
/// use cadre_core::object::{Dependencies, ManagedObject};
/// use cadre_core::escalation::Escalation;
/// use cadre_core::operation::Progress;
///
/// struct Connection { url: String }
///
/// impl ManagedObject for Connection {}
///
/// struct Repository { connection: Option<String> }
///
/// impl ManagedObject for Repository {
///     fn coordinate(&mut self, dependencies: &Dependencies) -> Result<Progress, Escalation> {
///         let connection = dependencies.read::<Connection>("connection")?;
///         self.connection = Some(connection.url.clone());
///         Ok(Progress::Complete)
///     }
/// }
/// ```
pub trait ManagedObject: DowncastSync {
    /// Receives the resolved dependencies once, after every object the
    /// function requires has been loaded.
    fn coordinate(&mut self, dependencies: &Dependencies) -> Result<Progress, Escalation> {
        let _ = dependencies;
        Ok(Progress::Complete)
    }

    /// Called when the owning scope ends.
    fn release(&mut self) {}
}

impl_downcast!(sync ManagedObject);

/// Provides managed object instances.
pub trait ManagedObjectSource: Send + Sync + 'static {
    /// Starts sourcing an object.
    ///
    /// The implementation must eventually call [`ManagedObjectUser::set_object`]
    /// or [`ManagedObjectUser::set_failure`], either before returning or later
    /// from any thread.
    fn source(&self, user: ManagedObjectUser);
}

/// Source built from a synchronous factory. See [`source_fn`].
pub struct FnSource<F, M> {
    factory: F,
    marker: PhantomData<fn() -> M>,
}

/// Creates a source that builds the object synchronously.
pub fn source_fn<F, M>(factory: F) -> FnSource<F, M>
where
    F: Fn() -> Result<M, Escalation> + Send + Sync + 'static,
    M: ManagedObject,
{
    FnSource {
        factory,
        marker: PhantomData,
    }
}

impl<F, M> ManagedObjectSource for FnSource<F, M>
where
    F: Fn() -> Result<M, Escalation> + Send + Sync + 'static,
    M: ManagedObject,
{
    fn source(&self, user: ManagedObjectUser) {
        match (self.factory)() {
            Ok(object) => user.set_object(object),
            Err(cause) => user.set_failure(cause),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Metadata
// ─────────────────────────────────────────────────────────────────────────────

/// A resolved dependency of a managed object.
#[derive(Debug, Clone)]
pub struct ObjectDependency {
    /// Key the dependent uses to look the dependency up.
    pub key: String,
    /// Name of the depended upon object.
    pub object: String,
    /// Index of the depended upon object.
    pub index: ManagedObjectIndex,
}

/// Immutable description of a bound managed object.
pub struct ManagedObjectMetaData {
    pub(crate) name: String,
    pub(crate) index: ManagedObjectIndex,
    pub(crate) produces: Option<TypeInfo>,
    pub(crate) source: Arc<dyn ManagedObjectSource>,
    pub(crate) dependencies: Vec<ObjectDependency>,
    pub(crate) governances: Vec<usize>,
}

impl ManagedObjectMetaData {
    /// Name the object is bound under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scope and slot.
    #[must_use]
    pub fn index(&self) -> ManagedObjectIndex {
        self.index
    }

    /// Type the source produces, when declared.
    #[must_use]
    pub fn produces(&self) -> Option<TypeInfo> {
        self.produces
    }

    /// The source providing instances.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn ManagedObjectSource> {
        &self.source
    }

    /// Direct dependencies.
    #[must_use]
    pub fn dependencies(&self) -> &[ObjectDependency] {
        &self.dependencies
    }

    /// Indices of the governances overseeing this object.
    #[must_use]
    pub fn governances(&self) -> &[usize] {
        &self.governances
    }
}

impl core::fmt::Debug for ManagedObjectMetaData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ManagedObjectMetaData")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Access errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors accessing a managed object from user code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectAccessError {
    /// Nothing is bound under the name.
    #[error("no object is bound to `{0}`")]
    Unbound(String),
    /// The object has not been provided, or has been released.
    #[error("managed object `{0}` is not available")]
    Unavailable(String),
    /// The object is of another type.
    #[error("managed object `{name}` is not a `{expected}`")]
    TypeMismatch {
        /// Name of the object.
        name: String,
        /// The requested type.
        expected: &'static str,
    },
    /// The object is borrowed in a conflicting way.
    #[error("managed object `{0}` is already borrowed")]
    Busy(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Container
// ─────────────────────────────────────────────────────────────────────────────

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

enum ObjectState {
    Unsourced,
    Sourcing(AsyncOperation),
    Loaded,
    Coordinating(AsyncOperation),
    Ready,
    Failed(Escalation),
    Released,
}

/// Runtime holder of one managed object instance.
pub struct ManagedObjectContainer {
    instance: u64,
    metadata: Arc<ManagedObjectMetaData>,
    state: Mutex<ObjectState>,
    object: RwLock<Option<Box<dyn ManagedObject>>>,
}

impl ManagedObjectContainer {
    /// Creates an unsourced container.
    #[must_use]
    pub fn new(metadata: Arc<ManagedObjectMetaData>) -> Arc<Self> {
        Arc::new(Self {
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            metadata,
            state: Mutex::new(ObjectState::Unsourced),
            object: RwLock::new(None),
        })
    }

    /// The object's metadata.
    #[must_use]
    pub fn metadata(&self) -> &Arc<ManagedObjectMetaData> {
        &self.metadata
    }

    /// The object's bound name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Identity of this container, unique for the life of the program.
    #[must_use]
    pub fn instance_id(&self) -> u64 {
        self.instance
    }

    /// Returns `true` once loaded and coordinated.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(*self.state.lock(), ObjectState::Ready)
    }

    /// Returns `true` once loaded, whether or not coordinated.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(
            *self.state.lock(),
            ObjectState::Loaded | ObjectState::Coordinating(_) | ObjectState::Ready
        )
    }

    /// Returns a shareable reference to the object.
    #[must_use]
    pub fn object_ref(self: &Arc<Self>) -> ObjectRef {
        ObjectRef {
            container: Arc::clone(self),
        }
    }

    /// Ensures the object is sourced, starting sourcing on first call.
    pub fn load(self: &Arc<Self>) -> Result<Progress, Escalation> {
        let operation = {
            let mut state = self.state.lock();
            match &*state {
                ObjectState::Unsourced => {
                    let operation = AsyncOperation::new();
                    *state = ObjectState::Sourcing(operation.clone());
                    operation
                }
                ObjectState::Sourcing(operation) => {
                    let operation = operation.clone();
                    return Self::settle(&mut state, operation);
                }
                ObjectState::Loaded | ObjectState::Coordinating(_) | ObjectState::Ready => {
                    return Ok(Progress::Complete);
                }
                ObjectState::Failed(cause) => return Err(cause.clone()),
                ObjectState::Released => return Err(self.released()),
            }
        };

        tracing::debug!(object = self.name(), "sourcing managed object");
        self.metadata.source.source(ManagedObjectUser {
            container: Arc::clone(self),
            operation,
        });

        let mut state = self.state.lock();
        let pending = match &*state {
            ObjectState::Sourcing(operation) => operation.clone(),
            ObjectState::Failed(cause) => return Err(cause.clone()),
            ObjectState::Released => return Err(self.released()),
            _ => return Ok(Progress::Complete),
        };
        Self::settle(&mut state, pending)
    }

    /// Hands the object its dependencies, once.
    pub fn coordinate(self: &Arc<Self>, dependencies: &Dependencies) -> Result<Progress, Escalation> {
        let operation = {
            let mut state = self.state.lock();
            match &*state {
                ObjectState::Loaded => {
                    let operation = AsyncOperation::new();
                    *state = ObjectState::Coordinating(operation.clone());
                    operation
                }
                ObjectState::Coordinating(operation) => {
                    let operation = operation.clone();
                    return Self::settle(&mut state, operation);
                }
                ObjectState::Ready => return Ok(Progress::Complete),
                ObjectState::Unsourced | ObjectState::Sourcing(_) => {
                    return Err(ExecutionError::ObjectNotLoaded(self.name().to_string()).into());
                }
                ObjectState::Failed(cause) => return Err(cause.clone()),
                ObjectState::Released => return Err(self.released()),
            }
        };

        let progress = match self.object.write().as_deref_mut() {
            Some(object) => object.coordinate(dependencies),
            None => Ok(Progress::Complete),
        };

        match progress {
            Ok(Progress::Complete) => {
                self.finish_coordination(&operation, Ok(()));
                Ok(Progress::Complete)
            }
            Ok(Progress::Pending(inner)) => {
                let container = Arc::clone(self);
                let outer = operation.clone();
                inner.when_complete(move |outcome| {
                    container.finish_coordination(&outer, outcome.clone());
                });
                let mut state = self.state.lock();
                match &*state {
                    ObjectState::Coordinating(_) => Self::settle(&mut state, operation),
                    ObjectState::Failed(cause) => Err(cause.clone()),
                    _ => Ok(Progress::Complete),
                }
            }
            Err(cause) => {
                self.finish_coordination(&operation, Err(cause.clone()));
                Err(cause)
            }
        }
    }

    /// Fails the container unless it already reached a settled state.
    pub fn fail(&self, cause: Escalation) {
        let operation = {
            let mut state = self.state.lock();
            let operation = match &*state {
                ObjectState::Sourcing(operation) | ObjectState::Coordinating(operation) => {
                    Some(operation.clone())
                }
                ObjectState::Unsourced | ObjectState::Loaded => None,
                _ => return,
            };
            *state = ObjectState::Failed(cause.clone());
            operation
        };
        if let Some(operation) = operation {
            operation.fail(cause);
        }
    }

    /// Releases the object. Returns `true` if an instance was released.
    pub fn release(&self) -> bool {
        {
            let mut state = self.state.lock();
            if matches!(*state, ObjectState::Released) {
                return false;
            }
            *state = ObjectState::Released;
        }

        let object = self.object.write().take();
        match object {
            Some(mut object) => {
                object.release();
                tracing::trace!(object = self.name(), "released managed object");
                true
            }
            None => false,
        }
    }

    fn settle(
        state: &mut ObjectState,
        operation: AsyncOperation,
    ) -> Result<Progress, Escalation> {
        match operation.outcome() {
            None => Ok(Progress::Pending(operation)),
            Some(Ok(())) => Ok(Progress::Complete),
            Some(Err(cause)) => {
                *state = ObjectState::Failed(cause.clone());
                Err(cause)
            }
        }
    }

    fn provide(&self, object: Box<dyn ManagedObject>, operation: &AsyncOperation) {
        let mut state = self.state.lock();
        let accepted = matches!(
            &*state,
            ObjectState::Sourcing(current) if current.ptr_eq(operation) && !current.is_complete()
        );
        if !accepted {
            drop(state);
            tracing::warn!(
                object = self.name(),
                "managed object provided after sourcing was abandoned"
            );
            let mut object = object;
            object.release();
            return;
        }

        *self.object.write() = Some(object);
        *state = ObjectState::Loaded;
        drop(state);
        operation.complete();
    }

    fn reject(&self, cause: Escalation, operation: &AsyncOperation) {
        {
            let mut state = self.state.lock();
            if !matches!(&*state, ObjectState::Sourcing(current) if current.ptr_eq(operation)) {
                return;
            }
            *state = ObjectState::Failed(cause.clone());
        }
        tracing::debug!(object = self.name(), error = %cause, "managed object source failed");
        operation.fail(cause);
    }

    fn finish_coordination(&self, operation: &AsyncOperation, outcome: Result<(), Escalation>) {
        {
            let mut state = self.state.lock();
            if !matches!(&*state, ObjectState::Coordinating(current) if current.ptr_eq(operation)) {
                return;
            }
            *state = match &outcome {
                Ok(()) => ObjectState::Ready,
                Err(cause) => ObjectState::Failed(cause.clone()),
            };
        }
        match outcome {
            Ok(()) => operation.complete(),
            Err(cause) => operation.fail(cause),
        };
    }

    fn released(&self) -> Escalation {
        ExecutionError::ObjectReleased(self.name().to_string()).into()
    }
}

impl core::fmt::Debug for ManagedObjectContainer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ManagedObjectContainer")
            .field("name", &self.metadata.name)
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

/// Handed to a [`ManagedObjectSource`] to deliver the sourced object.
pub struct ManagedObjectUser {
    container: Arc<ManagedObjectContainer>,
    operation: AsyncOperation,
}

impl ManagedObjectUser {
    /// Name of the object being sourced.
    #[must_use]
    pub fn object_name(&self) -> &str {
        self.container.name()
    }

    /// Delivers the object, resuming every function waiting on it.
    pub fn set_object<M: ManagedObject>(self, object: M) {
        self.container.provide(Box::new(object), &self.operation);
    }

    /// Reports that the object could not be provided.
    pub fn set_failure(self, cause: impl Into<Escalation>) {
        self.container.reject(cause.into(), &self.operation);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ObjectRef / Dependencies
// ─────────────────────────────────────────────────────────────────────────────

/// Shareable handle to a managed object.
///
/// Borrowing is non-blocking: conflicting borrows fail with
/// [`ObjectAccessError::Busy`] instead of waiting.
#[derive(Clone)]
pub struct ObjectRef {
    container: Arc<ManagedObjectContainer>,
}

impl ObjectRef {
    /// The object's bound name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.container.name()
    }

    /// Identity of the underlying container.
    #[must_use]
    pub fn instance_id(&self) -> u64 {
        self.container.instance
    }

    /// The underlying container.
    #[must_use]
    pub fn container(&self) -> &Arc<ManagedObjectContainer> {
        &self.container
    }

    /// Borrows the object as `T`.
    pub fn read<T: Any + Send + Sync>(&self) -> Result<MappedRwLockReadGuard<'_, T>, ObjectAccessError> {
        let guard = self
            .container
            .object
            .try_read()
            .ok_or_else(|| ObjectAccessError::Busy(self.name().to_string()))?;
        if guard.is_none() {
            return Err(ObjectAccessError::Unavailable(self.name().to_string()));
        }
        RwLockReadGuard::try_map(guard, |object| {
            object
                .as_deref()
                .and_then(|object| object.as_any().downcast_ref::<T>())
        })
        .map_err(|_| ObjectAccessError::TypeMismatch {
            name: self.name().to_string(),
            expected: core::any::type_name::<T>(),
        })
    }

    /// Mutably borrows the object as `T`.
    pub fn write<T: Any + Send + Sync>(
        &self,
    ) -> Result<MappedRwLockWriteGuard<'_, T>, ObjectAccessError> {
        let guard = self
            .container
            .object
            .try_write()
            .ok_or_else(|| ObjectAccessError::Busy(self.name().to_string()))?;
        if guard.is_none() {
            return Err(ObjectAccessError::Unavailable(self.name().to_string()));
        }
        RwLockWriteGuard::try_map(guard, |object| {
            object
                .as_deref_mut()
                .and_then(|object| object.as_any_mut().downcast_mut::<T>())
        })
        .map_err(|_| ObjectAccessError::TypeMismatch {
            name: self.name().to_string(),
            expected: core::any::type_name::<T>(),
        })
    }
}

impl core::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("ObjectRef").field(&self.name()).finish()
    }
}

/// The resolved dependencies handed to [`ManagedObject::coordinate`].
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    entries: Vec<(String, ObjectRef)>,
}

impl Dependencies {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a dependency under `key`.
    pub fn insert(&mut self, key: impl Into<String>, object: ObjectRef) {
        self.entries.push((key.into(), object));
    }

    /// Looks a dependency up by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ObjectRef> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == key)
            .map(|(_, object)| object)
    }

    /// Borrows the dependency under `key` as `T`.
    pub fn read<T: Any + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<MappedRwLockReadGuard<'_, T>, ObjectAccessError> {
        self.get(key)
            .ok_or_else(|| ObjectAccessError::Unbound(key.to_string()))?
            .read::<T>()
    }

    /// Iterates `(key, object)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ObjectRef)> {
        self.entries.iter().map(|(key, object)| (key.as_str(), object))
    }

    /// Number of dependencies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when there are no dependencies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
