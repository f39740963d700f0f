//! The factory/destructor seam between the pool and the pooled resource.

use std::future::{Future, Ready};

/// Creates and destroys the resources a [`Pool`](crate::Pool) manages.
///
/// `create` may be slow (dialing a connection, allocating a large buffer) and
/// is always called outside the pool lock, possibly from several acquires at
/// once. `destroy` errors are never fatal; they go to the pool's
/// [`ErrorSink`](crate::ErrorSink).
pub trait Manager: Send + Sync + 'static {
    /// The pooled resource.
    type Resource: Send + 'static;

    /// Error returned by `create` and `destroy`.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create a new resource.
    fn create(&self) -> impl Future<Output = Result<Self::Resource, Self::Error>> + Send;

    /// Tear down a resource that left the pool for good.
    fn destroy(
        &self,
        resource: Self::Resource,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        drop(resource);
        async { Ok(()) }
    }

    /// Checked on release; an unhealthy resource is destroyed instead of
    /// going back to the idle set.
    fn is_healthy(&self, _resource: &Self::Resource) -> bool {
        true
    }
}

/// [`Manager`] built from closures.
///
/// ```rust,ignore
/// let manager = FnManager::new(
///     || async { TcpStream::connect(addr).await },
///     |stream| async move { drop(stream); Ok(()) },
/// );
/// ```
pub struct FnManager<C, D> {
    create: C,
    destroy: D,
}

/// Destructor used by [`FnManager::from_create`].
pub type DropDestroy<T, E> = fn(T) -> Ready<Result<(), E>>;

fn drop_resource<T, E>(resource: T) -> Ready<Result<(), E>> {
    drop(resource);
    std::future::ready(Ok(()))
}

impl<C, D> FnManager<C, D> {
    /// Manager with an explicit factory and destructor.
    pub fn new(create: C, destroy: D) -> Self {
        Self { create, destroy }
    }
}

impl<C, CF, T, E> FnManager<C, DropDestroy<T, E>>
where
    C: Fn() -> CF,
    CF: Future<Output = Result<T, E>>,
{
    /// Manager whose destructor just drops the resource.
    pub fn from_create(create: C) -> Self {
        Self {
            create,
            destroy: drop_resource::<T, E>,
        }
    }
}

impl<C, CF, D, DF, T, E> Manager for FnManager<C, D>
where
    C: Fn() -> CF + Send + Sync + 'static,
    CF: Future<Output = Result<T, E>> + Send,
    D: Fn(T) -> DF + Send + Sync + 'static,
    DF: Future<Output = Result<(), E>> + Send,
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Resource = T;
    type Error = E;

    fn create(&self) -> impl Future<Output = Result<T, E>> + Send {
        (self.create)()
    }

    fn destroy(&self, resource: T) -> impl Future<Output = Result<(), E>> + Send {
        (self.destroy)(resource)
    }
}

impl<C, D> std::fmt::Debug for FnManager<C, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnManager").finish_non_exhaustive()
    }
}
