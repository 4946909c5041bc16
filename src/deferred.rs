use crate::{Handle, IntoResolution, Promise};
use log::{trace, warn};
use std::sync::Arc;

/// The resolve/reject capability for one [`Promise`].
///
/// A `Deferred` can be cloned and sent to whatever does the asynchronous
/// work. Only the first `resolve` or `reject` across all clones counts; later
/// calls are no-ops and return `false`.
///
/// # Examples
///
/// ```
/// use promise_chain::Scheduler;
/// use std::thread;
///
/// let scheduler = Scheduler::new();
/// let (deferred, promise) = scheduler.deferred::<String, ()>();
///
/// let task1 = thread::spawn(move || deferred.resolve("Hi".to_string()));
/// task1.join().expect("The task1 thread has panicked.");
/// assert_eq!(scheduler.block_on(&promise), Ok("Hi".to_string()));
/// ```
#[derive(Debug)]
pub struct Deferred<T, E> {
    resolver: Arc<Resolver<T, E>>,
}

#[derive(Debug)]
struct Resolver<T, E> {
    promise: Promise<T, E>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
        }
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub(crate) fn new(handle: Handle) -> (Self, Promise<T, E>) {
        handle.acquire_resolver();
        let promise = Promise::pending(handle);
        let deferred = Self {
            resolver: Arc::new(Resolver {
                promise: promise.clone(),
            }),
        };
        (deferred, promise)
    }

    /// Resolve with a plain value, or with another promise whose outcome the
    /// deferred promise then adopts.
    ///
    /// ```
    /// use promise_chain::Scheduler;
    ///
    /// let scheduler = Scheduler::new();
    /// let (deferred, promise) = scheduler.deferred::<i32, ()>();
    /// assert!(deferred.resolve(scheduler.resolved(42)));
    /// assert!(!deferred.resolve(7));
    /// assert_eq!(scheduler.block_on(&promise), Ok(42));
    /// ```
    pub fn resolve<R>(&self, value: R) -> bool
    where
        R: IntoResolution<E, Value = T>,
    {
        if !self.resolver.promise.lock_in() {
            trace!("deferred already resolved; ignoring resolve");
            return false;
        }
        self.resolver.promise.resolve_with(value.into_resolution());
        true
    }

    pub fn reject(&self, err: E) -> bool {
        if !self.resolver.promise.lock_in() {
            trace!("deferred already resolved; ignoring reject");
            return false;
        }
        self.resolver.promise.settle(Err(err))
    }

    /// The promise this deferred settles.
    pub fn promise(&self) -> Promise<T, E> {
        self.resolver.promise.clone()
    }
}

impl<T, E> Drop for Resolver<T, E> {
    /// If this is an unresolved deferred, its promise stays pending for good.
    fn drop(&mut self) {
        if self.promise.lock_in() {
            warn!("deferred dropped without being resolved; its promise will never settle");
        }
        self.promise.handle().release_resolver();
    }
}
