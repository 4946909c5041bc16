use crate::scheduler::Handle;
use crate::{IntoResolution, Resolution};
use log::{error, trace};
use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};

/// Snapshot of where a promise is in its life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

type Reaction<T, E> = Box<dyn FnOnce(Result<T, E>) + Send + 'static>;

/// A value of type `T`, or a failure of type `E`, that settles at most once.
///
/// Promises are cheap to clone; clones share the same state. Continuations
/// registered with [`then`](Promise::then) and friends never run inline.
/// They are queued on the promise's [`Scheduler`](crate::Scheduler) and run
/// when it is drained.
///
/// # Examples
///
/// ```
/// use promise_chain::{Promise, Scheduler};
///
/// let scheduler = Scheduler::new();
/// let seed: Promise<i32, String> = scheduler.resolved(10);
/// let result = seed.then(|x| x * 2).then(|x| x - 2);
/// assert_eq!(scheduler.block_on(&result), Ok(18));
/// ```
pub struct Promise<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
    handle: Handle,
}

struct Inner<T, E> {
    state: State<T, E>,
    /// Set once a resolver has committed to an outcome, which may still be
    /// waiting on an adopted promise.
    locked: bool,
    reactions: Vec<Reaction<T, E>>,
    wakers: Vec<Waker>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<T: Debug, E: Debug> Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").field("state", &self.lock().state).finish()
    }
}

impl<T, E> Promise<T, E> {
    fn lock(&self) -> MutexGuard<'_, Inner<T, E>> {
        // No user code runs under this lock, so a poisoned guard is still
        // consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `self` and `other` are the same promise.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.lock().state, State::Pending)
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.lock().state, State::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.lock().state, State::Rejected(_))
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Claim the right to settle. Only the first caller gets `true`.
    pub(crate) fn lock_in(&self) -> bool {
        let mut inner = self.lock();
        if inner.locked || !matches!(inner.state, State::Pending) {
            return false;
        }
        inner.locked = true;
        true
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub(crate) fn pending(handle: Handle) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Pending,
                locked: false,
                reactions: vec![],
                wakers: vec![],
            })),
            handle,
        }
    }

    pub(crate) fn settled(handle: Handle, outcome: Result<T, E>) -> Self {
        let state = match outcome {
            Ok(value) => State::Fulfilled(value),
            Err(err) => State::Rejected(err),
        };
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state,
                locked: true,
                reactions: vec![],
                wakers: vec![],
            })),
            handle,
        }
    }

    /// A promise that settles like `resolution`. An existing promise is
    /// returned as is rather than wrapped.
    pub(crate) fn from_resolution(handle: Handle, resolution: Resolution<T, E>) -> Self {
        match resolution {
            Resolution::Value(value) => Self::settled(handle, Ok(value)),
            Resolution::Rejected(err) => Self::settled(handle, Err(err)),
            Resolution::Promise(promise) => promise,
        }
    }

    /// Current state, cloned out.
    pub fn inspect(&self) -> State<T, E> {
        self.lock().state.clone()
    }

    /// Move from pending to settled. Returns `false`, changing nothing, if
    /// already settled.
    pub(crate) fn settle(&self, outcome: Result<T, E>) -> bool {
        let (queued, wakers) = {
            let mut inner = self.lock();
            if !matches!(inner.state, State::Pending) {
                return false;
            }
            inner.locked = true;
            inner.state = match &outcome {
                Ok(value) => State::Fulfilled(value.clone()),
                Err(err) => State::Rejected(err.clone()),
            };
            // Queue under the lock: a `then` racing in from another thread
            // must land behind every reaction registered before settling.
            let reactions = std::mem::take(&mut inner.reactions);
            let queued = reactions.len();
            for reaction in reactions {
                let outcome = outcome.clone();
                self.handle.enqueue(Box::new(move || reaction(outcome)));
            }
            (queued, std::mem::take(&mut inner.wakers))
        };
        trace!(
            "settled {} with {} reactions",
            if outcome.is_ok() { "fulfilled" } else { "rejected" },
            queued
        );
        for waker in wakers {
            waker.wake()
        }
        self.handle.wake();
        true
    }

    /// Settle with `resolution`, following it if it is another promise.
    ///
    /// This is the one place a promise gets flattened: the outcome of an
    /// adopted promise is always a plain value or error, so however deep the
    /// chain, downstream sees a single step.
    pub(crate) fn resolve_with(&self, resolution: Resolution<T, E>) {
        match resolution {
            Resolution::Value(value) => {
                self.settle(Ok(value));
            }
            Resolution::Rejected(err) => {
                self.settle(Err(err));
            }
            Resolution::Promise(source) => {
                if source.ptr_eq(self) {
                    error!("promise resolved with itself; it stays pending");
                    return;
                }
                trace!("adopting another promise");
                let target = self.clone();
                source.subscribe(Box::new(move |outcome| {
                    target.settle(outcome);
                }));
            }
        }
    }

    /// Run `reaction` with the outcome on a later turn. If already settled it
    /// is queued right away, otherwise it waits in registration order.
    fn subscribe(&self, reaction: Reaction<T, E>) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let outcome = match &inner.state {
            State::Pending => {
                inner.reactions.push(reaction);
                return;
            }
            State::Fulfilled(value) => Ok(value.clone()),
            State::Rejected(err) => Err(err.clone()),
        };
        self.handle.enqueue(Box::new(move || reaction(outcome)));
    }

    /// Chain a continuation on fulfilment.
    ///
    /// `f` may return a plain value, another promise (which the returned
    /// promise then follows), or a `Result` whose `Err` rejects. A rejection
    /// of `self` skips `f` and passes straight through.
    ///
    /// A panic in `f` is not a rejection: it unwinds out of the scheduler
    /// turn and the returned promise stays pending.
    ///
    /// ```
    /// use promise_chain::{Promise, Scheduler};
    ///
    /// let scheduler = Scheduler::new();
    /// let handle = scheduler.handle();
    /// let seed: Promise<i32, String> = scheduler.resolved(10);
    /// let doubled = seed.then(move |x| handle.resolved::<i32, String>(x * 2));
    /// assert_eq!(scheduler.block_on(&doubled), Ok(20));
    /// ```
    pub fn then<R, F>(&self, f: F) -> Promise<R::Value, E>
    where
        F: FnOnce(T) -> R + Send + 'static,
        R: IntoResolution<E>,
        R::Value: Clone + Send + 'static,
    {
        let derived = Promise::pending(self.handle.clone());
        let target = derived.clone();
        self.subscribe(Box::new(move |outcome| match outcome {
            Ok(value) => target.resolve_with(f(value).into_resolution()),
            Err(err) => {
                target.settle(Err(err));
            }
        }));
        derived
    }

    /// Chain a handler on rejection. Fulfilment passes straight through.
    ///
    /// ```
    /// use promise_chain::{Promise, Scheduler};
    ///
    /// let scheduler = Scheduler::new();
    /// let failed: Promise<i32, String> = scheduler.rejected("💥".into());
    /// let recovered = failed.catch(|_| 0);
    /// assert_eq!(scheduler.block_on(&recovered), Ok(0));
    /// ```
    pub fn catch<R, F>(&self, f: F) -> Promise<T, E>
    where
        F: FnOnce(E) -> R + Send + 'static,
        R: IntoResolution<E, Value = T>,
    {
        let derived = Promise::pending(self.handle.clone());
        let target = derived.clone();
        self.subscribe(Box::new(move |outcome| match outcome {
            Ok(value) => {
                target.settle(Ok(value));
            }
            Err(err) => target.resolve_with(f(err).into_resolution()),
        }));
        derived
    }

    /// Chain one handler for each outcome. Exactly one of them runs.
    pub fn then_or_catch<R, S, F, G>(&self, on_fulfilled: F, on_rejected: G) -> Promise<R::Value, E>
    where
        F: FnOnce(T) -> R + Send + 'static,
        G: FnOnce(E) -> S + Send + 'static,
        R: IntoResolution<E>,
        S: IntoResolution<E, Value = R::Value>,
        R::Value: Clone + Send + 'static,
    {
        let derived = Promise::pending(self.handle.clone());
        let target = derived.clone();
        self.subscribe(Box::new(move |outcome| match outcome {
            Ok(value) => target.resolve_with(on_fulfilled(value).into_resolution()),
            Err(err) => target.resolve_with(on_rejected(err).into_resolution()),
        }));
        derived
    }

    /// End the chain. A rejection arriving here is reported through the
    /// scheduler's [`Unhandled`](crate::Unhandled) policy instead of being
    /// dropped; by default the original error is re-raised as a panic from
    /// the scheduler turn.
    ///
    /// ```should_panic
    /// use promise_chain::{Promise, Scheduler};
    ///
    /// let scheduler = Scheduler::new();
    /// let failed: Promise<i32, String> = scheduler.rejected("💥".into());
    /// failed.then(|x| x + 1).done();
    /// scheduler.run_until_stalled();
    /// ```
    pub fn done(&self)
    where
        E: Debug,
    {
        let handle = self.handle.clone();
        self.subscribe(Box::new(move |outcome| {
            if let Err(err) = outcome {
                handle.report_unhandled(err);
            }
        }));
    }
}

impl<T, E> Future for Promise<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        match &inner.state {
            State::Fulfilled(value) => Poll::Ready(Ok(value.clone())),
            State::Rejected(err) => Poll::Ready(Err(err.clone())),
            State::Pending => {
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
use super::State;
use crate::{Promise, Scheduler};
use futures::executor::block_on;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn test_resolved_never_rejects() {
    let scheduler = Scheduler::new();
    let promise: Promise<&str, ()> = scheduler.resolved("🍓");
    assert_eq!(promise.inspect(), State::Fulfilled("🍓"));
    scheduler.run_until_stalled();
    assert!(promise.is_fulfilled());
    assert!(!promise.is_rejected());
}

#[test]
fn test_continuation_never_runs_inline() {
    let scheduler = Scheduler::new();
    let seen = Arc::new(Mutex::new(false));
    let flag = seen.clone();
    let promise: Promise<i32, ()> = scheduler.resolved(1);
    let derived = promise.then(move |x| {
        *flag.lock().unwrap() = true;
        x
    });
    assert!(!*seen.lock().unwrap());
    assert!(derived.is_pending());
    scheduler.run_until_stalled();
    assert!(*seen.lock().unwrap());
    assert_eq!(derived.inspect(), State::Fulfilled(1));
}

#[test]
fn test_continuations_fire_in_registration_order() {
    let scheduler = Scheduler::new();
    let (deferred, promise) = scheduler.deferred::<i32, ()>();
    let seen = Arc::new(Mutex::new(vec![]));
    for i in 0..3 {
        let seen = seen.clone();
        promise.then(move |x| seen.lock().unwrap().push((i, x)));
    }
    deferred.resolve(7);
    // Registered after settlement, still behind the first three.
    let late = seen.clone();
    promise.then(move |x| late.lock().unwrap().push((3, x)));
    scheduler.run_until_stalled();
    assert_eq!(*seen.lock().unwrap(), vec![(0, 7), (1, 7), (2, 7), (3, 7)]);
}

#[test]
fn test_registration_order_with_resolver_on_another_thread() {
    for _ in 0..50 {
        let scheduler = Scheduler::new();
        let (deferred, promise) = scheduler.deferred::<i32, ()>();
        let seen = Arc::new(Mutex::new(vec![]));
        let first = seen.clone();
        promise.then(move |_| first.lock().unwrap().push("registered first"));

        let barrier = Arc::new(Barrier::new(2));
        let go = barrier.clone();
        let task1 = thread::spawn(move || {
            go.wait();
            deferred.resolve(1);
        });
        barrier.wait();
        while promise.is_pending() {
            thread::yield_now();
        }
        let second = seen.clone();
        promise.then(move |_| second.lock().unwrap().push("registered second"));
        task1.join().expect("The task1 thread has panicked");

        scheduler.run_until_stalled();
        assert_eq!(*seen.lock().unwrap(), vec!["registered first", "registered second"]);
    }
}

#[test]
fn test_then_flattens_returned_promise() {
    let scheduler = Scheduler::new();
    let (deferred, inner) = scheduler.deferred::<i32, String>();
    let seed: Promise<i32, String> = scheduler.resolved(1);
    let chained = seed.then(move |_| inner.clone());
    scheduler.run_until_stalled();
    assert!(chained.is_pending());
    deferred.resolve(5);
    assert_eq!(scheduler.block_on(&chained), Ok(5));
}

#[test]
fn test_flattening_is_transitive() {
    let scheduler = Scheduler::new();
    let handle = scheduler.handle();
    let seed: Promise<i32, ()> = scheduler.resolved(1);
    let chained = seed.then(move |x| {
        let nested = handle.clone();
        handle.resolved::<i32, ()>(x + 1).then(move |y| nested.resolved::<i32, ()>(y * 10))
    });
    assert_eq!(scheduler.block_on(&chained), Ok(20));
}

#[test]
fn test_then_is_associative() {
    let scheduler = Scheduler::new();
    let f = |x: i32| x + 3;
    let g = |x: i32| x * 4;
    let seed: Promise<i32, ()> = scheduler.resolved(2);
    let stepwise = seed.then(f).then(g);
    let composed = seed.then(move |x| g(f(x)));
    assert_eq!(scheduler.block_on(&stepwise), scheduler.block_on(&composed));
}

#[test]
fn test_err_rejects_and_skips_later_continuations() {
    let scheduler = Scheduler::new();
    let skipped = Arc::new(Mutex::new(false));
    let flag = skipped.clone();
    let seed: Promise<i32, String> = scheduler.resolved(1);
    let chained = seed
        .then(|_| -> Result<i32, String> { Err("boom".into()) })
        .then(move |x| {
            *flag.lock().unwrap() = true;
            x + 1
        });
    assert_eq!(
        scheduler.block_on(&chained).unwrap_err().rejection(),
        Some(String::from("boom"))
    );
    assert!(!*skipped.lock().unwrap());
}

#[test]
fn test_catch_recovers() {
    let scheduler = Scheduler::new();
    let seed: Promise<i32, String> = scheduler.rejected("boom".into());
    let recovered = seed.then(|x| x * 2).catch(|err| err.len() as i32);
    assert_eq!(scheduler.block_on(&recovered), Ok(4));
}

#[test]
fn test_catch_passes_fulfilment_through() {
    let scheduler = Scheduler::new();
    let seed: Promise<i32, String> = scheduler.resolved(3);
    let passed = seed.catch(|_| 0);
    assert_eq!(scheduler.block_on(&passed), Ok(3));
}

#[test]
fn test_then_or_catch_runs_one_handler() {
    let scheduler = Scheduler::new();
    let ok: Promise<i32, String> = scheduler.resolved(3);
    let failed: Promise<i32, String> = scheduler.rejected("💥".into());
    let a = ok.then_or_catch(|x| x.to_string(), |e| e);
    let b = failed.then_or_catch(|x| x.to_string(), |e| format!("caught {}", e));
    assert_eq!(scheduler.block_on(&a), Ok(String::from("3")));
    assert_eq!(scheduler.block_on(&b), Ok(String::from("caught 💥")));
}

#[test]
fn test_done_reraises_original_error() {
    let scheduler = Scheduler::new();
    let failed: Promise<i32, String> = scheduler.rejected("reject!!".into());
    failed.then(|x| x + 1).done();
    let payload = catch_unwind(AssertUnwindSafe(|| scheduler.run_until_stalled())).unwrap_err();
    assert_eq!(payload.downcast_ref::<String>(), Some(&String::from("reject!!")));
}

#[test]
fn test_done_on_fulfilled_is_quiet() {
    let scheduler = Scheduler::new();
    let promise: Promise<i32, String> = scheduler.resolved(1);
    promise.done();
    assert_eq!(scheduler.run_until_stalled(), 1);
}

#[test]
fn test_resolved_with_itself_stays_pending() {
    let scheduler = Scheduler::new();
    let (deferred, promise) = scheduler.deferred::<i32, ()>();
    assert!(deferred.resolve(promise.clone()));
    scheduler.run_until_stalled();
    assert!(promise.is_pending());
}

#[test]
fn test_await_promise() {
    let scheduler = Scheduler::new();
    let (deferred, promise) = scheduler.deferred::<String, ()>();
    let waiter = promise.clone();
    let task1 = thread::spawn(move || block_on(async { waiter.await }));
    thread::sleep(Duration::from_millis(10));
    deferred.resolve(String::from("🍓"));
    assert_eq!(task1.join().expect("The task1 thread has panicked"), Ok(String::from("🍓")));
}

#[test]
fn test_two_awaiters() {
    let scheduler = Scheduler::new();
    let (deferred, promise) = scheduler.deferred::<i32, String>();
    let op_a = promise.clone();
    let op_b = promise.clone();
    let task1 = thread::spawn(move || block_on(op_a));
    let task2 = thread::spawn(move || block_on(op_b));
    deferred.reject(String::from("reject!!"));
    assert_eq!(task1.join().expect("The task1 thread has panicked"), Err(String::from("reject!!")));
    assert_eq!(task2.join().expect("The task2 thread has panicked"), Err(String::from("reject!!")));
}
}
