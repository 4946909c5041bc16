//! The microtask queue every continuation runs on.
//!
//! A [`Scheduler`] owns the receiving end of a multi-producer, single-consumer
//! channel. Every promise carries a [`Handle`], the sending end, so settling a
//! promise from any thread only ever enqueues work. Nothing runs until the
//! owner of the `Scheduler` drains the queue.
use crate::{Deferred, Error, IntoResolution, Promise, State};
use log::{debug, error, trace};
use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc,
    },
    time::Duration,
};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) enum Message {
    Run(Job),
    Wake,
}

/// What `done()` does with a rejection that reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Unhandled {
    /// Log the error, then re-raise it as the panic payload of the current
    /// scheduler turn.
    #[default]
    Panic,
    /// Log the error and carry on.
    Log,
}

/// Scheduler settings.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub unhandled: Unhandled,
    /// How long [`Scheduler::block_on`] waits for another thread before
    /// giving up. `None` waits for as long as a [`Deferred`] is alive.
    pub stall_timeout: Option<Duration>,
}

impl Config {
    pub fn unhandled(mut self, unhandled: Unhandled) -> Self {
        self.unhandled = unhandled;
        self
    }

    pub fn stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = Some(timeout);
        self
    }
}

/// Cloneable, `Send` end of the queue. Use it to create promises from inside
/// continuations or on other threads.
#[derive(Debug, Clone)]
pub struct Handle {
    sender: Sender<Message>,
    resolvers: Arc<AtomicUsize>,
    unhandled: Unhandled,
}

impl Handle {
    pub(crate) fn enqueue(&self, job: Job) {
        trace!("enqueue job");
        if self.sender.send(Message::Run(job)).is_err() {
            debug!("scheduler dropped; job discarded");
        }
    }

    pub(crate) fn wake(&self) {
        let _ = self.sender.send(Message::Wake);
    }

    pub(crate) fn acquire_resolver(&self) {
        self.resolvers.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn release_resolver(&self) {
        self.resolvers.fetch_sub(1, Ordering::SeqCst);
        self.wake();
    }

    fn resolvers(&self) -> usize {
        self.resolvers.load(Ordering::SeqCst)
    }

    pub(crate) fn report_unhandled<E>(&self, err: E)
    where
        E: Debug + Send + 'static,
    {
        error!("unhandled rejection: {:?}", err);
        if self.unhandled == Unhandled::Panic {
            std::panic::panic_any(err);
        }
    }

    /// A promise already fulfilled with `value`.
    pub fn resolved<T, E>(&self, value: T) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        Promise::settled(self.clone(), Ok(value))
    }

    /// A promise already rejected with `err`.
    pub fn rejected<T, E>(&self, err: E) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        Promise::settled(self.clone(), Err(err))
    }

    /// Wrap anything promise-like. A promise comes back as the very same
    /// promise; a plain value comes back fulfilled.
    ///
    /// ```
    /// use promise_chain::{Promise, Scheduler};
    ///
    /// let scheduler = Scheduler::new();
    /// let seed: Promise<i32, String> = scheduler.promise(10);
    /// let again = scheduler.promise(seed.clone());
    /// assert!(again.ptr_eq(&seed));
    /// assert_eq!(scheduler.block_on(&again).unwrap(), 10);
    /// ```
    pub fn promise<R, E>(&self, value: R) -> Promise<R::Value, E>
    where
        R: IntoResolution<E>,
        R::Value: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        Promise::from_resolution(self.clone(), value.into_resolution())
    }

    /// A pending promise together with the capability that settles it.
    pub fn deferred<T, E>(&self) -> (Deferred<T, E>, Promise<T, E>)
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        Deferred::new(self.clone())
    }
}

/// Single-threaded microtask queue.
///
/// # Examples
///
/// ```
/// use promise_chain::Scheduler;
/// use std::{thread, time::Duration};
///
/// let scheduler = Scheduler::new();
/// let (deferred, promise) = scheduler.deferred::<String, ()>();
/// let greeting = promise.then(|name| format!("Hello {}", name));
///
/// thread::spawn(move || {
///     thread::sleep(Duration::from_millis(10));
///     deferred.resolve(String::from("Joe"));
/// });
/// assert_eq!(scheduler.block_on(&greeting), Ok(String::from("Hello Joe")));
/// ```
#[derive(Debug)]
pub struct Scheduler {
    receiver: Receiver<Message>,
    handle: Handle,
    config: Config,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let (sender, receiver) = channel();
        let handle = Handle {
            sender,
            resolvers: Arc::new(AtomicUsize::new(0)),
            unhandled: config.unhandled,
        };
        Self {
            receiver,
            handle,
            config,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub fn resolved<T, E>(&self, value: T) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        self.handle.resolved(value)
    }

    pub fn rejected<T, E>(&self, err: E) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        self.handle.rejected(err)
    }

    /// See [`Handle::promise`].
    pub fn promise<R, E>(&self, value: R) -> Promise<R::Value, E>
    where
        R: IntoResolution<E>,
        R::Value: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        self.handle.promise(value)
    }

    pub fn deferred<T, E>(&self) -> (Deferred<T, E>, Promise<T, E>)
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        self.handle.deferred()
    }

    /// Run queued jobs in FIFO order until the queue is empty, including jobs
    /// enqueued along the way. Returns the number of jobs run.
    ///
    /// A panic raised by a job (an unhandled rejection at `done()`, say)
    /// unwinds out of this call; the rest of the queue stays intact.
    pub fn run_until_stalled(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(Message::Run(job)) => {
                    job();
                    ran += 1;
                }
                Ok(Message::Wake) => {}
                // The scheduler holds a sender itself, so the channel never
                // disconnects while we're alive.
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if ran > 0 {
            debug!("drained {} jobs", ran);
        }
        ran
    }

    /// Drive the queue until `promise` settles.
    ///
    /// While the queue is empty this waits for other threads to settle a
    /// [`Deferred`]. Once no deferred is alive and nothing is queued, the
    /// promise can never settle and [`Error::Stalled`] is returned.
    ///
    /// The deferred count is scheduler-wide: any live deferred, even one
    /// unrelated to `promise`, keeps this waiting. Set
    /// [`Config::stall_timeout`] to bound the wait.
    pub fn block_on<T, E>(&self, promise: &Promise<T, E>) -> Result<T, Error<E>>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        loop {
            self.run_until_stalled();
            match promise.inspect() {
                State::Fulfilled(value) => return Ok(value),
                State::Rejected(err) => return Err(Error::Rejected(err)),
                State::Pending => {}
            }
            if self.handle.resolvers() == 0 {
                // A resolver may have enqueued work just before it went away.
                if self.run_until_stalled() == 0 && promise.is_pending() {
                    return Err(Error::Stalled);
                }
                continue;
            }
            let message = match self.config.stall_timeout {
                Some(timeout) => match self.receiver.recv_timeout(timeout) {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => return Err(Error::TimedOut(timeout)),
                    Err(RecvTimeoutError::Disconnected) => return Err(Error::Stalled),
                },
                None => self.receiver.recv().map_err(|_| Error::Stalled)?,
            };
            if let Message::Run(job) = message {
                job();
            }
        }
    }
}
