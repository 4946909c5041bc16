//! Chainable promises for rust.
//!
//! A [`Promise`] settles once, to a value or an error. [`Promise::then`]
//! chains work onto it; whatever the continuation returns, plain value or
//! another promise, the chained promise settles to the plain value.
//! [`Deferred`] hands out the resolve/reject side separately, so it can be
//! moved to whatever finishes the work, a timer thread for instance.
//! [`Promise::done`] ends a chain and makes sure a rejection is not lost.
//!
//! Continuations run on a [`Scheduler`], never inline, even when the promise
//! has already settled by the time they are chained.
//!
//! # Examples
//!
//! ```
//! use promise_chain::{Promise, Scheduler};
//! use std::{thread, time::Duration};
//!
//! let scheduler = Scheduler::new();
//!
//! fn say_my_name(scheduler: &Scheduler) -> Promise<String, ()> {
//!     scheduler.resolved("Joe".to_string())
//! }
//! let greeting = say_my_name(&scheduler).then(|name| format!("Hello {}", name));
//! greeting.done();
//! assert_eq!(scheduler.block_on(&greeting), Ok("Hello Joe".to_string()));
//!
//! let (deferred, delayed) = scheduler.deferred::<String, ()>();
//! thread::spawn(move || {
//!     thread::sleep(Duration::from_millis(100));
//!     deferred.resolve("Joe".to_string());
//! });
//! assert_eq!(scheduler.block_on(&delayed.then(|name| name)), Ok("Joe".to_string()));
//! ```
use std::time::Duration;
use thiserror::Error;

pub mod deferred;
pub mod promise;
pub mod resolution;
pub mod scheduler;

pub use deferred::Deferred;
pub use promise::{Promise, State};
pub use resolution::{is_promise, IntoResolution, Resolution};
pub use scheduler::{Config, Handle, Scheduler, Unhandled};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error<E> {
    #[error("promise rejected: {0:?}")]
    Rejected(E),
    #[error("promise can never settle: nothing queued and no deferred alive")]
    Stalled,
    #[error("promise still pending after {0:?}")]
    TimedOut(Duration),
}

impl<E> Error<E> {
    /// The original rejection, if that is what this is.
    pub fn rejection(self) -> Option<E> {
        match self {
            Error::Rejected(err) => Some(err),
            _ => None,
        }
    }
}
