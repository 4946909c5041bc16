//! What a promise can be resolved with.
//!
//! A continuation may hand back a plain value, another promise, or a failure.
//! [`Resolution`] tags which one it is, and [`IntoResolution`] decides the tag
//! from the type at compile time, so there is never a promise of a promise.
use crate::Promise;
use std::{borrow::Cow, collections::HashMap, collections::VecDeque, sync::Arc};

#[derive(Debug)]
pub enum Resolution<T, E> {
    /// Fulfil with this value.
    Value(T),
    /// Adopt whatever this promise eventually settles to.
    Promise(Promise<T, E>),
    /// Reject with this error.
    Rejected(E),
}

impl<T, E> Resolution<T, E> {
    pub fn is_promise(&self) -> bool {
        matches!(self, Resolution::Promise(_))
    }
}

/// Free-standing form of [`Resolution::is_promise`].
pub fn is_promise<T, E>(resolution: &Resolution<T, E>) -> bool {
    resolution.is_promise()
}

/// Anything a promise can be resolved with.
///
/// Plain values resolve as themselves, a [`Promise`] is adopted, and a
/// `Result` rejects on `Err` and resolves its `Ok` the same way again. Your
/// own types opt in with [`impl_value!`](crate::impl_value).
///
/// ```
/// use promise_chain::{is_promise, IntoResolution, Promise, Scheduler};
///
/// let scheduler = Scheduler::new();
/// let promise: Promise<i32, ()> = scheduler.resolved(1);
/// assert!(is_promise(&promise.into_resolution()));
/// assert!(!is_promise(&IntoResolution::<()>::into_resolution(1i32)));
/// ```
pub trait IntoResolution<E> {
    type Value;
    fn into_resolution(self) -> Resolution<Self::Value, E>;
}

impl<T, E> IntoResolution<E> for Resolution<T, E> {
    type Value = T;
    fn into_resolution(self) -> Resolution<T, E> {
        self
    }
}

impl<T, E> IntoResolution<E> for Promise<T, E> {
    type Value = T;
    fn into_resolution(self) -> Resolution<T, E> {
        Resolution::Promise(self)
    }
}

impl<R, E> IntoResolution<E> for Result<R, E>
where
    R: IntoResolution<E>,
{
    type Value = R::Value;
    fn into_resolution(self) -> Resolution<R::Value, E> {
        match self {
            Ok(value) => value.into_resolution(),
            Err(err) => Resolution::Rejected(err),
        }
    }
}

/// Mark types as plain values: a promise resolved with one is fulfilled with
/// it as is.
///
/// ```
/// use promise_chain::{impl_value, Promise, Scheduler};
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Name(String);
/// impl_value!(Name);
///
/// let scheduler = Scheduler::new();
/// let name: Promise<Name, ()> = scheduler.promise(Name("Joe".into()));
/// assert_eq!(scheduler.block_on(&name), Ok(Name("Joe".into())));
/// ```
#[macro_export]
macro_rules! impl_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl<E> $crate::IntoResolution<E> for $ty {
                type Value = $ty;
                fn into_resolution(self) -> $crate::Resolution<$ty, E> {
                    $crate::Resolution::Value(self)
                }
            }
        )*
    };
}

impl_value!(
    (), bool, char, f32, f64, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize,
    String, &'static str, std::time::Duration,
);

macro_rules! impl_generic_value {
    ($($ty:ident < $($param:ident),+ >),* $(,)?) => {
        $(
            impl<$($param,)+ E> IntoResolution<E> for $ty<$($param),+> {
                type Value = $ty<$($param),+>;
                fn into_resolution(self) -> Resolution<Self::Value, E> {
                    Resolution::Value(self)
                }
            }
        )*
    };
}

impl_generic_value!(Vec<T>, VecDeque<T>, Option<T>, Box<T>, Arc<T>, HashMap<K, V>);

impl<T, E> IntoResolution<E> for Cow<'static, T>
where
    T: ToOwned + ?Sized + 'static,
{
    type Value = Cow<'static, T>;
    fn into_resolution(self) -> Resolution<Self::Value, E> {
        Resolution::Value(self)
    }
}

macro_rules! impl_tuple_value {
    ($(($($param:ident),+)),* $(,)?) => {
        $(
            impl<$($param,)+ E> IntoResolution<E> for ($($param,)+) {
                type Value = ($($param,)+);
                fn into_resolution(self) -> Resolution<Self::Value, E> {
                    Resolution::Value(self)
                }
            }
        )*
    };
}

impl_tuple_value!((A), (A, B), (A, B, C), (A, B, C, D));
