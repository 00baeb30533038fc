//! Definitions for dealing with an [`Error`] of creating a metric.
//!
//! [`Error`]: crate::Error

#[doc(inline)]
pub use self::strategy::Strategy;

/// Possible actions on an [`Error`] encountered while creating a metric
/// inside [`Recorder`] methods.
///
/// [`Error`]: crate::Error
/// [`Recorder`]: crate::Recorder
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    /// Return the encountered [`Error`] to the caller.
    Propagate,

    /// Panic with the encountered [`Error`].
    Panic,
}

/// Strategies for dealing with an [`Error`](crate::Error) of creating a
/// metric.
pub mod strategy {
    use std::sync::Arc;

    use crate::Error;

    use super::Action;

    /// Strategy deciding which [`Action`] should be performed on an
    /// [`Error`] encountered while creating a metric inside [`Recorder`]
    /// methods.
    ///
    /// [`Recorder`]: crate::Recorder
    pub trait Strategy {
        /// Inspects the encountered [`Error`] and returns the [`Action`] to
        /// be performed.
        fn decide(&self, err: &Error) -> Action;
    }

    impl<S: Strategy + ?Sized> Strategy for Arc<S> {
        fn decide(&self, err: &Error) -> Action {
            (**self).decide(err)
        }
    }

    /// [`Strategy`] returning always [`Action::Propagate`].
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Propagate;

    impl Strategy for Propagate {
        fn decide(&self, _: &Error) -> Action {
            Action::Propagate
        }
    }

    /// [`Strategy`] returning always [`Action::Panic`].
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Panic;

    impl Strategy for Panic {
        fn decide(&self, _: &Error) -> Action {
            Action::Panic
        }
    }

    /// [`Strategy`] returning an [`Action::Panic`] on an
    /// [`Error::DuplicateRegistration`] in debug mode, and
    /// [`Action::Propagate`] otherwise.
    ///
    /// [`Error::DuplicateRegistration`] means that something has registered
    /// the same metric in the [`prometheus::Registry`] bypassing the
    /// [`Recorder`], which is a bug rather than an invalid input.
    ///
    /// [`Recorder`]: crate::Recorder
    #[derive(Clone, Copy, Debug, Default)]
    pub struct PanicInDebugPropagateInRelease;

    impl Strategy for PanicInDebugPropagateInRelease {
        fn decide(&self, err: &Error) -> Action {
            #[cfg(debug_assertions)]
            {
                if err.is_duplicate_registration() {
                    return Action::Panic;
                }
            }
            #[cfg(not(debug_assertions))]
            {
                _ = err;
            }
            Action::Propagate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{strategy::*, *};
    use crate::Error;

    fn duplicate() -> Error {
        Error::DuplicateRegistration { name: "ns_up".into() }
    }

    #[test]
    fn default_strategy_propagates_invalid_input() {
        let err = Error::EmptySchema { name: "up".into() };

        assert_eq!(
            PanicInDebugPropagateInRelease.decide(&err),
            Action::Propagate,
        );
    }

    #[cfg(debug_assertions)]
    #[test]
    fn default_strategy_panics_on_duplicate_in_debug() {
        assert_eq!(
            PanicInDebugPropagateInRelease.decide(&duplicate()),
            Action::Panic,
        );
    }

    #[test]
    fn dynamic_strategy_delegates() {
        let strategy: std::sync::Arc<dyn Strategy + Send + Sync> =
            std::sync::Arc::new(Panic);

        assert_eq!(strategy.decide(&duplicate()), Action::Panic);
        assert_eq!(Propagate.decide(&duplicate()), Action::Propagate);
    }
}
