//! # tripcarry core
//!
//! Core traits and types shared by the tripcarry booking client.
//!
//! The booking lifecycle is written as a functional core driven by an
//! imperative shell (the `tripcarry-runtime` Store):
//!
//! - **State**: the client-side view being managed (e.g. the booking collection)
//! - **Action**: every input, both commands from UI surfaces and feedback from
//!   remote calls
//! - **Reducer**: `(State, Action, Environment) → Result<Effects, Error>`,
//!   validating the action before touching state
//! - **Effect**: a description of a side effect, executed by the runtime
//! - **Environment**: injected dependencies (remote services, clock)
//!
//! ## Example
//!
//! ```ignore
//! use tripcarry_core::{effect::Effect, reducer::Reducer, SmallVec};
//!
//! impl Reducer for BookingReducer {
//!     type State = BookingState;
//!     type Action = BookingAction;
//!     type Environment = BookingEnvironment;
//!     type Error = BookingError;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut BookingState,
//!         action: BookingAction,
//!         env: &BookingEnvironment,
//!     ) -> Result<SmallVec<[Effect<BookingAction>; 4]>, BookingError> {
//!         // Validate, mutate, describe the remote call
//!         Ok(SmallVec::new())
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use smallvec::{smallvec, SmallVec};

/// Reducer module - the core trait for business logic
///
/// Reducers are deterministic: `(State, Action, Environment) → Result<Effects, Error>`.
/// An `Err` means the action was rejected and the state was left untouched.
pub mod reducer {
    use super::{effect::Effect, SmallVec};

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    /// - `Error`: Why an action can be rejected
    ///
    /// # Contract
    ///
    /// Validation happens before any mutation. When `reduce` returns `Err`,
    /// the state must be exactly as it was before the call; the runtime relies
    /// on this to skip notifications for rejected actions.
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Rejection type for actions that fail validation
        type Error;

        /// Reduce an action into state changes and effects
        ///
        /// 1. Validates the action against the current state
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed by the runtime
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the action is invalid for the current
        /// state. No mutation has happened in that case.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<SmallVec<[Effect<Self::Action>; 4]>, Self::Error>;
    }
}

/// Effect module - side effect descriptions
///
/// Effects are values, not execution. They are returned from reducers and
/// executed by the Store runtime, which feeds any produced action back into
/// the reducer.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;

    /// Effect type - describes a side effect to be executed
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Arbitrary async computation, typically a remote call
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Wrap an async computation producing a feedback action
        #[must_use]
        pub fn future<F>(fut: F) -> Effect<Action>
        where
            F: Future<Output = Option<Action>> + Send + 'static,
        {
            Effect::Future(Box::pin(fut))
        }

        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Whether this effect does nothing when executed
        #[must_use]
        pub fn is_none(&self) -> bool {
            match self {
                Effect::None => true,
                Effect::Parallel(effects) => effects.iter().all(Effect::is_none),
                Effect::Future(_) => false,
            }
        }
    }
}

/// Environment module - dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use tripcarry_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::effect::Effect;

    #[test]
    fn none_and_empty_parallel_are_no_ops() {
        assert!(Effect::<()>::None.is_none());
        assert!(Effect::<()>::merge(vec![Effect::None, Effect::None]).is_none());
    }

    #[test]
    fn future_effect_is_not_a_no_op() {
        let effect = Effect::future(async { Some(1_u8) });
        assert!(!effect.is_none());
        assert!(!Effect::merge(vec![Effect::None, effect]).is_none());
    }

    #[test]
    fn debug_hides_future_body() {
        let effect = Effect::<u8>::future(async { None });
        assert_eq!(format!("{effect:?}"), "Effect::Future(<future>)");
    }
}
