//! Ergonomic testing utilities for reducers
//!
//! This module provides a fluent API for testing reducers with readable
//! Given-When-Then syntax, for both accepted and rejected actions.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use tripcarry_core::{effect::Effect, reducer::Reducer};

/// Type alias for state assertion functions
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Type alias for effect assertion functions
type EffectAssertion<A> = Box<dyn FnOnce(&[Effect<A>])>;

/// Type alias for rejection assertion functions
type ErrorAssertion<Err> = Box<dyn FnOnce(&Err)>;

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// Actions run in order; `when_action` may be called repeatedly to build up
/// state. State assertions see the state after the last action, effect and
/// error assertions see the outcome of the last action only.
///
/// When no error assertion is registered, a rejection of the last action
/// fails the test. Rejections of earlier actions always fail the test.
///
/// # Example
///
/// ```ignore
/// ReducerTest::new(BookingReducer::new())
///     .with_env(test_environment())
///     .given_state(BookingState::new())
///     .when_action(transition(key, BookingStatus::Completed))
///     .then_error(|error| assert!(matches!(error, BookingError::InvalidTransition(_))))
///     .then_state(|state| assert!(state.is_empty()))
///     .run();
/// ```
pub struct ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    environment: Option<E>,
    initial_state: Option<S>,
    actions: Vec<A>,
    state_assertions: Vec<StateAssertion<S>>,
    effect_assertions: Vec<EffectAssertion<A>>,
    error_assertions: Vec<ErrorAssertion<R::Error>>,
}

impl<R, S, A, E> ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
    R::Error: std::fmt::Debug,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            actions: Vec::new(),
            state_assertions: Vec::new(),
            effect_assertions: Vec::new(),
            error_assertions: Vec::new(),
        }
    }

    /// Set the environment for the test
    #[must_use]
    pub fn with_env(mut self, env: E) -> Self {
        self.environment = Some(env);
        self
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Queue an action (When)
    #[must_use]
    pub fn when_action(mut self, action: A) -> Self {
        self.actions.push(action);
        self
    }

    /// Add an assertion about the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&S) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the effects of the last action (Then)
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect<A>]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Expect the last action to be rejected, and inspect the rejection (Then)
    #[must_use]
    pub fn then_error<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::Error) + 'static,
    {
        self.error_assertions.push(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if initial state, actions or environment are missing, if the
    /// rejection expectation is not met, or if any assertion fails.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("Initial state must be set with given_state()");
        let env = self
            .environment
            .expect("Environment must be set with with_env()");
        assert!(
            !self.actions.is_empty(),
            "At least one action must be set with when_action()"
        );

        let last = self.actions.len() - 1;
        let mut outcome = None;
        for (index, action) in self.actions.into_iter().enumerate() {
            let result = self.reducer.reduce(&mut state, action, &env);
            if index == last {
                outcome = Some(result);
            } else if let Err(error) = result {
                panic!("Setup action {index} was rejected: {error:?}");
            }
        }

        match outcome.expect("last action always produces an outcome") {
            Ok(effects) => {
                assert!(
                    self.error_assertions.is_empty(),
                    "Expected the last action to be rejected, but it was accepted"
                );
                for assertion in self.effect_assertions {
                    assertion(&effects);
                }
            },
            Err(error) => {
                assert!(
                    !self.error_assertions.is_empty(),
                    "Last action was rejected unexpectedly: {error:?}"
                );
                for assertion in self.error_assertions {
                    assertion(&error);
                }
            },
        }

        for assertion in self.state_assertions {
            assertion(&state);
        }
    }
}

/// Helper assertions for effects
pub mod assertions {
    use tripcarry_core::effect::Effect;

    /// Assert that there are no effects
    ///
    /// # Panics
    ///
    /// Panics if any effect would do something when executed.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_effects<A: std::fmt::Debug>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().all(Effect::is_none),
            "Expected no effects, but found {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// Assert the number of effects
    ///
    /// # Panics
    ///
    /// Panics if the number of effects doesn't match expected.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_effects_count<A>(effects: &[Effect<A>], expected: usize) {
        assert_eq!(
            effects.len(),
            expected,
            "Expected {} effects, but found {}",
            expected,
            effects.len()
        );
    }

    /// Assert that effects contain at least one Future effect
    ///
    /// # Panics
    ///
    /// Panics if no Future effect is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_has_future_effect<A>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().any(|e| matches!(e, Effect::Future(_))),
            "Expected at least one Future effect, but none found"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::{SmallVec, smallvec};

    #[derive(Clone, Debug)]
    struct TestState {
        seats: u32,
    }

    #[derive(Clone, Debug)]
    enum TestAction {
        Reserve,
        Release,
    }

    struct TestReducer;

    struct TestEnv;

    impl Reducer for TestReducer {
        type State = TestState;
        type Action = TestAction;
        type Environment = TestEnv;
        type Error = &'static str;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            _env: &Self::Environment,
        ) -> Result<SmallVec<[Effect<Self::Action>; 4]>, Self::Error> {
            match action {
                TestAction::Reserve if state.seats == 0 => Err("no seats left"),
                TestAction::Reserve => {
                    state.seats -= 1;
                    Ok(smallvec![Effect::None])
                },
                TestAction::Release => {
                    state.seats += 1;
                    Ok(smallvec![Effect::future(async { None })])
                },
            }
        }
    }

    #[test]
    fn accepted_action_runs_state_and_effect_assertions() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { seats: 1 })
            .when_action(TestAction::Reserve)
            .then_state(|state| assert_eq!(state.seats, 0))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn rejected_action_leaves_state_alone() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { seats: 1 })
            .when_action(TestAction::Reserve)
            .when_action(TestAction::Reserve)
            .then_error(|error| assert_eq!(*error, "no seats left"))
            .then_state(|state| assert_eq!(state.seats, 0))
            .run();
    }

    #[test]
    fn future_effects_are_detected() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { seats: 0 })
            .when_action(TestAction::Release)
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    #[should_panic(expected = "rejected unexpectedly")]
    fn unexpected_rejection_fails_the_test() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { seats: 0 })
            .when_action(TestAction::Reserve)
            .run();
    }
}
