use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Breaker type guarding the prediction oracle.
pub type PredictionBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Creates a circuit breaker for the prediction oracle.
///
/// - **Failure threshold**: 5 consecutive failures trip the breaker.
/// - **Backoff**: exponential from 10s to 60s before a trial call is let through.
///
/// While open, calls fail fast instead of waiting on a scoring service that is down.
pub fn create_prediction_circuit_breaker() -> PredictionBreaker {
    let backoff_strategy = backoff::exponential(Duration::from_secs(10), Duration::from_secs(60));

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}
