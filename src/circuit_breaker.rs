use failsafe::{backoff, failure_policy, Config};
use std::time::Duration;

/// Circuit breaker guarding the outbound notification gateway.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failed deliveries open the circuit.
/// - **Backoff**: exponential from 10s to 60s before a delivery is attempted again.
///
/// While open, queued notifications are dropped with an error log instead of waiting on a
/// gateway that is known to be down. Transition results are never affected.
///
/// # Example
///
/// ```rust
/// use failsafe::CircuitBreaker;
/// use rust_admissions_engine::circuit_breaker::create_notification_circuit_breaker;
///
/// let breaker = create_notification_circuit_breaker();
/// assert!(breaker.is_call_permitted());
/// ```
pub fn create_notification_circuit_breaker(
) -> impl failsafe::CircuitBreaker + Send + Sync + 'static {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::{CircuitBreaker, Error};

    #[test]
    fn opens_after_five_failed_deliveries() {
        let cb = create_notification_circuit_breaker();

        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("gateway down"));
            assert!(matches!(result, Err(Error::Inner("gateway down"))));
        }

        assert!(!cb.is_call_permitted());
        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));
        assert!(matches!(result, Err(Error::Rejected)));
    }

    #[test]
    fn successes_reset_the_failure_streak() {
        let cb = create_notification_circuit_breaker();

        for _ in 0..4 {
            let _: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("timeout"));
        }
        let ok: Result<u8, Error<&str>> = cb.call(|| Ok::<u8, &str>(1));
        assert_eq!(ok.unwrap(), 1);

        for _ in 0..4 {
            let _: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("timeout"));
        }
        assert!(cb.is_call_permitted());
    }
}
