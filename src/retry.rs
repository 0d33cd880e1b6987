//! Ejecutor de reintentos para las llamadas a servicios externos.
//!
//! Cada intento está acotado por `attempt_timeout`, así que ninguna llamada
//! bloquea más de `RetryPolicy::max_total_wait`. Los fallos permanentes
//! cortan en el acto.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CapabilityError, ErrorKind, ProcessingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Linear,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            base_delay,
            attempt_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Espera tras el fallo del intento `attempt` (empezando en 1):
    /// `base * attempt` en lineal, `base * 2^(attempt-1)` en exponencial.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt - 1)),
        }
    }

    /// Cota superior del tiempo total que puede consumir `execute`.
    pub fn max_total_wait(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        let waits = (1..attempts).fold(Duration::ZERO, |acc, n| acc + self.delay_for(n));
        self.attempt_timeout.saturating_mul(attempts) + waits
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Backoff::Exponential, Duration::from_millis(500))
    }
}

/// Ejecuta `operation` con la política dada.
///
/// Devuelve un `ProcessingError` de tipo `network`: recuperable si se
/// agotaron los reintentos de un fallo transitorio, no recuperable si el
/// fallo era permanente (credenciales, petición mal formada...).
pub async fn execute<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, ProcessingError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CapabilityError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        let outcome = match tokio::time::timeout(policy.attempt_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Timeout(policy.attempt_timeout)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                warn!("{label}: intento {attempt}/{attempts} fallido: {err}");
                if attempt < attempts {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
                last_error = Some(err);
            }
            Err(err) => {
                warn!("{label}: fallo permanente, no se reintenta: {err}");
                return Err(ProcessingError::new(ErrorKind::Network, format!("{label}: {err}"))
                    .with_recoverable(false));
            }
        }
    }

    let detail = last_error.map(|e| e.to_string()).unwrap_or_default();
    Err(ProcessingError::new(
        ErrorKind::Network,
        format!("{label}: sin éxito tras {attempts} intentos ({detail})"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    fn policy(backoff: Backoff) -> RetryPolicy {
        RetryPolicy::new(3, backoff, Duration::from_millis(100))
            .with_attempt_timeout(Duration::from_secs(1))
    }

    #[test]
    fn backoff_delays() {
        let linear = policy(Backoff::Linear);
        assert_eq!(linear.delay_for(1), Duration::from_millis(100));
        assert_eq!(linear.delay_for(3), Duration::from_millis(300));

        let exponential = policy(Backoff::Exponential);
        assert_eq!(exponential.delay_for(1), Duration::from_millis(100));
        assert_eq!(exponential.delay_for(2), Duration::from_millis(200));
        assert_eq!(exponential.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn total_wait_is_bounded() {
        // 3 intentos de 1s + esperas de 100ms y 200ms.
        assert_eq!(
            policy(Backoff::Exponential).max_total_wait(),
            Duration::from_millis(3300)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = &AtomicU32::new(0);
        let result = execute("prueba", &policy(Backoff::Linear), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CapabilityError::Transient("503".into()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(assert_ok!(result), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = execute("prueba", &policy(Backoff::Linear), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CapabilityError::Permanent("401".into()))
        })
        .await;

        let err = assert_err!(result);
        assert!(!err.recoverable);
        assert_eq!(err.kind, ErrorKind::Network);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_are_recoverable() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = execute("prueba", &policy(Backoff::Exponential), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CapabilityError::RateLimited("429".into()))
        })
        .await;

        let err = assert_err!(result);
        assert!(err.recoverable);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_call_times_out_within_bound() {
        let policy = policy(Backoff::Exponential);
        let started = Instant::now();
        let result: Result<(), _> = execute("prueba", &policy, || async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .await;

        let err = assert_err!(result);
        assert!(err.recoverable);
        assert!(started.elapsed() <= policy.max_total_wait());
    }
}
