// src/common/retry.rs

use std::future::Future;
use std::time::Duration;

use crate::common::error::AppError;

// Teto do backoff, independente do número de tentativas
const MAX_DELAY: Duration = Duration::from_secs(2);

/// Política de retentativa para commits que falham por motivos transitórios
/// (timeout do pool, deadlock, falha de serialização).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Espera antes da tentativa `attempt + 1` (backoff exponencial).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    /// Executa `op` até ela ter sucesso, falhar com um erro terminal, ou
    /// esgotar as tentativas. Esgotar vira sempre `TransientFailure`.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Tentativa falhou ({}), tentando novamente",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    tracing::error!(operation, attempt, "Tentativas esgotadas: {}", e);
                    return Err(AppError::TransientFailure(format!(
                        "{operation}: {attempt} tentativas esgotadas ({e})"
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(30), MAX_DELAY);
    }

    #[tokio::test]
    async fn retries_conflicts_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast()
            .run("teste", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AppError::ConflictAborted("deadlock".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_as_transient() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast()
            .run("teste", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::ConflictAborted("deadlock".into()))
            })
            .await;

        assert!(matches!(result, Err(AppError::TransientFailure(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast()
            .run("teste", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::MissingField("name"))
            })
            .await;

        assert!(matches!(result, Err(AppError::MissingField("name"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
