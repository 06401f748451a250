//! Timeout, bounded retry and cancellation around every external call.

use crate::config::{ServiceConfig, TestDistribution};
use crate::errors::{ServiceError, ServiceOp};
use crate::model::{
    GeneratedTest, Judgement, PromptVariant, TaskSpec, TestCase, TestStage, WeaknessAnalysis,
};
use crate::providers::LanguageModelService;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Observes cancellation requested through the matching `CancelHandle`.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested; pends forever otherwise.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: Some(self.tx.subscribe()),
        }
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx: Some(rx) })
}

#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl CallPolicy {
    pub fn from_config(cfg: &ServiceConfig) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.timeout_seconds),
            max_retries: cfg.max_retries,
            backoff: Duration::from_millis(cfg.retry_backoff_ms),
        }
    }

    /// `backoff * 2^attempt`, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Runs `call` under the policy. A timed-out or failed attempt is retried up
/// to `max_retries` times; cancellation ends the call immediately.
pub async fn guarded<T, F, Fut>(
    policy: &CallPolicy,
    op: ServiceOp,
    cancel: &CancelToken,
    mut call: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled { op });
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(ServiceError::Cancelled { op }),
            r = tokio::time::timeout(policy.timeout, call()) => match r {
                Ok(r) => r,
                Err(_) => Err(ServiceError::Timeout { op, seconds: policy.timeout.as_secs() }),
            },
        };

        match outcome {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.backoff_for(attempt);
                attempt += 1;
                tracing::warn!(
                    event = "service_retry",
                    op = %op,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying service call"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ServiceError::Cancelled { op }),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// A service handle whose every call goes through `guarded`.
#[derive(Clone)]
pub struct GuardedService {
    inner: Arc<dyn LanguageModelService>,
    policy: CallPolicy,
    cancel: CancelToken,
}

impl GuardedService {
    pub fn new(inner: Arc<dyn LanguageModelService>, policy: CallPolicy) -> Self {
        Self {
            inner,
            policy,
            cancel: CancelToken::never(),
        }
    }

    /// Same service and policy, observing `cancel`.
    pub fn with_cancel(&self, cancel: CancelToken) -> Self {
        Self {
            inner: self.inner.clone(),
            policy: self.policy,
            cancel,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }

    pub async fn generate_prompt_variants(
        &self,
        task: &TaskSpec,
        count: usize,
        exclude_baseline: bool,
    ) -> Result<Vec<PromptVariant>, ServiceError> {
        let inner = &self.inner;
        guarded(&self.policy, ServiceOp::GeneratePrompts, &self.cancel, move || {
            inner.generate_prompt_variants(task, count, exclude_baseline)
        })
        .await
    }

    pub async fn generate_test_cases(
        &self,
        task: &TaskSpec,
        stage: TestStage,
        distribution: &TestDistribution,
    ) -> Result<Vec<GeneratedTest>, ServiceError> {
        let inner = &self.inner;
        guarded(&self.policy, ServiceOp::GenerateTests, &self.cancel, move || {
            inner.generate_test_cases(task, stage, distribution)
        })
        .await
    }

    pub async fn invoke_model_under_test(
        &self,
        prompt_text: &str,
        test_input: &str,
    ) -> Result<String, ServiceError> {
        let inner = &self.inner;
        guarded(&self.policy, ServiceOp::InvokeModel, &self.cancel, move || {
            inner.invoke_model_under_test(prompt_text, test_input)
        })
        .await
    }

    pub async fn evaluate_response(
        &self,
        task: &TaskSpec,
        test: &TestCase,
        response: &str,
    ) -> Result<Judgement, ServiceError> {
        let inner = &self.inner;
        guarded(&self.policy, ServiceOp::EvaluateResponse, &self.cancel, move || {
            inner.evaluate_response(task, test, response)
        })
        .await
    }

    pub async fn rewrite_prompt(
        &self,
        task: &TaskSpec,
        current_prompt: &str,
        weakness: &WeaknessAnalysis,
    ) -> Result<String, ServiceError> {
        let inner = &self.inner;
        guarded(&self.policy, ServiceOp::RewritePrompt, &self.cancel, move || {
            inner.rewrite_prompt(task, current_prompt, weakness)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_millis(50),
            max_retries,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let out = guarded(&policy(2), ServiceOp::InvokeModel, &CancelToken::never(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ServiceError::backend(ServiceOp::InvokeModel, "flaky"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let err = guarded(&policy(1), ServiceOp::GenerateTests, &CancelToken::never(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(ServiceError::malformed(ServiceOp::GenerateTests, "junk")) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Malformed { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let err = guarded(&policy(0), ServiceOp::EvaluateResponse, &CancelToken::never(), || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ServiceError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Timeout { op: ServiceOp::EvaluateResponse, .. }));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let (handle, token) = cancel_pair();
        handle.cancel();
        let calls = AtomicU32::new(0);
        let err = guarded(&policy(3), ServiceOp::RewritePrompt, &token, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ServiceError>(()) }
        })
        .await
        .unwrap_err();
        assert_eq!(err, ServiceError::Cancelled { op: ServiceOp::RewritePrompt });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_interrupts_in_flight_call() {
        let (handle, token) = cancel_pair();
        let task = tokio::spawn(async move {
            guarded(&policy(0), ServiceOp::InvokeModel, &token, || async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok::<_, ServiceError>(())
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ServiceError::Cancelled { .. }));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = CallPolicy {
            timeout: Duration::from_secs(1),
            max_retries: 5,
            backoff: Duration::from_millis(500),
        };
        assert_eq!(p.backoff_for(0), Duration::from_millis(500));
        assert_eq!(p.backoff_for(2), Duration::from_millis(2000));
        assert_eq!(p.backoff_for(20), MAX_BACKOFF);
    }
}
