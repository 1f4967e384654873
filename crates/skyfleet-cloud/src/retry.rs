//! Resilience wrapper for adapter calls
//!
//! Every remote call the dispatcher issues goes through here: a
//! per-attempt timeout, bounded retries for retryable failures, and
//! exponential backoff with jitter. Retries run sequentially, never
//! in parallel, so a throttling provider is not hammered harder.

use crate::error::{ProviderError, Result};
use crate::model::{Instance, InstanceSpec, ProviderKind};
use crate::provider::ProviderClient;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Tag key the dispatcher attaches to creates so a retried create can
/// find an instance a failed attempt already produced.
pub const IDEMPOTENCY_TAG: &str = "skyfleet-token";

/// Retry/backoff policy applied uniformly to every adapter call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound on any single backoff delay
    pub max_delay: Duration,

    /// Exponential growth factor between retries
    pub multiplier: f64,

    /// Fractional jitter applied to each delay (0.2 = ±20%)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based), jittered
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential =
            self.base_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = exponential.min(self.max_delay.as_millis() as f64);

        // spread ±jitter around the nominal delay
        let spread = capped * self.jitter;
        let jittered = capped - spread + rand::random::<f64>() * 2.0 * spread;

        Duration::from_millis(jittered as u64)
    }
}

/// Run `f` under the policy: per-attempt timeout, retry only
/// retryable kinds, exponential backoff between attempts.
///
/// A timed-out attempt surfaces as `Unavailable` (retryable); the
/// in-flight future is dropped, which cancels it: nothing keeps
/// running in the background.
pub async fn call<T, F, Fut>(
    policy: &RetryPolicy,
    call_timeout: Duration,
    provider: ProviderKind,
    operation: &'static str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        let outcome = match timeout(call_timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::unavailable(
                provider,
                operation,
                format!("call timed out after {:?}", call_timeout),
            )),
        };

        match outcome {
            Ok(value) => {
                if attempt > 0 {
                    debug!(%provider, operation, attempt = attempt + 1, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.backoff_delay(attempt);
                warn!(
                    %provider,
                    operation,
                    attempt = attempt + 1,
                    error = %err,
                    "retrying in {:?}",
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Create-aware variant of [`call`].
///
/// A create that fails mid-flight may still have provisioned the
/// instance, so before every retry the provider is probed for an
/// instance carrying the idempotency tag. Finding one ends the loop
/// without re-issuing the create: same token, at most one instance.
pub async fn call_create(
    policy: &RetryPolicy,
    call_timeout: Duration,
    client: &dyn ProviderClient,
    spec: &InstanceSpec,
    token: &str,
) -> Result<Instance> {
    let provider = client.kind();
    let mut attempt: u32 = 0;
    loop {
        if attempt > 0 {
            match client.find_instance_by_tag(IDEMPOTENCY_TAG, token).await {
                Ok(Some(existing)) => {
                    debug!(
                        %provider,
                        id = %existing.id,
                        "create already succeeded on an earlier attempt"
                    );
                    return Ok(existing);
                }
                Ok(None) => {}
                // Probe failure is not fatal: the retry below will
                // answer the question one way or the other.
                Err(err) => debug!(%provider, error = %err, "idempotency probe failed"),
            }
        }

        let outcome = match timeout(call_timeout, client.create_instance(spec)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::unavailable(
                provider,
                "create_instance",
                format!("call timed out after {:?}", call_timeout),
            )),
        };

        match outcome {
            Ok(instance) => return Ok(instance),
            Err(err) if err.retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.backoff_delay(attempt);
                warn!(%provider, attempt = attempt + 1, error = %err, "retrying create in {:?}", delay);
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::{
        CostGranularity, CostRecord, InstanceState, MetricKind, MetricSample, TimeRange,
    };
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    #[test]
    fn backoff_delay_within_jitter_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let first = policy.backoff_delay(0).as_millis();
            let second = policy.backoff_delay(1).as_millis();
            assert!((400..=600).contains(&first), "first delay {}ms", first);
            assert!((800..=1200).contains(&second), "second delay {}ms", second);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limited_then_succeeds() {
        let calls = AtomicU32::new(0);
        let timestamps = Mutex::new(Vec::new());

        let result = call(
            &fast_policy(),
            Duration::from_secs(5),
            ProviderKind::Aws,
            "list_instances",
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                timestamps.lock().unwrap().push(Instant::now());
                async move {
                    if n < 2 {
                        Err(ProviderError::rate_limited(
                            ProviderKind::Aws,
                            "list_instances",
                            "throttled",
                        ))
                    } else {
                        Ok(42u32)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // backoff between attempts grows monotonically
        let stamps = timestamps.lock().unwrap();
        let first_gap = stamps[1] - stamps[0];
        let second_gap = stamps[2] - stamps[1];
        assert!(second_gap > first_gap, "{:?} !> {:?}", second_gap, first_gap);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_fails_on_first_attempt() {
        let calls = AtomicU32::new(0);

        let result: Result<u32> = call(
            &fast_policy(),
            Duration::from_secs(5),
            ProviderKind::Gcp,
            "get_metric",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ProviderError::invalid_argument(
                        ProviderKind::Gcp,
                        "get_metric",
                        "start must precede end",
                    ))
                }
            },
        )
        .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::InvalidArgument);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_last_error() {
        let calls = AtomicU32::new(0);

        let result: Result<u32> = call(
            &fast_policy(),
            Duration::from_secs(5),
            ProviderKind::Azure,
            "start_instance",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ProviderError::unavailable(
                        ProviderKind::Azure,
                        "start_instance",
                        "503",
                    ))
                }
            },
        )
        .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::Unavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_maps_to_retryable_unavailable() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };

        let result: Result<u32> = call(
            &policy,
            Duration::from_millis(50),
            ProviderKind::Aws,
            "stop_instance",
            || async {
                sleep(Duration::from_secs(3600)).await;
                Ok(1)
            },
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert!(err.retryable());
    }

    /// Provider whose create fails transiently after actually
    /// provisioning the instance, the partial-success case the
    /// idempotency probe exists for.
    struct PartialCreateProvider {
        create_calls: AtomicU32,
        created: Mutex<Vec<Instance>>,
    }

    impl PartialCreateProvider {
        fn new() -> Self {
            Self {
                create_calls: AtomicU32::new(0),
                created: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProviderClient for PartialCreateProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Aws
        }

        fn name(&self) -> &str {
            "partial-create"
        }

        async fn list_instances(&self) -> Result<Vec<Instance>> {
            Ok(self.created.lock().unwrap().clone())
        }

        async fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance> {
            let n = self.create_calls.fetch_add(1, Ordering::SeqCst);
            let instance = Instance {
                id: format!("i-{}", n),
                provider: ProviderKind::Aws,
                state: InstanceState::Pending,
                location: spec.location.clone(),
                machine_type: spec.machine_type.clone(),
                tags: spec.tags.clone(),
            };
            self.created.lock().unwrap().push(instance.clone());
            if n == 0 {
                // instance went in, but the response never made it back
                return Err(ProviderError::unavailable(
                    ProviderKind::Aws,
                    "create_instance",
                    "connection reset mid-flight",
                ));
            }
            Ok(instance)
        }

        async fn start_instance(&self, _id: &str) -> Result<()> {
            unimplemented!()
        }

        async fn stop_instance(&self, _id: &str) -> Result<()> {
            unimplemented!()
        }

        async fn delete_instance(&self, _id: &str) -> Result<()> {
            unimplemented!()
        }

        async fn get_status(&self, _id: &str) -> Result<InstanceState> {
            unimplemented!()
        }

        async fn get_metric(
            &self,
            _id: &str,
            _kind: MetricKind,
            _range: &TimeRange,
        ) -> Result<Vec<MetricSample>> {
            unimplemented!()
        }

        async fn get_storage_usage(&self, _id: &str) -> Result<BTreeMap<String, u64>> {
            unimplemented!()
        }

        async fn get_cost(
            &self,
            _range: &TimeRange,
            _granularity: CostGranularity,
        ) -> Result<Vec<CostRecord>> {
            unimplemented!()
        }

        async fn find_instance_by_tag(&self, key: &str, value: &str) -> Result<Option<Instance>> {
            Ok(self
                .created
                .lock()
                .unwrap()
                .iter()
                .find(|i| i.tags.get(key).map(String::as_str) == Some(value))
                .cloned())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn partial_create_is_not_reissued() {
        let provider = PartialCreateProvider::new();
        let spec = InstanceSpec::new("web-01", "t3.micro", "ami-1", "us-east-1")
            .with_tag(IDEMPOTENCY_TAG, "token-1");

        let instance = call_create(
            &fast_policy(),
            Duration::from_secs(5),
            &provider,
            &spec,
            "token-1",
        )
        .await
        .unwrap();

        // one create issued, one instance exists, and the probe found it
        assert_eq!(provider.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.created.lock().unwrap().len(), 1);
        assert_eq!(instance.id, "i-0");
    }
}
