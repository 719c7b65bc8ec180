use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::models::{ComponentLoader, SharedInstance};
use crate::{Result, StartupError};

/// Record of a component loading failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentFailure {
    pub component: String,
    /// Root cause of the failure chain.
    pub kind: String,
    /// Top-level error message.
    pub message: String,
    /// Full rendered error chain, available on demand for error reports.
    pub traceback: String,
    pub timestamp: DateTime<Utc>,
    /// 0 on the first failure, incremented on each subsequent one.
    pub retry_count: u32,
    pub can_retry: bool,
}

/// Observer invoked after a component loads successfully.
pub type SuccessObserver = Arc<dyn Fn(&SharedInstance) + Send + Sync>;

/// Observer invoked after a component fails to load.
pub type FailureObserver = Arc<dyn Fn(&ComponentFailure) + Send + Sync>;

/// Contain component loading faults so one bad loader cannot take the
/// process down
///
/// Wraps every loader invocation, records failures with their full error
/// chain and retry budget, and fans results out to per-component observers.
/// Observer lists are copied under a short lock and invoked outside it;
/// an observer panic is caught and logged, never affecting the load result.
pub struct ErrorIsolation {
    max_retries: u32,
    failures: Mutex<HashMap<String, ComponentFailure>>,
    success_observers: Mutex<HashMap<String, Vec<SuccessObserver>>>,
    failure_observers: Mutex<HashMap<String, Vec<FailureObserver>>>,
}

impl ErrorIsolation {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            failures: Mutex::new(HashMap::new()),
            success_observers: Mutex::new(HashMap::new()),
            failure_observers: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Invoke a loader thunk with fault containment.
    ///
    /// On success the stored failure record for the component is cleared and
    /// success observers fire. On failure a record is stored (incrementing
    /// the retry count of any previous record) and failure observers fire.
    /// An optional `timeout` bounds the thunk; expiry is recorded as an
    /// ordinary loader failure.
    pub async fn safe_load(
        &self,
        component: &str,
        loader: &Arc<dyn ComponentLoader>,
        timeout: Option<Duration>,
        on_success: Option<SuccessObserver>,
        on_failure: Option<FailureObserver>,
    ) -> Result<SharedInstance> {
        info!("loading component: {}", component);

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, loader.load()).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "load timed out after {}ms",
                    limit.as_millis()
                )),
            },
            None => loader.load().await,
        };

        match outcome {
            Ok(instance) => {
                self.failures.lock().remove(component);
                info!("successfully loaded component: {}", component);

                if let Some(callback) = on_success {
                    guard_observer(component, "success", || callback(&instance));
                }
                let observers = {
                    let registered = self.success_observers.lock();
                    registered.get(component).cloned().unwrap_or_default()
                };
                for observer in observers {
                    guard_observer(component, "success", || observer(&instance));
                }

                Ok(instance)
            }
            Err(err) => {
                error!("failed to load component {}: {:#}", component, err);
                let failure = self.record_failure(component, &err);

                if let Some(callback) = on_failure {
                    guard_observer(component, "failure", || callback(&failure));
                }
                let observers = {
                    let registered = self.failure_observers.lock();
                    registered.get(component).cloned().unwrap_or_default()
                };
                for observer in observers {
                    guard_observer(component, "failure", || observer(&failure));
                }

                Err(StartupError::LoaderFailure {
                    component: component.to_string(),
                    message: failure.message,
                })
            }
        }
    }

    fn record_failure(&self, component: &str, err: &anyhow::Error) -> ComponentFailure {
        let mut failures = self.failures.lock();
        let retry_count = failures
            .get(component)
            .map(|previous| previous.retry_count + 1)
            .unwrap_or(0);

        let failure = ComponentFailure {
            component: component.to_string(),
            kind: err.root_cause().to_string(),
            message: err.to_string(),
            traceback: format!("{err:?}"),
            timestamp: Utc::now(),
            retry_count,
            can_retry: retry_count < self.max_retries,
        };
        failures.insert(component.to_string(), failure.clone());
        failure
    }

    /// Whether a component may be retried: no failure record, or the record
    /// is retryable and under the retry budget.
    pub fn can_retry(&self, component: &str) -> bool {
        let failures = self.failures.lock();
        failures
            .get(component)
            .map(|f| f.can_retry && f.retry_count < self.max_retries)
            .unwrap_or(true)
    }

    /// Force a component to be treated as permanently failed.
    pub fn mark_unretryable(&self, component: &str) {
        let mut failures = self.failures.lock();
        if let Some(failure) = failures.get_mut(component) {
            failure.can_retry = false;
        }
    }

    pub fn error(&self, component: &str) -> Option<ComponentFailure> {
        self.failures.lock().get(component).cloned()
    }

    pub fn all_errors(&self) -> HashMap<String, ComponentFailure> {
        self.failures.lock().clone()
    }

    pub fn clear_error(&self, component: &str) {
        self.failures.lock().remove(component);
    }

    pub fn clear_all(&self) {
        self.failures.lock().clear();
    }

    pub fn failed_components(&self) -> Vec<String> {
        let mut failed: Vec<String> = self.failures.lock().keys().cloned().collect();
        failed.sort();
        failed
    }

    pub fn has_errors(&self) -> bool {
        !self.failures.lock().is_empty()
    }

    /// Register an observer fired after every successful load of a component.
    pub fn on_success<F>(&self, component: &str, observer: F)
    where
        F: Fn(&SharedInstance) + Send + Sync + 'static,
    {
        self.success_observers
            .lock()
            .entry(component.to_string())
            .or_default()
            .push(Arc::new(observer));
    }

    /// Register an observer fired after every failed load of a component.
    pub fn on_failure<F>(&self, component: &str, observer: F)
    where
        F: Fn(&ComponentFailure) + Send + Sync + 'static,
    {
        self.failure_observers
            .lock()
            .entry(component.to_string())
            .or_default()
            .push(Arc::new(observer));
    }

    /// Human-readable report of all recorded failures.
    pub fn format_error_report(&self) -> String {
        let failures = self.all_errors();
        if failures.is_empty() {
            return "No component errors recorded.".to_string();
        }

        let mut lines = vec!["Component loading errors:".to_string(), String::new()];
        let mut entries: Vec<(&String, &ComponentFailure)> = failures.iter().collect();
        entries.sort_by_key(|(name, _)| name.as_str());

        for (name, failure) in entries {
            lines.push(format!("Component: {name}"));
            lines.push(format!("  Error: {}", failure.message));
            lines.push(format!(
                "  Time: {}",
                failure.timestamp.format("%Y-%m-%d %H:%M:%S")
            ));
            lines.push(format!(
                "  Retry count: {}/{}",
                failure.retry_count, self.max_retries
            ));
            lines.push(format!("  Can retry: {}", failure.can_retry));
            lines.push(String::new());
        }

        lines.join("\n")
    }
}

/// Invoke an observer, catching panics so they cannot affect the load.
fn guard_observer(component: &str, what: &str, observer: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(observer)).is_err() {
        warn!("{} observer for '{}' panicked; ignoring", what, component);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::loader_fn;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Dummy;
    impl crate::models::ComponentInstance for Dummy {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn ok_loader() -> Arc<dyn ComponentLoader> {
        loader_fn(|| Ok(Arc::new(Dummy) as SharedInstance))
    }

    fn failing_loader(message: &'static str) -> Arc<dyn ComponentLoader> {
        loader_fn(move || Err(anyhow::anyhow!(message)))
    }

    #[tokio::test]
    async fn test_success_clears_previous_failure() {
        let isolation = ErrorIsolation::new(3);

        let result = isolation
            .safe_load("db", &failing_loader("boom"), None, None, None)
            .await;
        assert!(result.is_err());
        assert!(isolation.error("db").is_some());

        let result = isolation
            .safe_load("db", &ok_loader(), None, None, None)
            .await;
        assert!(result.is_ok());
        assert!(isolation.error("db").is_none());
        assert!(!isolation.has_errors());
    }

    #[tokio::test]
    async fn test_failure_records_and_increments_retries() {
        let isolation = ErrorIsolation::new(2);
        let loader = failing_loader("boom");

        isolation
            .safe_load("net", &loader, None, None, None)
            .await
            .unwrap_err();
        let first = isolation.error("net").unwrap();
        assert_eq!(first.retry_count, 0);
        assert!(first.can_retry);
        assert_eq!(first.message, "boom");
        assert!(first.traceback.contains("boom"));

        isolation
            .safe_load("net", &loader, None, None, None)
            .await
            .unwrap_err();
        isolation
            .safe_load("net", &loader, None, None, None)
            .await
            .unwrap_err();
        let third = isolation.error("net").unwrap();
        assert_eq!(third.retry_count, 2);
        assert!(!third.can_retry);
        assert!(!isolation.can_retry("net"));
    }

    #[tokio::test]
    async fn test_can_retry_unknown_component() {
        let isolation = ErrorIsolation::new(3);
        assert!(isolation.can_retry("never_failed"));
    }

    #[tokio::test]
    async fn test_mark_unretryable() {
        let isolation = ErrorIsolation::new(3);
        isolation
            .safe_load("ui", &failing_loader("nope"), None, None, None)
            .await
            .unwrap_err();

        assert!(isolation.can_retry("ui"));
        isolation.mark_unretryable("ui");
        assert!(!isolation.can_retry("ui"));
    }

    #[tokio::test]
    async fn test_observers_fire_and_panics_are_swallowed() {
        let isolation = ErrorIsolation::new(3);
        let successes = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));

        let counted = Arc::clone(&successes);
        isolation.on_success("db", move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        isolation.on_success("db", |_| panic!("observer bug"));
        let counted = Arc::clone(&failures);
        isolation.on_failure("db", move |failure| {
            assert_eq!(failure.component, "db");
            counted.fetch_add(1, Ordering::SeqCst);
        });

        // Panicking observer must not turn a success into a failure.
        let result = isolation
            .safe_load("db", &ok_loader(), None, None, None)
            .await;
        assert!(result.is_ok());
        assert_eq!(successes.load(Ordering::SeqCst), 1);

        isolation
            .safe_load("db", &failing_loader("boom"), None, None, None)
            .await
            .unwrap_err();
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_per_call_callbacks() {
        let isolation = ErrorIsolation::new(3);
        let called = Arc::new(AtomicUsize::new(0));

        let counted = Arc::clone(&called);
        let on_success: SuccessObserver = Arc::new(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        isolation
            .safe_load("db", &ok_loader(), None, Some(on_success), None)
            .await
            .unwrap();
        assert_eq!(called.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_recorded_as_failure() {
        let isolation = ErrorIsolation::new(3);
        let slow = crate::models::async_loader_fn(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Arc::new(Dummy) as SharedInstance)
        });

        let result = isolation
            .safe_load("slow", &slow, Some(Duration::from_millis(20)), None, None)
            .await;
        assert!(matches!(
            result,
            Err(StartupError::LoaderFailure { .. })
        ));
        let failure = isolation.error("slow").unwrap();
        assert!(failure.message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_format_error_report() {
        let isolation = ErrorIsolation::new(3);
        assert_eq!(isolation.format_error_report(), "No component errors recorded.");

        isolation
            .safe_load("db", &failing_loader("boom"), None, None, None)
            .await
            .unwrap_err();
        let report = isolation.format_error_report();
        assert!(report.contains("Component: db"));
        assert!(report.contains("Retry count: 0/3"));
        assert_eq!(isolation.failed_components(), vec!["db".to_string()]);
    }
}
