//! The request dispatcher, command executor, and extension
//! runner: turns a check request into a completed [`Check`] ready for
//! the publisher, enforcing safe mode and the one-execution-per-name
//! invariant along the way.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{info, warn};

use crate::check::{status, Check};
use crate::extension::ExtensionRegistry;
use crate::metrics::AgentMetrics;
use crate::settings::Settings;
use crate::subprocess::SubprocessRunner;
use crate::templater;

const SAFE_MODE_MESSAGE: &str = "Check is not locally defined (safe mode)";

/// Tracks check names with a command execution currently in flight (
/// "In-progress set"). At most one entry per name; cleared on completion.
#[derive(Default)]
pub struct InProgressSet {
    names: Mutex<HashSet<String>>,
    drained: Notify,
}

impl InProgressSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to claim `name`. Returns `false` if already in flight.
    fn try_start(&self, name: &str) -> bool {
        self.names.lock().unwrap().insert(name.to_string())
    }

    fn finish(&self, name: &str) {
        let empty = {
            let mut names = self.names.lock().unwrap();
            names.remove(name);
            names.is_empty()
        };
        if empty {
            self.drained.notify_waiters();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.lock().unwrap().len()
    }

    /// Waits until the set is empty. Used by stop to drain in-flight command
    /// executions before closing sockets and the transport.
    pub async fn wait_until_empty(&self) {
        loop {
            let notified = self.drained.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

pub struct Dispatcher {
    settings: Arc<Settings>,
    runner: Arc<dyn SubprocessRunner>,
    extensions: Arc<dyn ExtensionRegistry>,
    metrics: Arc<AgentMetrics>,
    in_progress: Arc<InProgressSet>,
}

impl Dispatcher {
    pub fn new(
        settings: Arc<Settings>,
        runner: Arc<dyn SubprocessRunner>,
        extensions: Arc<dyn ExtensionRegistry>,
        metrics: Arc<AgentMetrics>,
        in_progress: Arc<InProgressSet>,
    ) -> Self {
        Self {
            settings,
            runner,
            extensions,
            metrics,
            in_progress,
        }
    }

    /// Merge any same-named local definition over `request` and run it.
    /// Returns `None` when the request is dropped rather than resulting in a
    /// publishable check (duplicate in flight, unregistered extension).
    pub async fn dispatch(&self, request: Check, now_epoch: i64) -> Option<Check> {
        let has_local = self.settings.local_check(&request.name).is_some();
        let merged = match self.settings.local_check(&request.name) {
            Some(local) => request.merge_local_over(&local),
            None => request,
        };

        if merged.is_command_check() {
            if self.settings.client.safe_mode && !has_local {
                return Some(self.synthesize_safe_mode_rejection(merged, now_epoch));
            }
            self.metrics.record_check_dispatched(&merged.name);
            self.execute_command(merged, now_epoch).await
        } else {
            self.metrics.record_check_dispatched(&merged.name);
            self.run_extension(merged, now_epoch).await
        }
    }

    fn synthesize_safe_mode_rejection(&self, mut check: Check, now_epoch: i64) -> Check {
        check.executed = Some(now_epoch);
        check.output = Some(SAFE_MODE_MESSAGE.to_string());
        check.status = Some(status::UNKNOWN);
        check.handle = Some(false);
        check
    }

    async fn execute_command(&self, mut check: Check, now_epoch: i64) -> Option<Check> {
        if !self.in_progress.try_start(&check.name) {
            warn!(check = %check.name, "dropping request: execution already in flight");
            return None;
        }

        let command = check.command.clone().expect("is_command_check guarantees Some");
        let substitution = templater::substitute(&command, &self.settings);
        if !substitution.unmatched.is_empty() {
            self.in_progress.finish(&check.name);
            check.executed = Some(now_epoch);
            check.status = Some(status::UNKNOWN);
            check.handle = Some(false);
            check.output = Some(format!(
                "Unmatched command tokens: {}",
                substitution.unmatched.join(", ")
            ));
            return Some(check);
        }

        self.metrics.check_started(&check.name);
        let start = std::time::Instant::now();
        let timeout = check.timeout.map(Duration::from_secs_f64);
        let outcome = self.runner.run(&substitution.command, timeout).await;
        let elapsed = start.elapsed();

        self.in_progress.finish(&check.name);
        self.metrics.check_finished(&check.name);

        check.executed = Some(now_epoch);
        check.duration = Some(round_to_millis(elapsed.as_secs_f64()));
        check.output = Some(outcome.output);
        check.status = Some(outcome.status);
        info!(check = %check.name, status = outcome.status, "command check completed");
        Some(check)
    }

    async fn run_extension(&self, mut check: Check, now_epoch: i64) -> Option<Check> {
        let name = check.extension_name().to_string();
        match self.extensions.get(&name) {
            Some(extension) => {
                let (output, result_status) = extension.safe_run(&check).await;
                check.executed = Some(now_epoch);
                check.output = Some(output);
                check.status = Some(result_status);
                Some(check)
            }
            None => {
                warn!(extension = %name, "dropping request: extension not registered");
                None
            }
        }
    }
}

/// Rounds elapsed seconds to millisecond precision (three decimal places),
/// matching the duration format the rest of the corpus serializes.
fn round_to_millis(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::{Extension, InMemoryExtensionRegistry};
    use crate::subprocess::TokioSubprocessRunner;
    use async_trait::async_trait;
    use serde_json::json;

    fn settings(safe_mode: bool) -> Arc<Settings> {
        Arc::new(
            Settings::from_value(json!({
                "client": {"name": "h1", "subscriptions": ["all"], "safe_mode": safe_mode},
                "checks": {
                    "disk": {"command": "echo ok"},
                },
            }))
            .unwrap(),
        )
    }

    fn dispatcher(safe_mode: bool) -> Dispatcher {
        Dispatcher::new(
            settings(safe_mode),
            Arc::new(TokioSubprocessRunner),
            Arc::new(InMemoryExtensionRegistry::new()),
            Arc::new(AgentMetrics::new("h1").unwrap()),
            Arc::new(InProgressSet::new()),
        )
    }

    #[tokio::test]
    async fn merges_local_definition_and_executes() {
        let dispatcher = dispatcher(false);
        let request = Check {
            name: "disk".into(),
            ..Default::default()
        };
        let result = dispatcher.dispatch(request, 100).await.unwrap();
        assert_eq!(result.status, Some(status::OK));
        assert_eq!(result.output.as_deref().unwrap().trim(), "ok");
    }

    #[tokio::test]
    async fn rejects_unknown_check_under_safe_mode() {
        let dispatcher = dispatcher(true);
        let request = Check {
            name: "unknown".into(),
            command: Some("echo hi".into()),
            ..Default::default()
        };
        let result = dispatcher.dispatch(request, 100).await.unwrap();
        assert_eq!(result.status, Some(status::UNKNOWN));
        assert_eq!(result.handle, Some(false));
        assert_eq!(result.output.as_deref(), Some(SAFE_MODE_MESSAGE));
    }

    #[tokio::test]
    async fn reports_unmatched_tokens_as_unknown() {
        let dispatcher = Dispatcher::new(
            Arc::new(
                Settings::from_value(json!({
                    "client": {"name": "h1", "subscriptions": ["all"]},
                    "checks": {"tok": {"command": ":::missing:::"}},
                }))
                .unwrap(),
            ),
            Arc::new(TokioSubprocessRunner),
            Arc::new(InMemoryExtensionRegistry::new()),
            Arc::new(AgentMetrics::new("h1").unwrap()),
            Arc::new(InProgressSet::new()),
        );
        let request = Check {
            name: "tok".into(),
            ..Default::default()
        };
        let result = dispatcher.dispatch(request, 100).await.unwrap();
        assert_eq!(result.status, Some(status::UNKNOWN));
        assert_eq!(result.handle, Some(false));
        assert_eq!(
            result.output.as_deref(),
            Some("Unmatched command tokens: missing")
        );
    }

    #[tokio::test]
    async fn duplicate_in_flight_request_is_dropped() {
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(
                Settings::from_value(json!({
                    "client": {"name": "h1", "subscriptions": ["all"]},
                    "checks": {"slow": {"command": "sleep 1"}},
                }))
                .unwrap(),
            ),
            Arc::new(TokioSubprocessRunner),
            Arc::new(InMemoryExtensionRegistry::new()),
            Arc::new(AgentMetrics::new("h1").unwrap()),
            Arc::new(InProgressSet::new()),
        ));

        let d1 = dispatcher.clone();
        let first = tokio::spawn(async move {
            d1.dispatch(
                Check {
                    name: "slow".into(),
                    ..Default::default()
                },
                100,
            )
            .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = dispatcher
            .dispatch(
                Check {
                    name: "slow".into(),
                    ..Default::default()
                },
                100,
            )
            .await;
        assert!(second.is_none());
        let first_result = first.await.unwrap();
        assert!(first_result.is_some());
    }

    struct EchoExtension;

    #[async_trait]
    impl Extension for EchoExtension {
        async fn safe_run(&self, _request: &Check) -> (String, i64) {
            (String::new(), status::OK)
        }
    }

    #[tokio::test]
    async fn runs_extension_check() {
        let mut registry = InMemoryExtensionRegistry::new();
        registry.register("probe", Box::new(EchoExtension));
        let dispatcher = Dispatcher::new(
            Arc::new(
                Settings::from_value(json!({
                    "client": {"name": "h1", "subscriptions": ["all"]},
                }))
                .unwrap(),
            ),
            Arc::new(TokioSubprocessRunner),
            Arc::new(registry),
            Arc::new(AgentMetrics::new("h1").unwrap()),
            Arc::new(InProgressSet::new()),
        );
        let request = Check {
            name: "probe".into(),
            ..Default::default()
        };
        let result = dispatcher.dispatch(request, 100).await.unwrap();
        assert_eq!(result.status, Some(status::OK));
    }

    #[tokio::test]
    async fn unregistered_extension_is_dropped() {
        let dispatcher = Dispatcher::new(
            Arc::new(
                Settings::from_value(json!({
                    "client": {"name": "h1", "subscriptions": ["all"]},
                }))
                .unwrap(),
            ),
            Arc::new(TokioSubprocessRunner),
            Arc::new(InMemoryExtensionRegistry::new()),
            Arc::new(AgentMetrics::new("h1").unwrap()),
            Arc::new(InProgressSet::new()),
        );
        let request = Check {
            name: "ghost".into(),
            ..Default::default()
        };
        assert!(dispatcher.dispatch(request, 100).await.is_none());
    }
}
