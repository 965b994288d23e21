//! Tool invocation with bounded retries.
//!
//! A call resolves the tool in the catalog, then issues
//! `POST {server_url}/call_tool` with `{"name", "arguments"}`. Timeouts, 5xx
//! responses and other transport failures are retried up to the configured
//! number of attempts with a fixed delay in between. 4xx responses fail
//! immediately. Every outcome is returned as a [`ToolCallResult`].

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use backoff::backoff::Backoff;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    core::{
        config::ServerConfig, directory::ServerDirectory, metrics::RegistryMetrics,
        transport::Transport,
    },
    events::{EventBus, RegistryEvent},
    inventory::{ToolCatalog, ToolDefinition},
};

pub const CALL_TOOL_PATH: &str = "/call_tool";

/// Final outcome of one top-level tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub success: bool,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time from the first attempt to the final outcome, retries included.
    pub execution_time_ms: u64,
    pub server_name: Option<String>,
    /// Requests sent. Zero when the call failed to resolve.
    pub attempts: u32,
}

impl ToolCallResult {
    pub fn success(
        tool_name: impl Into<String>,
        server_name: impl Into<String>,
        result: Value,
        execution_time_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            success: true,
            tool_name: tool_name.into(),
            result: Some(result),
            error: None,
            execution_time_ms,
            server_name: Some(server_name.into()),
            attempts,
        }
    }

    pub fn failure(
        tool_name: impl Into<String>,
        server_name: Option<String>,
        error: impl Into<String>,
        execution_time_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            success: false,
            tool_name: tool_name.into(),
            result: None,
            error: Some(error.into()),
            execution_time_ms,
            server_name,
            attempts,
        }
    }
}

/// Per-call overrides of the owning server's settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub retry_attempts: Option<u32>,
    pub retry_delay: Option<Duration>,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never below 1.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn resolve(config: &ServerConfig, options: &CallOptions) -> Self {
        Self::new(
            options.retry_attempts.unwrap_or(config.retry_attempts),
            options.retry_delay.unwrap_or(config.retry_delay),
        )
    }

    fn backoff(&self) -> FixedBackoff {
        FixedBackoff {
            delay: self.delay,
            max_retries: self.max_attempts - 1,
            retries_left: self.max_attempts - 1,
        }
    }
}

/// Constant delay between attempts, stopping after a fixed number of retries.
#[derive(Debug, Clone)]
struct FixedBackoff {
    delay: Duration,
    max_retries: u32,
    retries_left: u32,
}

impl Backoff for FixedBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries_left == 0 {
            return None;
        }
        self.retries_left -= 1;
        Some(self.delay)
    }

    fn reset(&mut self) {
        self.retries_left = self.max_retries;
    }
}

/// `content` if the response carries one, otherwise the whole body.
pub fn extract_result(body: Value) -> Value {
    match body {
        Value::Object(mut obj) if obj.contains_key("content") => {
            obj.remove("content").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub struct Invoker {
    directory: Arc<ServerDirectory>,
    catalog: Arc<ToolCatalog>,
    transport: Arc<dyn Transport>,
    events: Arc<EventBus>,
    metrics: Arc<RegistryMetrics>,
}

impl Invoker {
    pub fn new(
        directory: Arc<ServerDirectory>,
        catalog: Arc<ToolCatalog>,
        transport: Arc<dyn Transport>,
        events: Arc<EventBus>,
        metrics: Arc<RegistryMetrics>,
    ) -> Self {
        Self {
            directory,
            catalog,
            transport,
            events,
            metrics,
        }
    }

    /// Call the primary provider of `tool_name`.
    pub async fn call(
        &self,
        tool_name: &str,
        arguments: Value,
        options: CallOptions,
    ) -> ToolCallResult {
        match self.catalog.get_tool(tool_name) {
            Some(tool) => self.invoke(tool, arguments, options).await,
            None => {
                self.metrics.record_unresolved_call();
                debug!("Tool '{}' not found", tool_name);
                ToolCallResult::failure(
                    tool_name,
                    None,
                    format!("Tool not found: {}", tool_name),
                    0,
                    0,
                )
            }
        }
    }

    /// Call `tool_name` as provided by `server_name`, never another provider.
    pub async fn call_on_server(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Value,
        options: CallOptions,
    ) -> ToolCallResult {
        match self.catalog.get_tool_qualified(server_name, tool_name) {
            Some(tool) => self.invoke(tool, arguments, options).await,
            None => {
                self.metrics.record_unresolved_call();
                let error = if self.directory.contains(server_name) {
                    format!("Tool '{}' not found on server '{}'", tool_name, server_name)
                } else {
                    format!("Server not found: {}", server_name)
                };
                ToolCallResult::failure(tool_name, Some(server_name.to_string()), error, 0, 0)
            }
        }
    }

    async fn invoke(
        &self,
        tool: ToolDefinition,
        arguments: Value,
        options: CallOptions,
    ) -> ToolCallResult {
        let Some(config) = self.directory.config(&tool.server_name) else {
            self.metrics.record_unresolved_call();
            return ToolCallResult::failure(
                &tool.name,
                Some(tool.server_name.clone()),
                format!("Server not found: {}", tool.server_name),
                0,
                0,
            );
        };

        let policy = RetryPolicy::resolve(&config, &options);
        let timeout = options.timeout.unwrap_or(config.timeout);
        let url = format!("{}{}", tool.server_url, CALL_TOOL_PATH);
        let arguments = match arguments {
            Value::Null => json!({}),
            other => other,
        };
        let body = json!({"name": tool.name, "arguments": arguments});
        let qualified = tool.qualified_name();

        self.metrics.record_call_start();
        let attempt_counter = AtomicU32::new(0);
        let started = Instant::now();

        let (url, body) = (url.as_str(), &body);
        let (counter, target) = (&attempt_counter, &qualified);
        let max_attempts = policy.max_attempts;
        let outcome = backoff::future::retry_notify(
            policy.backoff(),
            || async move {
                let attempt = counter.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "Calling '{}' (attempt {}/{})",
                    target, attempt, max_attempts
                );
                self.attempt(url, body, timeout).await
            },
            |err: String, delay: Duration| {
                self.metrics.record_retry();
                warn!(
                    "Call to '{}' failed, retrying in {:?}: {}",
                    qualified, delay, err
                );
            },
        )
        .await;

        let execution_time_ms = elapsed_ms(started);
        let attempts = attempt_counter.load(Ordering::Relaxed);
        self.metrics
            .record_call_end(&qualified, outcome.is_ok(), execution_time_ms);

        match outcome {
            Ok(result) => {
                info!(
                    "Called '{}' in {}ms ({} attempt(s))",
                    qualified, execution_time_ms, attempts
                );
                let result = ToolCallResult::success(
                    tool.name,
                    tool.server_name,
                    result,
                    execution_time_ms,
                    attempts,
                );
                self.events.emit(&RegistryEvent::ToolCalled(result.clone()));
                result
            }
            Err(error) => {
                warn!(
                    "Call to '{}' failed after {} attempt(s): {}",
                    qualified, attempts, error
                );
                ToolCallResult::failure(
                    tool.name,
                    Some(tool.server_name),
                    error,
                    execution_time_ms,
                    attempts,
                )
            }
        }
    }

    /// One request. 4xx is permanent, everything else that fails is transient.
    async fn attempt(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, backoff::Error<String>> {
        let response = self
            .transport
            .post_json(url, body, timeout)
            .await
            .map_err(|e| backoff::Error::transient(e.to_string()))?;

        let status = response.status;
        if status.is_success() {
            return response
                .json()
                .map(extract_result)
                .map_err(|e| backoff::Error::transient(e.to_string()));
        }

        let message = format!("HTTP {}: {}", status.as_u16(), response.body_snippet());
        if status.is_client_error() {
            Err(backoff::Error::permanent(message))
        } else {
            Err(backoff::Error::transient(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        events::EventKind,
        test_util::{MockReply, MockTransport},
    };

    struct Fixture {
        directory: Arc<ServerDirectory>,
        catalog: Arc<ToolCatalog>,
        events: Arc<EventBus>,
        invoker: Invoker,
    }

    fn fixture(transport: Arc<MockTransport>) -> Fixture {
        let directory = Arc::new(ServerDirectory::new());
        let catalog = Arc::new(ToolCatalog::new());
        let events = Arc::new(EventBus::new());
        let invoker = Invoker::new(
            Arc::clone(&directory),
            Arc::clone(&catalog),
            transport,
            Arc::clone(&events),
            Arc::new(RegistryMetrics::new()),
        );
        Fixture {
            directory,
            catalog,
            events,
            invoker,
        }
    }

    impl Fixture {
        fn add_server(&self, config: ServerConfig, tools: &[&str]) {
            let name = config.name.clone();
            let url = config.base_url.clone();
            self.directory.register(config);
            self.catalog.replace_server_tools(
                &name,
                tools
                    .iter()
                    .map(|t| ToolDefinition::new(*t, &name, &url))
                    .collect(),
            );
        }
    }

    fn alpha() -> ServerConfig {
        ServerConfig::new("alpha", "http://localhost:9001")
            .unwrap()
            .with_retry_attempts(2)
            .with_retry_delay(Duration::from_millis(10))
    }

    #[test]
    fn test_extract_result() {
        assert_eq!(extract_result(json!({"content": "pong"})), json!("pong"));
        assert_eq!(
            extract_result(json!({"content": null, "x": 1})),
            Value::Null
        );
        assert_eq!(extract_result(json!({"value": 1})), json!({"value": 1}));
        assert_eq!(extract_result(json!([1, 2])), json!([1, 2]));
    }

    #[test]
    fn test_fixed_backoff() {
        let mut backoff = RetryPolicy::new(3, Duration::from_millis(5)).backoff();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(5)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(5)));
        assert_eq!(backoff.next_backoff(), None);
        backoff.reset();
        assert!(backoff.next_backoff().is_some());

        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
        assert_eq!(RetryPolicy::new(1, Duration::ZERO).backoff().next_backoff(), None);
    }

    #[tokio::test]
    async fn test_unknown_tool_sends_nothing() {
        let transport = MockTransport::new(|_| MockReply::json(200, json!({})));
        let fx = fixture(Arc::clone(&transport));

        let result = fx.invoker.call("missing", json!({}), CallOptions::default()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Tool not found: missing"));
        assert_eq!(result.attempts, 0);
        assert!(result.server_name.is_none());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_success_returns_content_and_emits() {
        let transport = MockTransport::new(|_| MockReply::json(200, json!({"content": "pong"})));
        let fx = fixture(Arc::clone(&transport));
        fx.add_server(alpha(), &["echo"]);

        let called = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&called);
        fx.events.subscribe(EventKind::ToolCalled, move |event| {
            if let RegistryEvent::ToolCalled(result) = event {
                sink.lock().push(result.clone());
            }
            Ok(())
        });

        let result = fx.invoker.call("echo", json!({}), CallOptions::default()).await;
        assert!(result.success);
        assert_eq!(result.result, Some(json!("pong")));
        assert_eq!(result.server_name.as_deref(), Some("alpha"));
        assert_eq!(result.attempts, 1);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "http://localhost:9001/call_tool");
        assert_eq!(
            requests[0].body,
            Some(json!({"name": "echo", "arguments": {}}))
        );

        assert_eq!(*called.lock(), vec![result]);
    }

    #[tokio::test]
    async fn test_body_without_content_is_result() {
        let transport = MockTransport::new(|_| MockReply::json(200, json!({"sum": 3})));
        let fx = fixture(transport);
        fx.add_server(alpha(), &["sum"]);

        let result = fx.invoker.call("sum", json!({"a": 1, "b": 2}), CallOptions::default()).await;
        assert_eq!(result.result, Some(json!({"sum": 3})));
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let transport = MockTransport::new(|_| MockReply::status(404));
        let fx = fixture(Arc::clone(&transport));
        fx.add_server(alpha().with_retry_attempts(3), &["echo"]);

        let called = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&called);
        fx.events.subscribe(EventKind::ToolCalled, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let result = fx.invoker.call("echo", json!({}), CallOptions::default()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("HTTP 404"));
        assert_eq!(result.attempts, 1);
        assert_eq!(transport.request_count(), 1);
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_server_error_retried_until_exhausted() {
        let transport = MockTransport::new(|_| MockReply::status(503));
        let fx = fixture(Arc::clone(&transport));
        fx.add_server(alpha().with_retry_attempts(3), &["echo"]);

        let result = fx.invoker.call("echo", json!({}), CallOptions::default()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("HTTP 503"));
        assert_eq!(result.attempts, 3);
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn test_timeouts_accumulate_execution_time() {
        let transport = MockTransport::new(|_| MockReply::Hang);
        let fx = fixture(Arc::clone(&transport));
        fx.add_server(
            alpha()
                .with_retry_attempts(3)
                .with_retry_delay(Duration::from_millis(5))
                .with_timeout(Duration::from_millis(30)),
            &["echo"],
        );

        let result = fx.invoker.call("echo", json!({}), CallOptions::default()).await;
        assert!(!result.success);
        assert_eq!(transport.request_count(), 3);
        assert!(result.error.unwrap().contains("timed out"));
        assert!(
            result.execution_time_ms >= 90,
            "execution_time_ms = {}",
            result.execution_time_ms
        );
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let transport = MockTransport::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                MockReply::refused()
            } else {
                MockReply::json(200, json!({"content": "ok"}))
            }
        });
        let fx = fixture(transport);
        fx.add_server(alpha(), &["echo"]);

        let result = fx.invoker.call("echo", json!({}), CallOptions::default()).await;
        assert!(result.success);
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn test_call_options_override_server() {
        let transport = MockTransport::new(|_| MockReply::status(500));
        let fx = fixture(Arc::clone(&transport));
        fx.add_server(alpha().with_retry_attempts(5), &["echo"]);

        let options = CallOptions {
            timeout: Some(Duration::from_millis(250)),
            retry_attempts: Some(1),
            retry_delay: None,
        };
        let result = fx.invoker.call("echo", Value::Null, options).await;
        assert_eq!(result.attempts, 1);

        let request = &transport.requests()[0];
        assert_eq!(request.timeout, Duration::from_millis(250));
        assert_eq!(request.body.as_ref().unwrap()["arguments"], json!({}));
    }

    #[tokio::test]
    async fn test_only_owning_server_is_contacted() {
        let transport = MockTransport::new(|_| MockReply::json(200, json!({"content": 1})));
        let fx = fixture(Arc::clone(&transport));
        fx.add_server(alpha(), &["echo"]);
        fx.add_server(
            ServerConfig::new("beta", "http://localhost:9002").unwrap(),
            &["echo", "sum"],
        );

        // beta was discovered last, so it owns the unqualified name
        let result = fx.invoker.call("echo", json!({}), CallOptions::default()).await;
        assert_eq!(result.server_name.as_deref(), Some("beta"));

        let result = fx
            .invoker
            .call_on_server("alpha", "echo", json!({}), CallOptions::default())
            .await;
        assert_eq!(result.server_name.as_deref(), Some("alpha"));

        let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "http://localhost:9002/call_tool",
                "http://localhost:9001/call_tool"
            ]
        );
    }

    #[tokio::test]
    async fn test_call_on_server_does_not_fall_back() {
        let transport = MockTransport::new(|_| MockReply::json(200, json!({})));
        let fx = fixture(Arc::clone(&transport));
        fx.add_server(alpha(), &["echo"]);
        fx.add_server(
            ServerConfig::new("beta", "http://localhost:9002").unwrap(),
            &["sum"],
        );

        let result = fx
            .invoker
            .call_on_server("beta", "echo", json!({}), CallOptions::default())
            .await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Tool 'echo' not found on server 'beta'")
        );

        let result = fx
            .invoker
            .call_on_server("gamma", "echo", json!({}), CallOptions::default())
            .await;
        assert_eq!(result.error.as_deref(), Some("Server not found: gamma"));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_server_entry() {
        let transport = MockTransport::new(|_| MockReply::json(200, json!({})));
        let fx = fixture(Arc::clone(&transport));
        fx.add_server(alpha(), &["echo"]);
        fx.directory.remove("alpha");

        let result = fx.invoker.call("echo", json!({}), CallOptions::default()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Server not found: alpha"));
        assert_eq!(transport.request_count(), 0);
    }
}
