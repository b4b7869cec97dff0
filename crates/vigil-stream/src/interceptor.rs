//! Call interception for producers.
//!
//! A producer is wrapped once with [`Interceptor::attach`] and then called
//! through the returned [`Traced`] handle. For every attached method name the
//! handle times the call, publishes a `methodCall` event describing it, and
//! hands back the original result or error untouched. Calls to methods that
//! were not attached pass straight through.

use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;
use vigil_core::events::now_timestamp;
use vigil_core::{EventKind, SubjectKey, SubjectKeyError, SubjectKind, TelemetryEvent, channels};

/// Longest serialized argument or result summary kept verbatim.
pub const MAX_SUMMARY_CHARS: usize = 512;

/// Intercepted call latency (histogram, labels: method).
pub const INTERCEPT_LATENCY_SECONDS: &str = "vigil_intercept_latency_seconds";

/// Where intercepted telemetry goes.
pub trait EventSink: Send + Sync {
    /// Publish one event.
    fn emit(&self, event: TelemetryEvent);
}

/// A producer whose observable state can hold several candidate values at
/// once (a superposed state engine, a planner with open alternatives).
pub trait StateObserver {
    /// Current candidate values.
    fn candidates(&self) -> Vec<Value>;
}

/// Wraps producers so their calls emit telemetry.
#[derive(Clone)]
pub struct Interceptor {
    sink: Arc<dyn EventSink>,
}

impl Interceptor {
    /// Interceptor publishing to `sink`.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Wrap `target`, tracing calls to `methods` under subject `kind:subject_id`.
    pub fn attach<T>(
        &self,
        target: T,
        methods: &[&str],
        kind: SubjectKind,
        subject_id: &str,
    ) -> Result<Traced<T>, SubjectKeyError> {
        let subject = SubjectKey::from_parts(kind, subject_id)?;
        Ok(Traced {
            target,
            methods: methods.iter().map(|m| (*m).to_owned()).collect(),
            subject,
            subject_id: subject_id.to_owned(),
            sink: Arc::clone(&self.sink),
        })
    }
}

/// A producer wrapped by an [`Interceptor`].
pub struct Traced<T> {
    target: T,
    methods: HashSet<String>,
    subject: SubjectKey,
    subject_id: String,
    sink: Arc<dyn EventSink>,
}

impl<T> Traced<T> {
    /// Whether calls to `method` are traced.
    pub fn traces(&self, method: &str) -> bool {
        self.methods.contains(method)
    }

    /// The subject this producer reports under.
    pub fn subject(&self) -> &SubjectKey {
        &self.subject
    }

    /// Unwrap the producer.
    pub fn into_inner(self) -> T {
        self.target
    }

    /// Call `method` through `f` with shared access to the producer.
    pub fn call<A, R, E>(
        &self,
        method: &str,
        args: &A,
        f: impl FnOnce(&T) -> Result<R, E>,
    ) -> Result<R, E>
    where
        A: Serialize + ?Sized,
        R: Serialize,
        E: Display,
    {
        if !self.traces(method) {
            return f(&self.target);
        }
        let call = CallRecord::start(method, args);
        let result = f(&self.target);
        self.report(call, &result);
        result
    }

    /// Call `method` through `f` with exclusive access to the producer.
    pub fn call_mut<A, R, E>(
        &mut self,
        method: &str,
        args: &A,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Result<R, E>
    where
        A: Serialize + ?Sized,
        R: Serialize,
        E: Display,
    {
        if !self.traces(method) {
            return f(&mut self.target);
        }
        let call = CallRecord::start(method, args);
        let result = f(&mut self.target);
        self.report(call, &result);
        result
    }

    /// Call an async `method`; latency covers the whole await.
    pub async fn call_async<'a, A, R, E, F, Fut>(
        &'a self,
        method: &str,
        args: &A,
        f: F,
    ) -> Result<R, E>
    where
        A: Serialize + ?Sized,
        R: Serialize,
        E: Display,
        F: FnOnce(&'a T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        if !self.traces(method) {
            return f(&self.target).await;
        }
        let call = CallRecord::start(method, args);
        let result = f(&self.target).await;
        self.report(call, &result);
        result
    }

    /// Call a state-evolving `method`.
    ///
    /// Besides the call event, a `stateCollapse` event is published when the
    /// producer held more than one candidate before the call and exactly one
    /// after it, whether or not the call returned an error.
    pub fn evolve<A, R, E>(
        &mut self,
        method: &str,
        args: &A,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Result<R, E>
    where
        T: StateObserver,
        A: Serialize + ?Sized,
        R: Serialize,
        E: Display,
    {
        if !self.traces(method) {
            return f(&mut self.target);
        }
        let before = self.target.candidates();
        let call = CallRecord::start(method, args);
        let result = f(&mut self.target);
        self.report(call, &result);

        if before.len() > 1 {
            let mut after = self.target.candidates();
            if after.len() == 1 {
                let collapsed_to = after.swap_remove(0);
                self.sink.emit(
                    TelemetryEvent::new(
                        EventKind::StateCollapse,
                        json!({
                            "subjectKind": self.subject.kind(),
                            "subjectId": self.subject_id,
                            "method": method,
                            "candidatesBefore": before.len(),
                            "before": before,
                            "collapsedTo": collapsed_to,
                        }),
                    )
                    .with_subject(self.subject.clone()),
                );
            }
        }
        result
    }

    fn report<R: Serialize, E: Display>(&self, call: CallRecord, result: &Result<R, E>) {
        let latency = call.started.elapsed();
        metrics::histogram!(INTERCEPT_LATENCY_SECONDS, "method" => call.method.clone())
            .record(latency.as_secs_f64());

        let mut data = json!({
            "subjectKind": self.subject.kind(),
            "subjectId": self.subject_id,
            "method": call.method,
            "args": call.args,
            "latencyMs": latency.as_secs_f64() * 1000.0,
            "startedAt": call.started_at,
            "success": result.is_ok(),
        });
        match result {
            Ok(value) => data["result"] = summarize(value),
            Err(error) => {
                debug!(method = %call.method, subject = %self.subject, %error, "intercepted call failed");
                data["error"] = Value::String(error.to_string());
            }
        }
        self.sink.emit(
            TelemetryEvent::new(EventKind::MethodCall, data)
                .with_channel(channel_for(self.subject.kind()))
                .with_subject(self.subject.clone()),
        );
    }
}

impl<T> Deref for Traced<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.target
    }
}

/// Per-invocation bookkeeping, owned by the call that created it.
struct CallRecord {
    method: String,
    args: Value,
    started: Instant,
    started_at: String,
}

impl CallRecord {
    fn start<A: Serialize + ?Sized>(method: &str, args: &A) -> Self {
        Self {
            method: method.to_owned(),
            args: summarize(args),
            started: Instant::now(),
            started_at: now_timestamp(),
        }
    }
}

/// Channel intercepted calls of a subject family are published on.
pub fn channel_for(kind: SubjectKind) -> &'static str {
    match kind {
        SubjectKind::AgentThoughts => channels::DECISIONS,
        SubjectKind::QuantumState => channels::QUANTUM,
        SubjectKind::ToolExecution => channels::TOOLS,
    }
}

/// JSON summary of a value, truncated to [`MAX_SUMMARY_CHARS`] characters.
pub fn summarize<T: Serialize + ?Sized>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(Value::String(text)) => Value::String(truncate(&text)),
        Ok(value) => {
            let text = value.to_string();
            if text.chars().count() <= MAX_SUMMARY_CHARS {
                value
            } else {
                Value::String(truncate(&text))
            }
        }
        Err(error) => Value::String(format!("<unserializable: {error}>")),
    }
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_SUMMARY_CHARS) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_owned(),
    }
}
