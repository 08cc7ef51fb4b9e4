use crate::error::Result;
use crate::wait::ProbeState;
use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fmt::{self as stdfmt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::Event;
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{
    self as fmt_subscriber, format::Writer, FmtContext, FormatEvent, FormatFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "dockyard";
const DEFAULT_FILTER: &str = "dockyard=info,warn";

/// Installs the key=value subscriber. `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.unwrap_or(DEFAULT_FILTER)));

    let stdout = std::io::stdout;
    let stderr = std::io::stderr;

    let writer = stdout
        .with_max_level(tracing::Level::INFO)
        .or_else(stderr.with_min_level(tracing::Level::WARN));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(false)
        .with_ansi(false)
        .event_format(KeyValueFormatter::new())
        .fmt_fields(fmt_subscriber::format::DefaultFields::new())
        .with_writer(writer)
        .try_init()
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))
}

struct KeyValueFormatter {
    service_name: &'static str,
}

impl KeyValueFormatter {
    const fn new() -> Self {
        Self {
            service_name: SERVICE_NAME,
        }
    }
}

impl<S, N> FormatEvent<S, N> for KeyValueFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let metadata = event.metadata();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .message
            .take()
            .unwrap_or_else(|| metadata.name().to_string());

        let mut fields = visitor.fields;
        fields.sort_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs));

        let mut line = String::new();
        push_field(&mut line, "ts", &timestamp);
        push_field(&mut line, "level", metadata.level().as_str());
        push_field(&mut line, "service", self.service_name);
        push_field(&mut line, "component", metadata.target());

        push_field(&mut line, "msg", &message);

        for (key, value) in fields {
            push_field(&mut line, &key, &value);
        }

        writer.write_str(&line)?;
        writer.write_char('\n')
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn record_field(&mut self, field: &Field, value: String) {
        if field.name().is_empty() {
            return;
        }
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_field(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        self.record_field(field, format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_field(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_field(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_field(field, value.to_string());
    }
}

/// Process-wide lifecycle counters and the latest outcome of every probe evaluated.
#[derive(Default)]
pub struct LifecycleCounters {
    resources_created: AtomicU64,
    resources_removed: AtomicU64,
    rollbacks: AtomicU64,
    teardown_failures: AtomicU64,
    readiness: ReadinessRegistry,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LifecycleCountersSnapshot {
    pub resources_created: u64,
    pub resources_removed: u64,
    pub rollbacks: u64,
    pub teardown_failures: u64,
    pub readiness: Vec<ReadinessSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadinessSnapshot {
    pub resource: String,
    pub probe: String,
    pub state: ProbeState,
    pub attempts: u32,
    pub duration_ms: u64,
}

static LIFECYCLE_COUNTERS: OnceLock<LifecycleCounters> = OnceLock::new();

pub fn lifecycle_counters() -> &'static LifecycleCounters {
    LIFECYCLE_COUNTERS.get_or_init(LifecycleCounters::default)
}

impl LifecycleCounters {
    pub fn inc_resources_created(&self) {
        self.resources_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resources_removed(&self) {
        self.resources_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_teardown_failures(&self, count: usize) {
        self.teardown_failures
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_probe(
        &self,
        resource: &str,
        probe: &str,
        state: ProbeState,
        attempts: u32,
        elapsed: Duration,
    ) {
        self.readiness
            .record(resource, probe, state, attempts, elapsed);
    }

    pub fn snapshot(&self) -> LifecycleCountersSnapshot {
        LifecycleCountersSnapshot {
            resources_created: self.resources_created.load(Ordering::Relaxed),
            resources_removed: self.resources_removed.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            teardown_failures: self.teardown_failures.load(Ordering::Relaxed),
            readiness: self.readiness.snapshot(),
        }
    }
}

#[derive(Clone, Debug)]
struct ReadinessEntry {
    state: ProbeState,
    attempts: u32,
    duration_ms: u64,
}

#[derive(Default)]
struct ReadinessRegistry {
    inner: Mutex<BTreeMap<(String, String), ReadinessEntry>>,
}

impl ReadinessRegistry {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<(String, String), ReadinessEntry>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(
        &self,
        resource: &str,
        probe: &str,
        state: ProbeState,
        attempts: u32,
        elapsed: Duration,
    ) {
        let millis = elapsed.as_millis();
        let clamped = std::cmp::min(millis, u128::from(u64::MAX)) as u64;
        self.lock().insert(
            (resource.to_string(), probe.to_string()),
            ReadinessEntry {
                state,
                attempts,
                duration_ms: clamped,
            },
        );
    }

    fn snapshot(&self) -> Vec<ReadinessSnapshot> {
        self.lock()
            .iter()
            .map(|((resource, probe), entry)| ReadinessSnapshot {
                resource: resource.clone(),
                probe: probe.clone(),
                state: entry.state,
                attempts: entry.attempts,
                duration_ms: entry.duration_ms,
            })
            .collect()
    }
}

fn encode_field_value(value: &str) -> String {
    let needs_quotes = value.chars().any(|c| {
        c.is_whitespace()
            || matches!(
                c,
                '"' | '\\' | '=' | '[' | ']' | '{' | '}' | ',' | '\n' | '\r' | '\t'
            )
    });

    if !needs_quotes {
        return value.to_string();
    }

    let mut encoded = String::with_capacity(value.len() + 2);
    encoded.push('"');
    for ch in value.chars() {
        match ch {
            '"' => encoded.push_str("\\\""),
            '\\' => encoded.push_str("\\\\"),
            '\n' => encoded.push_str("\\n"),
            '\r' => encoded.push_str("\\r"),
            '\t' => encoded.push_str("\\t"),
            _ => encoded.push(ch),
        }
    }
    encoded.push('"');
    encoded
}

fn push_field(buffer: &mut String, key: &str, value: &str) {
    if !buffer.is_empty() {
        buffer.push(' ');
    }
    buffer.push_str(key);
    buffer.push('=');
    buffer.push_str(&encode_field_value(value));
}
