pub mod engine;
pub mod probe;
pub mod state;

pub use engine::{ProbeTarget, WaitEngine, WaitPolicy, DEFAULT_POLL_INTERVAL, DEFAULT_STARTUP_TIMEOUT};
pub use state::{ProbeRun, ProbeState, TransitionError};

use crate::error::ConfigurationError;
use crate::request::ExposedPort;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Readiness condition for a resource. Leaves are single probes; `All` composes.
#[derive(Clone, Debug)]
pub enum WaitStrategy {
    Port(PortProbe),
    Http(HttpProbe),
    Log(LogProbe),
    File(FileProbe),
    All(AllProbe),
}

impl WaitStrategy {
    pub fn for_listening_port(port: impl Into<ExposedPort>) -> PortProbe {
        PortProbe::new(Some(port.into()))
    }

    pub fn for_http(path: impl Into<String>) -> HttpProbe {
        HttpProbe::new(path)
    }

    pub fn for_log(pattern: impl Into<String>) -> LogProbe {
        LogProbe::literal(pattern)
    }

    pub fn for_file(path: impl Into<String>) -> FileProbe {
        FileProbe::new(path)
    }

    pub fn for_all<I>(children: I) -> AllProbe
    where
        I: IntoIterator<Item = WaitStrategy>,
    {
        AllProbe::new(children)
    }

    /// Requires both `self` and `other`, flattening into an existing `All`.
    pub fn and(self, other: WaitStrategy) -> WaitStrategy {
        match self {
            WaitStrategy::All(mut all) => {
                all.children.push(other);
                WaitStrategy::All(all)
            }
            leaf => WaitStrategy::All(AllProbe::new([leaf, other])),
        }
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        match self {
            WaitStrategy::Port(probe) => Some(probe.attempt_timeout),
            WaitStrategy::Http(probe) => Some(probe.attempt_timeout),
            WaitStrategy::Log(probe) => Some(probe.attempt_timeout),
            WaitStrategy::File(probe) => Some(probe.attempt_timeout),
            WaitStrategy::All(_) => None,
        }
    }

    pub fn startup_timeout(&self) -> Option<Duration> {
        match self {
            WaitStrategy::Port(probe) => probe.startup_timeout,
            WaitStrategy::Http(probe) => probe.startup_timeout,
            WaitStrategy::Log(probe) => probe.startup_timeout,
            WaitStrategy::File(probe) => probe.startup_timeout,
            WaitStrategy::All(all) => all.deadline,
        }
    }

    /// Checks port references and patterns against the request's exposed ports.
    pub fn validate(&self, exposed: &[ExposedPort]) -> Result<(), ConfigurationError> {
        match self {
            WaitStrategy::Port(probe) => validate_port(self, probe.port, exposed),
            WaitStrategy::Http(probe) => {
                validate_port(self, probe.port, exposed)?;
                if let BodyMatcher::Regex(pattern) = &probe.body {
                    compile_pattern(pattern)?;
                }
                Ok(())
            }
            WaitStrategy::Log(probe) => probe.pattern.compile().map(|_| ()),
            WaitStrategy::File(_) => Ok(()),
            WaitStrategy::All(all) => all
                .children
                .iter()
                .try_for_each(|child| child.validate(exposed)),
        }
    }
}

fn validate_port(
    strategy: &WaitStrategy,
    port: Option<ExposedPort>,
    exposed: &[ExposedPort],
) -> Result<(), ConfigurationError> {
    match port {
        Some(port) if !exposed.contains(&port) => Err(ConfigurationError::UnexposedWaitPort {
            probe: strategy.to_string(),
            port: port.to_string(),
        }),
        None if exposed.is_empty() => Err(ConfigurationError::NoExposedPorts {
            probe: strategy.to_string(),
        }),
        _ => Ok(()),
    }
}

pub(crate) fn compile_pattern(pattern: &str) -> Result<regex::bytes::Regex, ConfigurationError> {
    regex::bytes::Regex::new(pattern).map_err(|err| ConfigurationError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: err.to_string(),
    })
}

impl fmt::Display for WaitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitStrategy::Port(probe) => match probe.port {
                Some(port) => write!(f, "port({port})"),
                None => f.write_str("port(default)"),
            },
            WaitStrategy::Http(probe) => match probe.port {
                Some(port) => write!(f, "http({} {} on {port})", probe.method, probe.path),
                None => write!(f, "http({} {})", probe.method, probe.path),
            },
            WaitStrategy::Log(probe) => write!(f, "log(`{}`)", probe.pattern.as_str()),
            WaitStrategy::File(probe) => write!(f, "file({})", probe.path),
            WaitStrategy::All(all) => {
                f.write_str("all[")?;
                for (index, child) in all.children.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str("]")
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PortCheck {
    /// Open a TCP connection to the mapped host port.
    #[default]
    Dial,
    /// Treat the port's presence in the resolved port map as sufficient.
    Mapped,
}

#[derive(Clone, Debug)]
pub struct PortProbe {
    /// `None` means the first exposed port.
    pub port: Option<ExposedPort>,
    pub check: PortCheck,
    pub attempt_timeout: Duration,
    pub startup_timeout: Option<Duration>,
}

impl PortProbe {
    pub fn new(port: Option<ExposedPort>) -> Self {
        Self {
            port,
            check: PortCheck::Dial,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            startup_timeout: None,
        }
    }

    /// For services that reject unauthenticated connections.
    pub fn skip_dial(mut self) -> Self {
        self.check = PortCheck::Mapped;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusMatcher {
    Exact(u16),
    /// Any 2xx status.
    Success,
    /// Inclusive range.
    Range(u16, u16),
    AnyOf(Vec<u16>),
}

impl StatusMatcher {
    pub fn matches(&self, status: u16) -> bool {
        match self {
            StatusMatcher::Exact(expected) => status == *expected,
            StatusMatcher::Success => (200..300).contains(&status),
            StatusMatcher::Range(low, high) => (*low..=*high).contains(&status),
            StatusMatcher::AnyOf(accepted) => accepted.contains(&status),
        }
    }
}

/// Predicate over the raw response bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BodyMatcher {
    Any,
    Contains(Vec<u8>),
    Regex(String),
}

#[derive(Clone, Debug)]
pub struct HttpProbe {
    pub path: String,
    pub port: Option<ExposedPort>,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub tls: bool,
    pub allow_insecure: bool,
    pub status: StatusMatcher,
    pub body: BodyMatcher,
    /// Keep the accepted response body as a wait artifact.
    pub capture_body: bool,
    pub attempt_timeout: Duration,
    pub startup_timeout: Option<Duration>,
}

impl HttpProbe {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            port: None,
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            tls: false,
            allow_insecure: false,
            status: StatusMatcher::Exact(200),
            body: BodyMatcher::Any,
            capture_body: false,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            startup_timeout: None,
        }
    }

    pub fn with_port(mut self, port: impl Into<ExposedPort>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_allow_insecure(mut self, allow: bool) -> Self {
        self.allow_insecure = allow;
        self
    }

    pub fn with_status(mut self, matcher: StatusMatcher) -> Self {
        self.status = matcher;
        self
    }

    pub fn with_body(mut self, matcher: BodyMatcher) -> Self {
        self.body = matcher;
        self
    }

    pub fn capture_body(mut self) -> Self {
        self.capture_body = true;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogPattern {
    Literal(String),
    Regex(String),
}

impl LogPattern {
    pub fn as_str(&self) -> &str {
        match self {
            LogPattern::Literal(value) | LogPattern::Regex(value) => value,
        }
    }

    pub(crate) fn compile(&self) -> Result<regex::bytes::Regex, ConfigurationError> {
        match self {
            LogPattern::Literal(value) => compile_pattern(&regex::escape(value)),
            LogPattern::Regex(value) => compile_pattern(value),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LogProbe {
    pub pattern: LogPattern,
    /// Matches required in the accumulated log before the probe succeeds.
    pub occurrences: usize,
    pub attempt_timeout: Duration,
    pub startup_timeout: Option<Duration>,
}

impl LogProbe {
    pub fn literal(pattern: impl Into<String>) -> Self {
        Self::with_pattern(LogPattern::Literal(pattern.into()))
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::with_pattern(LogPattern::Regex(pattern.into()))
    }

    fn with_pattern(pattern: LogPattern) -> Self {
        Self {
            pattern,
            occurrences: 1,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            startup_timeout: None,
        }
    }

    pub fn with_occurrences(mut self, occurrences: usize) -> Self {
        self.occurrences = occurrences.max(1);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FileSink {
    #[default]
    Discard,
    /// Keep the file contents as a wait artifact.
    Capture,
}

#[derive(Clone, Debug)]
pub struct FileProbe {
    pub path: String,
    pub sink: FileSink,
    pub attempt_timeout: Duration,
    pub startup_timeout: Option<Duration>,
}

impl FileProbe {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sink: FileSink::Discard,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            startup_timeout: None,
        }
    }

    pub fn capture(mut self) -> Self {
        self.sink = FileSink::Capture;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }
}

#[derive(Clone, Debug)]
pub struct AllProbe {
    pub children: Vec<WaitStrategy>,
    /// Overall deadline for the combination; `None` uses the policy default.
    pub deadline: Option<Duration>,
}

impl AllProbe {
    pub fn new<I>(children: I) -> Self
    where
        I: IntoIterator<Item = WaitStrategy>,
    {
        Self {
            children: children.into_iter().collect(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

macro_rules! impl_into_strategy {
    ($($probe:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$probe> for WaitStrategy {
                fn from(probe: $probe) -> Self {
                    WaitStrategy::$variant(probe)
                }
            }
        )*
    };
}

impl_into_strategy!(
    PortProbe => Port,
    HttpProbe => Http,
    LogProbe => Log,
    FileProbe => File,
    AllProbe => All,
);

/// Side products captured while waiting, keyed by port and path for HTTP bodies and
/// by path for files.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WaitArtifacts {
    http_bodies: BTreeMap<(ExposedPort, String), Vec<u8>>,
    files: BTreeMap<String, Vec<u8>>,
}

impl WaitArtifacts {
    pub fn http_body(&self, port: impl Into<ExposedPort>, path: &str) -> Option<&[u8]> {
        self.http_bodies
            .get(&(port.into(), path.to_string()))
            .map(Vec::as_slice)
    }

    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.http_bodies.is_empty() && self.files.is_empty()
    }

    pub fn merge(&mut self, other: WaitArtifacts) {
        self.http_bodies.extend(other.http_bodies);
        self.files.extend(other.files);
    }

    pub(crate) fn record_http_body(&mut self, port: ExposedPort, path: &str, body: Vec<u8>) {
        self.http_bodies.insert((port, path.to_string()), body);
    }

    pub(crate) fn record_file(&mut self, path: &str, contents: Vec<u8>) {
        self.files.insert(path.to_string(), contents);
    }
}

#[derive(Clone, Debug, Error)]
pub enum WaitError {
    #[error("{probe} timed out after {elapsed:?} (last error: {})", .last_error.as_deref().unwrap_or("none"))]
    TimedOut {
        probe: String,
        elapsed: Duration,
        last_error: Option<String>,
    },
    #[error("{probe} failed: {reason}")]
    Errored { probe: String, reason: String },
    #[error("{probe} was cancelled")]
    Cancelled {
        probe: String,
        /// Diagnostic of the last attempt before cancellation.
        last_error: Option<String>,
    },
    #[error("{probe} failed after {elapsed:?}: {cause}{}", unresolved_suffix(.unresolved))]
    All {
        probe: String,
        elapsed: Duration,
        cause: Box<WaitError>,
        unresolved: Vec<String>,
    },
}

fn unresolved_suffix(unresolved: &[String]) -> String {
    if unresolved.is_empty() {
        String::new()
    } else {
        format!(" (unresolved: {})", unresolved.join(", "))
    }
}

impl WaitError {
    pub fn probe(&self) -> &str {
        match self {
            WaitError::TimedOut { probe, .. }
            | WaitError::Errored { probe, .. }
            | WaitError::Cancelled { probe, .. }
            | WaitError::All { probe, .. } => probe,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            WaitError::TimedOut { .. } => true,
            WaitError::All { cause, .. } => cause.is_timeout(),
            _ => false,
        }
    }

    /// Last attempt diagnostic; for `All`, that of the failing cause.
    pub fn last_error(&self) -> Option<&str> {
        match self {
            WaitError::TimedOut { last_error, .. } | WaitError::Cancelled { last_error, .. } => {
                last_error.as_deref()
            }
            WaitError::Errored { reason, .. } => Some(reason),
            WaitError::All { cause, .. } => cause.last_error(),
        }
    }

    pub fn unresolved(&self) -> &[String] {
        match self {
            WaitError::All { unresolved, .. } => unresolved,
            _ => &[],
        }
    }
}
