#![forbid(unsafe_code)]

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
pub type DockyardError = Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("driver error: {0}")]
    Driver(#[from] crate::driver::DriverError),
    #[error("startup error: {0}")]
    Startup(#[from] crate::orchestration::StartupError),
    #[error("resource `{resource}` did not become ready: {source}")]
    Readiness {
        resource: String,
        #[source]
        source: crate::wait::WaitError,
    },
    #[error("{0}")]
    Composite(#[from] crate::orchestration::CompositeError),
    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn new<E>(error: E) -> Self
    where
        Error: From<E>,
    {
        error.into()
    }

    pub fn msg<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::Message(message.into())
    }

    pub fn with_context<M>(context: M, source: Error) -> Self
    where
        M: Into<String>,
    {
        Self::Context {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// True when the failure (or the failure that triggered a rollback) is a readiness
    /// deadline rather than a driver or configuration problem.
    pub fn is_readiness_timeout(&self) -> bool {
        match self {
            Error::Readiness { source, .. } => source.is_timeout(),
            Error::Composite(composite) => composite.cause().is_readiness_timeout(),
            Error::Context { source, .. } => source.is_readiness_timeout(),
            _ => false,
        }
    }

    pub fn as_configuration(&self) -> Option<&ConfigurationError> {
        match self {
            Error::Configuration(err) => Some(err),
            Error::Context { source, .. } => source.as_configuration(),
            _ => None,
        }
    }
}

/// Invalid or contradictory request, detected before any resource exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("request declares both an image (`{image}`) and a build context")]
    ImageAndBuild { image: String },
    #[error("request `{name}` declares neither an image nor a build context")]
    MissingImage { name: String },
    #[error("exposed port {port} is declared more than once")]
    DuplicatePort { port: String },
    #[error("invalid port specification `{0}`")]
    InvalidPort(String),
    #[error("wait strategy {probe} references port {port} which is not exposed")]
    UnexposedWaitPort { probe: String, port: String },
    #[error("wait strategy {probe} needs a default port but the request exposes none")]
    NoExposedPorts { probe: String },
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("network mode `{mode}` cannot be combined with network memberships")]
    NamespaceWithNetworks { mode: String },
    #[error("aliases declared for network `{network}` which the request does not join")]
    AliasesWithoutNetwork { network: String },
    #[error("{phase} hook `{hook}` needs a created resource")]
    HookPhase { phase: String, hook: String },
    #[error("invalid port on listener {address}:{port} (must be between 0 and 65535)")]
    ListenerPort { address: String, port: i64 },
    #[error("resource must be attached to at least one network")]
    NoNetworks,
    #[error("resource must have network aliases defined")]
    NoNetworkAliases,
    #[error("dependent `{name}` may not declare networks; it joins the primary's namespace")]
    DependentNetworks { name: String },
    #[error("dependent name `{name}` is used more than once")]
    DuplicateDependent { name: String },
    #[error("a primary with a deferred start cannot declare dependents")]
    DeferredStartWithDependents,
}

pub trait Context<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> Context<T> for std::result::Result<T, E>
where
    Error: From<E>,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        self.map_err(|err| Error::with_context(context.into(), err.into()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|err| Error::with_context(f().into(), err.into()))
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Message(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Message(value.to_string())
    }
}

#[macro_export]
macro_rules! err {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        $crate::error::Error::msg(format!($fmt $(, $arg)*))
    }};
    ($err:expr) => {{
        $crate::error::Error::new($err)
    }};
}

#[macro_export]
macro_rules! bail_err {
    ($($arg:tt)*) => {{
        return Err($crate::err!($($arg)*));
    }};
}
