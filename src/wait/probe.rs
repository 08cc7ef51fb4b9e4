//! Single attempts for each leaf probe. Polling, deadlines and cancellation live in
//! the engine; an attempt either succeeds, asks to be retried, or is fatal.

use crate::driver::{DriverError, ResourceStatus};
use crate::wait::engine::ProbeTarget;
use crate::wait::{
    BodyMatcher, FileProbe, FileSink, HttpProbe, LogProbe, PortCheck, PortProbe, WaitArtifacts,
    WaitStrategy,
};
use crate::request::ExposedPort;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use tokio::net::TcpStream;

#[derive(Debug)]
pub(crate) enum AttemptError {
    Retry(String),
    Fatal(String),
}

impl From<DriverError> for AttemptError {
    fn from(err: DriverError) -> Self {
        if err.is_terminal() {
            AttemptError::Fatal(err.to_string())
        } else {
            AttemptError::Retry(err.to_string())
        }
    }
}

type AttemptResult = Result<WaitArtifacts, AttemptError>;

pub(crate) async fn attempt(strategy: &WaitStrategy, target: &ProbeTarget) -> AttemptResult {
    ensure_running(target).await?;

    match strategy {
        WaitStrategy::Port(probe) => port_attempt(probe, target).await,
        WaitStrategy::Http(probe) => http_attempt(probe, target).await,
        WaitStrategy::Log(probe) => log_attempt(probe, target).await,
        WaitStrategy::File(probe) => file_attempt(probe, target).await,
        WaitStrategy::All(_) => Err(AttemptError::Fatal(
            "combinator cannot be polled as a single probe".to_string(),
        )),
    }
}

async fn ensure_running(target: &ProbeTarget) -> Result<(), AttemptError> {
    match target.driver().resource_status(target.resource()).await? {
        ResourceStatus::Running => Ok(()),
        ResourceStatus::Created => Err(AttemptError::Retry(format!(
            "resource `{}` is not running yet",
            target.resource()
        ))),
        ResourceStatus::Exited { code } => Err(AttemptError::Fatal(format!(
            "resource `{}` exited with status {code}",
            target.resource()
        ))),
    }
}

fn resolve_port(
    requested: Option<ExposedPort>,
    target: &ProbeTarget,
) -> Result<(ExposedPort, u16), AttemptError> {
    let port = requested
        .or_else(|| target.exposed().first().copied())
        .ok_or_else(|| AttemptError::Fatal("resource exposes no ports".to_string()))?;

    match target.ports().get(&port) {
        Some(mapped) => Ok((port, *mapped)),
        None => Err(AttemptError::Retry(format!("port {port} is not mapped yet"))),
    }
}

async fn port_attempt(probe: &PortProbe, target: &ProbeTarget) -> AttemptResult {
    let (port, mapped) = resolve_port(probe.port, target)?;
    if probe.check == PortCheck::Mapped {
        return Ok(WaitArtifacts::default());
    }

    TcpStream::connect((target.host(), mapped))
        .await
        .map_err(|err| {
            AttemptError::Retry(format!(
                "dial {}:{mapped} ({port}) failed: {err}",
                target.host()
            ))
        })?;
    Ok(WaitArtifacts::default())
}

async fn http_attempt(probe: &HttpProbe, target: &ProbeTarget) -> AttemptResult {
    let (port, mapped) = resolve_port(probe.port, target)?;
    let scheme = if probe.tls { "https" } else { "http" };
    let path = if probe.path.starts_with('/') {
        probe.path.clone()
    } else {
        format!("/{}", probe.path)
    };
    let url = format!("{scheme}://{}:{mapped}{path}", target.host());

    let method = Method::from_bytes(probe.method.as_bytes())
        .map_err(|err| AttemptError::Fatal(format!("invalid method `{}`: {err}", probe.method)))?;
    let client = target
        .http_client(probe.allow_insecure)
        .map_err(|err| AttemptError::Fatal(format!("failed to build HTTP client: {err}")))?;

    let mut request = client.request(method, &url);
    for (name, value) in &probe.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| AttemptError::Fatal(format!("invalid header `{name}`: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| AttemptError::Fatal(format!("invalid header value: {err}")))?;
        request = request.header(name, value);
    }

    let response = request
        .send()
        .await
        .map_err(|err| AttemptError::Retry(format!("request to {url} failed: {err}")))?;
    let status = response.status().as_u16();
    let body = response
        .bytes()
        .await
        .map_err(|err| AttemptError::Retry(format!("reading body from {url} failed: {err}")))?;

    if !probe.status.matches(status) {
        return Err(AttemptError::Retry(format!(
            "unexpected status {status} from {url}"
        )));
    }
    if !body_matches(&probe.body, &body)? {
        return Err(AttemptError::Retry(format!(
            "response body from {url} did not match"
        )));
    }

    let mut artifacts = WaitArtifacts::default();
    if probe.capture_body {
        artifacts.record_http_body(port, &probe.path, body.to_vec());
    }
    Ok(artifacts)
}

fn body_matches(matcher: &BodyMatcher, body: &[u8]) -> Result<bool, AttemptError> {
    match matcher {
        BodyMatcher::Any => Ok(true),
        BodyMatcher::Contains(needle) => Ok(needle.is_empty()
            || body
                .windows(needle.len())
                .any(|window| window == needle.as_slice())),
        BodyMatcher::Regex(pattern) => {
            let regex = crate::wait::compile_pattern(pattern)
                .map_err(|err| AttemptError::Fatal(err.to_string()))?;
            Ok(regex.is_match(body))
        }
    }
}

async fn log_attempt(probe: &LogProbe, target: &ProbeTarget) -> AttemptResult {
    let regex = probe
        .pattern
        .compile()
        .map_err(|err| AttemptError::Fatal(err.to_string()))?;
    let logs = target.driver().logs(target.resource()).await?;

    let matches = regex.find_iter(&logs).count();
    if matches >= probe.occurrences {
        Ok(WaitArtifacts::default())
    } else {
        Err(AttemptError::Retry(format!(
            "pattern matched {matches} of {} time(s)",
            probe.occurrences
        )))
    }
}

async fn file_attempt(probe: &FileProbe, target: &ProbeTarget) -> AttemptResult {
    let contents = target
        .driver()
        .read_file(target.resource(), &probe.path)
        .await?;

    let Some(contents) = contents else {
        return Err(AttemptError::Retry(format!(
            "{} does not exist yet",
            probe.path
        )));
    };

    let mut artifacts = WaitArtifacts::default();
    if probe.sink == FileSink::Capture {
        artifacts.record_file(&probe.path, contents);
    }
    Ok(artifacts)
}
