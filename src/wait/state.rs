use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    Polling,
    Satisfied,
    TimedOut,
    Errored,
    Cancelled,
}

impl ProbeState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProbeState::Idle | ProbeState::Polling)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProbeState::Idle => "IDLE",
            ProbeState::Polling => "POLLING",
            ProbeState::Satisfied => "SATISFIED",
            ProbeState::TimedOut => "TIMED_OUT",
            ProbeState::Errored => "ERRORED",
            ProbeState::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionError {
    pub probe: String,
    pub from: ProbeState,
    pub to: ProbeState,
}

/// Lifecycle of one probe evaluation.
#[derive(Clone, Debug)]
pub struct ProbeRun {
    probe: String,
    state: ProbeState,
    attempts: u32,
    started: Option<Instant>,
    last_error: Option<String>,
}

impl ProbeRun {
    pub fn new(probe: impl Into<String>) -> Self {
        Self {
            probe: probe.into(),
            state: ProbeState::Idle,
            attempts: 0,
            started: None,
            last_error: None,
        }
    }

    pub fn probe(&self) -> &str {
        &self.probe
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn elapsed(&self) -> Duration {
        self.started
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    pub fn begin(&mut self) -> Result<ProbeState, TransitionError> {
        let state = self.transition(ProbeState::Polling)?;
        self.started = Some(Instant::now());
        Ok(state)
    }

    pub fn record_attempt(&mut self, error: Option<String>) {
        self.attempts += 1;
        if error.is_some() {
            self.last_error = error;
        }
    }

    pub fn transition(&mut self, next: ProbeState) -> Result<ProbeState, TransitionError> {
        if !Self::is_valid_transition(self.state, next) {
            return Err(TransitionError {
                probe: self.probe.clone(),
                from: self.state,
                to: next,
            });
        }

        self.state = next;
        Ok(self.state)
    }

    fn is_valid_transition(current: ProbeState, next: ProbeState) -> bool {
        match current {
            ProbeState::Idle => matches!(next, ProbeState::Polling | ProbeState::Cancelled),
            ProbeState::Polling => matches!(
                next,
                ProbeState::Polling
                    | ProbeState::Satisfied
                    | ProbeState::TimedOut
                    | ProbeState::Errored
                    | ProbeState::Cancelled
            ),
            ProbeState::Satisfied
            | ProbeState::TimedOut
            | ProbeState::Errored
            | ProbeState::Cancelled => false,
        }
    }
}
