/// Lifecycle states for fetches and harvest runs
use std::fmt;

/// Outcome class of a fetch attempt sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStatus {
    /// Content was retrieved with a 2xx response
    Ok,

    /// The server answered with a 4xx/5xx status
    HttpError,

    /// The request did not complete within its timeout
    Timeout,

    /// Connection refused, DNS failure, TLS failure, broken body stream
    NetworkError,
}

impl FetchStatus {
    /// Returns true if a failure of this class may succeed on a later attempt
    ///
    /// HTTP errors are usually permanent for a given URL, so only
    /// transport-level failures are considered transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::NetworkError)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::HttpError => "http_error",
            Self::Timeout => "timeout",
            Self::NetworkError => "network_error",
        }
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State of a harvest run
///
/// A run starts in `Running` and ends in exactly one terminal state. All
/// terminal states are normal completions; the run summary is reported in
/// every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunState {
    /// Workers are dispatching pages
    #[default]
    Running,

    /// The frontier emptied and no page was left in flight
    Drained,

    /// The page budget or the record budget was reached
    BudgetExceeded,

    /// Cancelled by the caller, or stopped after repeated sink failures
    Aborted,
}

impl RunState {
    /// Returns true if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Converts the run state to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Drained => "drained",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Aborted => "aborted",
        }
    }

    /// Parses a run state from a database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "drained" => Some(Self::Drained),
            "budget_exceeded" => Some(Self::BudgetExceeded),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }

    /// Returns all possible run states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Running,
            Self::Drained,
            Self::BudgetExceeded,
            Self::Aborted,
        ]
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
