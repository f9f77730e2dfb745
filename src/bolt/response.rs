//! Bolt responses as seen by the connection layer.
//!
//! A flush delivers, in order, one [`Response`] per server reply. Summaries are
//! tagged by the request that produced them so that callers dispatch on a single
//! enum instead of registering one callback per request kind.

use std::collections::HashMap;

use super::value::Value;
use crate::driver::{DriverError, DriverResult};

/// Success summary of a single request.
#[derive(Debug, Clone, PartialEq)]
pub enum Summary {
    /// BEGIN succeeded
    Begin,
    /// RUN succeeded
    Run {
        /// Result field names
        keys: Vec<String>,
        /// Query id
        qid: i64,
    },
    /// PULL succeeded
    Pull {
        /// More records are available
        has_more: bool,
        /// Bookmark of an auto-commit transaction, when finished
        bookmark: Option<String>,
    },
    /// DISCARD succeeded
    Discard {
        /// More records are available
        has_more: bool,
    },
    /// COMMIT succeeded
    Commit {
        /// Bookmark of the committed transaction
        bookmark: Option<String>,
    },
    /// ROLLBACK succeeded
    Rollback,
    /// RESET succeeded
    Reset,
    /// ROUTE succeeded
    Route(RouteSummary),
    /// LOGOFF succeeded
    Logoff,
    /// LOGON succeeded
    Logon,
    /// TELEMETRY succeeded
    Telemetry,
}

impl Summary {
    /// Get summary name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Summary::Begin => "BEGIN",
            Summary::Run { .. } => "RUN",
            Summary::Pull { .. } => "PULL",
            Summary::Discard { .. } => "DISCARD",
            Summary::Commit { .. } => "COMMIT",
            Summary::Rollback => "ROLLBACK",
            Summary::Reset => "RESET",
            Summary::Route(_) => "ROUTE",
            Summary::Logoff => "LOGOFF",
            Summary::Logon => "LOGON",
            Summary::Telemetry => "TELEMETRY",
        }
    }
}

/// ROUTE success metadata (the content of the `rt` map).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteSummary {
    /// Raw routing table metadata
    pub metadata: HashMap<String, Value>,
}

impl RouteSummary {
    /// Create a route summary.
    pub fn new(metadata: HashMap<String, Value>) -> Self {
        Self { metadata }
    }
}

/// One reply delivered by a flush.
#[derive(Debug, Clone)]
pub enum Response {
    /// A request succeeded
    Summary(Summary),
    /// A record of the current result stream
    Record(Vec<Value>),
    /// A request was ignored because an earlier one failed
    Ignored,
    /// A request failed (or the connection broke)
    Error(DriverError),
    /// Every pipelined request has been answered
    Complete,
}

/// Receiver of the replies produced by a flush.
pub trait ResponseHandler: Send {
    /// Handle one reply.
    fn on_response(&mut self, response: Response);
}

impl<F> ResponseHandler for F
where
    F: FnMut(Response) + Send,
{
    fn on_response(&mut self, response: Response) {
        self(response)
    }
}

/// Handler that gathers summaries, records and the first error.
#[derive(Debug, Default)]
pub struct CollectingHandler {
    summaries: Vec<Summary>,
    records: Vec<Vec<Value>>,
    error: Option<DriverError>,
    ignored: usize,
    complete: bool,
}

impl CollectingHandler {
    /// Create an empty handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Summaries received so far.
    pub fn summaries(&self) -> &[Summary] {
        &self.summaries
    }

    /// Records received so far.
    pub fn records(&self) -> &[Vec<Value>] {
        &self.records
    }

    /// First error received, if any.
    pub fn error(&self) -> Option<&DriverError> {
        self.error.as_ref()
    }

    /// Number of ignored requests.
    pub fn ignored(&self) -> usize {
        self.ignored
    }

    /// Whether the completion marker was received.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The ROUTE summary, if one was received.
    pub fn route_summary(&self) -> Option<&RouteSummary> {
        self.summaries.iter().find_map(|s| match s {
            Summary::Route(route) => Some(route),
            _ => None,
        })
    }

    /// Consume the handler, failing with the first error.
    pub fn into_result(self) -> DriverResult<Vec<Summary>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.summaries),
        }
    }
}

impl ResponseHandler for CollectingHandler {
    fn on_response(&mut self, response: Response) {
        match response {
            Response::Summary(summary) => self.summaries.push(summary),
            Response::Record(fields) => self.records.push(fields),
            Response::Ignored => self.ignored += 1,
            Response::Error(err) => {
                if self.error.is_none() {
                    self.error = Some(err);
                }
            }
            Response::Complete => self.complete = true,
        }
    }
}
