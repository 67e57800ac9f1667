pub mod batch;

use std::time::Duration;

use stele_cql::frame::types::{Consistency, SerialConsistency};
use stele_cql::frame::value::BoundValue;
use stele_cql::CqlValue;

/// An unprepared CQL statement plus its per-statement execution knobs.
#[derive(Debug, Clone)]
pub struct Statement {
    pub(crate) contents: String,
    pub(crate) page_size: Option<i32>,
    pub(crate) consistency: Option<Consistency>,
    pub(crate) serial_consistency: Option<SerialConsistency>,
    pub(crate) timestamp: Option<i64>,
    pub(crate) request_timeout: Option<Duration>,
}

impl Statement {
    pub fn new(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            page_size: None,
            consistency: None,
            serial_consistency: None,
            timestamp: None,
            request_timeout: None,
        }
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    /// Requests paged results with at most `page_size` rows per page.
    pub fn set_page_size(&mut self, page_size: i32) {
        assert!(page_size > 0, "page size must be positive");
        self.page_size = Some(page_size);
    }

    pub fn set_consistency(&mut self, consistency: Consistency) {
        self.consistency = Some(consistency);
    }

    pub fn set_serial_consistency(&mut self, serial_consistency: SerialConsistency) {
        self.serial_consistency = Some(serial_consistency);
    }

    /// Client-supplied write timestamp in microseconds.
    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = Some(timestamp);
    }

    /// Overrides the session-wide request timeout for this statement.
    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.request_timeout = Some(timeout);
    }
}

impl From<&str> for Statement {
    fn from(contents: &str) -> Self {
        Statement::new(contents)
    }
}

impl From<String> for Statement {
    fn from(contents: String) -> Self {
        Statement::new(contents)
    }
}

/// A statement that has been prepared through the session. Executing it
/// goes through the cluster's prepared cache, so a server-side cache
/// eviction is repaired transparently.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub(crate) statement: Statement,
}

impl PreparedStatement {
    pub fn contents(&self) -> &str {
        &self.statement.contents
    }

    pub fn statement_mut(&mut self) -> &mut Statement {
        &mut self.statement
    }
}

/// Values bound to a statement's parameters.
///
/// Named values are accepted only where the server has provided
/// bound-column metadata, i.e. for prepared statements; binding them to
/// a simple statement or a batch is rejected with `InvalidArguments`.
#[derive(Debug, Clone)]
pub enum Values {
    Positional(Vec<BoundValue>),
    Named(Vec<(String, BoundValue)>),
}

impl Values {
    pub fn empty() -> Self {
        Values::Positional(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Values::Positional(v) => v.is_empty(),
            Values::Named(v) => v.is_empty(),
        }
    }
}

impl Default for Values {
    fn default() -> Self {
        Values::empty()
    }
}

impl From<Vec<BoundValue>> for Values {
    fn from(values: Vec<BoundValue>) -> Self {
        Values::Positional(values)
    }
}

impl From<Vec<CqlValue>> for Values {
    fn from(values: Vec<CqlValue>) -> Self {
        Values::Positional(values.into_iter().map(BoundValue::Value).collect())
    }
}

impl From<Vec<(String, CqlValue)>> for Values {
    fn from(values: Vec<(String, CqlValue)>) -> Self {
        Values::Named(
            values
                .into_iter()
                .map(|(name, value)| (name, BoundValue::Value(value)))
                .collect(),
        )
    }
}

impl From<()> for Values {
    fn from(_: ()) -> Self {
        Values::empty()
    }
}
