use std::time::Duration;

use stele_cql::frame::types::{Consistency, SerialConsistency};

use crate::statement::{PreparedStatement, Statement};

pub use stele_cql::frame::request::BatchType;

/// An ordered list of statements executed as a unit. Mixing simple and
/// prepared statements is allowed; values are supplied per statement at
/// execution time and must be positional.
#[derive(Debug, Clone)]
pub struct Batch {
    pub(crate) batch_type: BatchType,
    pub(crate) statements: Vec<BatchStatement>,
    pub(crate) consistency: Option<Consistency>,
    pub(crate) serial_consistency: Option<SerialConsistency>,
    pub(crate) timestamp: Option<i64>,
    pub(crate) request_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub enum BatchStatement {
    Simple(Statement),
    Prepared(PreparedStatement),
}

impl Batch {
    pub fn new(batch_type: BatchType) -> Self {
        Batch {
            batch_type,
            statements: Vec::new(),
            consistency: None,
            serial_consistency: None,
            timestamp: None,
            request_timeout: None,
        }
    }

    /// Preserves the append order; the server sees the statements in
    /// exactly this order.
    pub fn append_statement(&mut self, statement: impl Into<BatchStatement>) {
        self.statements.push(statement.into());
    }

    pub fn statements(&self) -> &[BatchStatement] {
        &self.statements
    }

    pub fn set_consistency(&mut self, consistency: Consistency) {
        self.consistency = Some(consistency);
    }

    pub fn set_serial_consistency(&mut self, serial_consistency: SerialConsistency) {
        self.serial_consistency = Some(serial_consistency);
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = Some(timestamp);
    }

    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.request_timeout = Some(timeout);
    }
}

impl From<Statement> for BatchStatement {
    fn from(statement: Statement) -> Self {
        BatchStatement::Simple(statement)
    }
}

impl From<&str> for BatchStatement {
    fn from(contents: &str) -> Self {
        BatchStatement::Simple(Statement::new(contents))
    }
}

impl From<PreparedStatement> for BatchStatement {
    fn from(prepared: PreparedStatement) -> Self {
        BatchStatement::Prepared(prepared)
    }
}
