//! Driver-level view of a RESULT response.

use bytes::Bytes;

use stele_cql::frame::response::result;
use stele_cql::{ColumnSpec, Row};

/// One page of a result set, fully materialized: it borrows nothing
/// from the connection that produced it. A page with no paging state is
/// terminal; a non-terminal page can be passed back as a cursor to
/// fetch the next one.
#[derive(Debug, Default)]
pub struct QueryResult {
    rows: Option<Vec<Row>>,
    col_specs: Vec<ColumnSpec>,
    paging_state: Option<Bytes>,
    keyspace_name: Option<String>,
}

impl QueryResult {
    pub(crate) fn from_result(result: result::Result) -> Self {
        match result {
            result::Result::Void => QueryResult::default(),
            result::Result::Rows(rows) => QueryResult {
                rows: Some(rows.rows),
                col_specs: rows.metadata.col_specs,
                paging_state: rows.metadata.paging_state,
                keyspace_name: None,
            },
            result::Result::SetKeyspace(set_keyspace) => QueryResult {
                keyspace_name: Some(set_keyspace.keyspace_name),
                ..QueryResult::default()
            },
            // Prepared results are consumed by the prepared cache and
            // never reach here; schema changes carry no rows.
            result::Result::Prepared(_) | result::Result::SchemaChange(_) => {
                QueryResult::default()
            }
        }
    }

    /// The rows of this page; empty for non-rows results.
    pub fn rows(&self) -> &[Row] {
        self.rows.as_deref().unwrap_or(&[])
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows.unwrap_or_default()
    }

    /// Whether this result is of the `rows` kind at all (a void result
    /// is not, even though both have zero rows).
    pub fn is_rows(&self) -> bool {
        self.rows.is_some()
    }

    pub fn first_row(&self) -> Option<&Row> {
        self.rows().first()
    }

    pub fn col_specs(&self) -> &[ColumnSpec] {
        &self.col_specs
    }

    /// Index of a column by name, per this page's metadata.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.col_specs.iter().position(|spec| spec.name == name)
    }

    /// The cursor to pass into a paged execution to get the next page.
    pub fn paging_state(&self) -> Option<&Bytes> {
        self.paging_state.as_ref()
    }

    /// A page is terminal iff the server attached no paging state.
    pub fn is_final(&self) -> bool {
        self.paging_state.is_none()
    }

    /// The keyspace name from a `USE` statement result.
    pub fn keyspace_name(&self) -> Option<&str> {
        self.keyspace_name.as_deref()
    }
}
