//! Lazy page-by-page iteration over a paged query.

use bytes::Bytes;

use crate::client::session::Session;
use crate::errors::DriverError;
use crate::response::QueryResult;
use crate::statement::{PreparedStatement, Statement, Values};

enum PageStreamStatement {
    /// Prepared lazily on the first pull, then reused for every page.
    Unprepared(Statement),
    Prepared(PreparedStatement),
}

/// A finite sequence of result pages. Each pull executes the next page
/// using the previous page's paging state; the stream ends with the
/// first terminal page. An error also ends the stream.
pub struct PageStream<'a> {
    session: &'a Session,
    statement: PageStreamStatement,
    values: Values,
    paging_state: Option<Bytes>,
    done: bool,
}

impl<'a> PageStream<'a> {
    pub(crate) fn new(session: &'a Session, statement: Statement, values: Values) -> Self {
        PageStream {
            session,
            statement: PageStreamStatement::Unprepared(statement),
            values,
            paging_state: None,
            done: false,
        }
    }

    /// Fetches the next page, or `None` once the stream is exhausted.
    pub async fn next_page(&mut self) -> Option<Result<QueryResult, DriverError>> {
        if self.done {
            return None;
        }

        match self.fetch_next().await {
            Ok(page) => {
                match page.paging_state() {
                    Some(state) => self.paging_state = Some(state.clone()),
                    None => self.done = true,
                }
                Some(Ok(page))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }

    async fn fetch_next(&mut self) -> Result<QueryResult, DriverError> {
        if let PageStreamStatement::Unprepared(statement) = &self.statement {
            let prepared = self.session.prepare(statement.clone()).await?;
            self.statement = PageStreamStatement::Prepared(prepared);
        }

        match &self.statement {
            PageStreamStatement::Prepared(prepared) => {
                self.session
                    .run_execute(prepared, &self.values, self.paging_state.clone())
                    .await
            }
            PageStreamStatement::Unprepared(_) => unreachable!("prepared above"),
        }
    }
}
