//! The user-facing session: configuration, connection to the cluster
//! and the statement execution entry points.

use std::borrow::Cow;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use stele_cql::frame::compression::Compressor;
use stele_cql::frame::request as cql_request;
use stele_cql::frame::request::QueryParameters;
use stele_cql::frame::types::Consistency;
use stele_cql::frame::value::{BoundValue, SerializedValues};

use crate::authentication::AuthenticatorProvider;
use crate::client::pager::PageStream;
use crate::cluster::Cluster;
use crate::errors::{ConnectionError, DriverError};
use crate::network::{AfterConnectHook, Connection, ConnectionConfig};
use crate::policies::load_balancing::LoadBalancingPolicy;
use crate::prepared_cache::{PreparedCache, PreparedEntry};
use crate::response::QueryResult;
use crate::statement::batch::{Batch, BatchStatement};
use crate::statement::{PreparedStatement, Statement, Values};

/// Everything configurable about a session. Start from `default()` and
/// override what you need.
#[derive(Clone)]
pub struct SessionConfig {
    /// Host used in single-node mode, when `nodes` is empty.
    pub host: String,
    /// Port used in single-node mode and as the default for `nodes`
    /// entries without an explicit port.
    pub port: u16,
    /// Cluster mode: `"host"` or `"host:port"` entries. Duplicates are
    /// logged and ignored.
    pub nodes: Vec<String>,
    pub load_balancing: LoadBalancingPolicy,
    /// Data connections per node, at least 1.
    pub pool_size: usize,
    /// How often an idle connection pings the server with OPTIONS.
    pub idle_interval: Duration,
    pub connect_timeout: Duration,
    /// Default per-request deadline; statements can override it.
    pub request_timeout: Duration,
    pub compressor: Option<Arc<dyn Compressor>>,
    pub authenticator: Option<Arc<dyn AuthenticatorProvider>>,
    /// Invoked once per connection after its handshake completes.
    pub after_connect: Option<AfterConnectHook>,
    pub default_consistency: Consistency,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            host: "127.0.0.1".to_owned(),
            port: 9042,
            nodes: Vec::new(),
            load_balancing: LoadBalancingPolicy::Random,
            pool_size: 1,
            idle_interval: Duration::from_millis(30_000),
            connect_timeout: Duration::from_millis(5_000),
            request_timeout: Duration::from_millis(5_000),
            compressor: None,
            authenticator: None,
            after_connect: None,
            default_consistency: Consistency::default(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `"host[:port]"` strings this config connects to.
    fn node_strings(&self) -> Vec<String> {
        if self.nodes.is_empty() {
            vec![format!("{}:{}", self.host, self.port)]
        } else {
            self.nodes.clone()
        }
    }
}

/// Resolves a single `"host[:port]"` entry.
async fn resolve_node(node: &str, default_port: u16) -> Result<SocketAddr, DriverError> {
    if let Ok(addr) = node.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = node.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    let (host, port) = match node.rsplit_once(':') {
        Some((host, port_str)) => {
            let port = port_str.parse::<u16>().map_err(|_| {
                DriverError::InvalidArguments(format!(
                    "Invalid port in node address {:?}",
                    node
                ))
            })?;
            (host.to_owned(), port)
        }
        None => (node.to_owned(), default_port),
    };

    let mut resolved = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(ConnectionError::from)?;
    resolved.next().ok_or_else(|| {
        DriverError::InvalidArguments(format!("Node address {:?} did not resolve", node))
    })
}

/// A handle to the cluster. Cheap to share behind an `Arc`; all methods
/// take `&self`.
pub struct Session {
    cluster: Cluster,
    policy: LoadBalancingPolicy,
    prepared_cache: Arc<PreparedCache>,
    default_timeout: Duration,
    default_consistency: Consistency,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    /// Connects to the configured nodes and waits until at least one
    /// node's pool is ready.
    pub async fn connect(config: SessionConfig) -> Result<Session, DriverError> {
        if config.pool_size == 0 {
            return Err(DriverError::InvalidArguments(
                "pool_size must be at least 1".to_owned(),
            ));
        }

        let mut addresses = Vec::new();
        for node in config.node_strings() {
            addresses.push(resolve_node(&node, config.port).await?);
        }
        debug!(nodes = ?addresses, "Connecting to cluster");

        let connection_config = ConnectionConfig {
            compressor: config.compressor.clone(),
            connect_timeout: config.connect_timeout,
            idle_interval: Some(config.idle_interval),
            authenticator: config.authenticator.clone(),
            event_sender: None,
            after_connect: config.after_connect.clone(),
        };

        let prepared_cache = Arc::new(PreparedCache::new());
        let cluster = Cluster::new(
            addresses,
            connection_config,
            config.pool_size,
            prepared_cache.clone(),
        );
        cluster.wait_until_connected(config.connect_timeout).await?;

        Ok(Session {
            cluster,
            policy: config.load_balancing,
            prepared_cache,
            default_timeout: config.request_timeout,
            default_consistency: config.default_consistency,
        })
    }

    /// Executes an unprepared statement. Values are positional; named
    /// values require prepared metadata and are rejected here.
    pub async fn query(
        &self,
        statement: impl Into<Statement>,
        values: impl Into<Values>,
    ) -> Result<QueryResult, DriverError> {
        self.run_query(&statement.into(), &values.into(), None)
            .await
    }

    /// Like [Session::query], continuing from the page passed as
    /// `cursor`.
    pub async fn query_paged(
        &self,
        statement: impl Into<Statement>,
        values: impl Into<Values>,
        cursor: Option<&QueryResult>,
    ) -> Result<QueryResult, DriverError> {
        let paging_state = cursor.and_then(|page| page.paging_state().cloned());
        self.run_query(&statement.into(), &values.into(), paging_state)
            .await
    }

    /// Prepares a statement on the cluster, going through the shared
    /// prepared cache. Preparing the same text concurrently results in
    /// a single PREPARE on the wire.
    pub async fn prepare(
        &self,
        statement: impl Into<Statement>,
    ) -> Result<PreparedStatement, DriverError> {
        let statement = statement.into();
        let connection = self.pick_connection()?;
        let timeout = statement.request_timeout.unwrap_or(self.default_timeout);

        let cache = &self.prepared_cache;
        let text = statement.contents.clone();
        Self::with_timeout(
            timeout,
            cache.get_or_prepare(&statement.contents, || {
                let connection = connection.clone();
                let text = text.clone();
                async move { connection.prepare_entry(&text).await }
            }),
        )
        .await?;

        Ok(PreparedStatement { statement })
    }

    /// Executes a prepared statement. An `unprepared` response is
    /// repaired transparently with a single re-prepare.
    pub async fn execute(
        &self,
        prepared: &PreparedStatement,
        values: impl Into<Values>,
    ) -> Result<QueryResult, DriverError> {
        self.run_execute(prepared, &values.into(), None).await
    }

    /// Like [Session::execute], continuing from the page passed as
    /// `cursor`.
    pub async fn execute_paged(
        &self,
        prepared: &PreparedStatement,
        values: impl Into<Values>,
        cursor: Option<&QueryResult>,
    ) -> Result<QueryResult, DriverError> {
        let paging_state = cursor.and_then(|page| page.paging_state().cloned());
        self.run_execute(prepared, &values.into(), paging_state)
            .await
    }

    /// Executes a batch. One value list per statement, positional only.
    pub async fn batch(
        &self,
        batch: &Batch,
        values: Vec<Values>,
    ) -> Result<QueryResult, DriverError> {
        if values.len() != batch.statements.len() {
            return Err(DriverError::InvalidArguments(format!(
                "Batch has {} statements but {} value lists were provided",
                batch.statements.len(),
                values.len()
            )));
        }

        let connection = self.pick_connection()?;
        let timeout = batch.request_timeout.unwrap_or(self.default_timeout);

        let op = async {
            let mut wire_statements = Vec::with_capacity(batch.statements.len());
            let mut wire_values = Vec::with_capacity(batch.statements.len());

            for (statement, statement_values) in batch.statements.iter().zip(values.iter()) {
                let positional = match statement_values {
                    Values::Positional(values) => values,
                    Values::Named(_) => {
                        return Err(DriverError::InvalidArguments(
                            "Batches accept positional values only".to_owned(),
                        ));
                    }
                };

                match statement {
                    BatchStatement::Simple(statement) => {
                        let mut serialized = SerializedValues::new();
                        for value in positional {
                            serialized.add_value_untyped(value)?;
                        }
                        wire_statements.push(cql_request::BatchStatement::Query {
                            text: Cow::Owned(statement.contents.clone()),
                        });
                        wire_values.push(serialized);
                    }
                    BatchStatement::Prepared(prepared) => {
                        let text = &prepared.statement.contents;
                        let entry = self
                            .prepared_cache
                            .get_or_prepare(text, || {
                                let connection = connection.clone();
                                let text = text.clone();
                                async move { connection.prepare_entry(&text).await }
                            })
                            .await?;
                        wire_statements.push(cql_request::BatchStatement::Prepared {
                            id: Cow::Owned(entry.id.to_vec()),
                        });
                        wire_values.push(Self::bind_positional(&entry, positional)?);
                    }
                }
            }

            let wire_batch = cql_request::Batch {
                statements: Cow::Owned(wire_statements),
                batch_type: batch.batch_type,
                consistency: batch.consistency.unwrap_or(self.default_consistency),
                serial_consistency: batch.serial_consistency,
                timestamp: batch.timestamp,
                values: wire_values,
            };

            let result = connection.batch(&wire_batch).await?;
            Ok(QueryResult::from_result(result))
        };

        Self::with_timeout(timeout, op).await
    }

    /// Drops the cached prepared entry for this statement, forcing the
    /// next execution to PREPARE afresh.
    pub fn invalidate_prepared(&self, prepared: &PreparedStatement) {
        self.prepared_cache.invalidate(&prepared.statement.contents);
    }

    /// A lazy stream of result pages. The statement is prepared on the
    /// first pull; each subsequent pull fetches the next page until a
    /// terminal one arrives.
    pub fn page_stream(
        &self,
        statement: impl Into<Statement>,
        values: impl Into<Values>,
    ) -> PageStream<'_> {
        PageStream::new(self, statement.into(), values.into())
    }

    pub(crate) async fn run_query(
        &self,
        statement: &Statement,
        values: &Values,
        paging_state: Option<Bytes>,
    ) -> Result<QueryResult, DriverError> {
        let connection = self.pick_connection()?;
        let parameters = self.simple_parameters(statement, values, paging_state)?;
        let timeout = statement.request_timeout.unwrap_or(self.default_timeout);

        let result = Self::with_timeout(
            timeout,
            connection.query_raw(&statement.contents, parameters),
        )
        .await?;
        Ok(QueryResult::from_result(result))
    }

    pub(crate) async fn run_execute(
        &self,
        prepared: &PreparedStatement,
        values: &Values,
        paging_state: Option<Bytes>,
    ) -> Result<QueryResult, DriverError> {
        let statement = &prepared.statement;
        let connection = self.pick_connection()?;
        let timeout = statement.request_timeout.unwrap_or(self.default_timeout);

        let op = async {
            let entry = self
                .prepared_cache
                .get_or_prepare(&statement.contents, || {
                    let connection = connection.clone();
                    let text = statement.contents.clone();
                    async move { connection.prepare_entry(&text).await }
                })
                .await?;

            let result = connection
                .execute_prepared(
                    &self.prepared_cache,
                    &statement.contents,
                    entry,
                    |entry| self.prepared_parameters(statement, values, entry, paging_state.clone()),
                )
                .await?;
            Ok(QueryResult::from_result(result))
        };

        Self::with_timeout(timeout, op).await
    }

    fn pick_connection(&self) -> Result<Arc<Connection>, DriverError> {
        let pool = self.cluster.checkout(self.policy)?;
        Ok(pool.connection()?)
    }

    fn simple_parameters(
        &self,
        statement: &Statement,
        values: &Values,
        paging_state: Option<Bytes>,
    ) -> Result<QueryParameters<'static>, DriverError> {
        let serialized = match values {
            Values::Positional(values) => {
                let mut serialized = SerializedValues::new();
                for value in values {
                    serialized.add_value_untyped(value)?;
                }
                serialized
            }
            Values::Named(_) => {
                return Err(DriverError::InvalidArguments(
                    "Simple statements carry no column metadata; named values require \
                     a prepared statement"
                        .to_owned(),
                ));
            }
        };

        Ok(self.parameters_with(statement, serialized, paging_state))
    }

    fn prepared_parameters(
        &self,
        statement: &Statement,
        values: &Values,
        entry: &PreparedEntry,
        paging_state: Option<Bytes>,
    ) -> Result<QueryParameters<'static>, DriverError> {
        let serialized = match values {
            Values::Positional(values) => Self::bind_positional(entry, values)?,
            Values::Named(values) => Self::bind_named(entry, values)?,
        };
        Ok(self.parameters_with(statement, serialized, paging_state))
    }

    fn parameters_with(
        &self,
        statement: &Statement,
        values: SerializedValues,
        paging_state: Option<Bytes>,
    ) -> QueryParameters<'static> {
        QueryParameters {
            consistency: statement.consistency.unwrap_or(self.default_consistency),
            serial_consistency: statement.serial_consistency,
            timestamp: statement.timestamp,
            page_size: statement.page_size,
            paging_state,
            skip_metadata: false,
            values: Cow::Owned(values),
        }
    }

    fn bind_positional(
        entry: &PreparedEntry,
        values: &[BoundValue],
    ) -> Result<SerializedValues, DriverError> {
        let specs = &entry.bind_metadata.col_specs;
        if values.len() != specs.len() {
            return Err(DriverError::InvalidArguments(format!(
                "Statement takes {} bind values, {} were provided",
                specs.len(),
                values.len()
            )));
        }

        let mut serialized = SerializedValues::new();
        for (value, spec) in values.iter().zip(specs.iter()) {
            serialized.add_value(value, &spec.typ)?;
        }
        Ok(serialized)
    }

    fn bind_named(
        entry: &PreparedEntry,
        values: &[(String, BoundValue)],
    ) -> Result<SerializedValues, DriverError> {
        let specs = &entry.bind_metadata.col_specs;

        if let Some((unknown, _)) = values
            .iter()
            .find(|(name, _)| !specs.iter().any(|spec| spec.name == *name))
        {
            return Err(DriverError::InvalidArguments(format!(
                "Unknown bind name {:?}",
                unknown
            )));
        }

        // The wire order is the bind-column order; names are resolved
        // client-side against the prepared metadata.
        let mut serialized = SerializedValues::new();
        for spec in specs {
            let (_, value) = values
                .iter()
                .find(|(name, _)| *name == spec.name)
                .ok_or_else(|| {
                    DriverError::InvalidArguments(format!(
                        "Missing bind value for column {:?}",
                        spec.name
                    ))
                })?;
            serialized.add_value(value, &spec.typ)?;
        }
        Ok(serialized)
    }

    async fn with_timeout<T>(
        timeout: Duration,
        fut: impl Future<Output = Result<T, DriverError>>,
    ) -> Result<T, DriverError> {
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            // Dropping the request future quarantines its stream id
            // until the late response arrives.
            Err(_) => Err(DriverError::Timeout(timeout)),
        }
    }
}
