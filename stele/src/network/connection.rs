//! A single data or control connection: one socket, one router task,
//! requests multiplexed over stream ids.

use std::borrow::Cow;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::RemoteHandle;
use futures::FutureExt;
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, trace, warn};

use stele_cql::frame::compression::Compressor;
use stele_cql::frame::request::{
    self, Execute, Prepare, QueryParameters, Register, SerializableRequest, Startup,
};
use stele_cql::frame::response::error::Error;
use stele_cql::frame::response::event::Event;
use stele_cql::frame::response::result;
use stele_cql::frame::response::{Response, ResponseOpcode};
use stele_cql::frame::server_event_type::EventType;
use stele_cql::frame::{self, FrameParams, SerializedRequest};

use crate::authentication::AuthenticatorProvider;
use crate::errors::{BrokenConnectionError, ConnectionError, DriverError};
use crate::prepared_cache::{PreparedCache, PreparedEntry};

/// The CQL version declared in STARTUP.
const CQL_VERSION: &str = "3.4.4";

const SUBMIT_CHANNEL_SIZE: usize = 1024;

// A stream id stays quarantined after its waiter gave up (timeout or
// drop) until the late response arrives. If too many quarantined ids
// grow old, the connection is broken and reopened instead of slowly
// suffocating.
const OLD_AGE_ORPHAN_THRESHOLD: Duration = Duration::from_secs(60);
const OLD_ORPHAN_COUNT_THRESHOLD: usize = 1024;

pub(crate) type ErrorReceiver = oneshot::Receiver<ConnectionError>;

/// Callback invoked once a connection finishes its handshake.
pub type AfterConnectHook = Arc<dyn Fn() + Send + Sync>;

/// Configuration for a single connection, shared between data and
/// control connections.
#[derive(Clone, Default)]
pub(crate) struct ConnectionConfig {
    pub(crate) compressor: Option<Arc<dyn Compressor>>,
    pub(crate) connect_timeout: Duration,
    /// When set, the connection issues an OPTIONS request every such
    /// interval to keep the socket warm and detect dead peers.
    pub(crate) idle_interval: Option<Duration>,
    pub(crate) authenticator: Option<Arc<dyn AuthenticatorProvider>>,
    /// Set only on control connections.
    pub(crate) event_sender: Option<mpsc::Sender<Event>>,
    pub(crate) after_connect: Option<AfterConnectHook>,
}

pub(crate) struct Connection {
    _worker_handle: RemoteHandle<()>,

    connect_address: SocketAddr,
    config: ConnectionConfig,
    /// True when STARTUP negotiated the configured compressor with the
    /// server. OPTIONS and STARTUP are always sent uncompressed.
    compression_enabled: bool,
    router_handle: Arc<RouterHandle>,
    is_broken: Arc<AtomicBool>,
}

type RequestId = u64;

struct RouterHandle {
    submit_channel: mpsc::Sender<Task>,

    // Every request gets a process-unique id, used to match orphan
    // notifications to stream ids.
    request_id_generator: AtomicU64,
    // Unbounded so that it can be pushed to synchronously from Drop.
    orphan_notification_sender: mpsc::UnboundedSender<RequestId>,
}

impl RouterHandle {
    fn allocate_request_id(&self) -> RequestId {
        self.request_id_generator.fetch_add(1, Ordering::Relaxed)
    }

    async fn send_request(
        &self,
        request: &impl SerializableRequest,
        compressor: Option<&dyn Compressor>,
    ) -> Result<TaskResponse, DriverError> {
        let serialized_request = SerializedRequest::make(request, compressor, false)?;
        let request_id = self.allocate_request_id();

        let (response_sender, receiver) = oneshot::channel();
        let response_handler = ResponseHandler {
            response_sender,
            request_id,
        };

        // Dropping the notifier before `disable()` tells the router to
        // quarantine the stream id this request occupies. This is what
        // happens when the caller's timeout fires.
        let notifier = OrphanhoodNotifier::new(request_id, &self.orphan_notification_sender);

        self.submit_channel
            .send(Task {
                serialized_request,
                response_handler,
            })
            .await
            .map_err(|_| BrokenConnectionError::Closed)?;

        let task_response = receiver
            .await
            .map_err(|_| BrokenConnectionError::Closed)??;

        notifier.disable();

        Ok(task_response)
    }
}

struct ResponseHandler {
    response_sender: oneshot::Sender<Result<TaskResponse, DriverError>>,
    request_id: RequestId,
}

// Notifies the router about a request waiter disappearing before its
// response came back.
struct OrphanhoodNotifier<'a> {
    enabled: bool,
    request_id: RequestId,
    notification_sender: &'a mpsc::UnboundedSender<RequestId>,
}

impl<'a> OrphanhoodNotifier<'a> {
    fn new(
        request_id: RequestId,
        notification_sender: &'a mpsc::UnboundedSender<RequestId>,
    ) -> Self {
        Self {
            enabled: true,
            request_id,
            notification_sender,
        }
    }

    fn disable(mut self) {
        self.enabled = false;
    }
}

impl Drop for OrphanhoodNotifier<'_> {
    fn drop(&mut self) {
        if self.enabled {
            let _ = self.notification_sender.send(self.request_id);
        }
    }
}

struct Task {
    serialized_request: SerializedRequest,
    response_handler: ResponseHandler,
}

struct TaskResponse {
    params: FrameParams,
    opcode: ResponseOpcode,
    body: Bytes,
}

enum NonErrorStartupResponse {
    Ready,
    Authenticate(stele_cql::frame::response::authenticate::Authenticate),
}

impl Connection {
    /// Opens a socket, spawns the router and walks the whole connection
    /// state machine: OPTIONS, compression negotiation, STARTUP and the
    /// authentication exchange. On success the connection is ready for
    /// requests.
    pub(crate) async fn open(
        connect_address: SocketAddr,
        config: ConnectionConfig,
    ) -> Result<(Self, ErrorReceiver), DriverError> {
        let (mut connection, error_receiver) = Self::new(connect_address, config).await?;
        connection.setup().await?;

        if let Some(hook) = connection.config.after_connect.clone() {
            hook();
        }

        Ok((connection, error_receiver))
    }

    async fn new(
        connect_address: SocketAddr,
        config: ConnectionConfig,
    ) -> Result<(Self, ErrorReceiver), DriverError> {
        let stream = match tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect(connect_address),
        )
        .await
        {
            Ok(stream) => stream.map_err(ConnectionError::from)?,
            Err(_) => return Err(ConnectionError::ConnectTimeout.into()),
        };
        stream.set_nodelay(true).map_err(ConnectionError::from)?;

        let (sender, receiver) = mpsc::channel(SUBMIT_CHANNEL_SIZE);
        let (error_sender, error_receiver) = oneshot::channel();
        let (orphan_notification_sender, orphan_notification_receiver) =
            mpsc::unbounded_channel();

        let router_handle = Arc::new(RouterHandle {
            submit_channel: sender,
            request_id_generator: AtomicU64::new(0),
            orphan_notification_sender,
        });

        let is_broken = Arc::new(AtomicBool::new(false));

        let (task, _worker_handle) = Self::router(
            config.clone(),
            stream,
            receiver,
            error_sender,
            orphan_notification_receiver,
            router_handle.clone(),
            is_broken.clone(),
        )
        .remote_handle();
        tokio::task::spawn(task);

        let connection = Connection {
            _worker_handle,
            connect_address,
            config,
            compression_enabled: false,
            router_handle,
            is_broken,
        };

        Ok((connection, error_receiver))
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.is_broken.load(Ordering::Relaxed)
    }

    /// OPTIONS, compression negotiation, STARTUP, authentication.
    async fn setup(&mut self) -> Result<(), DriverError> {
        let supported = self.get_options().await?;

        let negotiated = self.config.compressor.clone().filter(|compressor| {
            let offered = supported.compression_algorithms();
            let accepted = offered.iter().any(|alg| alg == compressor.algorithm());
            if !accepted {
                warn!(
                    algorithm = compressor.algorithm(),
                    "Server does not support the configured compression algorithm, \
                     proceeding uncompressed"
                );
            }
            accepted
        });

        let mut options: HashMap<Cow<'_, str>, Cow<'_, str>> = HashMap::new();
        options.insert(Cow::Borrowed("CQL_VERSION"), Cow::Borrowed(CQL_VERSION));
        if let Some(compressor) = &negotiated {
            options.insert(
                Cow::Borrowed("COMPRESSION"),
                Cow::Owned(compressor.algorithm().to_owned()),
            );
        }

        match self.startup(options).await? {
            NonErrorStartupResponse::Ready => {}
            NonErrorStartupResponse::Authenticate(authenticate) => {
                self.perform_authenticate(&authenticate.authenticator_name)
                    .await?;
            }
        }

        // From now on request bodies are compressed. Responses are
        // decompressed based on their header flag alone.
        self.compression_enabled = negotiated.is_some();

        debug!(
            address = %self.connect_address,
            compression = self.compression_enabled,
            "Connection is ready"
        );
        Ok(())
    }

    async fn get_options(&self) -> Result<stele_cql::frame::response::Supported, DriverError> {
        match self.send_request(&request::Options, false).await? {
            Response::Supported(supported) => Ok(supported),
            Response::Error(Error { error, reason }) => {
                Err(DriverError::Server { error, reason })
            }
            other => Err(DriverError::Protocol(format!(
                "Unexpected response to OPTIONS: {}",
                other.kind_name()
            ))),
        }
    }

    async fn startup(
        &self,
        options: HashMap<Cow<'_, str>, Cow<'_, str>>,
    ) -> Result<NonErrorStartupResponse, DriverError> {
        match self.send_request(&Startup { options }, false).await? {
            Response::Ready => Ok(NonErrorStartupResponse::Ready),
            Response::Authenticate(auth) => Ok(NonErrorStartupResponse::Authenticate(auth)),
            Response::Error(Error { error, reason }) => {
                Err(DriverError::Server { error, reason })
            }
            other => Err(DriverError::Protocol(format!(
                "Unexpected response to STARTUP: {}",
                other.kind_name()
            ))),
        }
    }

    async fn perform_authenticate(&self, authenticator_name: &str) -> Result<(), DriverError> {
        let provider = self.config.authenticator.as_ref().ok_or_else(|| {
            DriverError::Authentication(format!(
                "Server requires authentication with {} but no authenticator was configured",
                authenticator_name
            ))
        })?;

        let (mut response, mut auth_session) = provider
            .start_authentication_session(authenticator_name)
            .await
            .map_err(DriverError::Authentication)?;

        loop {
            let auth_result = self
                .send_request(&request::AuthResponse { response }, false)
                .await?;
            match auth_result {
                Response::AuthChallenge(challenge) => {
                    response = auth_session
                        .evaluate_challenge(challenge.authenticate_message.as_deref())
                        .await
                        .map_err(DriverError::Authentication)?;
                }
                Response::AuthSuccess(success) => {
                    auth_session
                        .success(success.success_message.as_deref())
                        .await
                        .map_err(DriverError::Authentication)?;
                    return Ok(());
                }
                Response::Error(Error { reason, .. }) => {
                    return Err(DriverError::Authentication(reason));
                }
                other => {
                    return Err(DriverError::Protocol(format!(
                        "Unexpected response to AUTH_RESPONSE: {}",
                        other.kind_name()
                    )));
                }
            }
        }
    }

    /// Executes an unprepared statement.
    pub(crate) async fn query_raw(
        &self,
        contents: &str,
        parameters: QueryParameters<'_>,
    ) -> Result<result::Result, DriverError> {
        let query = request::Query {
            contents: Cow::Borrowed(contents),
            parameters,
        };
        self.send_queryish(&query).await
    }

    /// Prepares a statement and returns the server's description of it.
    pub(crate) async fn prepare_entry(&self, text: &str) -> Result<PreparedEntry, DriverError> {
        match self.send_queryish(&Prepare { query: text }).await? {
            result::Result::Prepared(prepared) => Ok(PreparedEntry {
                id: prepared.id,
                bind_metadata: prepared.prepared_metadata,
                result_metadata: prepared.result_metadata,
            }),
            _ => Err(DriverError::Protocol(
                "Unexpected result kind in response to PREPARE".to_owned(),
            )),
        }
    }

    /// Executes a prepared statement, transparently re-preparing it
    /// once if the server reports it `unprepared`. The replacement
    /// entry goes through the shared cache so other connections profit
    /// from it too.
    pub(crate) async fn execute_prepared(
        &self,
        cache: &PreparedCache,
        text: &str,
        entry: Arc<PreparedEntry>,
        build_parameters: impl Fn(&PreparedEntry) -> Result<QueryParameters<'static>, DriverError>,
    ) -> Result<result::Result, DriverError> {
        let execute = Execute {
            id: entry.id.clone(),
            parameters: build_parameters(&entry)?,
        };

        match self.send_queryish(&execute).await {
            Err(err) if err.is_unprepared() => {
                debug!(
                    statement = text,
                    "Server has forgotten the prepared statement, re-preparing"
                );
                let new_entry = Arc::new(self.prepare_entry(text).await?);
                cache.replace(text, new_entry.clone());

                let execute = Execute {
                    id: new_entry.id.clone(),
                    parameters: build_parameters(&new_entry)?,
                };
                // A second `unprepared` surfaces to the caller.
                self.send_queryish(&execute).await
            }
            other => other,
        }
    }

    pub(crate) async fn batch(
        &self,
        batch: &request::Batch<'_>,
    ) -> Result<result::Result, DriverError> {
        self.send_queryish(batch).await
    }

    /// Subscribes the connection to server-pushed events. Used by
    /// control connections only.
    pub(crate) async fn register(
        &self,
        event_types_to_register_for: Vec<EventType>,
    ) -> Result<(), DriverError> {
        let register = Register {
            event_types_to_register_for,
        };
        match self.send_request(&register, self.compression_enabled).await? {
            Response::Ready => Ok(()),
            Response::Error(Error { error, reason }) => {
                Err(DriverError::Server { error, reason })
            }
            other => Err(DriverError::Protocol(format!(
                "Unexpected response to REGISTER: {}",
                other.kind_name()
            ))),
        }
    }

    async fn send_queryish(
        &self,
        request: &impl SerializableRequest,
    ) -> Result<result::Result, DriverError> {
        match self.send_request(request, self.compression_enabled).await? {
            Response::Result(result) => Ok(result),
            Response::Error(Error { error, reason }) => {
                Err(DriverError::Server { error, reason })
            }
            other => Err(DriverError::Protocol(format!(
                "Unexpected response to request: {}",
                other.kind_name()
            ))),
        }
    }

    async fn send_request(
        &self,
        request: &impl SerializableRequest,
        compress: bool,
    ) -> Result<Response, DriverError> {
        let compressor = if compress {
            self.config.compressor.as_deref()
        } else {
            None
        };

        let task_response = self.router_handle.send_request(request, compressor).await?;
        Self::parse_response(task_response, self.config.compressor.as_deref())
    }

    fn parse_response(
        task_response: TaskResponse,
        compressor: Option<&dyn Compressor>,
    ) -> Result<Response, DriverError> {
        let body_with_ext = frame::parse_response_body_extensions(
            task_response.params.flags,
            compressor,
            task_response.body,
        )?;

        for warn_description in &body_with_ext.warnings {
            warn!(
                warning = warn_description.as_str(),
                "Response from the database contains a warning",
            );
        }

        let response =
            Response::deserialize(task_response.opcode, &mut &*body_with_ext.body)?;
        Ok(response)
    }

    async fn router(
        config: ConnectionConfig,
        stream: TcpStream,
        receiver: mpsc::Receiver<Task>,
        error_sender: oneshot::Sender<ConnectionError>,
        orphan_notification_receiver: mpsc::UnboundedReceiver<RequestId>,
        router_handle: Arc<RouterHandle>,
        is_broken: Arc<AtomicBool>,
    ) {
        let (read_half, write_half) = split(stream);

        // The handler map is shared between the reader and writer
        // halves, which run interleaved on the same task and never hold
        // the lock across an await point, so the mutex is uncontended.
        let handler_map = StdMutex::new(ResponseHandlerMap::new());
        let stream_freed = Notify::new();

        let r = Self::reader(
            BufReader::with_capacity(8192, read_half),
            &handler_map,
            &stream_freed,
            config.event_sender.clone(),
            config.compressor.clone(),
        );
        let w = Self::writer(
            BufWriter::with_capacity(8192, write_half),
            &handler_map,
            &stream_freed,
            receiver,
        );
        let o = Self::orphaner(&handler_map, orphan_notification_receiver);
        let k = Self::keepaliver(router_handle, config.idle_interval);

        let result = futures::try_join!(r, w, o, k);

        let error: BrokenConnectionError = match result {
            Ok(_) => return, // Connection was dropped, nothing to clean up.
            Err(err) => err,
        };

        is_broken.store(true, Ordering::Relaxed);

        // Fail all pending requests with the error.
        let response_handlers: HashMap<i16, ResponseHandler> =
            handler_map.into_inner().unwrap().into_handlers();
        for (_, handler) in response_handlers {
            let _ = handler
                .response_sender
                .send(Err(error.clone().into()));
        }

        let _ = error_sender.send(ConnectionError::Broken(error));
    }

    async fn reader(
        mut read_half: impl AsyncRead + Unpin,
        handler_map: &StdMutex<ResponseHandlerMap>,
        stream_freed: &Notify,
        event_sender: Option<mpsc::Sender<Event>>,
        compressor: Option<Arc<dyn Compressor>>,
    ) -> Result<(), BrokenConnectionError> {
        loop {
            let (params, opcode, body) = frame::read_response_frame(&mut read_half)
                .await
                .map_err(|err| BrokenConnectionError::FrameError(Arc::new(err)))?;
            let response = TaskResponse {
                params,
                opcode,
                body,
            };

            match params.stream.cmp(&-1) {
                CmpOrdering::Less => {
                    // Negative stream ids other than -1 are reserved;
                    // nothing uses them today.
                    continue;
                }
                CmpOrdering::Equal => {
                    if let Some(event_sender) = event_sender.as_ref() {
                        Self::handle_event(response, compressor.as_deref(), event_sender)
                            .await?;
                    }
                    continue;
                }
                CmpOrdering::Greater => {}
            }

            let handler_lookup_res = {
                // Never locked across an await, try_lock cannot fail.
                let mut handler_map_guard = handler_map.try_lock().unwrap();
                handler_map_guard.lookup(params.stream)
            };
            // The stream id just went back to the free set; wake the
            // writer in case it was starved of ids.
            stream_freed.notify_one();

            use HandlerLookupResult::*;
            match handler_lookup_res {
                Handler(handler) => {
                    // Failure means the receiving side gave up; the
                    // orphan notification already took care of it.
                    let _ = handler.response_sender.send(Ok(response));
                }
                Missing => {
                    // An unsolicited frame means either a driver or a
                    // server bug; the connection cannot be trusted.
                    debug!(
                        stream = params.stream,
                        "Received response with unexpected stream id"
                    );
                    return Err(BrokenConnectionError::UnexpectedStreamId(params.stream));
                }
                Orphaned => {
                    // A late response to an abandoned request; the id
                    // was just freed and can be reused now.
                }
            }
        }
    }

    async fn writer(
        mut write_half: impl AsyncWrite + Unpin,
        handler_map: &StdMutex<ResponseHandlerMap>,
        stream_freed: &Notify,
        mut task_receiver: mpsc::Receiver<Task>,
    ) -> Result<(), BrokenConnectionError> {
        // When the Connection object is dropped, the sender half of the
        // channel is dropped and this loop (and the router) finish.
        while let Some(task) = task_receiver.recv().await {
            let mut handler = task.response_handler;
            let mut req = task.serialized_request;

            // With all 32768 stream ids in flight nothing could be
            // written anyway, so parking the writer until a response
            // frees an id is the correct form of backpressure.
            let stream_id = loop {
                let alloc_result = {
                    let mut handler_map_guard = handler_map.try_lock().unwrap();
                    handler_map_guard.allocate(handler)
                };
                match alloc_result {
                    Ok(stream_id) => break stream_id,
                    Err(returned_handler) => {
                        handler = returned_handler;
                        stream_freed.notified().await;
                    }
                }
            };

            req.set_stream(stream_id);
            trace!(stream = stream_id, "Sending request");
            write_half
                .write_all(req.get_data())
                .await
                .map_err(|err| BrokenConnectionError::WriteError(Arc::new(err)))?;
            write_half
                .flush()
                .await
                .map_err(|err| BrokenConnectionError::WriteError(Arc::new(err)))?;
        }

        Ok(())
    }

    // Receives notifications about abandoned requests and quarantines
    // their stream ids. Breaks the connection when too many quarantined
    // ids have grown old, which indicates the peer stopped responding.
    async fn orphaner(
        handler_map: &StdMutex<ResponseHandlerMap>,
        mut orphan_receiver: mpsc::UnboundedReceiver<RequestId>,
    ) -> Result<(), BrokenConnectionError> {
        let mut interval = tokio::time::interval(OLD_AGE_ORPHAN_THRESHOLD);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let handler_map_guard = handler_map.try_lock().unwrap();
                    let old_orphan_count = handler_map_guard.old_orphans_count();
                    if old_orphan_count > OLD_ORPHAN_COUNT_THRESHOLD {
                        warn!(
                            count = old_orphan_count,
                            "Too many old orphaned stream ids, breaking the connection"
                        );
                        return Err(BrokenConnectionError::TooManyOrphanedStreamIds(
                            old_orphan_count,
                        ));
                    }
                }
                Some(request_id) = orphan_receiver.recv() => {
                    trace!(
                        request_id,
                        "Orphaning the stream id of an abandoned request"
                    );
                    let mut handler_map_guard = handler_map.try_lock().unwrap();
                    handler_map_guard.orphan(request_id);
                }
                else => break,
            }
        }

        Ok(())
    }

    async fn keepaliver(
        router_handle: Arc<RouterHandle>,
        idle_interval: Option<Duration>,
    ) -> Result<(), BrokenConnectionError> {
        let Some(idle_interval) = idle_interval else {
            return Ok(());
        };

        let mut interval = tokio::time::interval(idle_interval);
        interval.tick().await; // Use up the first, instant tick.
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if let Err(err) = router_handle.send_request(&request::Options, None).await {
                warn!(error = %err, "Keepalive request failed");
                return Err(BrokenConnectionError::KeepaliveError(Arc::new(err)));
            }
            trace!("Keepalive request successful");
        }
    }

    async fn handle_event(
        task_response: TaskResponse,
        compressor: Option<&dyn Compressor>,
        event_sender: &mpsc::Sender<Event>,
    ) -> Result<(), BrokenConnectionError> {
        let event = match Self::parse_response(task_response, compressor) {
            Ok(Response::Event(event)) => event,
            Ok(other) => {
                warn!(
                    kind = other.kind_name(),
                    "Expected an EVENT on stream -1, ignoring"
                );
                return Ok(());
            }
            Err(err) => {
                error!(error = %err, "Failed to parse an event");
                return Err(BrokenConnectionError::EventError(Arc::new(err)));
            }
        };

        if event_sender.send(event).await.is_err() {
            warn!("Event receiver is closed, dropping the event");
        }
        Ok(())
    }
}

struct OrphanageTracker {
    orphans: HashMap<i16, Instant>,
    by_orphaning_times: BTreeSet<(Instant, i16)>,
}

impl OrphanageTracker {
    fn new() -> Self {
        Self {
            orphans: HashMap::new(),
            by_orphaning_times: BTreeSet::new(),
        }
    }

    fn insert(&mut self, stream_id: i16) {
        let now = Instant::now();
        self.orphans.insert(stream_id, now);
        self.by_orphaning_times.insert((now, stream_id));
    }

    fn remove(&mut self, stream_id: i16) {
        if let Some(time) = self.orphans.remove(&stream_id) {
            self.by_orphaning_times.remove(&(time, stream_id));
        }
    }

    fn contains(&self, stream_id: i16) -> bool {
        self.orphans.contains_key(&stream_id)
    }

    fn orphans_older_than(&self, age: Duration) -> usize {
        let minimal_age = Instant::now() - age;
        // Linear in the number of old orphans only; a healthy
        // connection counts zero elements here.
        self.by_orphaning_times
            .range(..(minimal_age, i16::MAX))
            .count()
    }
}

struct ResponseHandlerMap {
    stream_set: StreamIdSet,
    handlers: HashMap<i16, ResponseHandler>,

    request_to_stream: HashMap<RequestId, i16>,
    orphanage_tracker: OrphanageTracker,
}

enum HandlerLookupResult {
    Orphaned,
    Handler(ResponseHandler),
    Missing,
}

impl ResponseHandlerMap {
    fn new() -> Self {
        Self {
            stream_set: StreamIdSet::new(),
            handlers: HashMap::new(),
            request_to_stream: HashMap::new(),
            orphanage_tracker: OrphanageTracker::new(),
        }
    }

    fn allocate(&mut self, response_handler: ResponseHandler) -> Result<i16, ResponseHandler> {
        if let Some(stream_id) = self.stream_set.allocate() {
            self.request_to_stream
                .insert(response_handler.request_id, stream_id);
            let prev_handler = self.handlers.insert(stream_id, response_handler);
            assert!(prev_handler.is_none());
            Ok(stream_id)
        } else {
            Err(response_handler)
        }
    }

    // Quarantines the stream id associated with this request and frees
    // its handler. The id itself stays allocated until the late
    // response arrives, because reusing it earlier would alias to the
    // stale request.
    fn orphan(&mut self, request_id: RequestId) {
        if let Some(stream_id) = self.request_to_stream.remove(&request_id) {
            debug!(stream = stream_id, request_id, "Orphaning stream id");
            self.orphanage_tracker.insert(stream_id);
            self.handlers.remove(&stream_id);
        }
    }

    fn old_orphans_count(&self) -> usize {
        self.orphanage_tracker
            .orphans_older_than(OLD_AGE_ORPHAN_THRESHOLD)
    }

    fn lookup(&mut self, stream_id: i16) -> HandlerLookupResult {
        self.stream_set.free(stream_id);

        if self.orphanage_tracker.contains(stream_id) {
            self.orphanage_tracker.remove(stream_id);
            // The handler was already removed when the id was
            // quarantined; this is a valid state, unlike Missing.
            return HandlerLookupResult::Orphaned;
        }

        if let Some(handler) = self.handlers.remove(&stream_id) {
            // Remove the request mapping so that a late orphan
            // notification cannot quarantine a recycled id.
            self.request_to_stream.remove(&handler.request_id);
            HandlerLookupResult::Handler(handler)
        } else {
            HandlerLookupResult::Missing
        }
    }

    // Used when the connection breaks and every pending request has to
    // be answered with an error.
    fn into_handlers(self) -> HashMap<i16, ResponseHandler> {
        self.handlers
    }
}

/// The free set of stream ids [0, 32767], kept as a bitmap.
struct StreamIdSet {
    used_bitmap: Box<[u64]>,
}

impl StreamIdSet {
    fn new() -> Self {
        const BITMAP_SIZE: usize = (i16::MAX as usize + 1) / 64;
        Self {
            used_bitmap: vec![0; BITMAP_SIZE].into_boxed_slice(),
        }
    }

    fn allocate(&mut self) -> Option<i16> {
        for (block_id, block) in self.used_bitmap.iter_mut().enumerate() {
            if *block != !0 {
                let off = block.trailing_ones();
                *block |= 1u64 << off;
                let stream_id = off as i16 + block_id as i16 * 64;
                return Some(stream_id);
            }
        }
        None
    }

    fn free(&mut self, stream_id: i16) {
        let block_id = stream_id as usize / 64;
        let off = stream_id as usize % 64;
        self.used_bitmap[block_id] &= !(1 << off);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_ids_are_unique_and_bounded() {
        let mut set = StreamIdSet::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1024 {
            let id = set.allocate().unwrap();
            assert!((0..=i16::MAX).contains(&id));
            assert!(seen.insert(id), "duplicate stream id {}", id);
        }
    }

    #[test]
    fn freed_stream_id_is_reused() {
        let mut set = StreamIdSet::new();
        let a = set.allocate().unwrap();
        set.free(a);
        let b = set.allocate().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn whole_id_space_is_allocatable() {
        let mut set = StreamIdSet::new();
        for expected in 0..=i16::MAX {
            assert_eq!(set.allocate(), Some(expected));
        }
        assert_eq!(set.allocate(), None);
        set.free(1234);
        assert_eq!(set.allocate(), Some(1234));
    }

    fn dummy_handler(request_id: RequestId) -> (ResponseHandler, oneshot::Receiver<Result<TaskResponse, DriverError>>) {
        let (response_sender, receiver) = oneshot::channel();
        (
            ResponseHandler {
                response_sender,
                request_id,
            },
            receiver,
        )
    }

    #[test]
    fn orphaned_stream_id_is_not_reported_missing() {
        let mut map = ResponseHandlerMap::new();
        let (handler, _rx) = dummy_handler(1);
        let stream_id = map.allocate(handler).ok().unwrap();

        map.orphan(1);
        // Late response arrives for the quarantined id.
        assert!(matches!(
            map.lookup(stream_id),
            HandlerLookupResult::Orphaned
        ));
        // A second response for the same id would be a real bug.
        assert!(matches!(map.lookup(stream_id), HandlerLookupResult::Missing));
    }

    #[test]
    fn orphaned_id_is_not_reallocated_until_response_arrives() {
        let mut map = ResponseHandlerMap::new();
        let (handler, _rx) = dummy_handler(7);
        let stream_id = map.allocate(handler).ok().unwrap();
        map.orphan(7);

        // All further allocations must skip the quarantined id.
        let (other, _rx2) = dummy_handler(8);
        let next = map.allocate(other).ok().unwrap();
        assert_ne!(next, stream_id);

        // Once the late response shows up the id becomes free again.
        map.lookup(stream_id);
        map.lookup(next);
        let (third, _rx3) = dummy_handler(9);
        assert_eq!(map.allocate(third).ok().unwrap(), stream_id.min(next));
    }

    #[test]
    fn completed_request_cannot_be_orphaned_late() {
        let mut map = ResponseHandlerMap::new();
        let (handler, _rx) = dummy_handler(42);
        let stream_id = map.allocate(handler).ok().unwrap();

        assert!(matches!(
            map.lookup(stream_id),
            HandlerLookupResult::Handler(_)
        ));
        // The orphan notification raced with the response and lost;
        // it must not quarantine the recycled id.
        map.orphan(42);
        let (handler2, _rx2) = dummy_handler(43);
        assert_eq!(map.allocate(handler2).ok().unwrap(), stream_id);
        assert!(matches!(
            map.lookup(stream_id),
            HandlerLookupResult::Handler(_)
        ));
    }
}
