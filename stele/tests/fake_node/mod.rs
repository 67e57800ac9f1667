//! A minimal in-process CQL v4 server, good enough to exercise the
//! driver end to end: handshake, queries, prepared statements, batches,
//! paging, compression and server-pushed events.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

use stele_cql::frame::compression::Compressor;
use stele_cql::frame::types;
use stele_cql::SnappyCompressor;

pub const PREPARED_ID: &[u8] = b"fake-prepared-id";
pub const PAGE_TWO_STATE: &[u8] = b"page-two";

#[derive(Default)]
pub struct NodeStats {
    pub connections: AtomicUsize,
    pub queries: AtomicUsize,
    pub prepares: AtomicUsize,
    pub executes: AtomicUsize,
    pub batches: AtomicUsize,
    pub compressed_requests: AtomicUsize,
    /// Statement kind bytes of the last BATCH body.
    pub batch_kinds: Mutex<Vec<u8>>,
    /// Text of the last PREPAREd statement, used to shape EXECUTE
    /// responses.
    pub prepared_text: Mutex<String>,
}

pub struct FakeNode {
    pub addr: SocketAddr,
    pub stats: Arc<NodeStats>,
    /// How many EXECUTEs to answer with an `unprepared` error.
    pub unprepared_budget: Arc<AtomicUsize>,
    /// Milliseconds to delay the next QUERY response by.
    pub delay_next_query_ms: Arc<AtomicUsize>,
    event_tx: broadcast::Sender<Vec<u8>>,
    tasks: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

struct NodeCtx {
    stats: Arc<NodeStats>,
    unprepared_budget: Arc<AtomicUsize>,
    delay_next_query_ms: Arc<AtomicUsize>,
    event_tx: broadcast::Sender<Vec<u8>>,
}

impl FakeNode {
    pub async fn start() -> FakeNode {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::run(listener)
    }

    /// Rebinds a stopped node on its old address, for failover tests.
    pub async fn start_on(addr: SocketAddr) -> FakeNode {
        let listener = TcpListener::bind(addr).await.unwrap();
        Self::run(listener)
    }

    fn run(listener: TcpListener) -> FakeNode {
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(NodeStats::default());
        let unprepared_budget = Arc::new(AtomicUsize::new(0));
        let delay_next_query_ms = Arc::new(AtomicUsize::new(0));
        let (event_tx, _) = broadcast::channel(16);
        let tasks: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>> =
            Arc::new(Mutex::new(Vec::new()));

        let ctx = Arc::new(NodeCtx {
            stats: stats.clone(),
            unprepared_budget: unprepared_budget.clone(),
            delay_next_query_ms: delay_next_query_ms.clone(),
            event_tx: event_tx.clone(),
        });

        let accept_tasks = tasks.clone();
        let accept_handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                ctx.stats.connections.fetch_add(1, Ordering::SeqCst);
                let ctx = ctx.clone();
                let handle = tokio::spawn(serve_conn(stream, ctx));
                accept_tasks.lock().unwrap().push(handle);
            }
        });
        tasks.lock().unwrap().push(accept_handle);

        FakeNode {
            addr,
            stats,
            unprepared_budget,
            delay_next_query_ms,
            event_tx,
            tasks,
        }
    }

    /// Kills the listener and every open connection.
    pub fn stop(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    /// Pushes an EVENT frame to every connection that REGISTERed.
    pub fn push_event(&self, body: Vec<u8>) {
        let _ = self.event_tx.send(body);
    }
}

impl Drop for FakeNode {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve_conn(stream: TcpStream, ctx: Arc<NodeCtx>) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let registered = Arc::new(AtomicBool::new(false));
    let mut event_rx = ctx.event_tx.subscribe();
    let event_out = out_tx.clone();
    let event_registered = registered.clone();
    let forwarder = tokio::spawn(async move {
        while let Ok(body) = event_rx.recv().await {
            if event_registered.load(Ordering::Relaxed) {
                let _ = event_out.send(response_frame(-1, 0x0C, body));
            }
        }
    });

    loop {
        let mut header = [0u8; 9];
        if read_half.read_exact(&mut header).await.is_err() {
            break;
        }
        let flags = header[1];
        let stream_id = i16::from_be_bytes([header[2], header[3]]);
        let opcode = header[4];
        let len = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;
        let mut body = vec![0u8; len];
        if read_half.read_exact(&mut body).await.is_err() {
            break;
        }

        if flags & 0x01 != 0 {
            ctx.stats.compressed_requests.fetch_add(1, Ordering::SeqCst);
            body = SnappyCompressor.decompress(&body).unwrap();
        }

        let (resp_opcode, resp_body) = match opcode {
            // OPTIONS
            0x05 => (0x06, supported_body()),
            // STARTUP
            0x01 => (0x02, Vec::new()),
            // REGISTER
            0x0B => {
                registered.store(true, Ordering::Relaxed);
                (0x02, Vec::new())
            }
            // QUERY
            0x07 => {
                ctx.stats.queries.fetch_add(1, Ordering::SeqCst);
                let mut buf = &body[..];
                let text = types::read_long_string(&mut buf).unwrap().to_owned();
                let params = parse_parameters(&mut buf);
                let delay = ctx.delay_next_query_ms.swap(0, Ordering::SeqCst);
                if delay > 0 {
                    let out = out_tx.clone();
                    let frame =
                        response_frame(stream_id, 0x08, query_result_body(&text, &params));
                    tokio::spawn(async move {
                        tokio::time::sleep(std::time::Duration::from_millis(delay as u64))
                            .await;
                        let _ = out.send(frame);
                    });
                    continue;
                }
                (0x08, query_result_body(&text, &params))
            }
            // PREPARE
            0x09 => {
                ctx.stats.prepares.fetch_add(1, Ordering::SeqCst);
                let mut buf = &body[..];
                let text = types::read_long_string(&mut buf).unwrap();
                let bind_cols = text.matches('?').count();
                *ctx.stats.prepared_text.lock().unwrap() = text.to_owned();
                (0x08, prepared_body(bind_cols))
            }
            // EXECUTE
            0x0A => {
                ctx.stats.executes.fetch_add(1, Ordering::SeqCst);
                if ctx
                    .unprepared_budget
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |budget| {
                        budget.checked_sub(1)
                    })
                    .is_ok()
                {
                    (0x00, unprepared_error_body())
                } else {
                    let mut buf = &body[..];
                    let _id = types::read_short_bytes(&mut buf).unwrap();
                    let params = parse_parameters(&mut buf);
                    let text = ctx.stats.prepared_text.lock().unwrap().clone();
                    (0x08, query_result_body(&text, &params))
                }
            }
            // BATCH
            0x0D => {
                ctx.stats.batches.fetch_add(1, Ordering::SeqCst);
                *ctx.stats.batch_kinds.lock().unwrap() = parse_batch_kinds(&body);
                (0x08, void_body())
            }
            other => panic!("fake node got unexpected opcode {:#04x}", other),
        };

        if out_tx
            .send(response_frame(stream_id, resp_opcode, resp_body))
            .is_err()
        {
            break;
        }
    }

    writer.abort();
    forwarder.abort();
}

struct ParsedParameters {
    paging_state: Option<Vec<u8>>,
    page_size: Option<i32>,
}

fn parse_parameters(buf: &mut &[u8]) -> ParsedParameters {
    let _consistency = types::read_short(buf).unwrap();
    let flags = buf[0];
    *buf = &buf[1..];

    if flags & 0x01 != 0 {
        let n = types::read_short(buf).unwrap();
        for _ in 0..n {
            let _ = types::read_bytes_opt(buf).unwrap();
        }
    }
    let page_size = (flags & 0x04 != 0).then(|| types::read_int(buf).unwrap());
    let paging_state =
        (flags & 0x08 != 0).then(|| types::read_bytes(buf).unwrap().to_owned());

    ParsedParameters {
        paging_state,
        page_size,
    }
}

fn parse_batch_kinds(body: &[u8]) -> Vec<u8> {
    let mut buf = body;
    let _batch_type = buf[0];
    buf = &buf[1..];
    let count = types::read_short(&mut buf).unwrap();
    let mut kinds = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let kind = buf[0];
        buf = &buf[1..];
        kinds.push(kind);
        match kind {
            0 => {
                let _ = types::read_long_string(&mut buf).unwrap();
            }
            1 => {
                let _ = types::read_short_bytes(&mut buf).unwrap();
            }
            other => panic!("bad batch statement kind {}", other),
        }
        let n = types::read_short(&mut buf).unwrap();
        for _ in 0..n {
            let _ = types::read_bytes_opt(&mut buf).unwrap();
        }
    }
    kinds
}

fn response_frame(stream: i16, opcode: u8, body: Vec<u8>) -> Vec<u8> {
    let mut frame = Vec::with_capacity(9 + body.len());
    frame.push(0x84);
    frame.push(0x00);
    frame.extend_from_slice(&stream.to_be_bytes());
    frame.push(opcode);
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    frame
}

fn supported_body() -> Vec<u8> {
    let mut options = std::collections::HashMap::new();
    options.insert(
        "COMPRESSION".to_owned(),
        vec!["snappy".to_owned(), "lz4".to_owned()],
    );
    options.insert("CQL_VERSION".to_owned(), vec!["3.4.4".to_owned()]);
    let mut body = Vec::new();
    types::write_string_multimap(&options, &mut body).unwrap();
    body
}

fn void_body() -> Vec<u8> {
    let mut body = Vec::new();
    types::write_int(1, &mut body);
    body
}

/// Decides what a SELECT returns. Statements mentioning `big` are
/// served in two pages keyed off the paging state; everything else gets
/// the single Homer row. Non-SELECTs return void.
fn query_result_body(text: &str, params: &ParsedParameters) -> Vec<u8> {
    if !text.trim_start().to_ascii_uppercase().starts_with("SELECT") {
        return void_body();
    }

    if text.contains("big") && params.page_size.is_some() {
        return match params.paging_state.as_deref() {
            None => rows_body(&[(1, "Homer")], Some(PAGE_TWO_STATE)),
            Some(state) => {
                assert_eq!(state, PAGE_TWO_STATE);
                rows_body(&[(2, "Marge")], None)
            }
        };
    }

    rows_body(&[(1, "Homer")], None)
}

fn rows_body(rows: &[(i32, &str)], paging_state: Option<&[u8]>) -> Vec<u8> {
    let mut body = Vec::new();
    types::write_int(2, &mut body); // kind: rows

    let mut flags = 0x0001; // global table spec
    if paging_state.is_some() {
        flags |= 0x0002; // has more pages
    }
    types::write_int(flags, &mut body);
    types::write_int(2, &mut body); // column count
    if let Some(state) = paging_state {
        types::write_bytes(state, &mut body).unwrap();
    }
    types::write_string("ks", &mut body).unwrap();
    types::write_string("users", &mut body).unwrap();
    types::write_string("code", &mut body).unwrap();
    types::write_short(0x0009, &mut body); // int
    types::write_string("name", &mut body).unwrap();
    types::write_short(0x000D, &mut body); // text

    types::write_int(rows.len() as i32, &mut body);
    for (code, name) in rows {
        types::write_bytes(&code.to_be_bytes(), &mut body).unwrap();
        types::write_bytes(name.as_bytes(), &mut body).unwrap();
    }
    body
}

fn prepared_body(bind_cols: usize) -> Vec<u8> {
    let mut body = Vec::new();
    types::write_int(4, &mut body); // kind: prepared
    types::write_short_bytes(PREPARED_ID, &mut body).unwrap();

    // Bind metadata: global table spec, all parameters typed int.
    types::write_int(1, &mut body);
    types::write_int(bind_cols as i32, &mut body);
    types::write_int(0, &mut body); // pk count
    types::write_string("ks", &mut body).unwrap();
    types::write_string("users", &mut body).unwrap();
    for i in 0..bind_cols {
        types::write_string(&format!("p{}", i), &mut body).unwrap();
        types::write_short(0x0009, &mut body);
    }

    // Result metadata: the (code, name) columns.
    types::write_int(1, &mut body);
    types::write_int(2, &mut body);
    types::write_string("ks", &mut body).unwrap();
    types::write_string("users", &mut body).unwrap();
    types::write_string("code", &mut body).unwrap();
    types::write_short(0x0009, &mut body);
    types::write_string("name", &mut body).unwrap();
    types::write_short(0x000D, &mut body);

    body
}

fn unprepared_error_body() -> Vec<u8> {
    let mut body = Vec::new();
    types::write_int(0x2500, &mut body);
    types::write_string("Prepared query not found", &mut body).unwrap();
    types::write_short_bytes(PREPARED_ID, &mut body).unwrap();
    body
}

pub fn status_up_event_body(addr: SocketAddr) -> Vec<u8> {
    let mut body = Vec::new();
    types::write_string("STATUS_CHANGE", &mut body).unwrap();
    types::write_string("UP", &mut body).unwrap();
    types::write_inet(addr, &mut body);
    body
}

pub fn schema_change_event_body(keyspace: &str, table: &str) -> Vec<u8> {
    let mut body = Vec::new();
    types::write_string("SCHEMA_CHANGE", &mut body).unwrap();
    types::write_string("UPDATED", &mut body).unwrap();
    types::write_string("TABLE", &mut body).unwrap();
    types::write_string(keyspace, &mut body).unwrap();
    types::write_string(table, &mut body).unwrap();
    body
}
