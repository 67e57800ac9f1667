//! The per-node event connection.
//!
//! Each configured node gets a long-lived control connection that is
//! never used for queries. It performs the regular handshake, REGISTERs
//! for events, reports its node as reachable, and from then on forwards
//! server events to the cluster worker. When it breaks it reconnects
//! with backoff; the cluster learns about recovered nodes either from
//! another node's STATUS_CHANGE event or from this reconnect.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use stele_cql::frame::response::event::Event;
use stele_cql::frame::server_event_type::EventType;

use crate::network::{Connection, ConnectionConfig};

const RECONNECT_INTERVAL_INITIAL: Duration = Duration::from_secs(1);
const RECONNECT_INTERVAL_MAX: Duration = Duration::from_secs(16);

/// What a control connection tells the cluster worker.
#[derive(Debug)]
pub(crate) enum ControlSignal {
    /// The handshake and REGISTER succeeded; the node is reachable and
    /// its data pool can be started.
    Activated(SocketAddr),
    /// The control connection broke; the node is unreachable from here.
    Broken(SocketAddr),
    /// A server-pushed event, forwarded verbatim.
    Event(Event),
}

pub(crate) async fn run_control_connection(
    address: SocketAddr,
    base_config: ConnectionConfig,
    signal_sender: mpsc::Sender<ControlSignal>,
) {
    let mut reconnect_interval = RECONNECT_INTERVAL_INITIAL;

    loop {
        let (event_tx, mut event_rx) = mpsc::channel(32);
        let mut config = base_config.clone();
        config.event_sender = Some(event_tx);

        match Connection::open(address, config).await {
            Ok((connection, mut error_receiver)) => {
                let registered = connection
                    .register(vec![
                        EventType::StatusChange,
                        EventType::TopologyChange,
                        EventType::SchemaChange,
                    ])
                    .await;

                match registered {
                    Ok(()) => {
                        debug!(address = %address, "Control connection is registered");
                        reconnect_interval = RECONNECT_INTERVAL_INITIAL;
                        if signal_sender
                            .send(ControlSignal::Activated(address))
                            .await
                            .is_err()
                        {
                            // The cluster is gone; so are we.
                            return;
                        }

                        loop {
                            tokio::select! {
                                maybe_event = event_rx.recv() => match maybe_event {
                                    Some(event) => {
                                        if signal_sender
                                            .send(ControlSignal::Event(event))
                                            .await
                                            .is_err()
                                        {
                                            return;
                                        }
                                    }
                                    None => break,
                                },
                                _ = &mut error_receiver => break,
                            }
                        }
                        warn!(address = %address, "Control connection broke");
                    }
                    Err(err) => {
                        warn!(
                            address = %address,
                            error = %err,
                            "Control connection failed to register for events"
                        );
                    }
                }
            }
            Err(err) => {
                debug!(
                    address = %address,
                    error = %err,
                    "Failed to open control connection"
                );
            }
        }

        if signal_sender
            .send(ControlSignal::Broken(address))
            .await
            .is_err()
        {
            return;
        }

        tokio::time::sleep(reconnect_interval).await;
        reconnect_interval = (reconnect_interval * 2).min(RECONNECT_INTERVAL_MAX);
    }
}
