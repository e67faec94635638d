//! # Client connection
//!
//! Each websocket connection is served by two tasks:
//!
//! - the send task pushes published states from the connection's queue onto the socket and pings
//!   the client periodically,
//! - the receive task forwards text frames to the hub as commands and closes the connection if no
//!   frame (including pongs) arrives within the pong wait.
//!
//! When either side ends the connection is unregistered from the hub, which closes its queue.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt
};
use log::{debug, trace, warn};
use serde::{Serialize, Deserialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_tungstenite::{
    tungstenite::{self, protocol::WebSocketConfig, Message},
    WebSocketStream
};

use util::time::seconds_to_period_or;

use super::{ClientId, HubError, HubHandle};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Shortest wait or ping period a connection will use
const MIN_PERIOD: Duration = Duration::from_millis(1);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientParams {
    /// Number of states which can wait to be sent before the client is dropped
    pub send_queue_len: usize,

    /// Maximum time a single write may take
    pub write_wait_s: f64,

    /// Maximum time between received frames
    pub pong_wait_s: f64,

    /// Period between pings, must be less than the pong wait
    pub ping_period_s: f64,

    /// Maximum size of a received message in bytes
    pub max_message_size: usize,
}

/// Aborts the wrapped task when dropped, so a connection's send and receive tasks end with the
/// task serving it.
struct AbortOnDrop<T>(JoinHandle<T>);

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Active,
    Closing,
    Closed,
}

#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {
    #[error("Websocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("No frame received within {0:?}")]
    PongTimeout(Duration),

    #[error("Write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("The state hub has stopped")]
    HubClosed,

    #[error("Connection task failed: {0}")]
    Task(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for ClientParams {
    fn default() -> Self {
        Self {
            send_queue_len: 256,
            write_wait_s: 10.0,
            pong_wait_s: 60.0,
            ping_period_s: 54.0,
            max_message_size: 512,
        }
    }
}

impl ClientParams {
    pub fn write_wait(&self) -> Duration {
        seconds_to_period_or(self.write_wait_s, MIN_PERIOD)
    }

    pub fn pong_wait(&self) -> Duration {
        seconds_to_period_or(self.pong_wait_s, MIN_PERIOD)
    }

    pub fn ping_period(&self) -> Duration {
        seconds_to_period_or(self.ping_period_s, MIN_PERIOD)
    }

    /// Websocket configuration enforcing the maximum message size.
    pub fn ws_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: Some(self.max_message_size),
            max_frame_size: Some(self.max_message_size),
            ..Default::default()
        }
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl From<HubError> for ConnectionError {
    fn from(_: HubError) -> Self {
        ConnectionError::HubClosed
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Serve an upgraded websocket connection until it closes.
///
/// Errors are confined to this connection, the hub and other clients are unaffected.
pub async fn serve_connection<S>(
    ws: WebSocketStream<S>,
    peer: String,
    hub: HubHandle,
    params: ClientParams
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let id = hub.next_client_id();
    let mut state = ConnState::Connecting;

    let (queue_tx, queue_rx) = mpsc::channel(params.send_queue_len.max(1));
    hub.register(id, queue_tx).await?;
    transition(id, &peer, &mut state, ConnState::Active);

    let (sink, stream) = ws.split();
    let mut writer = AbortOnDrop(tokio::spawn(send_loop(id, sink, queue_rx, params.clone())));
    let mut reader = AbortOnDrop(tokio::spawn(
        recv_loop(id, stream, hub.clone(), params.pong_wait())
    ));

    let result = tokio::select! {
        res = &mut writer.0 => {
            transition(id, &peer, &mut state, ConnState::Closing);
            reader.0.abort();
            hub.unregister(id).await.ok();
            flatten(res)
        },
        res = &mut reader.0 => {
            transition(id, &peer, &mut state, ConnState::Closing);

            // Unregistering closes the queue, the writer then sends a close frame and exits
            hub.unregister(id).await.ok();
            finish_writer(&mut writer.0, params.write_wait()).await;
            flatten(res)
        }
    };

    transition(id, &peer, &mut state, ConnState::Closed);

    match &result {
        Ok(()) => debug!("Client {} ({}) closed", id, peer),
        Err(e) => warn!("Client {} ({}) closed: {}", id, peer, e)
    }

    result
}

fn transition(id: ClientId, peer: &str, state: &mut ConnState, next: ConnState) {
    debug!("Client {} ({}): {:?} -> {:?}", id, peer, state, next);
    *state = next;
}

fn flatten(
    res: Result<Result<(), ConnectionError>, tokio::task::JoinError>
) -> Result<(), ConnectionError> {
    match res {
        Ok(r) => r,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(ConnectionError::Task(e.to_string()))
    }
}

async fn finish_writer(writer: &mut JoinHandle<Result<(), ConnectionError>>, wait: Duration) {
    if time::timeout(wait, &mut *writer).await.is_err() {
        writer.abort();
    }
}

async fn send_loop<S>(
    id: ClientId,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut queue: mpsc::Receiver<String>,
    params: ClientParams
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin
{
    let write_wait = params.write_wait();
    let ping_period = params.ping_period();
    let mut ping = time::interval_at(Instant::now() + ping_period, ping_period);

    loop {
        tokio::select! {
            msg = queue.recv() => match msg {
                Some(text) => write(&mut sink, Message::Text(text), write_wait).await?,
                None => {
                    // Hub closed the queue
                    trace!("Client {} queue closed, sending close", id);
                    write(&mut sink, Message::Close(None), write_wait).await.ok();
                    return Ok(())
                }
            },
            _ = ping.tick() => {
                trace!("Client {} ping", id);
                write(&mut sink, Message::Ping(Vec::new()), write_wait).await?;
            }
        }
    }
}

async fn write<S>(
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    msg: Message,
    wait: Duration
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin
{
    match time::timeout(wait, sink.send(msg)).await {
        Ok(r) => r.map_err(ConnectionError::Ws),
        Err(_) => Err(ConnectionError::WriteTimeout(wait))
    }
}

async fn recv_loop<S>(
    id: ClientId,
    mut stream: SplitStream<WebSocketStream<S>>,
    hub: HubHandle,
    pong_wait: Duration
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin
{
    loop {
        let msg = match time::timeout(pong_wait, stream.next()).await {
            Err(_) => return Err(ConnectionError::PongTimeout(pong_wait)),
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => return Err(ConnectionError::Ws(e)),
            Ok(Some(Ok(m))) => m
        };

        match msg {
            Message::Text(text) => hub.command(text).await?,
            Message::Close(_) => {
                trace!("Client {} sent close", id);
                return Ok(())
            },
            Message::Ping(_) | Message::Pong(_) => trace!("Client {} keepalive", id),
            Message::Binary(b) => warn!("Client {} sent {} binary bytes, ignoring", id, b.len()),
            Message::Frame(_) => ()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::tm::MowerState;
    use serde_json::Value;
    use tokio::io::DuplexStream;
    use tokio::sync::watch;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use crate::hub::{HubParams, StateHub};

    async fn ws_pair(params: &ClientParams)
        -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>)
    {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(a, Role::Server, Some(params.ws_config()))
            .await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        (server, client)
    }

    fn start_hub() -> (HubHandle, watch::Sender<bool>, JoinHandle<MowerState>) {
        let (hub, handle) = StateHub::new(
            MowerState::new(24.3, 23.0),
            &HubParams { publish_period_s: 1.0, event_queue_len: 16 }
        );
        let (tx, rx) = watch::channel(false);
        (handle, tx, tokio::spawn(hub.run(rx)))
    }

    #[tokio::test]
    async fn test_command_round_trip() {
        let params = ClientParams::default();
        let (hub, shutdown, hub_task) = start_hub();
        let (server, mut client) = ws_pair(&params).await;

        let conn = tokio::spawn(serve_connection(server, "test".into(), hub.clone(), params));

        client
            .send(Message::Text(r#"{"method": "setMowerDriveSpeed", "value": "42"}"#.into()))
            .await
            .unwrap();

        loop {
            match client.next().await {
                Some(Ok(Message::Text(t))) => {
                    let val: Value = serde_json::from_str(&t).unwrap();
                    assert_eq!(val["namespace"], "mower");
                    if val["drive"]["speed"] == 42 {
                        break
                    }
                },
                Some(Ok(_)) => (),
                other => panic!("Connection ended early: {:?}", other)
            }
        }

        client.close(None).await.unwrap();
        assert!(conn.await.unwrap().is_ok());

        shutdown.send(true).unwrap();
        assert_eq!(hub_task.await.unwrap().drive.speed, 42);
    }

    #[tokio::test]
    async fn test_hub_shutdown_closes_connection() {
        let params = ClientParams::default();
        let (hub, shutdown, hub_task) = start_hub();
        let (server, mut client) = ws_pair(&params).await;

        let conn = tokio::spawn(serve_connection(server, "test".into(), hub, params));

        // Wait until the connection is registered and receiving
        while !matches!(client.next().await, Some(Ok(Message::Text(_)))) {}

        shutdown.send(true).unwrap();
        hub_task.await.unwrap();

        let mut closed = false;
        while let Some(Ok(msg)) = client.next().await {
            if let Message::Close(_) = msg {
                closed = true;
            }
        }
        assert!(closed);
        assert!(conn.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_connection_releases_socket() {
        let params = ClientParams::default();
        let (hub, _shutdown, _hub_task) = start_hub();
        let (server, mut client) = ws_pair(&params).await;

        let conn = tokio::spawn(serve_connection(server, "cancelled".into(), hub, params));

        while !matches!(client.next().await, Some(Ok(Message::Text(_)))) {}

        // Cancelling the serving task must also stop its send and receive tasks, dropping the
        // server side of the socket
        conn.abort();
        assert!(conn.await.unwrap_err().is_cancelled());

        let drained = time::timeout(Duration::from_secs(5), async {
            while let Some(Ok(_)) = client.next().await {}
        }).await;
        assert!(drained.is_ok(), "Client still receiving after the connection was cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_timeout() {
        let params = ClientParams {
            pong_wait_s: 1.0,
            ping_period_s: 100.0,
            ..ClientParams::default()
        };
        let (hub, _shutdown, _hub_task) = start_hub();
        let (server, _client) = ws_pair(&params).await;

        // The client never sends anything
        let res = serve_connection(server, "silent".into(), hub, params).await;
        assert!(matches!(res, Err(ConnectionError::PongTimeout(_))));
    }

    #[tokio::test]
    async fn test_oversized_message() {
        let params = ClientParams::default();
        let (hub, _shutdown, _hub_task) = start_hub();
        let (server, mut client) = ws_pair(&params).await;

        let conn = tokio::spawn(serve_connection(server, "big".into(), hub, params));

        client.send(Message::Text("x".repeat(2048))).await.unwrap();

        assert!(matches!(conn.await.unwrap(), Err(ConnectionError::Ws(_))));
    }
}
