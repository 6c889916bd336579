//! Client API gateway (C9): a length-prefixed binary protocol on its own
//! TCP port, independent of the P2P/gRPC port.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tonic::Request;

use crate::error::ChordError;
use crate::identifier::Identifier;
use crate::lookup;
use crate::node_handle::ChannelPool;
use crate::routing::RoutingState;
use crate::rpc::chord_proto::{GetRequest, PutRequest};
use crate::time::now_ms;
use std::sync::Mutex;

pub const DHT_PUT: u16 = 650;
pub const DHT_GET: u16 = 651;
pub const DHT_SUCCESS: u16 = 652;
pub const DHT_FAILURE: u16 = 653;

const KEY_LEN: usize = 32;

/// Accepts client connections until `stopped` is set. Each connection
/// gets its own reader task, which in turn spawns a task per message.
pub async fn serve(
    listener: TcpListener,
    state: Arc<Mutex<RoutingState>>,
    pool: Arc<ChannelPool>,
    stopped: Arc<AtomicBool>,
) {
    loop {
        if stopped.load(Ordering::Relaxed) {
            return;
        }
        let accepted = tokio::select! {
            res = listener.accept() => res,
            _ = tokio::time::sleep(Duration::from_millis(200)) => continue,
        };
        match accepted {
            Ok((socket, peer)) => {
                debug!("gateway: accepted connection from {}", peer);
                let state = state.clone();
                let pool = pool.clone();
                let stopped = stopped.clone();
                tokio::spawn(async move {
                    handle_connection(socket, state, pool, stopped).await;
                });
            }
            Err(err) => warn!("gateway: accept error: {}", err),
        }
    }
}

async fn handle_connection(
    socket: TcpStream,
    state: Arc<Mutex<RoutingState>>,
    pool: Arc<ChannelPool>,
    stopped: Arc<AtomicBool>,
) {
    let (mut reader, writer) = socket.into_split();
    let writer = Arc::new(AsyncMutex::new(writer));

    loop {
        if stopped.load(Ordering::Relaxed) {
            return;
        }
        let mut header = [0u8; 4];
        if reader.read_exact(&mut header).await.is_err() {
            return;
        }
        let size = u16::from_be_bytes([header[0], header[1]]) as usize;
        let msg_type = u16::from_be_bytes([header[2], header[3]]);
        if size < 4 {
            warn!("gateway: malformed frame (size {} < header), closing connection", size);
            return;
        }
        let mut body = vec![0u8; size - 4];
        if reader.read_exact(&mut body).await.is_err() {
            return;
        }

        // Malformed frames close the connection; validating here, before
        // any task is spawned, means the owning reader loop is the one
        // that closes it, rather than a detached per-message task
        // discovering the problem after the loop has already moved on to
        // the next frame.
        if let Err(err) = validate_frame(msg_type, &body) {
            warn!("gateway: {}, closing connection", err);
            return;
        }

        let state = state.clone();
        let pool = pool.clone();
        let writer = writer.clone();
        tokio::spawn(async move {
            if let Err(err) = dispatch(msg_type, body, &state, &pool, &writer).await {
                warn!("gateway: dispatch error: {}", err);
            }
        });
    }
}

fn validate_frame(msg_type: u16, body: &[u8]) -> Result<(), ChordError> {
    match msg_type {
        DHT_PUT if body.len() >= 2 + 1 + 1 + KEY_LEN => Ok(()),
        DHT_PUT => Err(ChordError::Malformed("PUT body too short".to_string())),
        DHT_GET if body.len() == KEY_LEN => Ok(()),
        DHT_GET => Err(ChordError::Malformed("GET body must be 32 bytes".to_string())),
        other => Err(ChordError::Malformed(format!("unknown msg_type {}", other))),
    }
}

type WriteHalf = Arc<AsyncMutex<tokio::net::tcp::OwnedWriteHalf>>;

/// `msg_type`/body length were already checked by `validate_frame` before
/// this task was spawned; only the networking errors remain possible here.
async fn dispatch(
    msg_type: u16,
    body: Vec<u8>,
    state: &Arc<Mutex<RoutingState>>,
    pool: &Arc<ChannelPool>,
    writer: &WriteHalf,
) -> Result<(), ChordError> {
    match msg_type {
        DHT_PUT => handle_put(body, state, pool).await,
        DHT_GET => handle_get(body, state, pool, writer).await,
        _ => unreachable!("validate_frame already rejected unknown msg_type"),
    }
}

/// `PUT` body: `u16 ttl_seconds, u8 replication, u8 reserved, u8[32] key,
/// u8[] value`. No response is sent on the client socket.
async fn handle_put(
    body: Vec<u8>,
    state: &Arc<Mutex<RoutingState>>,
    pool: &Arc<ChannelPool>,
) -> Result<(), ChordError> {
    let ttl_seconds = u16::from_be_bytes([body[0], body[1]]);
    let replication = body[2] as i32;
    let key = body[4..4 + KEY_LEN].to_vec();
    let value = body[4 + KEY_LEN..].to_vec();
    let expire_at_ms = now_ms() + ttl_seconds as i64 * 1000;

    let target_id = Identifier::hash(&key);
    let responsible = lookup::find_successor(state, pool, target_id).await?;
    let mut client = pool.client_for(&responsible.addr).await?;
    client
        .put(Request::new(PutRequest {
            key,
            value,
            expire_at_ms,
            initiator_addr: String::new(),
            replication,
        }))
        .await
        .map_err(ChordError::from)?;
    Ok(())
}

/// `GET` body: `u8[32] key`. Replies `DHT_SUCCESS (key || value)` on hit,
/// `DHT_FAILURE (key)` on miss.
async fn handle_get(
    body: Vec<u8>,
    state: &Arc<Mutex<RoutingState>>,
    pool: &Arc<ChannelPool>,
    writer: &WriteHalf,
) -> Result<(), ChordError> {
    let key = body.clone();
    let target_id = Identifier::hash(&key);
    let responsible = lookup::find_successor(state, pool, target_id).await?;
    let mut client = pool.client_for(&responsible.addr).await?;
    let response = client
        .get(Request::new(GetRequest { key: key.clone() }))
        .await
        .map_err(ChordError::from)?
        .into_inner();

    if response.present {
        let mut payload = key;
        payload.extend_from_slice(&response.value);
        write_frame(writer, DHT_SUCCESS, &payload).await
    } else {
        write_frame(writer, DHT_FAILURE, &key).await
    }
}

async fn write_frame(writer: &WriteHalf, msg_type: u16, body: &[u8]) -> Result<(), ChordError> {
    let size = (4 + body.len()) as u16;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&size.to_be_bytes());
    frame.extend_from_slice(&msg_type.to_be_bytes());
    frame.extend_from_slice(body);

    let mut guard = writer.lock().await;
    guard.write_all(&frame).await.map_err(ChordError::from)
}
