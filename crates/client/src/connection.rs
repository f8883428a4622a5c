//! TCP transport: connect, the three-step handshake, and framing (§4.4, §6).
//!
//! # Protocol
//! 1. Connect to `remote_address`.
//! 2. Send `OpenConnectionRequest` on channel 0 with the configured
//!    identity and protocol version; receive `OpenConnectionResponse`.
//! 3. Thereafter, `open_channel` asks channel 0 to bind a new channel to a
//!    named receiver — typically one named cache — and registers it
//!    locally under the id the peer assigns.
//!
//! Every frame on the wire is a varint length prefix followed by that many
//! bytes of envelope-plus-POF-body (§6). Channel 0 always carries the
//! control protocol; every other channel carries whatever protocol its
//! receiver name was bound to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use pof::varint::write_uvarint;
use pof::PofContext;
use protocol::cache::named_cache_registry;
use protocol::control::{
    control_registry, OpenChannelRequest, OpenChannelResponse, OpenConnectionRequest,
    OpenConnectionResponse, PingRequest,
};
use protocol::{split_frame, Envelope, Message, MessageFactory, ProtocolError};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{Channel, NullReceiver, Receiver};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult, ConnectionError, TimeoutError};

const CONTROL_CHANNEL_ID: u64 = 0;
const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// A frame larger than this is treated as corruption rather than a slow
/// peer; well past anything a named-cache value should ever encode to.
const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

/// A live connection to one remote member: the control channel plus
/// whatever named-cache channels have since been opened on top of it.
pub struct Connection {
    channels: Arc<Mutex<HashMap<u64, Arc<Channel>>>>,
    control: Arc<Channel>,
    context: PofContext,
    config: ClientConfig,
    outbound: mpsc::Sender<BytesMut>,
    closed: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    fault: watch::Receiver<Option<String>>,
    writer_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
    ping_task: JoinHandle<()>,
}

impl Connection {
    pub async fn connect(config: ClientConfig) -> ClientResult<Arc<Connection>> {
        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect(&config.remote_address),
        )
        .await
        .map_err(|_| ClientError::Timeout(TimeoutError::Request(config.connect_timeout)))?
        .map_err(|e| ClientError::Transport(ConnectionError::Io(e.to_string())))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ClientError::Transport(ConnectionError::Io(e.to_string())))?;

        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::channel::<BytesMut>(OUTBOUND_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (fault_tx, fault_rx) = watch::channel(None);
        let channels: Arc<Mutex<HashMap<u64, Arc<Channel>>>> = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let context = config.pof_context.clone();

        let control = Arc::new(Channel::new(
            CONTROL_CHANNEL_ID,
            context.clone(),
            Arc::new(control_registry()),
            Arc::new(NullReceiver),
            outbound_tx.clone(),
            config.request_timeout,
        ));
        channels.lock().insert(CONTROL_CHANNEL_ID, Arc::clone(&control));

        let writer_task = tokio::spawn(writer_loop(write_half, outbound_rx, shutdown_rx.clone()));
        let reader_task = tokio::spawn(reader_loop(
            read_half,
            Arc::clone(&channels),
            Arc::clone(&closed),
            shutdown_tx.clone(),
            fault_tx.clone(),
            shutdown_rx.clone(),
        ));

        let identity = config.identity_token.clone().unwrap_or_default();
        let handshake = OpenConnectionRequest {
            request_id: control.next_request_id(),
            client_identity: identity,
            protocol_version: 1,
        };
        let reply = control
            .request(&handshake, Some(config.connect_timeout))
            .await?;
        let reply = reply
            .as_any()
            .downcast_ref::<OpenConnectionResponse>()
            .ok_or_else(|| {
                ClientError::Protocol(ProtocolError::Malformed(
                    "handshake reply was not an OpenConnectionResponse".into(),
                ))
            })?;
        if let Some(rejection) = &reply.rejection {
            return Err(ClientError::Request(rejection.clone()));
        }
        info!(
            protocol_version = reply.accepted_protocol_version,
            "connection handshake complete"
        );

        let ping_task = tokio::spawn(ping_loop(
            Arc::clone(&control),
            config.ping_interval,
            config.ping_timeout,
            Arc::clone(&channels),
            Arc::clone(&closed),
            shutdown_tx.clone(),
            fault_tx,
            shutdown_rx,
        ));

        Ok(Arc::new(Connection {
            channels,
            control,
            context,
            config,
            outbound: outbound_tx,
            closed,
            shutdown: shutdown_tx,
            fault: fault_rx,
            writer_task,
            reader_task,
            ping_task,
        }))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fires at most once, with the reason the connection tore itself down
    /// on its own — a missed ping or a read failure — as opposed to a
    /// deliberate [`Connection::close`] (§4.4, §4.6).
    pub fn fault(&self) -> watch::Receiver<Option<String>> {
        self.fault.clone()
    }

    /// The always-open control channel (channel 0).
    pub fn control_channel(&self) -> &Arc<Channel> {
        &self.control
    }

    /// Opens a new channel bound to `receiver_name` — typically a single
    /// named cache (§4.4).
    pub async fn open_channel(
        &self,
        receiver_name: &str,
        receiver: Arc<dyn Receiver>,
    ) -> ClientResult<Arc<Channel>> {
        let request = OpenChannelRequest {
            request_id: self.control.next_request_id(),
            receiver_name: receiver_name.to_string(),
        };
        let reply = self
            .control
            .request(&request, Some(self.config.request_timeout))
            .await?;
        let reply = reply
            .as_any()
            .downcast_ref::<OpenChannelResponse>()
            .ok_or_else(|| {
                ClientError::Protocol(ProtocolError::Malformed(
                    "open-channel reply was not an OpenChannelResponse".into(),
                ))
            })?;
        if let Some(rejection) = &reply.rejection {
            return Err(ClientError::Request(rejection.clone()));
        }

        let channel = Arc::new(Channel::new(
            reply.channel_id,
            self.context.clone(),
            Arc::new(named_cache_registry()),
            receiver,
            self.outbound.clone(),
            self.config.request_timeout,
        ));
        self.channels.lock().insert(reply.channel_id, Arc::clone(&channel));
        Ok(channel)
    }

    /// Tears down the transport and every channel opened on it. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);
        let channels: Vec<_> = self.channels.lock().drain().collect();
        for (_, channel) in channels {
            channel.close(None);
        }
        self.writer_task.abort();
        self.reader_task.abort();
        self.ping_task.abort();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn writer_loop(
    mut write_half: WriteHalf<TcpStream>,
    mut frames: mpsc::Receiver<BytesMut>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let mut length_prefix = BytesMut::with_capacity(5);
                write_uvarint(&mut length_prefix, frame.len() as u64);
                if write_half.write_all(&length_prefix).await.is_err() {
                    break;
                }
                if write_half.write_all(&frame).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Tears the connection down the first time anything calls it — a ping
/// timeout or a read failure — and records why (§3, §4.4, §4.6). A
/// deliberate [`Connection::close`] swaps `closed` itself and so makes any
/// later call here a no-op.
fn fail_connection(
    channels: &Mutex<HashMap<u64, Arc<Channel>>>,
    closed: &AtomicBool,
    shutdown: &watch::Sender<bool>,
    fault: &watch::Sender<Option<String>>,
    reason: String,
) {
    if closed.swap(true, Ordering::AcqRel) {
        return;
    }
    let _ = fault.send(Some(reason));
    let _ = shutdown.send(true);
    let remaining: Vec<_> = channels.lock().drain().collect();
    for (_, channel) in remaining {
        channel.close(None);
    }
}

/// Mirrors [`pof::varint::read_uvarint`] byte for byte, reading from an
/// async stream one byte at a time instead of a pre-filled buffer — the
/// frame length isn't known, and can't be, until this prefix is decoded.
async fn read_uvarint_async<R: AsyncReadExt + Unpin>(reader: &mut R) -> std::io::Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = reader.read_u8().await?;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "frame length varint too long",
            ));
        }
    }
}

async fn reader_loop(
    mut read_half: ReadHalf<TcpStream>,
    channels: Arc<Mutex<HashMap<u64, Arc<Channel>>>>,
    closed: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    fault: watch::Sender<Option<String>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let failure = loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break None;
                }
            }
            result = read_uvarint_async(&mut read_half) => {
                let len = match result {
                    Ok(len) => len,
                    Err(err) => {
                        debug!(error = %err, "connection read ended");
                        break Some(format!("connection read ended: {err}"));
                    }
                };
                if len > MAX_FRAME_LEN {
                    warn!(len, "frame exceeds maximum length, closing connection");
                    break Some(format!("frame of {len} bytes exceeds the maximum frame length"));
                }
                let mut buf = vec![0u8; len as usize];
                if let Err(err) = read_half.read_exact(&mut buf).await {
                    debug!(error = %err, "connection read ended");
                    break Some(format!("connection read ended: {err}"));
                }
                let (envelope, body) = match split_frame(Bytes::from(buf)) {
                    Ok(parts) => parts,
                    Err(err) => {
                        warn!(error = %err, "malformed frame envelope, dropping");
                        continue;
                    }
                };
                dispatch_frame(&channels, envelope, body);
            }
        }
    };

    if let Some(reason) = failure {
        fail_connection(&channels, &closed, &shutdown_tx, &fault, reason);
    }
}

fn dispatch_frame(channels: &Mutex<HashMap<u64, Arc<Channel>>>, envelope: Envelope, body: Bytes) {
    let channel = channels.lock().get(&envelope.channel_id).cloned();
    match channel {
        Some(channel) => channel.dispatch(envelope, body),
        None => warn!(channel_id = envelope.channel_id, "frame for unknown channel, dropping"),
    }
}

async fn ping_loop(
    control: Arc<Channel>,
    interval: Duration,
    timeout: Duration,
    channels: Arc<Mutex<HashMap<u64, Arc<Channel>>>>,
    closed: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    fault: watch::Sender<Option<String>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; the first real ping should wait a full interval

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if control.is_closed() {
                    break;
                }
                let request = PingRequest { request_id: control.next_request_id() };
                match control.request(&request, Some(timeout)).await {
                    Ok(_) => debug!("ping acknowledged"),
                    Err(ClientError::Timeout(_)) => {
                        warn!(?timeout, "ping timed out, closing connection");
                        fail_connection(
                            &channels,
                            &closed,
                            &shutdown_tx,
                            &fault,
                            format!("ping timed out after {timeout:?}"),
                        );
                        break;
                    }
                    Err(_) => break,
                }
            }
        }
    }
}
