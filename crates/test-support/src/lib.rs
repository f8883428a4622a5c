//! A mock TCP peer that speaks the envelope/POF wire format described in
//! `protocol` (§6), playing the server side of the handshake for `client`
//! crate integration tests. Mirrors the shape of `rt-test-utils`'s mock
//! WebSocket server: bind to a random port, accept one connection in a
//! background task, and let the test script request/response traffic past
//! whatever the peer auto-handles.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use pof::varint::write_uvarint;
use pof::{PofContext, PofReader, PofWriter};
use protocol::control::{
    OpenChannelRequest, OpenChannelResponse, OpenConnectionRequest, OpenConnectionResponse,
    PingRequest, PingResponse,
};
use protocol::{split_frame, Envelope, Message};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// One decoded inbound frame, handed back to the test for assertions.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub channel_id: u64,
    pub message_type_id: i32,
    pub body: Bytes,
}

/// Accepts exactly one connection and exposes its frames one at a time.
/// Dropping the peer stops the background accept/read task.
pub struct MockPeer {
    addr: SocketAddr,
    inbound: Mutex<mpsc::UnboundedReceiver<CapturedFrame>>,
    outbound: mpsc::UnboundedSender<BytesMut>,
    next_channel_id: Mutex<u64>,
    shutdown: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

impl MockPeer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<BytesMut>();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let (stream, _peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let (read_half, write_half) = stream.into_split();
            let writer = tokio::spawn(write_frames(write_half, outbound_rx));
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {}
                _ = read_frames(read_half, inbound_tx) => {}
            }
            writer.abort();
        });

        Ok(Self {
            addr,
            inbound: Mutex::new(inbound_rx),
            outbound: outbound_tx,
            next_channel_id: Mutex::new(1),
            shutdown: shutdown_tx,
            _task: task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Drops both socket halves out from under the connection, standing in
    /// for an abruptly aborted transport rather than a graceful close.
    pub fn abort_connection(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Waits for the next inbound frame. `None` once the connection closes.
    pub async fn recv(&self) -> Option<CapturedFrame> {
        self.inbound.lock().await.recv().await
    }

    /// Encodes and sends `message` on `channel_id`.
    pub fn send(&self, channel_id: u64, message: &dyn Message, context: &PofContext) {
        let mut body = BytesMut::new();
        {
            let mut writer = PofWriter::new(&mut body, context);
            message.encode(&mut writer).expect("encode mock response");
        }
        let mut frame = BytesMut::with_capacity(body.len() + 10);
        Envelope::new(channel_id, message.type_id()).write(&mut frame);
        frame.extend_from_slice(&body);
        let _ = self.outbound.send(frame);
    }

    /// Waits for the client's `OpenConnectionRequest` and accepts it.
    pub async fn accept_handshake(&self, context: &PofContext) {
        let frame = self.recv().await.expect("connection closed before handshake");
        assert_eq!(frame.channel_id, 0, "handshake must arrive on channel 0");
        let mut body = frame.body;
        let mut reader = PofReader::new(&mut body, context);
        let mut request = OpenConnectionRequest::default();
        request.decode(&mut reader).expect("decode OpenConnectionRequest");

        let response = OpenConnectionResponse {
            request_id: request.request_id,
            accepted_protocol_version: request.protocol_version,
            rejection: None,
        };
        self.send(0, &response, context);
    }

    /// Waits for an `OpenChannelRequest` and assigns it the next channel id.
    pub async fn accept_open_channel(&self, context: &PofContext) -> u64 {
        let frame = self.recv().await.expect("connection closed before open-channel");
        assert_eq!(frame.channel_id, 0, "open-channel request must arrive on channel 0");
        let mut body = frame.body;
        let mut reader = PofReader::new(&mut body, context);
        let mut request = OpenChannelRequest::default();
        request.decode(&mut reader).expect("decode OpenChannelRequest");

        let channel_id = {
            let mut next = self.next_channel_id.lock().await;
            let id = *next;
            *next += 1;
            id
        };
        let response = OpenChannelResponse {
            request_id: request.request_id,
            channel_id,
            rejection: None,
        };
        self.send(0, &response, context);
        channel_id
    }

    /// Waits for a `PingRequest` and answers it on the same channel.
    pub async fn accept_ping(&self, context: &PofContext) {
        let frame = self.recv().await.expect("connection closed before ping");
        let mut body = frame.body;
        let mut reader = PofReader::new(&mut body, context);
        let mut request = PingRequest::default();
        request.decode(&mut reader).expect("decode PingRequest");

        let response = PingResponse {
            request_id: request.request_id,
        };
        self.send(frame.channel_id, &response, context);
    }
}

async fn write_frames(
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<BytesMut>,
) {
    while let Some(frame) = frames.recv().await {
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

async fn read_frames(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    inbound: mpsc::UnboundedSender<CapturedFrame>,
) {
    loop {
        let len = match read_uvarint_async(&mut read_half).await {
            Ok(len) => len,
            Err(_) => break,
        };
        let mut buf = vec![0u8; len as usize];
        if read_half.read_exact(&mut buf).await.is_err() {
            break;
        }
        let (envelope, body) = match split_frame(Bytes::from(buf)) {
            Ok(parts) => parts,
            Err(_) => continue,
        };
        if inbound
            .send(CapturedFrame {
                channel_id: envelope.channel_id,
                message_type_id: envelope.message_type_id,
                body,
            })
            .is_err()
        {
            break;
        }
    }
}

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
