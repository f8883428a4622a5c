//! Multiplexed request/response streams over one connection (§4.3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use pof::{PofContext, PofReader, PofWriter};
use protocol::cache::type_id::CACHE_EVENT;
use protocol::cache::CacheEventMessage;
use protocol::{Envelope, Message, MessageContext, MessageFactory, PortableException};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::error::{ClientError, ClientResult, ConnectionError, TimeoutError};

/// What a channel's inbound, non-response messages are handed to (§4.3
/// "receiver"). Named for the role the distilled spec describes but never
/// types.
pub trait Receiver: Send + Sync {
    fn receive(&self, channel: &Channel, message: Box<dyn Message>);
}

/// A `Receiver` that drops everything — usable on channel 0, whose only
/// inbound one-way traffic is control notifications handled by `run`.
pub struct NullReceiver;

impl Receiver for NullReceiver {
    fn receive(&self, _channel: &Channel, _message: Box<dyn Message>) {}
}

enum PendingEntry {
    Waiting(oneshot::Sender<Result<Box<dyn Message>, ClientError>>),
    Cancelled,
}

pub struct Channel {
    id: u64,
    context: PofContext,
    factory: Arc<dyn MessageFactory>,
    receiver: Arc<dyn Receiver>,
    outbound: mpsc::Sender<BytesMut>,
    next_request_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingEntry>>,
    closed: AtomicBool,
    default_timeout: Duration,
}

impl Channel {
    pub(crate) fn new(
        id: u64,
        context: PofContext,
        factory: Arc<dyn MessageFactory>,
        receiver: Arc<dyn Receiver>,
        outbound: mpsc::Sender<BytesMut>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            id,
            context,
            factory,
            receiver,
            outbound,
            next_request_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            default_timeout,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn context(&self) -> &PofContext {
        &self.context
    }

    /// Per-channel monotonic counter, never reused (§4.3). Callers stamp
    /// their request message with the returned id before sending it.
    pub fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn encode(&self, message: &dyn Message) -> ClientResult<BytesMut> {
        let mut body = BytesMut::new();
        {
            let mut writer = PofWriter::new(&mut body, &self.context);
            message.encode(&mut writer).map_err(protocol::ProtocolError::Pof)?;
        }
        let mut frame = BytesMut::with_capacity(body.len() + 10);
        Envelope::new(self.id, message.type_id()).write(&mut frame);
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    async fn enqueue(&self, frame: BytesMut) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Transport(ConnectionError::Closed));
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ClientError::Transport(ConnectionError::Closed))
    }

    /// Fire-and-forget send (§4.3 `send(message)`).
    pub async fn send(&self, message: &dyn Message) -> ClientResult<()> {
        let frame = self.encode(message)?;
        self.enqueue(frame).await
    }

    /// Sends a request and returns a future for its response without
    /// blocking on it (§4.3 `send(request) -> status`).
    pub async fn send_request(
        &self,
        message: &dyn Message,
    ) -> ClientResult<oneshot::Receiver<Result<Box<dyn Message>, ClientError>>> {
        let request_id = message
            .request_id()
            .ok_or_else(|| ClientError::User("message carries no request id".into()))?;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, PendingEntry::Waiting(tx));
        let frame = self.encode(message)?;
        if let Err(err) = self.enqueue(frame).await {
            self.pending.lock().remove(&request_id);
            return Err(err);
        }
        Ok(rx)
    }

    /// Sends a request and waits for its response (§4.3 `request(request,
    /// timeout) -> response | error`). `timeout = None` waits indefinitely;
    /// `Some(Duration::ZERO)` uses the channel's configured default.
    pub async fn request(
        &self,
        message: &dyn Message,
        timeout: Option<Duration>,
    ) -> ClientResult<Box<dyn Message>> {
        let request_id = message
            .request_id()
            .ok_or_else(|| ClientError::User("message carries no request id".into()))?;
        let rx = self.send_request(message).await?;

        let wait = match timeout {
            Some(d) if d.is_zero() => Some(self.default_timeout),
            other => other,
        };

        let outcome = match wait {
            None => rx.await.map_err(|_| ClientError::Transport(ConnectionError::Closed))?,
            Some(duration) => match tokio::time::timeout(duration, rx).await {
                Ok(result) => result.map_err(|_| ClientError::Transport(ConnectionError::Closed))?,
                Err(_) => {
                    self.pending.lock().insert(request_id, PendingEntry::Cancelled);
                    return Err(ClientError::Timeout(TimeoutError::Request(duration)));
                }
            },
        };
        outcome
    }

    /// Routes one decoded inbound frame (§4.3 internal `receive`).
    pub(crate) fn dispatch(self: &Arc<Self>, envelope: Envelope, body: bytes::Bytes) {
        let mut body = body;
        let mut message = match self.factory.create(envelope.message_type_id) {
            Ok(message) => message,
            Err(err) => {
                warn!(type_id = envelope.message_type_id, error = %err, "unknown inbound message type, dropping frame");
                return;
            }
        };
        {
            let mut reader = PofReader::new(&mut body, &self.context);
            if let Err(err) = message.decode(&mut reader) {
                warn!(channel_id = self.id, error = %err, "failed to decode inbound message, dropping frame");
                return;
            }
        }

        if let Some(request_id) = message.request_id() {
            let entry = self.pending.lock().remove(&request_id);
            match entry {
                Some(PendingEntry::Waiting(tx)) => {
                    let _ = tx.send(Ok(message));
                }
                Some(PendingEntry::Cancelled) => {
                    // The caller already timed out; a late response is silently dropped (§4.3).
                }
                None => {
                    warn!(request_id, channel_id = self.id, "response for unknown request id, dropping");
                }
            }
            return;
        }

        if message.type_id() == CACHE_EVENT {
            // Cache events run on the receive task itself so they observe
            // wire order ahead of any worker-thread work on this channel (§5).
            message.run(self.id, self.as_ref());
        } else {
            let channel = Arc::clone(self);
            tokio::spawn(async move {
                message.run(channel.id, channel.as_ref());
            });
        }
    }

    /// Cancels every pending request with a connection error and marks the
    /// channel closed; subsequent sends fail immediately (§4.3 "Closure").
    pub(crate) fn close(&self, cause: Option<PortableException>) {
        self.closed.store(true, Ordering::Release);
        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (_, entry) in pending {
            if let PendingEntry::Waiting(tx) = entry {
                let error = match &cause {
                    Some(e) => ClientError::Transport(ConnectionError::Handshake(e.to_string())),
                    None => ClientError::Transport(ConnectionError::Closed),
                };
                let _ = tx.send(Err(error));
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl MessageContext for Channel {
    fn dispatch_cache_event(&self, channel_id: u64, event: CacheEventMessage) {
        debug_assert_eq!(channel_id, self.id);
        self.receiver.receive(self, Box::new(event));
    }

    fn channel_closed(&self, _channel_id: u64, cause: Option<PortableException>) {
        self.close(cause);
    }

    fn connection_closed(&self, cause: Option<PortableException>) {
        self.close(cause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::control::{control_registry, PingRequest, PingResponse};

    fn make_channel() -> (Arc<Channel>, mpsc::Receiver<BytesMut>) {
        let (tx, rx) = mpsc::channel(16);
        let channel = Arc::new(Channel::new(
            1,
            PofContext::builder().build(),
            Arc::new(control_registry()),
            Arc::new(NullReceiver),
            tx,
            Duration::from_millis(50),
        ));
        (channel, rx)
    }

    fn encode_response(channel: &Channel, response: &PingResponse) -> (Envelope, bytes::Bytes) {
        let mut body = BytesMut::new();
        {
            let mut writer = PofWriter::new(&mut body, channel.context());
            response.encode(&mut writer).unwrap();
        }
        (Envelope::new(channel.id(), response.type_id()), body.freeze())
    }

    #[tokio::test]
    async fn next_request_id_is_monotonically_increasing() {
        let (channel, _rx) = make_channel();
        let a = channel.next_request_id();
        let b = channel.next_request_id();
        assert!(b > a);
    }

    #[tokio::test]
    async fn send_request_resolves_on_matching_response() {
        let (channel, mut rx) = make_channel();
        let request_id = channel.next_request_id();
        let request = PingRequest { request_id };
        let pending = channel.send_request(&request).await.unwrap();
        let _frame = rx.recv().await.unwrap();

        let response = PingResponse { request_id };
        let (envelope, body) = encode_response(&channel, &response);
        channel.dispatch(envelope, body);

        let resolved = pending.await.unwrap().unwrap();
        let resolved = resolved.as_any().downcast_ref::<PingResponse>().unwrap();
        assert_eq!(resolved.request_id, request_id);
    }

    #[tokio::test]
    async fn request_times_out_when_no_response_arrives() {
        let (channel, _rx) = make_channel();
        let request = PingRequest {
            request_id: channel.next_request_id(),
        };
        let err = channel
            .request(&request, Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout(TimeoutError::Request(_))));
    }

    #[tokio::test]
    async fn late_response_after_timeout_is_dropped_without_panicking() {
        let (channel, mut rx) = make_channel();
        let request_id = channel.next_request_id();
        let request = PingRequest { request_id };
        let err = channel
            .request(&request, Some(Duration::from_millis(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)));
        let _frame = rx.recv().await.unwrap();

        let response = PingResponse { request_id };
        let (envelope, body) = encode_response(&channel, &response);
        channel.dispatch(envelope, body);
    }

    #[tokio::test]
    async fn close_fails_all_pending_requests() {
        let (channel, _rx) = make_channel();
        let request = PingRequest {
            request_id: channel.next_request_id(),
        };
        let pending = channel.send_request(&request).await.unwrap();
        channel.close(None);
        let outcome = pending.await.unwrap();
        assert!(matches!(outcome, Err(ClientError::Transport(ConnectionError::Closed))));
    }

    #[tokio::test]
    async fn send_after_close_fails_immediately() {
        let (channel, _rx) = make_channel();
        channel.close(None);
        let request = PingRequest { request_id: 1 };
        let err = channel.send(&request).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn send_request_without_a_request_id_is_a_user_error() {
        let (channel, _rx) = make_channel();

        #[derive(Debug, Default)]
        struct OneWay;
        impl Message for OneWay {
            fn type_id(&self) -> i32 {
                999
            }
            fn encode(&self, writer: &mut PofWriter<'_>) -> pof::PofResult<()> {
                writer.write_indexed_properties(0, &[])
            }
            fn decode(&mut self, reader: &mut PofReader<'_>) -> pof::PofResult<()> {
                reader.read_indexed_properties()?;
                Ok(())
            }
        }

        let err = channel.send_request(&OneWay).await.unwrap_err();
        assert!(matches!(err, ClientError::User(_)));
    }

    #[tokio::test]
    async fn cache_events_are_delivered_in_wire_order() {
        use protocol::cache::{
            named_cache_registry, type_id as cache_type_id, CacheEventFlags, CacheEventKind,
            CacheEventMessage, TransformState,
        };
        use std::sync::Mutex as StdMutex;

        struct OrderRecorder(StdMutex<Vec<pof::PofValue>>);
        impl Receiver for OrderRecorder {
            fn receive(&self, _channel: &Channel, message: Box<dyn Message>) {
                let event = message.as_any().downcast_ref::<CacheEventMessage>().unwrap();
                self.0.lock().unwrap().push(event.key.clone());
            }
        }

        let (tx, _rx) = mpsc::channel(16);
        let recorder = Arc::new(OrderRecorder(StdMutex::new(Vec::new())));
        let channel = Arc::new(Channel::new(
            1,
            PofContext::builder().build(),
            Arc::new(named_cache_registry()),
            recorder.clone(),
            tx,
            Duration::from_millis(50),
        ));

        let event = |key: i32| CacheEventMessage {
            kind: CacheEventKind::Inserted,
            flags: CacheEventFlags::default(),
            transform_state: TransformState::default(),
            key: pof::PofValue::Int32(key),
            old_value: None,
            new_value: Some(pof::PofValue::Int32(key)),
            filter_ids: vec![],
        };

        for key in 0..20 {
            let mut body = BytesMut::new();
            {
                let mut writer = PofWriter::new(&mut body, channel.context());
                event(key).encode(&mut writer).unwrap();
            }
            let envelope = Envelope::new(channel.id(), cache_type_id::CACHE_EVENT);
            channel.dispatch(envelope, body.freeze());
        }

        let seen = recorder.0.lock().unwrap().clone();
        let expected: Vec<pof::PofValue> = (0..20).map(pof::PofValue::Int32).collect();
        assert_eq!(seen, expected, "cache events must stay in wire order regardless of dispatch");
    }
}
