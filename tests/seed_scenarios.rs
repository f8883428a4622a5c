//! The six seed end-to-end scenarios against a scripted peer (spec §8).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use client::{CacheEventListener, ClientConfigBuilder, ClientError, Connection, ConnectionError, ListenerRegistry, NullReceiver, TimeoutError};
use pof::PofValue;
use protocol::cache::{
    type_id as cache_type_id, CacheEventFlags, CacheEventKind, CacheEventMessage, EntrySetRequest,
    KeyRequest, PutRequest, Response, ResponseResult, TransformState,
};
use test_support::MockPeer;

fn person(name: &str, dob_year: i32) -> PofValue {
    PofValue::Array(Arc::new(vec![
        PofValue::String(name.to_string()),
        PofValue::Date(pof::Date {
            year: dob_year,
            month: 12,
            day: 10,
        }),
    ]))
}

async fn connect(peer: &MockPeer, configure: impl FnOnce(ClientConfigBuilder) -> ClientConfigBuilder) -> Arc<Connection> {
    let builder = ClientConfigBuilder::new()
        .remote_address(peer.local_addr().to_string())
        .connect_timeout(Duration::from_secs(2));
    let config = configure(builder).build();
    let context = config.pof_context.clone();
    let (connection, ()) = tokio::join!(Connection::connect(config), peer.accept_handshake(&context));
    connection.unwrap()
}

/// 1. Put-get round trip.
#[tokio::test]
async fn put_get_round_trip() {
    let peer = MockPeer::start().await.unwrap();
    let connection = connect(&peer, |b| b.ping_interval(Duration::from_secs(60))).await;
    let context = connection.control_channel().context().clone();

    let (channel, _) = tokio::join!(
        connection.open_channel("people", Arc::new(NullReceiver)),
        peer.accept_open_channel(&context),
    );
    let channel = channel.unwrap();
    let ada = person("Ada", 1815);

    let put = PutRequest {
        request_id: channel.next_request_id(),
        key: PofValue::String("k".to_string()),
        value: ada.clone(),
        expiry_millis: None,
        return_current: false,
    };
    let serve_put = async {
        let frame = peer.recv().await.unwrap();
        assert_eq!(frame.message_type_id, cache_type_id::PUT);
        let mut body = frame.body;
        let mut reader = pof::PofReader::new(&mut body, &context);
        let mut decoded = PutRequest::default();
        decoded.decode(&mut reader).unwrap();
        peer.send(
            frame.channel_id,
            &Response {
                request_id: decoded.request_id,
                result: ResponseResult::Success(PofValue::Nil),
            },
            &context,
        );
    };
    let (put_reply, ()) = tokio::join!(channel.request(&put, None), serve_put);
    put_reply.unwrap();

    let get = KeyRequest {
        type_id: cache_type_id::GET,
        request_id: channel.next_request_id(),
        key: PofValue::String("k".to_string()),
    };
    let serve_get = async {
        let frame = peer.recv().await.unwrap();
        let mut body = frame.body;
        let mut reader = pof::PofReader::new(&mut body, &context);
        let mut decoded = KeyRequest::default();
        decoded.decode(&mut reader).unwrap();
        assert_eq!(decoded.key, PofValue::String("k".to_string()));
        peer.send(
            frame.channel_id,
            &Response {
                request_id: decoded.request_id,
                result: ResponseResult::Success(ada.clone()),
            },
            &context,
        );
    };
    let (get_reply, ()) = tokio::join!(channel.request(&get, None), serve_get);

    let reply = get_reply.unwrap();
    let reply = reply.as_any().downcast_ref::<Response>().unwrap();
    match &reply.result {
        ResponseResult::Success(value) => assert_eq!(*value, ada),
        ResponseResult::Failure(e) => panic!("unexpected failure: {e:?}"),
    }
}

/// 2. Bulk put with concurrent get.
#[tokio::test]
async fn bulk_put_with_concurrent_get() {
    let peer = MockPeer::start().await.unwrap();
    let connection = connect(&peer, |b| b.ping_interval(Duration::from_secs(60))).await;
    let context = connection.control_channel().context().clone();

    let (channel, _) = tokio::join!(
        connection.open_channel("people", Arc::new(NullReceiver)),
        peer.accept_open_channel(&context),
    );
    let channel = channel.unwrap();

    let entries: Vec<(PofValue, PofValue)> = (1..=1000)
        .map(|i| (PofValue::String(format!("k{i}")), PofValue::Int64(i)))
        .collect();
    let put_all = EntrySetRequest {
        request_id: channel.next_request_id(),
        entries,
    };
    let get_k500 = KeyRequest {
        type_id: cache_type_id::GET,
        request_id: channel.next_request_id(),
        key: PofValue::String("k500".to_string()),
    };

    let serve = async {
        for _ in 0..2 {
            let frame = peer.recv().await.unwrap();
            let mut body = frame.body;
            match frame.message_type_id {
                id if id == cache_type_id::PUT_ALL => {
                    let mut reader = pof::PofReader::new(&mut body, &context);
                    let mut req = EntrySetRequest::default();
                    req.decode(&mut reader).unwrap();
                    peer.send(
                        frame.channel_id,
                        &Response {
                            request_id: req.request_id,
                            result: ResponseResult::Success(PofValue::Nil),
                        },
                        &context,
                    );
                }
                id if id == cache_type_id::GET => {
                    let mut reader = pof::PofReader::new(&mut body, &context);
                    let mut req = KeyRequest::default();
                    req.decode(&mut reader).unwrap();
                    peer.send(
                        frame.channel_id,
                        &Response {
                            request_id: req.request_id,
                            result: ResponseResult::Success(PofValue::Int64(500)),
                        },
                        &context,
                    );
                }
                other => panic!("unexpected request type {other}"),
            }
        }
    };

    let (put_result, get_result, ()) =
        tokio::join!(channel.request(&put_all, None), channel.request(&get_k500, None), serve);
    put_result.unwrap();
    let get_reply = get_result.unwrap();
    let get_reply = get_reply.as_any().downcast_ref::<Response>().unwrap();
    match &get_reply.result {
        ResponseResult::Success(PofValue::Nil) => {}
        ResponseResult::Success(PofValue::Int64(500)) => {}
        other => panic!("expected nil or the inserted value, got {other:?}"),
    }
}

struct Recorder(Mutex<Vec<CacheEventMessage>>);

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Vec::new())))
    }

    fn seen(&self) -> Vec<CacheEventMessage> {
        self.0.lock().unwrap().clone()
    }
}

impl CacheEventListener for Recorder {
    fn on_event(&self, event: &CacheEventMessage) {
        self.0.lock().unwrap().push(event.clone());
    }
}

/// 3. Listener priming.
#[tokio::test]
async fn listener_priming_synthesizes_an_update_from_nil() {
    let peer = MockPeer::start().await.unwrap();
    let connection = connect(&peer, |b| b.ping_interval(Duration::from_secs(60))).await;
    let context = connection.control_channel().context().clone();

    let registry = Arc::new(ListenerRegistry::new());
    let recorder = Recorder::new();
    registry.add_key_listener(PofValue::String("x".to_string()), recorder.clone());

    let (channel, _) = tokio::join!(
        connection.open_channel("people", registry),
        peer.accept_open_channel(&context),
    );
    let channel = channel.unwrap();

    // A prior put("x", "v1") already landed server-side; the server answers
    // the priming listener registration with a synthetic update event.
    peer.send(
        channel.id(),
        &CacheEventMessage {
            kind: CacheEventKind::Updated,
            flags: CacheEventFlags::default().with(CacheEventFlags::PRIMING),
            transform_state: TransformState::default(),
            key: PofValue::String("x".to_string()),
            old_value: None,
            new_value: Some(PofValue::String("v1".to_string())),
            filter_ids: vec![],
        },
        &context,
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    let seen = recorder.seen();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].flags.contains(CacheEventFlags::PRIMING));
    assert!(seen[0].old_value.is_none());
    assert_eq!(seen[0].new_value, Some(PofValue::String("v1".to_string())));
}

/// 4. Filter-id fan-out.
#[tokio::test]
async fn filter_id_fanout_fires_both_listeners_once() {
    let peer = MockPeer::start().await.unwrap();
    let connection = connect(&peer, |b| b.ping_interval(Duration::from_secs(60))).await;
    let context = connection.control_channel().context().clone();

    let registry = Arc::new(ListenerRegistry::new());
    let l1 = Recorder::new();
    let l2 = Recorder::new();
    registry.add_filter_listener(7, l1.clone());
    registry.add_filter_listener(11, l2.clone());

    let (channel, _) = tokio::join!(
        connection.open_channel("people", registry),
        peer.accept_open_channel(&context),
    );
    let channel = channel.unwrap();

    peer.send(
        channel.id(),
        &CacheEventMessage {
            kind: CacheEventKind::Updated,
            flags: CacheEventFlags::default(),
            transform_state: TransformState::default(),
            key: PofValue::String("x".to_string()),
            old_value: None,
            new_value: Some(PofValue::String("vv".to_string())),
            filter_ids: vec![7, 11],
        },
        &context,
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(l1.seen().len(), 1);
    assert_eq!(l2.seen().len(), 1);
    assert_eq!(l1.seen()[0].new_value, Some(PofValue::String("vv".to_string())));
    assert_eq!(l2.seen()[0].new_value, Some(PofValue::String("vv".to_string())));
}

/// 5. Request timeout.
#[tokio::test]
async fn request_timeout_bounds_the_wait_and_drops_the_pending_entry() {
    let peer = MockPeer::start().await.unwrap();
    let connection = connect(&peer, |b| b.ping_interval(Duration::from_secs(60))).await;
    let context = connection.control_channel().context().clone();

    let (channel, _) = tokio::join!(
        connection.open_channel("people", Arc::new(NullReceiver)),
        peer.accept_open_channel(&context),
    );
    let channel = channel.unwrap();

    let get = KeyRequest {
        type_id: cache_type_id::GET,
        request_id: channel.next_request_id(),
        key: PofValue::String("k".to_string()),
    };

    let started = Instant::now();
    let (result, frame) = tokio::join!(channel.request(&get, Some(Duration::from_millis(100))), peer.recv());
    let elapsed = started.elapsed();
    assert!(frame.is_some(), "server should still have observed the request");
    assert!(elapsed >= Duration::from_millis(100) && elapsed <= Duration::from_millis(200));
    assert!(matches!(
        result.unwrap_err(),
        ClientError::Timeout(TimeoutError::Request(_))
    ));

    // A late response for the now-cancelled request must not panic or hang.
    peer.send(
        channel.id(),
        &Response {
            request_id: get.request_id,
            result: ResponseResult::Success(PofValue::Nil),
        },
        &context,
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!channel.is_closed());
}

/// 6. Connection drop.
#[tokio::test]
async fn connection_drop_fails_every_in_flight_waiter_and_next_connect_is_independent() {
    let peer = MockPeer::start().await.unwrap();
    let connection = connect(&peer, |b| b.ping_interval(Duration::from_secs(60))).await;
    let context = connection.control_channel().context().clone();

    let mut channels = Vec::new();
    for name in ["a", "b", "c"] {
        let (channel, _) = tokio::join!(
            connection.open_channel(name, Arc::new(NullReceiver)),
            peer.accept_open_channel(&context),
        );
        channels.push(channel.unwrap());
    }

    let waiters = (0..50).map(|i| {
        let channel = Arc::clone(&channels[i % channels.len()]);
        let request = KeyRequest {
            type_id: cache_type_id::GET,
            request_id: channel.next_request_id(),
            key: PofValue::String(format!("k{i}")),
        };
        async move { channel.request(&request, None).await }
    });

    let abort = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        peer.abort_connection();
    };

    let (results, ()) = tokio::time::timeout(Duration::from_secs(1), async {
        tokio::join!(futures::future::join_all(waiters), abort)
    })
    .await
    .expect("all waiters should resolve within one second");

    for result in results {
        assert!(matches!(
            result.unwrap_err(),
            ClientError::Transport(ConnectionError::Closed)
        ));
    }

    // A fresh connection's channel ids start over, independent of the one
    // that just closed.
    let second_peer = MockPeer::start().await.unwrap();
    let second_connection = connect(&second_peer, |b| b.ping_interval(Duration::from_secs(60))).await;
    let second_context = second_connection.control_channel().context().clone();
    let (second_channel, assigned_id) = tokio::join!(
        second_connection.open_channel("a", Arc::new(NullReceiver)),
        second_peer.accept_open_channel(&second_context),
    );
    assert_eq!(second_channel.unwrap().id(), assigned_id);
    assert_eq!(assigned_id, 1);
}
