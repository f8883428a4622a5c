use bytes::BytesMut;
use pof::{PofContext, PofReader, PofWriter};
use protocol::control::{
    control_registry, type_id, NotifyChannelClosed, NotifyConnectionClosed, OpenChannelRequest,
    OpenChannelResponse, OpenConnectionRequest, OpenConnectionResponse, PingRequest, PingResponse,
};
use protocol::{Message, MessageFactory, PortableException};

fn roundtrip<M: Message + Default>(msg: &M) -> M {
    let context = PofContext::builder().build();
    let mut buf = BytesMut::new();
    {
        let mut writer = PofWriter::new(&mut buf, &context);
        msg.encode(&mut writer).unwrap();
    }
    let mut bytes = buf.freeze();
    let mut reader = PofReader::new(&mut bytes, &context);
    let mut out = M::default();
    out.decode(&mut reader).unwrap();
    out
}

#[test]
fn open_connection_request_round_trips() {
    let msg = OpenConnectionRequest {
        request_id: 1,
        client_identity: b"distcache-client/0.1".to_vec(),
        protocol_version: 1,
    };
    let decoded = roundtrip(&msg);
    assert_eq!(decoded.request_id, 1);
    assert_eq!(decoded.client_identity, b"distcache-client/0.1");
    assert_eq!(decoded.protocol_version, 1);
    assert_eq!(decoded.request_id(), Some(1));
}

#[test]
fn open_connection_request_round_trips_non_utf8_identity() {
    let msg = OpenConnectionRequest {
        request_id: 2,
        client_identity: vec![0xff, 0x00, 0xfe, 0x80],
        protocol_version: 1,
    };
    let decoded = roundtrip(&msg);
    assert_eq!(decoded.client_identity, vec![0xff, 0x00, 0xfe, 0x80]);
}

#[test]
fn open_connection_response_carries_rejection() {
    let msg = OpenConnectionResponse {
        request_id: 2,
        accepted_protocol_version: 0,
        rejection: Some(PortableException {
            class_name: "ProtocolMismatchException".to_string(),
            message: "unsupported version".to_string(),
            cause: None,
            stack_frames: Vec::new(),
        }),
    };
    let decoded = roundtrip(&msg);
    let rejection = decoded.rejection.expect("rejection preserved");
    assert_eq!(rejection.class_name, "ProtocolMismatchException");
    assert_eq!(rejection.message, "unsupported version");
}

#[test]
fn open_channel_round_trips() {
    let request = OpenChannelRequest {
        request_id: 3,
        receiver_name: "orders".to_string(),
    };
    let decoded = roundtrip(&request);
    assert_eq!(decoded.receiver_name, "orders");

    let response = OpenChannelResponse {
        request_id: 3,
        channel_id: 42,
        rejection: None,
    };
    let decoded = roundtrip(&response);
    assert_eq!(decoded.channel_id, 42);
    assert!(decoded.rejection.is_none());
}

#[test]
fn ping_round_trips() {
    let request = PingRequest { request_id: 9 };
    assert_eq!(roundtrip(&request).request_id, 9);
    let response = PingResponse { request_id: 9 };
    assert_eq!(roundtrip(&response).request_id, 9);
}

#[test]
fn notify_messages_preserve_cause() {
    let notify = NotifyConnectionClosed {
        cause: Some(PortableException {
            class_name: "java.io.IOException".to_string(),
            message: "connection reset".to_string(),
            cause: None,
            stack_frames: Vec::new(),
        }),
    };
    let decoded = roundtrip(&notify);
    assert_eq!(decoded.cause.unwrap().message, "connection reset");

    let channel_notify = NotifyChannelClosed { cause: None };
    assert!(roundtrip(&channel_notify).cause.is_none());
}

#[test]
fn control_registry_constructs_by_type_id() {
    let registry = control_registry();
    let msg = registry.create(type_id::OPEN_CONNECTION_REQUEST).unwrap();
    assert_eq!(msg.type_id(), type_id::OPEN_CONNECTION_REQUEST);
    assert!(registry.create(999).is_err());
}
