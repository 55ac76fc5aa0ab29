//! End-to-end scenarios wiring two streams over a real loopback socket
//! pair, client and server side by side in the same test. Everything
//! here runs single-threaded: a loopback `TcpStream` write is visible to
//! the peer's next `read` without needing a second thread or a sleep.

use std::net::TcpListener;
use std::time::Duration;

use crate::{http, mqtt, poll, stream, time, ws};
use mqtt::{MqttStream, PacketType, Qos};
use stream::{RawStream, ReadOutcome, Status, Stream};
use time::Clock;
use ws::WsStream;

fn loopback_pair() -> (RawStream, RawStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let a = std::net::TcpStream::connect(addr).unwrap();
    let (b, _) = listener.accept().unwrap();
    a.set_nonblocking(true).unwrap();
    b.set_nonblocking(true).unwrap();
    (RawStream::new(mio::net::TcpStream::from_std(a)), RawStream::new(mio::net::TcpStream::from_std(b)))
}

fn drain_to_would_block<S: Stream>(s: &mut S, scratch: &mut [u8]) {
    loop {
        match s.read(scratch).unwrap() {
            ReadOutcome::WouldBlock => return,
            ReadOutcome::Eof => return,
            ReadOutcome::Data(_) => {}
        }
    }
}

// MQTT CONNECT / CONNACK handshake.
#[test]
fn mqtt_connect_connack_handshake() {
    let clock = Clock::mock();
    let (client_sock, server_sock) = loopback_pair();
    let mut client = MqttStream::new(client_sock, clock.clone());
    let mut server = MqttStream::new(server_sock, clock);

    client.connect(true, 10, "client-id-1", None, None, None).unwrap();

    server.pump().unwrap();
    let pkt = server.recv().expect("server should have a queued CONNECT");
    assert_eq!(pkt.packet_type, PacketType::Connect);
    let connect = mqtt::parse_connect(&pkt.body).unwrap();
    assert_eq!(connect.keep_alive, 10);
    assert_eq!(connect.client_id, "client-id-1");

    server.connack(false, 0).unwrap();

    client.pump().unwrap();
    let pkt = client.recv().expect("client should have a queued CONNACK");
    assert_eq!(pkt.packet_type, PacketType::Connack);
    let connack = mqtt::parse_connack(&pkt.body).unwrap();
    assert!(!connack.session_present);
    assert_eq!(connack.return_code, 0);
    assert_eq!(client.status(), Status::Ready);
}

// MQTT SUBSCRIBE / SUBACK round trip.
#[test]
fn mqtt_subscribe_suback_round_trip() {
    let clock = Clock::mock();
    let (client_sock, server_sock) = loopback_pair();
    let mut client = MqttStream::new(client_sock, clock.clone());
    let mut server = MqttStream::new(server_sock, clock);

    client.subscribe(1001, "topic/one", 2).unwrap();

    server.pump().unwrap();
    let pkt = server.recv().expect("server should have a queued SUBSCRIBE");
    assert_eq!(pkt.packet_type, PacketType::Subscribe);
    assert_eq!(pkt.flags, 0x02);
    let sub = mqtt::parse_subscribe(&pkt.body).unwrap();
    assert_eq!(sub.id, 1001);
    assert_eq!(sub.topic, "topic/one");
    assert_eq!(sub.qos, 2);

    server.suback(1001, 2).unwrap();

    client.pump().unwrap();
    let pkt = client.recv().expect("client should have a queued SUBACK");
    assert_eq!(pkt.packet_type, PacketType::Suback);
    let suback = mqtt::parse_suback(&pkt.body).unwrap();
    assert_eq!(suback.id, 1001);
    assert_eq!(suback.return_code, 2);
}

// MQTT QoS 2 PUBLISH retransmits before the server ever polls, then delivers once, in order.
#[test]
fn mqtt_publish_qos2_retransmits_then_delivers_in_order() {
    let clock = Clock::mock();
    let (client_sock, server_sock) = loopback_pair();
    let mut client = MqttStream::new(client_sock, clock.clone());
    let mut server = MqttStream::new(server_sock, clock.clone());

    client.publish(false, false, Qos::ExactlyOnce, 1001, "a/b", b"one").unwrap();
    client.publish(false, false, Qos::ExactlyOnce, 1002, "a/b", b"two").unwrap();
    client.publish(false, false, Qos::ExactlyOnce, 1003, "a/b", b"three").unwrap();

    // Nobody has polled yet. Advancing past the resend timeout retransmits
    // the unacknowledged head of the queue before the server ever reads.
    clock.advance(Duration::from_secs(33));
    client.time().unwrap();

    let mut delivered = Vec::new();
    for _ in 0..20 {
        server.pump().unwrap();
        client.pump().unwrap();
        while let Some(pkt) = server.recv() {
            if pkt.packet_type == PacketType::Publish {
                let qos = mqtt::publish_qos(pkt.flags);
                let parsed = mqtt::parse_publish(&pkt.body, qos).unwrap();
                delivered.push(parsed.id);
            }
        }
        if delivered.len() >= 2 {
            break;
        }
        clock.advance(Duration::from_secs(33));
        client.time().unwrap();
        server.time().unwrap();
    }

    assert_eq!(delivered, vec![1001, 1002]);
}

// At most 3 on-wire retransmissions before an unacknowledged frame is abandoned.
#[test]
fn mqtt_retransmission_is_capped() {
    let clock = Clock::mock();
    let (client_sock, mut server_sock) = loopback_pair();
    let mut client = MqttStream::new(client_sock, clock.clone());

    client.publish(false, false, Qos::AtLeastOnce, 7, "a/b", b"x").unwrap();

    let mut scratch = [0u8; 256];
    let mut wire = Vec::new();
    for _ in 0..6 {
        clock.advance(Duration::from_secs(31));
        client.time().unwrap();
        loop {
            match server_sock.read(&mut scratch).unwrap() {
                ReadOutcome::Data(n) => wire.extend_from_slice(&scratch[..n]),
                ReadOutcome::WouldBlock | ReadOutcome::Eof => break,
            }
        }
    }

    let mut publish_frames = 0;
    let mut rest = &wire[..];
    loop {
        match mqtt::parse_frame(rest) {
            mqtt::ParseOutcome::Frame { header, body_offset: _, frame_len } => {
                if header.packet_type == PacketType::Publish {
                    publish_frames += 1;
                }
                rest = &rest[frame_len..];
            }
            _ => break,
        }
    }

    // One immediate send plus two retransmissions; the timer expiring a
    // third time abandons the frame instead of sending it again.
    assert_eq!(publish_frames, 3);
}

// A client that gets no PINGRESP within a keep-alive interval closes the connection.
#[test]
fn mqtt_client_closes_after_missed_pingresp() {
    let clock = Clock::mock();
    let (client_sock, server_sock) = loopback_pair();
    let mut client = MqttStream::new(client_sock, clock.clone());
    let mut server = MqttStream::new(server_sock, clock.clone());

    client.connect(true, 10, "c1", None, None, None).unwrap();
    server.pump().unwrap();
    server.recv().unwrap();
    server.connack(false, 0).unwrap();
    client.pump().unwrap();
    client.recv().unwrap();
    assert_eq!(client.status(), Status::Ready);

    clock.advance(Duration::from_secs(10));
    client.time().unwrap();
    assert_eq!(client.status(), Status::Ready);

    clock.advance(Duration::from_secs(10));
    client.time().unwrap();
    assert_eq!(client.status(), Status::Closing);
}

fn handshake(client: &mut WsStream<RawStream>, server: &mut WsStream<RawStream>) {
    client.connect("/", None, &[]).unwrap();
    let mut scratch = [0u8; 256];
    drain_to_would_block(server, &mut scratch);
    assert_eq!(server.status(), Status::Ready);
    drain_to_would_block(client, &mut scratch);
    assert_eq!(client.status(), Status::Ready);
}

// WS handshake, then a client-to-server payload.
#[test]
fn ws_handshake_then_binary_payload() {
    let clock = Clock::mock();
    let (client_sock, server_sock) = loopback_pair();
    let mut client = WsStream::new_client(client_sock, clock.clone());
    let mut server = WsStream::new_server(server_sock, clock);
    handshake(&mut client, &mut server);

    client.write(b"payload_first").unwrap();
    let mut scratch = [0u8; 256];
    let n = loop {
        match server.read(&mut scratch).unwrap() {
            ReadOutcome::Data(n) => break n,
            ReadOutcome::WouldBlock => continue,
            ReadOutcome::Eof => panic!("unexpected eof"),
        }
    };
    assert_eq!(&scratch[..n], b"payload_first");
}

// WS fragmentation: three frames reassemble into one read.
#[test]
fn ws_reassembles_fragmented_frames() {
    let (mut raw_peer, server_sock) = loopback_pair();
    let mut server = WsStream::new_server(server_sock, Clock::mock());

    let key = "dGhlIHNhbXBsZSBub25jZQ==";
    let request = http::MsgBuilder::request("GET", "/", "HTTP/1.1")
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Key", key)
        .build();
    raw_peer.write(&request).unwrap();

    let mut scratch = [0u8; 256];
    drain_to_would_block(&mut server, &mut scratch);
    assert_eq!(server.status(), Status::Ready);
    drain_to_would_block(&mut raw_peer, &mut scratch); // discard the handshake response

    raw_peer.write(&ws::format_frame(ws::Opcode::Text, false, None, b"first")).unwrap();
    raw_peer.write(&ws::format_frame(ws::Opcode::Continue, false, None, b"_")).unwrap();
    raw_peer.write(&ws::format_frame(ws::Opcode::Continue, true, None, b"second")).unwrap();

    let (opcode, n) = loop {
        match server.read_frame(&mut scratch).unwrap() {
            ws::FrameRead::Frame { opcode, len } => break (opcode, len),
            ws::FrameRead::WouldBlock => continue,
            ws::FrameRead::Eof => panic!("unexpected eof"),
        }
    };
    assert_eq!(opcode, ws::Opcode::Text);
    assert_eq!(&scratch[..n], b"first_second");
}

// `read` streams bytes out of a fragment chain's head slice before the
// chain's `fin` flag arrives, unlike `read_frame`, which waits for it.
#[test]
fn ws_read_streams_partial_fragment_before_fin() {
    let (mut raw_peer, server_sock) = loopback_pair();
    let mut server = WsStream::new_server(server_sock, Clock::mock());

    let key = "dGhlIHNhbXBsZSBub25jZQ==";
    let request = http::MsgBuilder::request("GET", "/", "HTTP/1.1")
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Key", key)
        .build();
    raw_peer.write(&request).unwrap();

    let mut scratch = [0u8; 256];
    drain_to_would_block(&mut server, &mut scratch);
    assert_eq!(server.status(), Status::Ready);
    drain_to_would_block(&mut raw_peer, &mut scratch);

    raw_peer.write(&ws::format_frame(ws::Opcode::Text, false, None, b"partial")).unwrap();

    let n = loop {
        match server.read(&mut scratch).unwrap() {
            ReadOutcome::Data(n) => break n,
            ReadOutcome::WouldBlock => continue,
            ReadOutcome::Eof => panic!("unexpected eof"),
        }
    };
    assert_eq!(&scratch[..n], b"partial");

    // The same message still hasn't seen its closing frame.
    match server.read_frame(&mut scratch).unwrap() {
        ws::FrameRead::WouldBlock => {}
        other => panic!("expected WouldBlock pending the fin frame, got {other:?}"),
    }
}

// A masked server-to-client frame is a protocol violation and closes the client.
#[test]
fn ws_client_closes_on_masked_frame_from_server() {
    let (mut raw_peer, client_sock) = loopback_pair();
    let mut client = WsStream::new_client(client_sock, Clock::mock());

    let key = "dGhlIHNhbXBsZSBub25jZQ==";
    client.connect("/", Some(key), &[]).unwrap();

    let mut scratch = [0u8; 256];
    drain_to_would_block(&mut raw_peer, &mut scratch);

    let accept = ws::calculate_accept_key(key);
    let response = http::MsgBuilder::response("HTTP/1.1", 101, "Switching Protocols")
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Accept", &accept)
        .build();
    raw_peer.write(&response).unwrap();

    drain_to_would_block(&mut client, &mut scratch);
    assert_eq!(client.status(), Status::Ready);

    let mask = [0x01, 0x02, 0x03, 0x04];
    raw_peer.write(&ws::format_frame(ws::Opcode::Text, true, Some(mask), b"oops")).unwrap();

    drain_to_would_block(&mut client, &mut scratch);
    assert_eq!(client.status(), Status::Closing);
}

// Appended bytes survive any split into `take` calls intact.
#[test]
fn buffer_conserves_appended_bytes_across_takes() {
    let mut buf = crate::buffer::Buffer::new();
    buf.append(b"hello ");
    buf.append(b"world");

    let mut out = Vec::new();
    let mut chunk = [0u8; 4];
    loop {
        let n = buf.take(&mut chunk);
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(out, b"hello world");
}

// The accept key is base64(sha1(key || GUID)), independent of the
// handshake plumbing above it.
#[test]
fn accept_key_matches_rfc6455_worked_example() {
    // The exact key/accept pair from RFC 6455 section 1.3.
    let accept = ws::calculate_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
    assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
}

// Every stream readable at the moment of `wait` is reported.
#[test]
fn poller_reports_every_readable_stream() {
    let mut poller: poll::Poller<RawStream> = poll::Poller::new();
    let (mut a1, b1) = loopback_pair();
    let (mut a2, b2) = loopback_pair();
    let t1 = poller.register(b1).unwrap();
    let t2 = poller.register(b2).unwrap();

    a1.write(b"x").unwrap();
    a1.flush().unwrap();
    a2.write(b"y").unwrap();
    a2.flush().unwrap();

    let outcome = poller.wait(Some(Duration::from_secs(1))).unwrap();
    assert_eq!(outcome, poll::WaitOutcome::Operation);

    let ready: Vec<_> = poller.drain_ready().collect();
    assert!(ready.iter().any(|(t, r)| *t == t1 && r.incoming_ready));
    assert!(ready.iter().any(|(t, r)| *t == t2 && r.incoming_ready));
}
