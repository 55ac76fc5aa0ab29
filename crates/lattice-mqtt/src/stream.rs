use std::collections::VecDeque;
use std::time::Duration;

use lattice_buffer::Buffer;
use lattice_stream::{has_outgoing_data_through, FlushOutcome, ReadOutcome, Status, Stream, StreamError};
use lattice_time::{Clock, TimeBase, Timer};
use tracing::warn;

use crate::codec::{self, PacketType, Publish, Qos, Will};

const MESSAGE_BUFFER_SIZE: usize = 1024;
const KEEP_ALIVE_SERVER_SLACK_SECS: u16 = 15;
const RESEND_ATTEMPTS: u32 = 3;
const RESEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Reserved fixed-header flags required on PUBREL, SUBSCRIBE and
/// UNSUBSCRIBE by the MQTT 3.1.1 spec (section 3.6.1, 3.8.1, 3.10.1).
const RESERVED_QOS1_FLAGS: u8 = 0x02;

/// One received or pending-acknowledgement MQTT packet, queued as raw
/// encoded bytes the way the original retransmission queue keeps them —
/// a resend never re-derives the frame, it replays exactly what was sent.
struct FrameItem {
    packet_type: PacketType,
    id: u16,
    flags: u8,
    frame: Vec<u8>,
}

/// A complete, reassembled incoming packet handed to the caller by
/// [`MqttStream::recv`].
#[derive(Debug)]
pub struct IncomingPacket {
    pub packet_type: PacketType,
    pub flags: u8,
    pub body: Vec<u8>,
}

/// Decorates a byte stream with MQTT 3.1.1 framing.
///
/// Unlike [`lattice_ws::WsStream`], this decorator does not forward raw
/// `read`/`write` calls: MQTT is frame-only. Call [`connect`](Self::connect),
/// [`publish`](Self::publish), etc. to send, and [`recv`](Self::recv) to
/// retrieve a fully reassembled incoming packet after [`pump`](Self::pump)
/// (normally invoked once per scheduling tick) has drained the socket.
pub struct MqttStream<S: Stream> {
    decorated: S,
    status: Status,
    inbuf: Buffer,
    incoming: VecDeque<IncomingPacket>,
    outgoing: VecDeque<FrameItem>,
    inbound_qos2: VecDeque<FrameItem>,
    client_role: bool,
    clock: Clock,
    keep_alive_secs: u16,
    keep_alive_responded: bool,
    keep_alive_timer: Timer,
    resend_attempts: u32,
    resend_timer: Timer,
}

impl<S: Stream> MqttStream<S> {
    pub fn new(decorated: S, clock: Clock) -> Self {
        Self {
            decorated,
            status: Status::Init,
            inbuf: Buffer::with_capacity(MESSAGE_BUFFER_SIZE),
            incoming: VecDeque::new(),
            outgoing: VecDeque::new(),
            inbound_qos2: VecDeque::new(),
            client_role: false,
            clock,
            keep_alive_secs: 0,
            keep_alive_responded: true,
            keep_alive_timer: Timer::new(TimeBase::Seconds),
            resend_attempts: 0,
            resend_timer: Timer::new(TimeBase::Seconds),
        }
    }

    fn real_write(&mut self, frame: &[u8]) -> Result<(), StreamError> {
        self.decorated.write(frame)?;
        Ok(())
    }

    fn write_frame(&mut self, packet_type: PacketType, flags: u8, body: &[u8]) -> Result<(), StreamError> {
        let frame = codec::format_frame(packet_type, flags, body);
        self.real_write(&frame)
    }

    /// Sends a CONNECT. Keep-alive is used verbatim, unlike the server
    /// side's handling of an incoming CONNECT, which pads it with slack
    /// before arming its own keep-alive timer.
    #[allow(clippy::too_many_arguments)]
    pub fn connect(
        &mut self,
        clean_session: bool,
        keep_alive: u16,
        client_id: &str,
        will: Option<Will<'_>>,
        user_name: Option<&str>,
        password: Option<&[u8]>,
    ) -> Result<(), StreamError> {
        self.client_role = true;
        self.keep_alive_secs = keep_alive;

        let body = codec::format_connect(clean_session, keep_alive, client_id, will.as_ref(), user_name, password);
        self.write_frame(PacketType::Connect, 0, &body)
    }

    pub fn connack(&mut self, session_present: bool, return_code: u8) -> Result<(), StreamError> {
        if return_code == 0 {
            self.status = Status::Ready;
        }
        let body = codec::format_connack(session_present, return_code);
        self.write_frame(PacketType::Connack, 0, &body)
    }

    /// Publishes `payload` to `topic`. At QoS 0 the frame is fired and
    /// forgotten; at QoS 1/2 it is queued for retransmission until
    /// acknowledged, and only actually put on the wire immediately if no
    /// earlier outgoing message is still awaiting acknowledgement — later
    /// ones wait their turn so acks and retries stay in order.
    pub fn publish(&mut self, retain: bool, dup: bool, qos: Qos, id: u16, topic: &str, payload: &[u8]) -> Result<(), StreamError> {
        if qos != Qos::AtMostOnce {
            flux_utils::safe_assert_ne!(id, 0, "mqtt: packet identifier must be non-zero above QoS 0");
        }
        let flags = codec::publish_flags(qos, retain, dup);
        let body = codec::format_publish(qos, id, topic, payload);
        let frame = codec::format_frame(PacketType::Publish, flags, &body);

        let should_send_now = self.outgoing.is_empty();
        if should_send_now {
            self.real_write(&frame)?;
            if qos != Qos::AtMostOnce {
                self.resend_timer.start(&self.clock, RESEND_TIMEOUT);
                self.resend_attempts = 0;
            }
        }
        if !should_send_now || qos != Qos::AtMostOnce {
            self.outgoing.push_back(FrameItem { packet_type: PacketType::Publish, id, flags, frame });
        }
        Ok(())
    }

    pub fn puback(&mut self, id: u16) -> Result<(), StreamError> {
        self.write_frame(PacketType::Puback, 0, &codec::format_var_header_id(id))
    }

    pub fn pubrec(&mut self, id: u16) -> Result<(), StreamError> {
        self.write_frame(PacketType::Pubrec, 0, &codec::format_var_header_id(id))
    }

    /// Replies to a received PUBREC; jumps to the head of the
    /// retransmission queue so it is the next thing retried.
    pub fn pubrel(&mut self, id: u16) -> Result<(), StreamError> {
        let frame = codec::format_frame(PacketType::Pubrel, RESERVED_QOS1_FLAGS, &codec::format_var_header_id(id));
        self.outgoing.push_front(FrameItem { packet_type: PacketType::Pubrel, id, flags: RESERVED_QOS1_FLAGS, frame: frame.clone() });
        self.real_write(&frame)
    }

    pub fn pubcomp(&mut self, id: u16) -> Result<(), StreamError> {
        self.write_frame(PacketType::Pubcomp, 0, &codec::format_var_header_id(id))
    }

    pub fn subscribe(&mut self, id: u16, topic: &str, qos: u8) -> Result<(), StreamError> {
        flux_utils::safe_assert_ne!(id, 0, "mqtt: packet identifier must be non-zero");
        let body = codec::format_subscribe(id, topic, qos);
        let frame = codec::format_frame(PacketType::Subscribe, RESERVED_QOS1_FLAGS, &body);

        if self.outgoing.is_empty() {
            self.real_write(&frame)?;
            self.resend_timer.start(&self.clock, RESEND_TIMEOUT);
            self.resend_attempts = 0;
        }
        self.outgoing.push_back(FrameItem { packet_type: PacketType::Subscribe, id, flags: RESERVED_QOS1_FLAGS, frame });
        Ok(())
    }

    pub fn suback(&mut self, id: u16, return_code: u8) -> Result<(), StreamError> {
        self.write_frame(PacketType::Suback, 0, &codec::format_suback(id, return_code))
    }

    pub fn unsubscribe(&mut self, id: u16, topic: &str) -> Result<(), StreamError> {
        flux_utils::safe_assert_ne!(id, 0, "mqtt: packet identifier must be non-zero");
        let body = codec::format_unsubscribe(id, topic);
        let frame = codec::format_frame(PacketType::Unsubscribe, RESERVED_QOS1_FLAGS, &body);

        if self.outgoing.is_empty() {
            self.real_write(&frame)?;
            self.resend_timer.start(&self.clock, RESEND_TIMEOUT);
            self.resend_attempts = 0;
        }
        self.outgoing.push_back(FrameItem { packet_type: PacketType::Unsubscribe, id, flags: RESERVED_QOS1_FLAGS, frame });
        Ok(())
    }

    pub fn unsuback(&mut self, id: u16) -> Result<(), StreamError> {
        self.write_frame(PacketType::Unsuback, 0, &codec::format_var_header_id(id))
    }

    pub fn pingreq(&mut self) -> Result<(), StreamError> {
        self.write_frame(PacketType::Pingreq, 0, &[])
    }

    pub fn pingresp(&mut self) -> Result<(), StreamError> {
        self.write_frame(PacketType::Pingresp, 0, &[])
    }

    pub fn disconnect(&mut self) -> Result<(), StreamError> {
        self.write_frame(PacketType::Disconnect, 0, &[])?;
        self.status = Status::Closing;
        Ok(())
    }

    /// Pops the next fully reassembled incoming packet, if any.
    pub fn recv(&mut self) -> Option<IncomingPacket> {
        self.incoming.pop_front()
    }

    fn remove_outgoing(&mut self, packet_type: PacketType, id: u16) -> bool {
        let before = self.outgoing.len();
        self.outgoing.retain(|item| !(item.packet_type == packet_type && item.id == id));
        self.outgoing.len() != before
    }

    fn deliver_or_queue(&mut self, packet_type: PacketType, flags: u8, body: Vec<u8>) {
        self.incoming.push_back(IncomingPacket { packet_type, flags, body });
    }

    fn handle_frame(&mut self, header_type: PacketType, flags: u8, body: &[u8]) -> Result<(), StreamError> {
        match header_type {
            PacketType::Connect => {
                if let Some(connect) = codec::parse_connect(body) {
                    if connect.keep_alive > 0 {
                        self.keep_alive_secs = connect.keep_alive + KEEP_ALIVE_SERVER_SLACK_SECS;
                        self.keep_alive_timer.start(&self.clock, Duration::from_secs(self.keep_alive_secs as u64));
                    }
                }
                self.deliver_or_queue(header_type, flags, body.to_vec());
            }
            PacketType::Connack => {
                if let Some(connack) = codec::parse_connack(body) {
                    if connack.return_code == 0 && self.keep_alive_secs > 0 {
                        self.keep_alive_timer.start(&self.clock, Duration::from_secs(self.keep_alive_secs as u64));
                        self.status = Status::Ready;
                    }
                }
                self.deliver_or_queue(header_type, flags, body.to_vec());
            }
            PacketType::Publish => {
                let qos = codec::publish_qos(flags);
                let Some(Publish { id, .. }) = codec::parse_publish(body, qos) else {
                    return Ok(());
                };

                if qos == Qos::ExactlyOnce {
                    self.inbound_qos2.retain(|item| item.id != id);
                    self.inbound_qos2.push_back(FrameItem { packet_type: header_type, id, flags, frame: body.to_vec() });
                    self.pubrec(id)?;
                } else {
                    if qos == Qos::AtLeastOnce {
                        self.puback(id)?;
                    }
                    self.deliver_or_queue(header_type, flags, body.to_vec());
                }
            }
            PacketType::Suback | PacketType::Unsuback | PacketType::Puback | PacketType::Pubrec | PacketType::Pubcomp => {
                let Some(varhdr) = codec::parse_var_header_id(body) else { return Ok(()) };
                let Some(req_type) = codec::request_type(header_type) else { return Ok(()) };
                if self.remove_outgoing(req_type, varhdr.id) {
                    self.resend_timer.stop();
                }

                match header_type {
                    PacketType::Pubrec => {
                        self.pubrel(varhdr.id)?;
                        self.resend_timer.start(&self.clock, RESEND_TIMEOUT);
                        self.resend_attempts = 0;
                    }
                    PacketType::Suback | PacketType::Unsuback => {
                        self.deliver_or_queue(header_type, flags, body.to_vec());
                    }
                    _ => {}
                }
            }
            PacketType::Pubrel => {
                let Some(varhdr) = codec::parse_var_header_id(body) else { return Ok(()) };
                self.pubcomp(varhdr.id)?;

                if let Some(pos) = self.inbound_qos2.iter().position(|item| item.id == varhdr.id) {
                    let item = self.inbound_qos2.remove(pos).unwrap();
                    self.deliver_or_queue(item.packet_type, item.flags, item.frame);
                }
            }
            PacketType::Pingreq => {
                self.pingresp()?;
                self.keep_alive_timer.start(&self.clock, Duration::from_secs(self.keep_alive_secs as u64));
            }
            PacketType::Pingresp => {
                self.keep_alive_responded = true;
            }
            PacketType::Disconnect => {
                self.deliver_or_queue(header_type, flags, vec![0]);
            }
        }
        Ok(())
    }

    /// Drains whatever the decorated stream has available, parsing
    /// complete MQTT frames out of it and dispatching each one. Call
    /// once per scheduling tick; reassembled packets collect in the
    /// queue [`recv`](Self::recv) drains.
    pub fn pump(&mut self) -> Result<(), StreamError> {
        let mut scratch = [0u8; MESSAGE_BUFFER_SIZE];
        loop {
            match self.decorated.read(&mut scratch)? {
                ReadOutcome::WouldBlock => return Ok(()),
                ReadOutcome::Eof => return Ok(()),
                ReadOutcome::Data(n) => {
                    self.inbuf.append(&scratch[..n]);
                    loop {
                        match codec::parse_frame(self.inbuf.as_slice()) {
                            codec::ParseOutcome::NeedMore => break,
                            codec::ParseOutcome::Malformed => {
                                warn!("mqtt: malformed frame, resetting buffer");
                                self.inbuf.reset();
                                break;
                            }
                            codec::ParseOutcome::Frame { header, body_offset, frame_len } => {
                                let body = self.inbuf.as_slice()[body_offset..frame_len].to_vec();
                                self.handle_frame(header.packet_type, header.flags, &body)?;
                                self.inbuf.cut(frame_len);
                            }
                        }
                    }
                }
            }
        }
    }

    pub fn has_incoming(&self) -> bool {
        !self.incoming.is_empty()
    }
}

impl<S: Stream> Stream for MqttStream<S> {
    fn fd(&self) -> std::os::fd::RawFd {
        self.decorated.fd()
    }

    fn status(&self) -> Status {
        self.status
    }

    fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// MQTT is frame-only: raw `read`/`write` return 0 and close the
    /// stream rather than erroring, mirroring a socket that reports EOF
    /// on misuse instead of raising.
    fn read(&mut self, _dst: &mut [u8]) -> Result<ReadOutcome, StreamError> {
        self.status = Status::Closing;
        Ok(ReadOutcome::Eof)
    }

    fn write(&mut self, _src: &[u8]) -> Result<usize, StreamError> {
        self.status = Status::Closing;
        Ok(0)
    }

    fn flush(&mut self) -> Result<FlushOutcome, StreamError> {
        self.decorated.flush()
    }

    fn time(&mut self) -> Result<(), StreamError> {
        if self.keep_alive_timer.running() && self.keep_alive_timer.expired(&self.clock) {
            if self.client_role {
                if self.keep_alive_responded {
                    self.pingreq()?;
                    self.keep_alive_responded = false;
                    self.keep_alive_timer.restart(&self.clock);
                } else {
                    warn!(fd = self.fd(), "mqtt: missing PING response, closing");
                    self.status = Status::Closing;
                }
            } else {
                warn!(fd = self.fd(), "mqtt: missing PING request, closing");
                self.status = Status::Closing;
            }
        }

        if self.resend_timer.running() && self.resend_timer.expired(&self.clock) {
            if let Some(item) = self.outgoing.front() {
                self.resend_attempts += 1;
                if self.resend_attempts < RESEND_ATTEMPTS {
                    warn!(fd = self.fd(), packet = item.packet_type.name(), "mqtt: resending unacknowledged message");
                    let frame = item.frame.clone();
                    self.real_write(&frame)?;
                    self.resend_timer.start(&self.clock, RESEND_TIMEOUT);
                } else {
                    warn!(fd = self.fd(), packet = item.packet_type.name(), "mqtt: abandoning unacknowledged message");
                    self.outgoing.pop_front();
                    self.resend_timer.stop();
                    self.resend_attempts = 0;
                }
            }
        }
        if !self.resend_timer.running() {
            if let Some(item) = self.outgoing.front() {
                let frame = item.frame.clone();
                self.real_write(&frame)?;
                self.resend_timer.start(&self.clock, RESEND_TIMEOUT);
            }
        }

        self.decorated.time()
    }

    fn has_outgoing_data(&self) -> bool {
        has_outgoing_data_through(false, &self.decorated)
    }
}
