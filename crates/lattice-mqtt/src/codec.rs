//! MQTT 3.1.1 fixed-header framing and per-packet-type payload codec.

const MIN_FIXED_HEADER_SIZE: usize = 2;
const MAX_LENGTH_SIZE: usize = 4;
const STR_LENGTH_SIZE: usize = 2;
const PACKET_ID_SIZE: usize = 2;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 0x4;

const RETAIN_FLAG: u8 = 0x1;
const QOS_POS: u8 = 1;
const QOS_MASK: u8 = 0x3;
const DUP_FLAG: u8 = 0x1 << 3;

const CONNECT_CLEAN_SESSION: u8 = 0x1 << 1;
const CONNECT_WILL_FLAG: u8 = 0x1 << 2;
const CONNECT_WILL_QOS_POS: u8 = 3;
const CONNECT_WILL_QOS_MASK: u8 = 0x3 << 3;
const CONNECT_WILL_RETAIN: u8 = 0x1 << 5;
const CONNECT_PASSWORD: u8 = 0x1 << 6;
const CONNECT_USER_NAME: u8 = 0x1 << 7;

const CONNACK_SESSION_PRESENT_FLAG: u8 = 0x1;

/// The default keep-alive used when a caller doesn't specify one:
/// 3 minutes, matching the reference client's default.
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 3 * 60;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketType {
    Connect,
    Connack,
    Publish,
    Puback,
    Pubrec,
    Pubrel,
    Pubcomp,
    Subscribe,
    Suback,
    Unsubscribe,
    Unsuback,
    Pingreq,
    Pingresp,
    Disconnect,
}

impl PacketType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            1 => PacketType::Connect,
            2 => PacketType::Connack,
            3 => PacketType::Publish,
            4 => PacketType::Puback,
            5 => PacketType::Pubrec,
            6 => PacketType::Pubrel,
            7 => PacketType::Pubcomp,
            8 => PacketType::Subscribe,
            9 => PacketType::Suback,
            10 => PacketType::Unsubscribe,
            11 => PacketType::Unsuback,
            12 => PacketType::Pingreq,
            13 => PacketType::Pingresp,
            14 => PacketType::Disconnect,
            _ => return None,
        })
    }

    pub fn raw(self) -> u8 {
        match self {
            PacketType::Connect => 1,
            PacketType::Connack => 2,
            PacketType::Publish => 3,
            PacketType::Puback => 4,
            PacketType::Pubrec => 5,
            PacketType::Pubrel => 6,
            PacketType::Pubcomp => 7,
            PacketType::Subscribe => 8,
            PacketType::Suback => 9,
            PacketType::Unsubscribe => 10,
            PacketType::Unsuback => 11,
            PacketType::Pingreq => 12,
            PacketType::Pingresp => 13,
            PacketType::Disconnect => 14,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketType::Connect => "MQTT_CONNECT",
            PacketType::Connack => "MQTT_CONNACK",
            PacketType::Publish => "MQTT_PUBLISH",
            PacketType::Puback => "MQTT_PUBACK",
            PacketType::Pubrec => "MQTT_PUBREC",
            PacketType::Pubrel => "MQTT_PUBREL",
            PacketType::Pubcomp => "MQTT_PUBCOMP",
            PacketType::Subscribe => "MQTT_SUBSCRIBE",
            PacketType::Suback => "MQTT_SUBACK",
            PacketType::Unsubscribe => "MQTT_UNSUBSCRIBE",
            PacketType::Unsuback => "MQTT_UNSUBACK",
            PacketType::Pingreq => "MQTT_PINGREQ",
            PacketType::Pingresp => "MQTT_PINGRESP",
            PacketType::Disconnect => "MQTT_DISCONNECT",
        }
    }
}

/// The packet type that acknowledges `req_type` at the given QoS, or
/// `None` if `req_type` generates no direct acknowledgement.
pub fn response_type(req_type: PacketType, qos: Qos) -> Option<PacketType> {
    match req_type {
        PacketType::Subscribe => Some(PacketType::Suback),
        PacketType::Unsubscribe => Some(PacketType::Unsuback),
        PacketType::Publish => match qos {
            Qos::AtLeastOnce => Some(PacketType::Puback),
            Qos::ExactlyOnce => Some(PacketType::Pubrec),
            Qos::AtMostOnce => None,
        },
        PacketType::Pubrel => Some(PacketType::Pubcomp),
        _ => None,
    }
}

/// The packet type that `resp_type` acknowledges — the inverse of
/// [`response_type`], used to match an incoming ack against the
/// outgoing-retransmission queue.
pub fn request_type(resp_type: PacketType) -> Option<PacketType> {
    match resp_type {
        PacketType::Suback => Some(PacketType::Subscribe),
        PacketType::Unsuback => Some(PacketType::Unsubscribe),
        PacketType::Puback | PacketType::Pubrec => Some(PacketType::Publish),
        PacketType::Pubcomp => Some(PacketType::Pubrel),
        _ => None,
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Qos::AtMostOnce),
            1 => Some(Qos::AtLeastOnce),
            2 => Some(Qos::ExactlyOnce),
            _ => None,
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }

    fn to_flags(self) -> u8 {
        (self.raw() & QOS_MASK) << QOS_POS
    }

    fn from_flags(flags: u8) -> Self {
        Qos::from_raw((flags >> QOS_POS) & QOS_MASK).unwrap_or(Qos::AtMostOnce)
    }
}

#[derive(Debug)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub body_length: usize,
}

pub enum ParseOutcome {
    /// A full frame was found. `body_offset` is where the body starts;
    /// `frame_len` is the whole frame's length (header + body).
    Frame { header: FixedHeader, body_offset: usize, frame_len: usize },
    NeedMore,
    /// An unrecognized packet type or an over-long length field.
    Malformed,
}

/// Decodes the MQTT variable-length-integer remaining-length field.
/// Returns `(value, bytes_consumed)`, or `None` if more bytes are needed
/// (or the encoding exceeds [`MAX_LENGTH_SIZE`] bytes, which is malformed).
fn decode_length(data: &[u8]) -> Option<Result<(usize, usize), ()>> {
    let mut multiplier: usize = 1;
    let mut value: usize = 0;
    for (idx, &byte) in data.iter().enumerate() {
        if idx >= MAX_LENGTH_SIZE {
            return Some(Err(()));
        }
        value += (byte & 0x7F) as usize * multiplier;
        multiplier *= 128;
        if byte & 0x80 == 0 {
            return Some(Ok((value, idx + 1)));
        }
    }
    if data.len() >= MAX_LENGTH_SIZE {
        Some(Err(()))
    } else {
        None
    }
}

fn encode_length(value: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(4);
    let mut value = value;
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
    out
}

pub fn parse_frame(data: &[u8]) -> ParseOutcome {
    if data.len() < MIN_FIXED_HEADER_SIZE {
        return ParseOutcome::NeedMore;
    }

    let packet_type = match PacketType::from_raw((data[0] >> 4) & 0xF) {
        Some(t) => t,
        None => return ParseOutcome::Malformed,
    };
    let flags = data[0] & 0xF;

    let (body_length, length_bytes) = match decode_length(&data[1..]) {
        None => return ParseOutcome::NeedMore,
        Some(Err(())) => return ParseOutcome::Malformed,
        Some(Ok(pair)) => pair,
    };

    let body_offset = 1 + length_bytes;
    let frame_len = body_offset + body_length;
    if data.len() < frame_len {
        return ParseOutcome::NeedMore;
    }

    ParseOutcome::Frame { header: FixedHeader { packet_type, flags, body_length }, body_offset, frame_len }
}

pub fn format_fixed_header(packet_type: PacketType, flags: u8, body_length: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(MIN_FIXED_HEADER_SIZE + MAX_LENGTH_SIZE);
    out.push((packet_type.raw() << 4) | flags);
    out.extend(encode_length(body_length));
    out
}

pub fn format_frame(packet_type: PacketType, flags: u8, body: &[u8]) -> Vec<u8> {
    let mut out = format_fixed_header(packet_type, flags, body.len());
    out.extend_from_slice(body);
    out
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn get_string(buf: &[u8]) -> Option<(&str, usize)> {
    if buf.len() < STR_LENGTH_SIZE {
        return None;
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let end = STR_LENGTH_SIZE + len;
    let s = core::str::from_utf8(buf.get(STR_LENGTH_SIZE..end)?).ok()?;
    Some((s, end))
}

#[derive(Debug, Default)]
pub struct Will<'a> {
    pub topic: &'a str,
    pub message: &'a [u8],
    pub qos: Qos,
    pub retain: bool,
}

impl Default for Qos {
    fn default() -> Self {
        Qos::AtMostOnce
    }
}

#[derive(Debug)]
pub struct Connect<'a> {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: &'a str,
    pub will: Option<Will<'a>>,
    pub user_name: Option<&'a str>,
    pub password: Option<&'a [u8]>,
}

pub fn parse_connect(body: &[u8]) -> Option<Connect<'_>> {
    let (_protocol_name, offset) = get_string(body)?;
    let protocol_level = *body.get(offset)?;
    let _ = protocol_level;
    let flags = *body.get(offset + 1)?;
    let keep_alive = u16::from_be_bytes([*body.get(offset + 2)?, *body.get(offset + 3)?]);
    let mut offset = offset + 4;

    let (client_id, next) = get_string(&body[offset..])?;
    offset += next;

    let will = if flags & CONNECT_WILL_FLAG != 0 {
        let (topic, next) = get_string(&body[offset..])?;
        offset += next;
        let msg_len = u16::from_be_bytes([*body.get(offset)?, *body.get(offset + 1)?]) as usize;
        offset += STR_LENGTH_SIZE;
        let message = body.get(offset..offset + msg_len)?;
        offset += msg_len;
        Some(Will {
            topic,
            message,
            qos: Qos::from_raw((flags & CONNECT_WILL_QOS_MASK) >> CONNECT_WILL_QOS_POS).unwrap_or(Qos::AtMostOnce),
            retain: flags & CONNECT_WILL_RETAIN != 0,
        })
    } else {
        None
    };

    let user_name = if flags & CONNECT_USER_NAME != 0 {
        let (name, next) = get_string(&body[offset..])?;
        offset += next;
        Some(name)
    } else {
        None
    };

    let password = if flags & CONNECT_PASSWORD != 0 {
        let len = u16::from_be_bytes([*body.get(offset)?, *body.get(offset + 1)?]) as usize;
        offset += STR_LENGTH_SIZE;
        let pass = body.get(offset..offset + len)?;
        offset += len;
        Some(pass)
    } else {
        None
    };
    let _ = offset;

    Some(Connect { clean_session: flags & CONNECT_CLEAN_SESSION != 0, keep_alive, client_id, will, user_name, password })
}

#[allow(clippy::too_many_arguments)]
pub fn format_connect(
    clean_session: bool,
    keep_alive: u16,
    client_id: &str,
    will: Option<&Will<'_>>,
    user_name: Option<&str>,
    password: Option<&[u8]>,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    put_string(&mut out, PROTOCOL_NAME);
    out.push(PROTOCOL_LEVEL);

    let mut flags = 0u8;
    if clean_session {
        flags |= CONNECT_CLEAN_SESSION;
    }
    if let Some(will) = will {
        flags |= CONNECT_WILL_FLAG;
        flags |= (will.qos.raw() << CONNECT_WILL_QOS_POS) & CONNECT_WILL_QOS_MASK;
        if will.retain {
            flags |= CONNECT_WILL_RETAIN;
        }
    }
    if password.is_some() {
        flags |= CONNECT_PASSWORD;
    }
    if user_name.is_some() {
        flags |= CONNECT_USER_NAME;
    }
    out.push(flags);
    out.extend_from_slice(&keep_alive.to_be_bytes());

    put_string(&mut out, client_id);
    if let Some(will) = will {
        put_string(&mut out, will.topic);
        out.extend_from_slice(&(will.message.len() as u16).to_be_bytes());
        out.extend_from_slice(will.message);
    }
    if let Some(user_name) = user_name {
        put_string(&mut out, user_name);
    }
    if let Some(password) = password {
        out.extend_from_slice(&(password.len() as u16).to_be_bytes());
        out.extend_from_slice(password);
    }

    out
}

#[derive(Debug)]
pub struct Connack {
    pub session_present: bool,
    pub return_code: u8,
}

pub fn parse_connack(body: &[u8]) -> Option<Connack> {
    let flags = *body.first()?;
    let return_code = *body.get(1)?;
    Some(Connack { session_present: flags & CONNACK_SESSION_PRESENT_FLAG != 0, return_code })
}

pub fn format_connack(session_present: bool, return_code: u8) -> Vec<u8> {
    let flags = if session_present { CONNACK_SESSION_PRESENT_FLAG } else { 0 };
    vec![flags, return_code]
}

#[derive(Debug)]
pub struct Publish<'a> {
    pub id: u16,
    pub topic: &'a str,
    pub payload: &'a [u8],
}

pub fn parse_publish(body: &[u8], qos: Qos) -> Option<Publish<'_>> {
    let (topic, mut offset) = get_string(body)?;
    let id = if qos != Qos::AtMostOnce {
        let id = u16::from_be_bytes([*body.get(offset)?, *body.get(offset + 1)?]);
        offset += PACKET_ID_SIZE;
        id
    } else {
        0
    };
    Some(Publish { id, topic, payload: &body[offset..] })
}

pub fn format_publish(qos: Qos, id: u16, topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(topic.len() + payload.len() + 8);
    put_string(&mut out, topic);
    if qos != Qos::AtMostOnce {
        out.extend_from_slice(&id.to_be_bytes());
    }
    out.extend_from_slice(payload);
    out
}

/// PUBLISH flags: retain bit, QoS bits, dup bit.
pub fn publish_flags(qos: Qos, retain: bool, dup: bool) -> u8 {
    let mut flags = qos.to_flags();
    if retain {
        flags |= RETAIN_FLAG;
    }
    if dup {
        flags |= DUP_FLAG;
    }
    flags
}

pub fn publish_qos(flags: u8) -> Qos {
    Qos::from_flags(flags)
}

#[derive(Debug)]
pub struct VarHeaderId {
    pub id: u16,
}

pub fn parse_var_header_id(body: &[u8]) -> Option<VarHeaderId> {
    Some(VarHeaderId { id: u16::from_be_bytes([*body.first()?, *body.get(1)?]) })
}

pub fn format_var_header_id(id: u16) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

#[derive(Debug)]
pub struct Subscribe<'a> {
    pub id: u16,
    pub topic: &'a str,
    pub qos: u8,
}

pub fn parse_subscribe(body: &[u8]) -> Option<Subscribe<'_>> {
    let id = u16::from_be_bytes([*body.first()?, *body.get(1)?]);
    let (topic, offset) = get_string(&body[2..])?;
    let qos = *body.get(2 + offset)?;
    Some(Subscribe { id, topic, qos })
}

pub fn format_subscribe(id: u16, topic: &str, qos: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(topic.len() + 5);
    out.extend_from_slice(&id.to_be_bytes());
    put_string(&mut out, topic);
    out.push(qos);
    out
}

#[derive(Debug)]
pub struct Suback {
    pub id: u16,
    pub return_code: u8,
}

pub fn parse_suback(body: &[u8]) -> Option<Suback> {
    Some(Suback { id: u16::from_be_bytes([*body.first()?, *body.get(1)?]), return_code: *body.get(2)? })
}

pub fn format_suback(id: u16, return_code: u8) -> Vec<u8> {
    let mut out = id.to_be_bytes().to_vec();
    out.push(return_code);
    out
}

#[derive(Debug)]
pub struct Unsubscribe<'a> {
    pub id: u16,
    pub topic: &'a str,
}

pub fn parse_unsubscribe(body: &[u8]) -> Option<Unsubscribe<'_>> {
    let id = u16::from_be_bytes([*body.first()?, *body.get(1)?]);
    let (topic, _) = get_string(&body[2..])?;
    Some(Unsubscribe { id, topic })
}

pub fn format_unsubscribe(id: u16, topic: &str) -> Vec<u8> {
    let mut out = id.to_be_bytes().to_vec();
    put_string(&mut out, topic);
    out
}
