//! MQTT 3.1.1 framing as a frame-oriented decorator over a
//! [`lattice_stream::Stream`].
//!
//! MQTT has no concept of a partial application write the way raw
//! bytes or WebSocket text frames do, so [`MqttStream`] does not
//! implement `Stream::read`/`write` as data paths; both report 0 and
//! close the stream instead. Use [`MqttStream::pump`] once per
//! scheduling tick to drive the read side and the typed
//! `connect`/`publish`/... methods to send.

mod codec;
mod stream;

pub use codec::{
    format_fixed_header, format_frame, parse_connack, parse_connect, parse_frame, parse_publish, parse_suback, parse_subscribe,
    parse_unsubscribe, parse_var_header_id, publish_flags, publish_qos, request_type, response_type, Connack, Connect, FixedHeader,
    ParseOutcome, PacketType, Publish, Qos, Suback, Subscribe, Unsubscribe, VarHeaderId, Will, DEFAULT_KEEP_ALIVE_SECS,
};
pub use stream::{IncomingPacket, MqttStream};
