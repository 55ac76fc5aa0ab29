//! WebSocket (RFC 6455) framing and handshake as a [`lattice_stream::Stream`]
//! decorator.

mod codec;
mod stream;

pub use codec::{apply_mask, calculate_accept_key, format_frame, parse_frame, CloseCode, Frame, Opcode, ParseOutcome};
pub use stream::{FrameRead, WsStream};
