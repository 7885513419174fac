//! Protocol module containing the ASCII command codec for the matrix switcher.

pub mod codec;

pub use codec::{
    decode_route_command, decode_status_response, encode_route, encode_status_query,
    render_status_response, ProtocolError, MAX_OUTPUTS, STATUS_READBACK_LEN,
};
