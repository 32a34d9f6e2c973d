mod channel;
mod protocol;
#[cfg(test)]
mod tests;

pub use channel::{
    ChannelEvent, ChannelSender, ChannelState, DropReason, SendOutcome, TransportChannel,
};
pub use protocol::{decode_incoming, encode_outgoing, AnnotationResult, IncomingMessage};
