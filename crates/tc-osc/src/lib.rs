// OSC 1.0 packing of feature snapshots, and the UDP sink that ships them.

pub mod encoder;
pub mod error;
pub mod message;
pub mod sink;

pub use encoder::{EncodedPacket, PacketEncoder};
pub use error::OscError;
pub use message::{OscArg, OscMessage, decode_packet};
pub use sink::{NetworkSink, SinkCounters, SinkStats};
