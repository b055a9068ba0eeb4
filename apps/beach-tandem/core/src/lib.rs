//! Core state machine for the Beach Tandem relay. Anonymous clients publish a
//! public key, get matched with the oldest waiting peer, and from then on the
//! relay only shuttles opaque ciphertext between the two. Nothing in this crate
//! performs I/O; the server crate plugs a socket-backed [`Transport`] in.

pub mod engine;
pub mod protocol;
pub mod registry;
pub mod transport;
mod types;

pub use engine::{
    ConnectOutcome, DisconnectOutcome, DropReason, EngineError, MessageOutcome, PairingEngine,
};
pub use protocol::{ChatPayload, ClientEvent, ConnectPayload, ServerEvent};
pub use registry::{Registry, RegistryError, RegistrySnapshot, RegistryState};
pub use transport::{RecordingTransport, Transport, TransportError};
pub use types::{ConnId, PublicKey};
