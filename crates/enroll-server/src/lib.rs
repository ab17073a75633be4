//! # enroll-server
//!
//! Persistent-connection messaging for the enrollment system: the envelope
//! codec, typed protocol, broadcast registry, per-connection sessions, the
//! TCP listener, the enrollment rules, and a client for the same protocol.

pub mod broadcast;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod enrollment;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod session;

pub use broadcast::BroadcastRegistry;
pub use client::{ClientError, EnrollClient};
pub use codec::{Envelope, EnvelopeCodec, FramingError};
pub use config::{ServerConfig, SettingsError};
pub use enrollment::{EnrollError, EnrollmentCoordinator};
pub use protocol::{message_type, ProtocolError, Reply, Request};
pub use server::{EnrollServer, ServerError, ServerHandle};
