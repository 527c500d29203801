//! # Voice Module
//!
//! Coordinación del handshake de voz: empareja el voice state y el voice
//! server que llegan por separado desde el gateway antes de entregar las
//! credenciales combinadas al nodo.

pub mod handshake;

pub use handshake::{HandshakeOutcome, VoiceHandshakeCoordinator};
