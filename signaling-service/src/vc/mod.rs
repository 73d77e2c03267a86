//! Voice presence and WebRTC signaling.
//!
//! [`hub::Hub`] maps channels to [`room::Room`]s and performs every
//! membership transition, [`session::ClientSession`] drives one WebSocket,
//! and [`presence::PresenceStore`] is the REST-readable projection of room
//! membership.

pub mod error;
pub mod hub;
pub mod presence;
pub mod room;
pub mod session;

pub use error::VoiceError;
pub use hub::Hub;
pub use session::ClientSession;
