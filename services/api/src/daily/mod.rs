//! Daily: room provisioning over REST and the room transport bots run on.

pub mod rest;
pub mod transport;

pub use rest::{DailyError, DailyRestHelper, DailyRoom, RoomProvider, TOKEN_EXPIRY};
#[cfg(test)]
pub use rest::MockRoomProvider;
pub use transport::{DailyParams, DailyTransport};
