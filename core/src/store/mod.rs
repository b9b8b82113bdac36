// Store module — rooms for the running session

pub mod rooms;

pub use rooms::{Room, RoomStore};
