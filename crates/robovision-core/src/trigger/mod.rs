//! Network trigger path
//!
//! client -> [`TriggerChannel`] -> bounded queue -> [`InspectionController`]
//! -> counter and station events. The queue belongs to the controller, so
//! either side can be restarted without the other.

pub mod channel;
pub mod controller;
pub mod framing;

pub use channel::{ChannelError, Inbound, TriggerChannel, TriggerMessage};
pub use controller::{InspectionController, InspectionCounter, TriggerCommand, result_text};
pub use framing::{Deframer, Framing, Oversized};
