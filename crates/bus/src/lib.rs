pub mod bus;
pub mod links;

pub use bus::{BusHealth, MessageBus};
