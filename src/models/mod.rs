pub mod message;
pub mod worker;

pub use message::*;
pub use worker::*;
