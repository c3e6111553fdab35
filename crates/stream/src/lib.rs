//! C7 Stream Manager: background turn execution with reconnectable,
//! multi-subscriber fan-out (§4.1).

mod error;
mod manager;
mod state;

pub use error::{Result, StreamError};
pub use manager::{
    StreamManager, DEFAULT_CLEANUP_DELAY, DEFAULT_RING_CAPACITY, DEFAULT_SUBSCRIBER_CAPACITY,
    DEFAULT_SWEEP_INTERVAL,
};
pub use state::StreamInfo;
