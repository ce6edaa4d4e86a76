//! Background Tasks Module
//!
//! Contains background tasks owned by cache backends.
//!
//! # Tasks
//! - TTL Sweeper: Removes expired local entries at a fixed interval

mod sweeper;

pub use sweeper::{spawn_sweeper, sweep_expired};
