//! Priority Event Queue
//!
//! Every module owns an incoming queue and the scan manager owns a single
//! outgoing one. Both are [`EventQueue`]s: five FIFO buckets served by a
//! configurable [`DequeuePolicy`].
//!
//! # Usage
//!
//! ```rust
//! use scancore::queue::{DequeuePolicy, EventQueue, Prioritized};
//!
//! struct Job(u8);
//!
//! impl Prioritized for Job {
//!     fn priority(&self) -> u8 { self.0 }
//!     fn module_name(&self) -> Option<&str> { None }
//! }
//!
//! let queue = EventQueue::new(DequeuePolicy::Weighted);
//! queue.put(Job(4));
//! queue.put(Job(1));
//! assert_eq!(queue.get_nowait().unwrap().0, 1);
//! ```

pub mod error;
pub mod priority;

pub use error::{QueueError, QueueResult};
pub use priority::{
    DequeuePolicy, EventQueue, Prioritized, QueueEntry, MAX_PRIORITY, MIN_PRIORITY,
};
