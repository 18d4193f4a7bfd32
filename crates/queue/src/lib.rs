//! Durable job queue with retrying workers.
//!
//! Jobs are pushed onto a named queue through a [`storage::Storage`] backend and
//! drained by [`prelude::Worker`]s. A handler error reschedules the job using the
//! worker's [`layers::RetryLayer`]; jobs that exhaust their attempts are marked
//! dead. Delivery is at-least-once: a job is only removed after its handler
//! returns `Ok`.

pub mod layers;
pub mod memory;
pub mod postgres;
pub mod storage;

mod monitor;
mod worker;

pub mod prelude {
    pub use crate::layers::RetryLayer;
    pub use crate::monitor::Monitor;
    pub use crate::storage::{Job, Storage};
    pub use crate::worker::{Worker, WorkerBuilder};
}
