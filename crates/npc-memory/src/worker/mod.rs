//! Worker side of the pipeline
//!
//! A push delivery is admitted or rejected by the [`AdmissionGate`], decoded,
//! executed by the [`TaskExecutor`], and answered through the reply channel.

mod admission;
mod executor;
mod push;
mod server;

pub use admission::{Admission, AdmissionGate, AdmissionPermit};
pub use executor::{TaskExecutor, TaskState};
pub use push::{DeliveryOutcome, PushWorker};
pub use server::{RETRY_AFTER_SECS, create_worker_router};
