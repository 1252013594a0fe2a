//! Parallel scheduling of copy-forward work.

pub mod copy_forward;
pub mod park;
pub mod pool;

pub use self::copy_forward::{CopyForwardAction, CopyForwardScheme, CopyForwardTask};
pub use self::pool::{GcWorker, GcWorkerPool};
