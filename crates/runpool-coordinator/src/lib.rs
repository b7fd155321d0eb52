#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod archive;
pub mod coordinator;
pub mod http;
pub mod lock;
pub mod study;
pub mod tracker;

pub use coordinator::{
    AssignOutcome, CoordinatorConfig, CoordinatorError, RejectReason, RunCoordinator,
    SubmitOutcome,
};
pub use lock::{LockConfig, LockManager};
