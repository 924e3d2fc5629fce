//! End-to-end scenarios

pub mod debounce;
pub mod failures;
pub mod lifecycle;
pub mod native;
pub mod pool_thread;
