//! File system change notification for Sentinel
//!
//! This crate watches directory trees and delivers debounced batches of
//! changes:
//! - Uniform events (created, modified, deleted, renamed) on every platform
//! - Rename reconstruction from lossy OS notifications
//! - Per-watch debouncing on a shared scheduling thread
//! - Overflow and backend failures reported once, through the dispatch boundary
//!
//! ```no_run
//! use sentinel_watcher::{ChannelDispatch, Pool, PoolConfig, Watch, WatchConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), sentinel_watcher::WatchError> {
//! let (dispatch, notifications) = ChannelDispatch::new();
//! let pool = Pool::new(&PoolConfig::default())?;
//! let watch = Watch::new("/tmp/project", WatchConfig::default(), Arc::new(dispatch))?;
//! pool.register(&watch);
//! watch.start()?.wait()?;
//!
//! for notification in notifications.iter() {
//!     println!("{:?}", notification);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod debounce;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod platform;
pub mod pool;
pub mod queue;
pub mod watch;

pub use config::{BackendConfig, Config, PoolConfig, WatchConfig};
pub use dispatch::{ChannelDispatch, Dispatch, Notification};
pub use error::{BackendError, ConfigError, Result, WatchError};
pub use event::{Event, EventKind};
pub use platform::{native_factory, Backend, BackendFactory, EventSink};
pub use pool::Pool;
pub use queue::EventQueue;
pub use watch::{Completion, Watch, WatchId, WatchState};
