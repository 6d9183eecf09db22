// src/watch/mod.rs

//! File watching and debounced rebuilds.
//!
//! - [`subscription`] pairs compiled patterns with the tasks they trigger.
//! - [`debounce`] coalesces bursts of triggers behind a resettable deadline.
//! - [`watcher`] wraps `notify` and feeds changed paths into a channel.
//! - [`session`] is the async loop that turns all of that into rebuild cycles.

pub mod debounce;
pub mod path_utils;
pub mod session;
pub mod subscription;
pub mod watcher;

pub use debounce::{Debouncer, DEFAULT_DEBOUNCE};
pub use session::{RebuildBackend, SessionStats, WatchSession};
pub use subscription::WatchSubscription;
pub use watcher::{spawn_fs_watcher, WatcherHandle};
