//! Backend selection, lifecycle, and stable per-queue handles: the
//! `QueueManager` and `QueueProxy` from the core design, plus the
//! in-process `DriverRegistry` this repository runs against.

mod manager;
mod proxy;
mod registry;

pub use manager::QueueManager;
pub use proxy::{QueueProxy, TypedHandler, TypedHandlerFuture};
pub use registry::InMemoryDriverRegistry;
