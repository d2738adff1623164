// search-core/src/lib.rs
//! 搜索守护进程核心库
//!
//! Query execution and lifecycle coordination:
//! - live result streams fed by independently changing backends
//! - the query driver and its change feed
//! - per-request execution sessions and dispatch by request kind
//! - coordinated shutdown that drains in-flight work

pub mod backend;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod name_index;
pub mod result_stream;
pub mod shutdown;

#[cfg(test)]
mod testing;

// 重导出核心类型
pub use backend::{BackendId, ChangeData, ChangeNotification, ChangeNotifier, Queryable};
pub use config::{BackendFilter, CoreConfig, ShutdownConfig};
pub use context::DaemonContext;
pub use dispatch::{Dispatched, Dispatcher, DispatcherBuilder, Execution, HandlerFactory, RequestHandler, ResponseSink};
pub use driver::{QueryDriver, QueryDriverBuilder};
pub use error::{BackendError, DispatchError};
pub use executor::QueryExecutor;
pub use handlers::{NameIndexDumper, ReindexExecutor, ShutdownExecutor};
pub use name_index::{NAME_INDEX_SOURCE, NameIndex};
pub use result_stream::{ResultStream, StreamEvent, StreamState, StreamWorker, SubscriptionId};
pub use shutdown::{Shutdown, WorkerGuard, WorkerId};
