pub mod backend;
pub mod broker;
pub mod config;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod poller;
pub mod publisher;
pub mod registry;
pub mod retention;
pub mod routes;
pub mod store;
pub mod worker_processing;

pub use backend::Backend;
pub use broker::Broker;
pub use dispatcher::{TaskErrorPolicy, TaskProcessor};
pub use error::{ConsumeError, QueueError};
pub use models::{State, TaskArg, TaskResult, TaskSignature, TaskState};
pub use publisher::Publisher;
pub use retention::CleanupRoutine;
