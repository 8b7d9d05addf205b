//! The job/task scheduling and execution engine: a store of jobs and tasks,
//! a scheduler that creates pending tasks on a timer, a dispatcher that
//! claims and runs them through per-source processors, a liveness monitor
//! that reclaims stalled tasks, and the worker pool processors use to
//! parallelize their own I/O.

pub mod dispatcher;
pub mod liveness;
pub mod pool;
pub mod processor;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use dispatcher::Dispatcher;
pub use liveness::LivenessMonitor;
pub use pool::WorkerPool;
pub use processor::{HeartBeat, Processor, ProcessorInput, TaskMemoryHandle};
pub use registry::ProcessorRegistry;
pub use scheduler::Scheduler;
pub use store::{JobStore, PgJobStore};
