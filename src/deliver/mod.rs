//! Workers that drain ring queues
//!
//! A [`QueueDeliver`] binds a ring from [`crate::queue`] to a worker. Offering
//! a message and calling `wake` either launches a run on the configured
//! executor or, when a run is already in flight, marks it so it loops once
//! more before going idle. Each run drains the queue through a [`Deliver`]
//! handler; messages the handler sends go through an [`Outbox`], which
//! collapses chains of sends on one thread into inline deliveries.

mod builder;
mod disruptor;
pub mod error;
mod executor;
pub(crate) mod handler;
mod launcher;
mod multi;
mod null;
mod outbox;
mod queue_deliver;
mod single;
mod state;
mod worker;

pub use builder::{QueueDeliverBuilder, DEFAULT_CAPACITY, DEFAULT_INITIAL, DEFAULT_THREAD_MAX};
pub use disruptor::{DisruptorStage, Pipeline};
pub use error::{DeliverError, DeliverResult};
pub use executor::{ThreadPool, TokioExecutor};
pub use handler::{Deliver, Message, ShutdownMode};
pub use launcher::{
    Executor, InlineExecutor, Launcher, RejectingExecutor, RunnableItem, Scheduler, Task, LAUNCH_WAIT,
};
pub use multi::{MultiCoordinator, MultiThread};
pub use null::NullWorker;
pub use outbox::{Outbox, OutboxContext, DEFAULT_OFFER_TIMEOUT};
pub use queue_deliver::QueueDeliver;
pub use single::SingleThread;
pub use state::{AtomicWorkerState, Transition, WorkerEvent, WorkerState};
pub use worker::{same_worker, RunImpl, Worker, WorkerDeliver, WorkerRef};

#[cfg(test)]
mod tests;
