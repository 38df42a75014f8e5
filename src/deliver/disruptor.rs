//! Fixed pipeline of stages sharing one ring
//!
//! Stage `i` consumes the slots between counter `i + 1` and counter `i`:
//! everything stage `i - 1` (or the producers, for stage 0) has published
//! but stage `i` has not yet seen. Only the last stage removes values, so a
//! slot returns to producers once every stage has handled it.
//!
//! Stages are kept in an immutable array owned by [`Pipeline`]. A stage finds
//! its successor by index, so nothing needs wiring after construction.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::error::{DeliverError, DeliverResult};
use super::handler::{deliver_one, Deliver, Message, ShutdownMode};
use super::launcher::Launcher;
use super::outbox::{Outbox, OutboxContext};
use super::state::WorkerState;
use super::worker::{RunImpl, Worker, WorkerDeliver};
use crate::queue::RingQueue;

pub struct DisruptorStage<M> {
    queue: Arc<dyn RingQueue<M>>,
    deliver: Mutex<Box<dyn Deliver<M>>>,
    index: usize,
    count: usize,
    pipeline: Weak<Pipeline<M>>,
}

impl<M> DisruptorStage<M> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_tail(&self) -> bool {
        self.index + 1 == self.count
    }
}

impl<M: Message + Clone> DisruptorStage<M> {
    /// Runs `msg` through this stage and every later one, outside the ring.
    fn deliver_inline(&self, pipeline: &Pipeline<M>, own: &mut dyn Deliver<M>, msg: M, outbox: &mut Outbox<M>) {
        let later = pipeline.stages.get(self.index + 1..).unwrap_or_default();
        match later.split_last() {
            None => {
                deliver_one(own, msg, outbox);
            }
            Some((last, middle)) => {
                deliver_one(own, msg.clone(), outbox);
                for stage in middle {
                    let mut deliver = stage.runner().deliver.lock();
                    deliver_one(&mut **deliver, msg.clone(), outbox);
                }
                let mut deliver = last.runner().deliver.lock();
                deliver_one(&mut **deliver, msg, outbox);
            }
        }
    }
}

impl<M: Message + Clone> RunImpl<M> for DisruptorStage<M> {
    fn run_impl(&self, outbox: &mut Outbox<M>, tail: Option<M>) -> DeliverResult<()> {
        let Some(pipeline) = self.pipeline.upgrade() else {
            return Ok(());
        };

        let mut deliver = self.deliver.lock();
        if let Some(tail) = tail {
            if let Err(tail) = self.queue.try_offer(tail) {
                log::debug!("pipeline stage {}: ring full, handed message delivered inline", self.index);
                self.deliver_inline(&pipeline, &mut **deliver, tail, outbox);
            }
        }

        let is_tail = self.is_tail();
        let next = if is_tail {
            None
        } else {
            pipeline.stage(self.index + 1)
        };

        self.queue.deliver_stage(
            &mut **deliver,
            outbox,
            self.index,
            self.index + 1,
            next.map(|stage| stage as &dyn WorkerDeliver<M>),
            is_tail,
        );
        drop(deliver);

        if is_tail && self.queue.size() > 0 {
            // producers may have refilled the ring while this pass freed slots
            if let Some(head) = pipeline.stage(0) {
                head.wake();
            }
        }

        Ok(())
    }

    fn shutdown(&self, mode: ShutdownMode) {
        match self.deliver.try_lock() {
            Some(mut deliver) => deliver.shutdown(mode),
            None => log::debug!("pipeline stage {}: shutdown hook skipped, handler busy", self.index),
        }
    }
}

type StageWorker<M> = Worker<M, DisruptorStage<M>>;

/// Ordered set of stage workers over one ring.
///
/// Acts as the worker of the owning queue: producers wake stage 0 and each
/// stage wakes its successor as it publishes progress.
pub struct Pipeline<M> {
    name: String,
    stages: Vec<Arc<StageWorker<M>>>,
}

impl<M: Message + Clone> Pipeline<M> {
    /// Builds one stage per handler, in pipeline order.
    ///
    /// The ring must carry one counter more than there are stages.
    pub fn new(
        name: &str,
        queue: Arc<dyn RingQueue<M>>,
        handlers: Vec<Box<dyn Deliver<M>>>,
        launcher: &Launcher,
        context: Option<OutboxContext>,
    ) -> DeliverResult<Arc<Self>> {
        let count = handlers.len();
        if count == 0 {
            return Err(DeliverError::config("pipeline needs at least one stage"));
        }
        if queue.counter_group_size() != count + 1 {
            return Err(DeliverError::config(format!(
                "pipeline of {} stages needs {} ring counters, ring has {}",
                count,
                count + 1,
                queue.counter_group_size()
            )));
        }

        Ok(Arc::new_cyclic(|pipeline: &Weak<Pipeline<M>>| {
            let stages = handlers
                .into_iter()
                .enumerate()
                .map(|(index, deliver)| {
                    let stage = DisruptorStage {
                        queue: queue.clone(),
                        deliver: Mutex::new(deliver),
                        index,
                        count,
                        pipeline: pipeline.clone(),
                    };
                    Worker::new(
                        format!("{}.stage{}", name, index),
                        stage,
                        launcher.clone(),
                        context.clone(),
                    )
                })
                .collect();

            Pipeline {
                name: name.to_string(),
                stages,
            }
        }))
    }

    pub fn stage(&self, index: usize) -> Option<&StageWorker<M>> {
        self.stages.get(index).map(|stage| &**stage)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn head(&self) -> &StageWorker<M> {
        &self.stages[0]
    }
}

impl<M: Message + Clone> WorkerDeliver<M> for Pipeline<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> WorkerState {
        if self.stages.iter().all(|stage| stage.is_closed()) {
            WorkerState::Closed
        } else if self.stages.iter().any(|stage| stage.state().is_active()) {
            WorkerState::Active
        } else {
            WorkerState::Idle
        }
    }

    fn wake(&self) -> bool {
        self.head().wake()
    }

    fn wake_all(&self) -> bool {
        self.stages
            .iter()
            .fold(false, |launched, stage| stage.wake() | launched)
    }

    fn wake_all_and_wait(&self) {
        for stage in &self.stages {
            stage.wake_all_and_wait();
        }
    }

    fn run_as(&self, _outbox: &mut Outbox<M>, tail: Option<M>) -> Result<(), Option<M>> {
        Err(tail)
    }

    fn run_one(&self, _outbox: &mut Outbox<M>, tail: M) -> Result<(), M> {
        Err(tail)
    }

    fn shutdown(&self, mode: ShutdownMode) {
        for stage in &self.stages {
            stage.shutdown(mode);
        }
    }

    fn state_string(&self) -> String {
        let stages: Vec<String> = self.stages.iter().map(|stage| stage.state_string()).collect();
        format!("{}[{}]", self.name, stages.join(" -> "))
    }
}

impl<M> std::fmt::Debug for Pipeline<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stages.len())
            .finish()
    }
}
