use std::sync::Arc;

use parking_lot::Mutex;

use super::error::DeliverResult;
use super::handler::{begin_batch, deliver_one, end_batch, Deliver, ShutdownMode};
use super::outbox::Outbox;
use super::worker::RunImpl;
use crate::queue::RingQueue;

/// One queue drained by one handler, at most one run at a time.
pub struct SingleThread<M> {
    queue: Arc<dyn RingQueue<M>>,
    deliver: Mutex<Box<dyn Deliver<M>>>,
}

impl<M> SingleThread<M> {
    pub fn new(queue: Arc<dyn RingQueue<M>>, deliver: Box<dyn Deliver<M>>) -> Self {
        Self {
            queue,
            deliver: Mutex::new(deliver),
        }
    }

    pub fn queue(&self) -> &Arc<dyn RingQueue<M>> {
        &self.queue
    }
}

impl<M: Send + 'static> RunImpl<M> for SingleThread<M> {
    fn run_impl(&self, outbox: &mut Outbox<M>, tail: Option<M>) -> DeliverResult<()> {
        let mut deliver = self.deliver.lock();

        if let Some(tail) = tail {
            // queue first so the handed message keeps its place behind earlier ones
            if let Err(tail) = self.queue.try_offer(tail) {
                begin_batch(&mut **deliver);
                deliver_one(&mut **deliver, tail, outbox);
                end_batch(&mut **deliver);
            }
        }

        self.queue.deliver(&mut **deliver, outbox);
        Ok(())
    }

    fn is_run_one_valid(&self) -> bool {
        self.queue.is_empty()
    }

    fn run_one_impl(&self, outbox: &mut Outbox<M>, tail: M) -> DeliverResult<()> {
        let mut deliver = self.deliver.lock();

        begin_batch(&mut **deliver);
        deliver_one(&mut **deliver, tail, outbox);
        end_batch(&mut **deliver);
        Ok(())
    }

    fn shutdown(&self, mode: ShutdownMode) {
        // a run in progress holds the handler; its owner delivers shutdown in-band
        match self.deliver.try_lock() {
            Some(mut deliver) => deliver.shutdown(mode),
            None => log::debug!("shutdown hook skipped: handler busy"),
        }
    }
}
