//! Semaphores
use crate::{
    cfg,
    error::ResultCode,
    timeout::Timeout,
    utils::Init,
    wait::{self, WaitQueue, WaitTarget},
    Completion, Id, Kernel, Port,
};

/// The value of a counting semaphore.
pub type SemaphoreCount = usize;

/// *Semaphore control block* - the state data of a semaphore.
pub(crate) struct SemaphoreCb {
    pub(crate) active: bool,
    pub(crate) count: SemaphoreCount,
    pub(crate) max_count: SemaphoreCount,
    pub(crate) wait_queue: WaitQueue,
}

impl Init for SemaphoreCb {
    const INIT: Self = Self {
        active: false,
        count: 0,
        max_count: 0,
        wait_queue: WaitQueue::INIT,
    };
}

impl<P: Port> Kernel<P> {
    fn semaphore_index(&self, id: Id) -> Result<usize, ResultCode> {
        let index = id.get() - 1;
        if index < cfg::NUM_SEMAPHORES && self.semaphores[index].active {
            Ok(index)
        } else {
            Err(ResultCode::NoExist)
        }
    }

    /// Create a semaphore in the first free table slot.
    pub fn semaphore_create(
        &mut self,
        initial: SemaphoreCount,
        max_count: SemaphoreCount,
    ) -> Result<Id, ResultCode> {
        if max_count == 0 || initial > max_count {
            return Err(ResultCode::BadParam);
        }
        let index = self
            .semaphores
            .iter()
            .position(|cb| !cb.active)
            .ok_or(ResultCode::Limit)?;
        self.semaphores[index] = SemaphoreCb {
            active: true,
            count: initial,
            max_count,
            wait_queue: WaitQueue::INIT,
        };
        Ok(Id::new(index + 1).unwrap())
    }

    /// Release one permit.
    ///
    /// If a task is waiting, the permit is handed straight to the longest
    /// waiter and the count stays untouched; otherwise the count is
    /// incremented, failing with `QueueOverflow` at `max_count`.
    pub fn semaphore_signal(&mut self, id: Id) -> Result<(), ResultCode> {
        let index = self.semaphore_index(id)?;
        if let Some(task) = self.semaphores[index].wait_queue.dequeue(&mut self.tasks) {
            wait::complete_wait(&mut self.tasks, task, 0);
            self.schedule();
            Ok(())
        } else if self.semaphores[index].count < self.semaphores[index].max_count {
            self.semaphores[index].count += 1;
            Ok(())
        } else {
            Err(ResultCode::QueueOverflow)
        }
    }

    /// Acquire one permit, blocking if none is available.
    pub fn semaphore_wait(&mut self, id: Id, timeout: Timeout) -> Result<Completion, ResultCode> {
        let task = self.state.expect_running_task()?;
        let index = self.semaphore_index(id)?;

        if self.semaphores[index].count > 0 {
            self.semaphores[index].count -= 1;
            return Ok(Completion::Done(0));
        }
        if timeout == Timeout::Poll {
            return Err(ResultCode::Timeout);
        }

        let deadline = timeout.deadline(self.port.tick_count());
        self.semaphores[index]
            .wait_queue
            .enqueue(&mut self.tasks, task);
        wait::begin_wait(&mut self.tasks, task, WaitTarget::Semaphore(index), deadline);
        self.schedule();
        Ok(Completion::Blocked)
    }

    /// The semaphore's current count.
    pub fn semaphore_count(&self, id: Id) -> Result<SemaphoreCount, ResultCode> {
        Ok(self.semaphores[self.semaphore_index(id)?].count)
    }
}
