//! Mutexes
//!
//! Ownership transfers directly to the woken waiter on unlock, so there is
//! no window in which the mutex appears unlocked while a waiter exists.
//! Recursive locking is unsupported, and no priority inheritance is applied
//! when a high-priority task blocks on a mutex held by a lower-priority
//! one.
use crate::{
    cfg,
    error::ResultCode,
    task::TaskIndex,
    timeout::Timeout,
    utils::Init,
    wait::{self, WaitQueue, WaitTarget},
    Completion, Id, Kernel, Port,
};

/// *Mutex control block* - the state data of a mutex.
pub(crate) struct MutexCb {
    pub(crate) active: bool,

    /// The task that currently owns the lock. `Some(_)` iff locked.
    pub(crate) owning_task: Option<TaskIndex>,

    pub(crate) wait_queue: WaitQueue,
}

impl Init for MutexCb {
    const INIT: Self = Self {
        active: false,
        owning_task: None,
        wait_queue: WaitQueue::INIT,
    };
}

impl<P: Port> Kernel<P> {
    fn mutex_index(&self, id: Id) -> Result<usize, ResultCode> {
        let index = id.get() - 1;
        if index < cfg::NUM_MUTEXES && self.mutexes[index].active {
            Ok(index)
        } else {
            Err(ResultCode::NoExist)
        }
    }

    /// Create a mutex in the first free table slot, initially unlocked.
    pub fn mutex_create(&mut self) -> Result<Id, ResultCode> {
        let index = self
            .mutexes
            .iter()
            .position(|cb| !cb.active)
            .ok_or(ResultCode::Limit)?;
        self.mutexes[index] = MutexCb {
            active: true,
            owning_task: None,
            wait_queue: WaitQueue::INIT,
        };
        Ok(Id::new(index + 1).unwrap())
    }

    /// Lock the mutex, blocking while another task owns it. A second lock
    /// by the owner fails with `BadState`.
    pub fn mutex_lock(&mut self, id: Id, timeout: Timeout) -> Result<Completion, ResultCode> {
        let task = self.state.expect_running_task()?;
        let index = self.mutex_index(id)?;

        match self.mutexes[index].owning_task {
            None => {
                self.mutexes[index].owning_task = Some(task);
                return Ok(Completion::Done(0));
            }
            Some(owner) if owner == task => return Err(ResultCode::BadState),
            Some(_) => {}
        }
        if timeout == Timeout::Poll {
            return Err(ResultCode::Timeout);
        }

        let deadline = timeout.deadline(self.port.tick_count());
        self.mutexes[index].wait_queue.enqueue(&mut self.tasks, task);
        wait::begin_wait(&mut self.tasks, task, WaitTarget::Mutex(index), deadline);
        self.schedule();
        Ok(Completion::Blocked)
    }

    /// Unlock the mutex. Fails unless the caller is the owner. If tasks are
    /// waiting, ownership transfers to the head waiter and the mutex stays
    /// locked.
    pub fn mutex_unlock(&mut self, id: Id) -> Result<(), ResultCode> {
        let task = self.state.expect_running_task()?;
        let index = self.mutex_index(id)?;

        if self.mutexes[index].owning_task != Some(task) {
            return Err(ResultCode::BadState);
        }
        if let Some(next) = self.mutexes[index].wait_queue.dequeue(&mut self.tasks) {
            self.mutexes[index].owning_task = Some(next);
            wait::complete_wait(&mut self.tasks, next, 0);
            self.schedule();
        } else {
            self.mutexes[index].owning_task = None;
        }
        Ok(())
    }

    /// The current owner of the mutex, if it is locked.
    pub fn mutex_owner(&self, id: Id) -> Result<Option<Id>, ResultCode> {
        Ok(self.mutexes[self.mutex_index(id)?]
            .owning_task
            .map(|index| Id::new(index + 1).unwrap()))
    }

    /// Release every mutex owned by an exiting or terminated task, waking
    /// the next waiter of each and transferring ownership to it.
    ///
    /// The caller is responsible for rescheduling.
    pub(crate) fn abandon_owned_mutexes(&mut self, task: TaskIndex) {
        for index in 0..cfg::NUM_MUTEXES {
            if !self.mutexes[index].active || self.mutexes[index].owning_task != Some(task) {
                continue;
            }
            if let Some(next) = self.mutexes[index].wait_queue.dequeue(&mut self.tasks) {
                self.mutexes[index].owning_task = Some(next);
                wait::complete_wait(&mut self.tasks, next, 0);
            } else {
                self.mutexes[index].owning_task = None;
            }
        }
    }
}
