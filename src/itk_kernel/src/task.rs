//! Tasks
//!
//! The task table is the ownership root for all task state: wait-queue
//! linkage, suspension and wakeup counters, and the saved call context all
//! live inside the fixed [`TaskCb`] array, and every queue in the kernel
//! refers to tasks by table index.
use crate::{
    cfg,
    error::ResultCode,
    svc::CallContext,
    timeout::{Timeout, UTick},
    utils::Init,
    wait::{self, TaskWait, WaitTarget},
    Completion, Id, Kernel, Port,
};

/// A slot number in the task table. `Id` values on the call boundary are
/// the slot number plus one, so that zero can mean "the calling task".
pub(crate) type TaskIndex = usize;

/// Task priority. Lower numeric value = higher scheduling urgency; the
/// valid range is [`cfg::PRIORITY_MIN`]`..=`[`cfg::PRIORITY_MAX`].
pub type TaskPriority = usize;

/// Task state machine.
///
/// ```text
/// Nonexistent --create--> Dormant --start--> Ready <--> Running
/// Ready/Running --suspend--> Suspended --resume--> Ready
/// Waiting --suspend--> WaitingSuspended --resume--> Waiting
/// (any live state) --terminate/exit--> Dormant
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSt {
    /// The slot is free.
    Nonexistent,
    /// Created but not started; owns no queue membership.
    Dormant,
    Ready,
    /// Bound to the processor. At most one task is in this state.
    Running,
    Waiting,
    Suspended,
    /// Suspended while also waiting; leaves the wait and the suspension
    /// independently.
    WaitingSuspended,
}

/// A task's stack region, opaque to the kernel. The port consumes it when
/// it builds the initial register context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    pub base: usize,
    pub size: usize,
}

/// *Task control block* - the state data of a task.
pub struct TaskCb {
    pub(crate) st: TaskSt,
    pub(crate) priority: TaskPriority,

    /// The entry point address. Opaque to the kernel; consumed by
    /// [`PortThreading::initialize_task_state`].
    ///
    /// [`PortThreading::initialize_task_state`]: crate::PortThreading::initialize_task_state
    pub(crate) entry: usize,
    pub(crate) stack: StackRegion,

    /// The caller's saved call context. Deferred results of blocking calls
    /// land in `ctx.ret`.
    pub(crate) ctx: CallContext,

    /// The wait state of the task.
    pub(crate) wait: TaskWait,

    /// Suspension nesting depth; greater than zero iff the task is in
    /// `Suspended` or `WaitingSuspended` state.
    pub(crate) suspend_count: u32,

    /// Wakeup requests delivered while the task was not asleep.
    pub(crate) wakeup_count: u32,
}

impl TaskCb {
    pub(crate) const INIT: Self = Self {
        st: TaskSt::Nonexistent,
        priority: cfg::PRIORITY_MAX,
        entry: 0,
        stack: StackRegion { base: 0, size: 0 },
        ctx: CallContext::INIT,
        wait: TaskWait::INIT,
        suspend_count: 0,
        wakeup_count: 0,
    };

    /// The entry point address the task was created with.
    pub fn entry(&self) -> usize {
        self.entry
    }

    /// The stack region the task was created with.
    pub fn stack(&self) -> StackRegion {
        self.stack
    }

    /// The task's current priority.
    pub fn priority(&self) -> TaskPriority {
        self.priority
    }
}

/// A snapshot of a task's externally observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRef {
    pub state: TaskSt,
    pub priority: TaskPriority,
    pub suspend_count: u32,
    pub wakeup_count: u32,
    /// The return slot of the task's saved call context. For a task woken
    /// from a blocking call this carries the deferred result.
    pub return_value: isize,
}

impl<P: Port> Kernel<P> {
    /// Resolve a task id into a table index.
    pub(crate) fn task_index(&self, id: Id) -> Result<TaskIndex, ResultCode> {
        let index = id.get() - 1;
        if index < cfg::NUM_TASKS && self.tasks[index].st != TaskSt::Nonexistent {
            Ok(index)
        } else {
            Err(ResultCode::NoExist)
        }
    }

    /// Resolve a raw task id where zero designates the calling task.
    pub(crate) fn task_index_or_self(&self, raw: usize) -> Result<TaskIndex, ResultCode> {
        match Id::new(raw) {
            Some(id) => self.task_index(id),
            None => self.state.expect_running_task(),
        }
    }

    /// Create a task in the first free table slot, in the Dormant state.
    pub fn create_task(
        &mut self,
        entry: usize,
        stack: StackRegion,
        priority: TaskPriority,
    ) -> Result<Id, ResultCode> {
        if !(cfg::PRIORITY_MIN..=cfg::PRIORITY_MAX).contains(&priority) {
            return Err(ResultCode::BadParam);
        }
        let index = self
            .tasks
            .iter()
            .position(|cb| cb.st == TaskSt::Nonexistent)
            .ok_or(ResultCode::Limit)?;
        self.tasks[index] = TaskCb {
            st: TaskSt::Dormant,
            priority,
            entry,
            stack,
            ctx: CallContext::INIT,
            wait: TaskWait::INIT,
            suspend_count: 0,
            wakeup_count: 0,
        };
        Ok(Id::new(index + 1).unwrap())
    }

    /// Start a dormant task: build its initial register context and make it
    /// Ready.
    pub fn start_task(&mut self, id: Id) -> Result<(), ResultCode> {
        let index = self.task_index(id)?;
        if self.tasks[index].st != TaskSt::Dormant {
            return Err(ResultCode::BadState);
        }

        // Discard wakeup requests left over from a previous incarnation.
        self.tasks[index].wakeup_count = 0;

        self.port.initialize_task_state(&self.tasks[index]);
        self.tasks[index].st = TaskSt::Ready;
        self.schedule();
        Ok(())
    }

    /// Self-termination. Does not return to the caller: the calling task's
    /// identity is cleared before rescheduling.
    pub fn exit_task(&mut self) -> Result<(), ResultCode> {
        let index = self.state.expect_running_task()?;
        self.abandon_owned_mutexes(index);
        self.reset_task(index);
        log::trace!("task {} exited", index + 1);
        self.state.running_task = None;
        self.schedule();
        Ok(())
    }

    /// Forced termination of another task. Scrubs the task out of any wait
    /// queue and releases any mutexes it owns.
    pub fn terminate_task(&mut self, id: Id) -> Result<(), ResultCode> {
        let index = self.task_index(id)?;
        if self.state.running_task == Some(index) {
            return Err(ResultCode::BadState);
        }
        if self.tasks[index].st == TaskSt::Dormant {
            return Err(ResultCode::BadState);
        }

        self.unlink_from_wait_object(index);
        self.abandon_owned_mutexes(index);
        self.reset_task(index);
        log::trace!("task {} terminated", index + 1);
        self.schedule();
        Ok(())
    }

    /// Return a task to the Dormant state, clearing all bookkeeping.
    fn reset_task(&mut self, index: TaskIndex) {
        let cb = &mut self.tasks[index];
        cb.st = TaskSt::Dormant;
        cb.wait = TaskWait::INIT;
        cb.suspend_count = 0;
        cb.wakeup_count = 0;
    }

    /// Suspend another task, incrementing its suspension nesting counter.
    /// Self-suspension is rejected.
    pub fn suspend_task(&mut self, id: Id) -> Result<(), ResultCode> {
        let index = self.task_index(id)?;
        if self.state.running_task == Some(index) {
            return Err(ResultCode::BadState);
        }

        let cb = &mut self.tasks[index];
        let count = cb
            .suspend_count
            .checked_add(1)
            .ok_or(ResultCode::QueueOverflow)?;
        match cb.st {
            TaskSt::Ready | TaskSt::Running => {
                cb.suspend_count = count;
                cb.st = TaskSt::Suspended;
                self.schedule();
            }
            TaskSt::Waiting => {
                cb.suspend_count = count;
                cb.st = TaskSt::WaitingSuspended;
            }
            // Already suspended: a pure nesting increment.
            TaskSt::Suspended | TaskSt::WaitingSuspended => cb.suspend_count = count,
            TaskSt::Dormant | TaskSt::Nonexistent => return Err(ResultCode::BadState),
        }
        Ok(())
    }

    /// Undo one level of suspension; the task leaves the suspended state
    /// only when the nesting counter reaches zero.
    pub fn resume_task(&mut self, id: Id) -> Result<(), ResultCode> {
        self.resume_inner(id, false)
    }

    /// Undo all levels of suspension at once.
    pub fn force_resume_task(&mut self, id: Id) -> Result<(), ResultCode> {
        self.resume_inner(id, true)
    }

    fn resume_inner(&mut self, id: Id, force: bool) -> Result<(), ResultCode> {
        let index = self.task_index(id)?;
        let cb = &mut self.tasks[index];
        if cb.suspend_count == 0 {
            return Err(ResultCode::BadState);
        }
        cb.suspend_count = if force { 0 } else { cb.suspend_count - 1 };
        if cb.suspend_count == 0 {
            match cb.st {
                TaskSt::Suspended => {
                    cb.st = TaskSt::Ready;
                    self.schedule();
                }
                TaskSt::WaitingSuspended => cb.st = TaskSt::Waiting,
                _ => unreachable!("nonzero suspend count in a non-suspended state"),
            }
        }
        Ok(())
    }

    /// Change a task's priority. A raw id of zero designates the calling
    /// task. Takes effect immediately if the target is Ready or Running.
    pub fn set_task_priority(
        &mut self,
        raw_id: usize,
        priority: TaskPriority,
    ) -> Result<(), ResultCode> {
        if !(cfg::PRIORITY_MIN..=cfg::PRIORITY_MAX).contains(&priority) {
            return Err(ResultCode::BadParam);
        }
        let index = self.task_index_or_self(raw_id)?;
        if self.tasks[index].st == TaskSt::Dormant {
            return Err(ResultCode::BadState);
        }
        self.tasks[index].priority = priority;
        if matches!(self.tasks[index].st, TaskSt::Ready | TaskSt::Running) {
            self.schedule();
        }
        Ok(())
    }

    /// Rotate the ready queue at the given priority level (zero designates
    /// the calling task's level).
    ///
    /// Without a per-priority-level queue the tie-break among equal
    /// priorities is table-scan order, so the only guaranteed effect is a
    /// reschedule.
    pub fn rotate_ready_queue(&mut self, priority: usize) -> Result<(), ResultCode> {
        if priority > cfg::PRIORITY_MAX {
            return Err(ResultCode::BadParam);
        }
        self.schedule();
        Ok(())
    }

    /// Put the calling task to sleep until a wakeup request arrives.
    ///
    /// A wakeup delivered while the task was not asleep is consumed
    /// instead, completing the call immediately.
    pub fn sleep(&mut self, timeout: Timeout) -> Result<Completion, ResultCode> {
        let task = self.state.expect_running_task()?;
        if self.tasks[task].wakeup_count > 0 {
            self.tasks[task].wakeup_count -= 1;
            return Ok(Completion::Done(0));
        }
        if timeout == Timeout::Poll {
            return Err(ResultCode::Timeout);
        }
        let deadline = timeout.deadline(self.port.tick_count());
        wait::begin_wait(&mut self.tasks, task, WaitTarget::Sleep, deadline);
        self.schedule();
        Ok(Completion::Blocked)
    }

    /// Wake a sleeping task, or record a pending wakeup if the task is not
    /// asleep.
    pub fn wakeup_task(&mut self, id: Id) -> Result<(), ResultCode> {
        let index = self.task_index(id)?;
        let st = self.tasks[index].st;
        let asleep = matches!(st, TaskSt::Waiting | TaskSt::WaitingSuspended)
            && self.tasks[index].wait.target == Some(WaitTarget::Sleep);

        if asleep {
            wait::complete_wait(&mut self.tasks, index, 0);
            self.schedule();
            Ok(())
        } else if st == TaskSt::Dormant {
            Err(ResultCode::BadState)
        } else {
            let cb = &mut self.tasks[index];
            cb.wakeup_count = cb
                .wakeup_count
                .checked_add(1)
                .ok_or(ResultCode::QueueOverflow)?;
            Ok(())
        }
    }

    /// Zero a task's pending wakeup counter, returning the previous value.
    pub fn cancel_wakeup(&mut self, id: Id) -> Result<u32, ResultCode> {
        let index = self.task_index(id)?;
        let cb = &mut self.tasks[index];
        if cb.st == TaskSt::Dormant {
            return Err(ResultCode::BadState);
        }
        let pending = cb.wakeup_count;
        cb.wakeup_count = 0;
        Ok(pending)
    }

    /// Delay the calling task for the given number of ticks. Unlike
    /// `sleep`, the wait ends only by expiry, and the expiry is a success.
    pub fn delay(&mut self, ticks: UTick) -> Result<Completion, ResultCode> {
        let task = self.state.expect_running_task()?;
        if ticks == 0 {
            return Ok(Completion::Done(0));
        }
        let now = self.port.tick_count();
        wait::begin_wait(
            &mut self.tasks,
            task,
            WaitTarget::Delay,
            Some(now.saturating_add(ticks)),
        );
        self.schedule();
        Ok(Completion::Blocked)
    }

    /// The id of the calling task.
    pub fn current_task(&self) -> Result<Id, ResultCode> {
        let index = self.state.expect_running_task()?;
        Ok(Id::new(index + 1).unwrap())
    }

    /// A snapshot of a task's externally observable state.
    pub fn task_ref(&self, id: Id) -> Result<TaskRef, ResultCode> {
        let cb = &self.tasks[self.task_index(id)?];
        Ok(TaskRef {
            state: cb.st,
            priority: cb.priority,
            suspend_count: cb.suspend_count,
            wakeup_count: cb.wakeup_count,
            return_value: cb.ctx.ret,
        })
    }

    /// Select the next task to dispatch: the Ready task with the lowest
    /// priority value, ties broken by table-scan order.
    ///
    /// The running task is kept unless a Ready task has a *strictly* lower
    /// priority value, so equal-priority tasks never preempt each other.
    /// With no eligible task at all the previous selection is left
    /// unchanged; [`Kernel::dispatch`] re-validates it.
    ///
    /// Must be invoked after any transition that could change the Ready
    /// set. The timer-interrupt collaborator invokes it once per tick,
    /// after the timeout scan.
    pub fn schedule(&mut self) {
        let mut best: Option<TaskIndex> = None;
        for (index, cb) in self.tasks.iter().enumerate() {
            if cb.st == TaskSt::Ready
                && best.map_or(true, |b| cb.priority < self.tasks[b].priority)
            {
                best = Some(index);
            }
        }

        if let Some(running) = self.state.running_task {
            let cb = &self.tasks[running];
            if cb.st == TaskSt::Running
                && best.map_or(true, |b| cb.priority <= self.tasks[b].priority)
            {
                self.state.scheduled_task = Some(running);
                return;
            }
        }

        if best.is_some() {
            self.state.scheduled_task = best;
        }
    }

    /// The scheduler's selection, re-validated against the current task
    /// states.
    fn next_task_to_run(&self) -> Option<TaskIndex> {
        self.state
            .scheduled_task
            .filter(|&index| matches!(self.tasks[index].st, TaskSt::Ready | TaskSt::Running))
    }

    /// Whether [`Kernel::dispatch`] would switch tasks if called now.
    pub fn needs_dispatch(&self) -> bool {
        self.next_task_to_run() != self.state.running_task
    }

    /// Commit the pending task switch: the bookkeeping half of the context
    /// switch. The machine-level register/stack swap is the port
    /// dispatcher's job, performed around this call.
    pub fn dispatch(&mut self) {
        self.port.enter_cpu_lock();
        let next = self.next_task_to_run();
        if next != self.state.running_task {
            if let Some(prev) = self.state.running_task {
                if self.tasks[prev].st == TaskSt::Running {
                    self.tasks[prev].st = TaskSt::Ready;
                }
            }
            if let Some(next) = next {
                self.tasks[next].st = TaskSt::Running;
                log::trace!("dispatching task {}", next + 1);
            }
            self.state.running_task = next;
        }
        self.port.leave_cpu_lock();
    }
}
