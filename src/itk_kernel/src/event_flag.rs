//! Event flags
use arrayvec::ArrayVec;
use bitflags::bitflags;

use crate::{
    cfg,
    error::ResultCode,
    task::TaskIndex,
    timeout::Timeout,
    utils::Init,
    wait::{self, WaitQueue, WaitTarget},
    Completion, Id, Kernel, Port,
};

/// The bit pattern held by an event flag.
pub type EventFlagPattern = usize;

bitflags! {
    /// Wait-mode bits for [`Kernel::event_flag_wait`].
    pub struct EventFlagWaitFlags: u32 {
        /// Wake when *any* bit of the wait pattern is set. Without this
        /// flag, all bits of the wait pattern must be set.
        const OR = 1 << 0;

        /// Consume bits on a successful match: the matched subset in OR
        /// mode, the entire wait pattern in AND mode.
        const CLEAR = 1 << 4;
    }
}

/// *Event flag control block* - the state data of an event flag.
pub(crate) struct EventFlagCb {
    pub(crate) active: bool,
    pub(crate) pattern: EventFlagPattern,
    pub(crate) wait_queue: WaitQueue,
}

impl Init for EventFlagCb {
    const INIT: Self = Self {
        active: false,
        pattern: 0,
        wait_queue: WaitQueue::INIT,
    };
}

/// Given a wait condition `(wait_pattern, flags)`, check whether `pattern`
/// satisfies it.
///
/// On a match, bits are consumed from `pattern` if the waiter requested
/// clearing, and `true` is returned.
fn poll_core(
    pattern: &mut EventFlagPattern,
    wait_pattern: EventFlagPattern,
    flags: EventFlagWaitFlags,
) -> bool {
    let matched = if flags.contains(EventFlagWaitFlags::OR) {
        (*pattern & wait_pattern) != 0
    } else {
        (*pattern & wait_pattern) == wait_pattern
    };

    if matched && flags.contains(EventFlagWaitFlags::CLEAR) {
        if flags.contains(EventFlagWaitFlags::OR) {
            *pattern &= !(*pattern & wait_pattern);
        } else {
            *pattern &= !wait_pattern;
        }
    }
    matched
}

impl<P: Port> Kernel<P> {
    fn event_flag_index(&self, id: Id) -> Result<usize, ResultCode> {
        let index = id.get() - 1;
        if index < cfg::NUM_EVENT_FLAGS && self.event_flags[index].active {
            Ok(index)
        } else {
            Err(ResultCode::NoExist)
        }
    }

    /// Create an event flag in the first free table slot.
    pub fn event_flag_create(
        &mut self,
        initial: EventFlagPattern,
    ) -> Result<Id, ResultCode> {
        let index = self
            .event_flags
            .iter()
            .position(|cb| !cb.active)
            .ok_or(ResultCode::Limit)?;
        self.event_flags[index] = EventFlagCb {
            active: true,
            pattern: initial,
            wait_queue: WaitQueue::INIT,
        };
        Ok(Id::new(index + 1).unwrap())
    }

    /// OR `set_pattern` into the flag, then scan the whole wait queue once
    /// in FIFO order, waking every task whose condition now holds.
    ///
    /// Each wake may consume bits (if the waiter asked for clearing), which
    /// affects the evaluation of the waiters behind it; non-matching
    /// waiters stay queued in their original order.
    pub fn event_flag_set(
        &mut self,
        id: Id,
        set_pattern: EventFlagPattern,
    ) -> Result<(), ResultCode> {
        let index = self.event_flag_index(id)?;
        self.event_flags[index].pattern |= set_pattern;

        let waiters: ArrayVec<TaskIndex, { cfg::NUM_TASKS }> = self.event_flags[index]
            .wait_queue
            .iter(&self.tasks)
            .collect();

        let mut woke_up_any = false;
        for task in waiters {
            let (wait_pattern, flags) = match self.tasks[task].wait.target {
                Some(WaitTarget::EventFlag { pattern, flags, .. }) => (pattern, flags),
                _ => unreachable!("non-event-flag wait in an event flag queue"),
            };

            let mut pattern = self.event_flags[index].pattern;
            if poll_core(&mut pattern, wait_pattern, flags) {
                self.event_flags[index].pattern = pattern;
                let removed = self.event_flags[index]
                    .wait_queue
                    .remove(&mut self.tasks, task);
                debug_assert!(removed);
                let _ = removed;
                wait::complete_wait(&mut self.tasks, task, 0);
                woke_up_any = true;
            }
        }

        if woke_up_any {
            self.schedule();
        }
        Ok(())
    }

    /// AND the flag with `clear_pattern` (the caller passes the *inverted*
    /// mask of the bits to remove).
    pub fn event_flag_clear(
        &mut self,
        id: Id,
        clear_pattern: EventFlagPattern,
    ) -> Result<(), ResultCode> {
        let index = self.event_flag_index(id)?;
        self.event_flags[index].pattern &= clear_pattern;
        Ok(())
    }

    /// Wait until the flag satisfies `(wait_pattern, flags)`, blocking if
    /// it doesn't yet.
    pub fn event_flag_wait(
        &mut self,
        id: Id,
        wait_pattern: EventFlagPattern,
        flags: EventFlagWaitFlags,
        timeout: Timeout,
    ) -> Result<Completion, ResultCode> {
        if wait_pattern == 0 {
            return Err(ResultCode::BadParam);
        }
        let task = self.state.expect_running_task()?;
        let index = self.event_flag_index(id)?;

        let mut pattern = self.event_flags[index].pattern;
        if poll_core(&mut pattern, wait_pattern, flags) {
            self.event_flags[index].pattern = pattern;
            return Ok(Completion::Done(0));
        }
        if timeout == Timeout::Poll {
            return Err(ResultCode::Timeout);
        }

        let deadline = timeout.deadline(self.port.tick_count());
        self.event_flags[index]
            .wait_queue
            .enqueue(&mut self.tasks, task);
        wait::begin_wait(
            &mut self.tasks,
            task,
            WaitTarget::EventFlag {
                index,
                pattern: wait_pattern,
                flags,
            },
            deadline,
        );
        self.schedule();
        Ok(Completion::Blocked)
    }

    /// The flag's current bit pattern.
    pub fn event_flag_pattern(&self, id: Id) -> Result<EventFlagPattern, ResultCode> {
        Ok(self.event_flags[self.event_flag_index(id)?].pattern)
    }
}
