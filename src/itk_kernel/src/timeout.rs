//! Timeouts and the timer tick.
//!
//! The kernel does not own a clock; it reads an opaque, monotonically
//! increasing tick counter from the port ([`PortTimer::tick_count`]) and
//! stores absolute deadlines computed from it. Once per tick the
//! timer-interrupt collaborator calls [`Kernel::timer_tick`], which expires
//! overdue waits *before* rescheduling so that a task readied by expiry is
//! dispatchable in the very same tick.
//!
//! [`PortTimer::tick_count`]: crate::PortTimer::tick_count
use crate::{
    error::ResultCode,
    task::TaskSt,
    wait::{self, WaitTarget},
    Kernel, Port,
};

/// An absolute point in time, in timer ticks since boot.
pub type UTick = u64;

/// Relative wait bound for a blocking operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait indefinitely.
    Forever,
    /// Do not wait: fail with [`ResultCode::Timeout`] immediately if the
    /// condition is not already met.
    Poll,
    /// Wait for at most this many ticks.
    After(UTick),
}

impl Timeout {
    /// Decode the wire encoding used by `*_TMO` call variants: `-1` waits
    /// forever, `0` polls, a positive value is a tick count.
    pub fn from_raw(raw: isize) -> Result<Self, ResultCode> {
        match raw {
            -1 => Ok(Self::Forever),
            0 => Ok(Self::Poll),
            n if n > 0 => Ok(Self::After(n as UTick)),
            _ => Err(ResultCode::BadParam),
        }
    }

    /// The absolute deadline this bound arms, if any.
    pub(crate) fn deadline(self, now: UTick) -> Option<UTick> {
        match self {
            Self::Forever | Self::Poll => None,
            Self::After(ticks) => Some(now.saturating_add(ticks)),
        }
    }
}

impl<P: Port> Kernel<P> {
    /// Handle one timer tick.
    ///
    /// Force-wakes every waiting task whose deadline has passed, then runs
    /// the scheduler. An expired wait completes with
    /// [`ResultCode::Timeout`] in the task's saved call context, except a
    /// plain delay, whose natural expiry is a success.
    pub fn timer_tick(&mut self) {
        self.port.enter_cpu_lock();
        let now = self.port.tick_count();

        for task in 0..self.tasks.len() {
            let cb = &self.tasks[task];
            let expired = matches!(cb.st, TaskSt::Waiting | TaskSt::WaitingSuspended)
                && cb.wait.deadline.is_some_and(|deadline| deadline <= now);
            if !expired {
                continue;
            }

            self.unlink_from_wait_object(task);
            let value = match self.tasks[task].wait.target {
                Some(WaitTarget::Delay) => ResultCode::Success.as_isize(),
                _ => ResultCode::Timeout.as_isize(),
            };
            log::trace!("timer_tick: deadline of task {} reached", task + 1);
            wait::complete_wait(&mut self.tasks, task, value);
        }

        self.schedule();
        self.port.leave_cpu_lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_encoding() {
        assert_eq!(Timeout::from_raw(-1), Ok(Timeout::Forever));
        assert_eq!(Timeout::from_raw(0), Ok(Timeout::Poll));
        assert_eq!(Timeout::from_raw(25), Ok(Timeout::After(25)));
        assert_eq!(Timeout::from_raw(-2), Err(ResultCode::BadParam));
    }

    #[test]
    fn deadline_arming() {
        assert_eq!(Timeout::Forever.deadline(100), None);
        assert_eq!(Timeout::Poll.deadline(100), None);
        assert_eq!(Timeout::After(5).deadline(100), Some(105));
        assert_eq!(Timeout::After(UTick::MAX).deadline(100), Some(UTick::MAX));
    }
}
