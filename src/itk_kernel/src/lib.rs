//! The ITK kernel core: priority scheduling and inter-task synchronization
//! for a small single-core RTOS.
//!
//! The kernel is a concurrent state machine over fixed tables: a task table
//! of [`TaskCb`]s and one table per synchronization object kind
//! (semaphores, mutexes, event flags, message buffers, mailboxes). It
//! decides which task runs next, blocks and wakes tasks on those objects,
//! and force-expires timeout-bounded waits once per timer tick. Everything
//! below the scheduler — the machine context switch, the tick hardware,
//! interrupt controllers — is the port's business, reached through the
//! [`Port`] traits.
//!
//! # Contexts
//!
//! A synchronous call ([`Kernel::call`] or the typed operation methods)
//! executes on behalf of *the running task* and runs to completion without
//! preemption by another task. The timer interrupt runs between calls and
//! drives [`Kernel::timer_tick`]. "Blocking" never blocks the CPU: the
//! calling task's state becomes Waiting, the scheduler picks a successor,
//! and the port's dispatcher performs the actual switch around
//! [`Kernel::dispatch`].
//!
//! # CPU Lock
//!
//! The public entry points ([`Kernel::call`], [`Kernel::timer_tick`],
//! [`Kernel::dispatch`]) bracket themselves with
//! [`PortThreading::enter_cpu_lock`]/[`leave_cpu_lock`], which is what
//! serializes the call path against the timer interrupt. Callers of the
//! typed operation methods outside the call boundary (boot code, tests)
//! must provide that mutual exclusion themselves; the kernel struct is
//! otherwise a plain single-threaded value.
//!
//! [`leave_cpu_lock`]: PortThreading::leave_cpu_lock
#![cfg_attr(not(test), no_std)]

pub mod cfg;
pub mod error;
pub mod event_flag;
pub mod mailbox;
pub mod message_buffer;
pub mod mutex;
pub mod semaphore;
mod state;
pub mod svc;
pub mod task;
pub mod timeout;
mod utils;
mod wait;

use core::num::NonZeroUsize;

use utils::Init;

pub use crate::{
    cfg::KernelParams,
    error::ResultCode,
    event_flag::{EventFlagPattern, EventFlagWaitFlags},
    mailbox::{MessageHeader, MessagePriority},
    semaphore::SemaphoreCount,
    svc::{CallCode, CallContext},
    task::{StackRegion, TaskCb, TaskPriority, TaskRef, TaskSt},
    timeout::{Timeout, UTick},
};

/// Numeric value used to identify various kinds of kernel objects. Ids are
/// table slot numbers plus one; zero is reserved (on the call boundary it
/// designates "the calling task" where that is meaningful).
pub type Id = NonZeroUsize;

/// Outcome of a (potentially blocking) kernel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The call completed synchronously with this return-slot value
    /// (negative = a [`ResultCode`], non-negative = an operation-specific
    /// value).
    Done(isize),

    /// The caller was put to sleep. The result will be written into its
    /// saved call context by whichever operation or timeout later wakes
    /// it.
    Blocked,
}

/// Implemented by a port: the operations the kernel needs from the
/// execution environment.
pub trait PortThreading {
    /// Prepare a task for activation: record whatever the dispatcher needs
    /// so the task starts execution from [`TaskCb::entry`] on its own
    /// stack next time it receives the control.
    fn initialize_task_state(&mut self, task: &TaskCb);

    /// Disable kernel-managed interrupts (this state is called *CPU
    /// Lock*). Calls may nest.
    fn enter_cpu_lock(&mut self);

    /// Undo one level of `enter_cpu_lock`.
    fn leave_cpu_lock(&mut self);
}

/// Implemented by a port: the kernel's source of time.
pub trait PortTimer {
    /// The value of a monotonically increasing tick counter. The kernel
    /// only reads it and computes `now + timeout` deadlines from it.
    fn tick_count(&self) -> UTick;
}

/// The full port boundary.
pub trait Port: PortThreading + PortTimer {}
impl<T: PortThreading + PortTimer> Port for T {}

/// The kernel context: every fixed table and the scheduler state, as one
/// owned value.
pub struct Kernel<P: Port> {
    pub(crate) port: P,
    pub(crate) params: KernelParams,
    pub(crate) state: state::State,
    pub(crate) tasks: [task::TaskCb; cfg::NUM_TASKS],
    pub(crate) semaphores: [semaphore::SemaphoreCb; cfg::NUM_SEMAPHORES],
    pub(crate) mutexes: [mutex::MutexCb; cfg::NUM_MUTEXES],
    pub(crate) event_flags: [event_flag::EventFlagCb; cfg::NUM_EVENT_FLAGS],
    pub(crate) message_buffers: [message_buffer::MessageBufferCb; cfg::NUM_MESSAGE_BUFFERS],
    pub(crate) mailboxes: [mailbox::MailboxCb; cfg::NUM_MAILBOXES],
}

impl<P: Port> Kernel<P> {
    /// Construct a kernel with empty tables.
    pub const fn new(port: P, params: KernelParams) -> Self {
        Self {
            port,
            params,
            state: state::State::INIT,
            tasks: [task::TaskCb::INIT; cfg::NUM_TASKS],
            semaphores: [semaphore::SemaphoreCb::INIT; cfg::NUM_SEMAPHORES],
            mutexes: [mutex::MutexCb::INIT; cfg::NUM_MUTEXES],
            event_flags: [event_flag::EventFlagCb::INIT; cfg::NUM_EVENT_FLAGS],
            message_buffers: [message_buffer::MessageBufferCb::INIT; cfg::NUM_MESSAGE_BUFFERS],
            mailboxes: [mailbox::MailboxCb::INIT; cfg::NUM_MAILBOXES],
        }
    }

    /// The port this kernel was built around.
    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }
}
