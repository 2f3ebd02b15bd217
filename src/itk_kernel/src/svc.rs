//! The call boundary: call codes, the saved call context, and dispatch.
//!
//! Every manager operation corresponds 1:1 to a call code; blocking
//! operations get separate codes for their forever / bounded / polling
//! variants, so no argument slot ever has to be guessed at. The return
//! slot carries a [`ResultCode`] when negative and an operation-specific
//! value (an object id, a message size, a message address) otherwise.
use crate::{
    error::ResultCode,
    event_flag::EventFlagWaitFlags,
    mailbox::MessageHeader,
    task::StackRegion,
    timeout::{Timeout, UTick},
    utils::Init,
    Completion, Id, Kernel, Port,
};

/// A register-like snapshot of a call: four general argument slots and one
/// return slot. The running task's copy lives in its task control block,
/// which is where a wake-upper delivers a deferred result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub args: [usize; 4],
    pub ret: isize,
}

impl Init for CallContext {
    const INIT: Self = Self {
        args: [0; 4],
        ret: 0,
    };
}

macro_rules! define_call_codes {
    (
        $( #[doc $( $doc:tt )*] )*
        $vis:vis enum $Name:ident {
            $( $Variant:ident = $value:literal, )*
        }
    ) => {
        $( #[doc $( $doc )*] )*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u32)]
        $vis enum $Name {
            $( $Variant = $value ),*
        }

        impl $Name {
            /// Decode a raw call code.
            pub fn from_raw(raw: u32) -> Option<Self> {
                match raw {
                    $( $value => Some(Self::$Variant), )*
                    _ => None,
                }
            }
        }
    };
}

define_call_codes! {
    /// Function codes accepted by [`Kernel::call`].
    ///
    /// Argument slot layout, per code:
    ///
    /// | code | arg0 | arg1 | arg2 | arg3 |
    /// |------|------|------|------|------|
    /// | `TaskCreate` | entry | stack base | stack size | priority |
    /// | `TaskStart`, `TaskTerminate`, `TaskSuspend`, `TaskResume`, `TaskForceResume`, `TaskWakeup`, `TaskCancelWakeup` | task id | | | |
    /// | `TaskChangePriority` | task id (0 = self) | priority | | |
    /// | `TaskRotate` | priority (0 = self's level) | | | |
    /// | `TaskSleepTimeout` | timeout | | | |
    /// | `TaskDelay` | ticks | | | |
    /// | `SemaphoreCreate` | initial | max | | |
    /// | `SemaphoreWaitTimeout` | id | timeout | | |
    /// | `EventFlagSet`, `EventFlagClear` | id | pattern | | |
    /// | `EventFlagWaitTimeout` | id | pattern | mode | timeout |
    /// | `MessageBufferSendTimeout` | id | payload addr | size | timeout |
    /// | `MessageBufferReceiveTimeout` | id | dest addr | timeout | |
    /// | `MailboxSend` | id | message addr | | |
    /// | `MailboxReceiveTimeout` | id | timeout | | |
    ///
    /// Timeout slots use the encoding of [`Timeout::from_raw`]; the
    /// variants without a timeout slot wait forever, and the `Try*`/`Poll`
    /// variants never wait.
    pub enum CallCode {
        TaskCreate = 0x01,
        TaskStart = 0x02,
        TaskExit = 0x03,
        TaskTerminate = 0x04,
        TaskChangePriority = 0x05,
        TaskRotate = 0x06,
        TaskSuspend = 0x07,
        TaskResume = 0x08,
        TaskForceResume = 0x09,
        TaskSleep = 0x0a,
        TaskSleepTimeout = 0x0b,
        TaskWakeup = 0x0c,
        TaskCancelWakeup = 0x0d,
        TaskDelay = 0x0e,
        TaskGetId = 0x0f,

        SemaphoreCreate = 0x20,
        SemaphoreSignal = 0x21,
        SemaphoreWait = 0x22,
        SemaphoreWaitTimeout = 0x23,
        SemaphorePoll = 0x24,

        MutexCreate = 0x30,
        MutexLock = 0x31,
        MutexLockTimeout = 0x32,
        MutexTryLock = 0x33,
        MutexUnlock = 0x34,

        EventFlagCreate = 0x40,
        EventFlagSet = 0x41,
        EventFlagClear = 0x42,
        EventFlagWait = 0x43,
        EventFlagWaitTimeout = 0x44,
        EventFlagPoll = 0x45,

        MessageBufferCreate = 0x50,
        MessageBufferSend = 0x51,
        MessageBufferSendTimeout = 0x52,
        MessageBufferTrySend = 0x53,
        MessageBufferReceive = 0x54,
        MessageBufferReceiveTimeout = 0x55,
        MessageBufferTryReceive = 0x56,

        MailboxCreate = 0x60,
        MailboxSend = 0x61,
        MailboxReceive = 0x62,
        MailboxReceiveTimeout = 0x63,
        MailboxTryReceive = 0x64,
    }
}

/// Decode an object id argument.
fn id_arg(raw: usize) -> Result<Id, ResultCode> {
    Id::new(raw).ok_or(ResultCode::NoExist)
}

/// Decode a timeout argument.
fn timeout_arg(raw: usize) -> Result<Timeout, ResultCode> {
    Timeout::from_raw(raw as isize)
}

/// Decode an event-flag wait mode argument.
fn flags_arg(raw: usize) -> Result<EventFlagWaitFlags, ResultCode> {
    u32::try_from(raw)
        .ok()
        .and_then(EventFlagWaitFlags::from_bits)
        .ok_or(ResultCode::BadParam)
}

impl<P: Port> Kernel<P> {
    /// Dispatch an incoming call on behalf of the running task.
    ///
    /// The argument snapshot is stored into the caller's saved call
    /// context. An immediate outcome is written into the context's return
    /// slot and also returned; [`Completion::Blocked`] means the caller was
    /// put to sleep and the result will be delivered later by whichever
    /// operation (or timeout) wakes it.
    pub fn call(&mut self, code: u32, args: [usize; 4]) -> Completion {
        self.port.enter_cpu_lock();

        if let Some(task) = self.state.running_task {
            self.tasks[task].ctx = CallContext { args, ret: 0 };
        }

        let outcome = match CallCode::from_raw(code) {
            Some(code) => {
                log::trace!("call({code:?})");
                self.dispatch_call(code, args)
            }
            None => Err(ResultCode::ReservedFunction),
        };

        let completion = match outcome {
            Ok(completion) => completion,
            Err(code) => Completion::Done(code.as_isize()),
        };
        if let Completion::Done(value) = completion {
            if let Some(task) = self.state.running_task {
                self.tasks[task].ctx.ret = value;
            }
        }

        self.port.leave_cpu_lock();
        completion
    }

    fn dispatch_call(
        &mut self,
        code: CallCode,
        args: [usize; 4],
    ) -> Result<Completion, ResultCode> {
        let done = |_: ()| Ok(Completion::Done(0));
        let done_id = |id: Id| Ok(Completion::Done(id.get() as isize));

        match code {
            CallCode::TaskCreate => {
                let stack = StackRegion {
                    base: args[1],
                    size: args[2],
                };
                done_id(self.create_task(args[0], stack, args[3])?)
            }
            CallCode::TaskStart => done(self.start_task(id_arg(args[0])?)?),
            CallCode::TaskExit => {
                self.exit_task()?;
                // The caller is gone; there is nowhere to deliver a result.
                Ok(Completion::Blocked)
            }
            CallCode::TaskTerminate => done(self.terminate_task(id_arg(args[0])?)?),
            CallCode::TaskChangePriority => done(self.set_task_priority(args[0], args[1])?),
            CallCode::TaskRotate => done(self.rotate_ready_queue(args[0])?),
            CallCode::TaskSuspend => done(self.suspend_task(id_arg(args[0])?)?),
            CallCode::TaskResume => done(self.resume_task(id_arg(args[0])?)?),
            CallCode::TaskForceResume => done(self.force_resume_task(id_arg(args[0])?)?),
            CallCode::TaskSleep => self.sleep(Timeout::Forever),
            CallCode::TaskSleepTimeout => self.sleep(timeout_arg(args[0])?),
            CallCode::TaskWakeup => done(self.wakeup_task(id_arg(args[0])?)?),
            CallCode::TaskCancelWakeup => {
                let pending = self.cancel_wakeup(id_arg(args[0])?)?;
                Ok(Completion::Done(pending as isize))
            }
            CallCode::TaskDelay => self.delay(args[0] as UTick),
            CallCode::TaskGetId => done_id(self.current_task()?),

            CallCode::SemaphoreCreate => done_id(self.semaphore_create(args[0], args[1])?),
            CallCode::SemaphoreSignal => done(self.semaphore_signal(id_arg(args[0])?)?),
            CallCode::SemaphoreWait => self.semaphore_wait(id_arg(args[0])?, Timeout::Forever),
            CallCode::SemaphoreWaitTimeout => {
                self.semaphore_wait(id_arg(args[0])?, timeout_arg(args[1])?)
            }
            CallCode::SemaphorePoll => self.semaphore_wait(id_arg(args[0])?, Timeout::Poll),

            CallCode::MutexCreate => done_id(self.mutex_create()?),
            CallCode::MutexLock => self.mutex_lock(id_arg(args[0])?, Timeout::Forever),
            CallCode::MutexLockTimeout => {
                self.mutex_lock(id_arg(args[0])?, timeout_arg(args[1])?)
            }
            CallCode::MutexTryLock => self.mutex_lock(id_arg(args[0])?, Timeout::Poll),
            CallCode::MutexUnlock => done(self.mutex_unlock(id_arg(args[0])?)?),

            CallCode::EventFlagCreate => done_id(self.event_flag_create(args[0])?),
            CallCode::EventFlagSet => done(self.event_flag_set(id_arg(args[0])?, args[1])?),
            CallCode::EventFlagClear => done(self.event_flag_clear(id_arg(args[0])?, args[1])?),
            CallCode::EventFlagWait => {
                self.event_flag_wait(id_arg(args[0])?, args[1], flags_arg(args[2])?, Timeout::Forever)
            }
            CallCode::EventFlagWaitTimeout => self.event_flag_wait(
                id_arg(args[0])?,
                args[1],
                flags_arg(args[2])?,
                timeout_arg(args[3])?,
            ),
            CallCode::EventFlagPoll => {
                self.event_flag_wait(id_arg(args[0])?, args[1], flags_arg(args[2])?, Timeout::Poll)
            }

            CallCode::MessageBufferCreate => {
                done_id(self.message_buffer_create(args[0], args[1])?)
            }
            CallCode::MessageBufferSend => self.message_buffer_send(
                id_arg(args[0])?,
                args[1] as *const u8,
                args[2],
                Timeout::Forever,
            ),
            CallCode::MessageBufferSendTimeout => self.message_buffer_send(
                id_arg(args[0])?,
                args[1] as *const u8,
                args[2],
                timeout_arg(args[3])?,
            ),
            CallCode::MessageBufferTrySend => self.message_buffer_send(
                id_arg(args[0])?,
                args[1] as *const u8,
                args[2],
                Timeout::Poll,
            ),
            CallCode::MessageBufferReceive => self.message_buffer_receive(
                id_arg(args[0])?,
                args[1] as *mut u8,
                Timeout::Forever,
            ),
            CallCode::MessageBufferReceiveTimeout => self.message_buffer_receive(
                id_arg(args[0])?,
                args[1] as *mut u8,
                timeout_arg(args[2])?,
            ),
            CallCode::MessageBufferTryReceive => {
                self.message_buffer_receive(id_arg(args[0])?, args[1] as *mut u8, Timeout::Poll)
            }

            CallCode::MailboxCreate => done_id(self.mailbox_create()?),
            CallCode::MailboxSend => done(
                self.mailbox_send(id_arg(args[0])?, args[1] as *mut MessageHeader)?,
            ),
            CallCode::MailboxReceive => {
                self.mailbox_receive(id_arg(args[0])?, Timeout::Forever)
            }
            CallCode::MailboxReceiveTimeout => {
                self.mailbox_receive(id_arg(args[0])?, timeout_arg(args[1])?)
            }
            CallCode::MailboxTryReceive => self.mailbox_receive(id_arg(args[0])?, Timeout::Poll),
        }
    }
}
