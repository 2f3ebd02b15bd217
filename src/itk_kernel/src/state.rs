//! Kernel-global execution state.
use crate::{error::ResultCode, task::TaskIndex, utils::Init};

/// Which task slot is bound to the processor and which one the scheduler
/// last selected.
///
/// The two fields are decoupled on purpose: `schedule` only updates the
/// selection, and the bookkeeping half of the context switch
/// ([`Kernel::dispatch`]) later aligns `running_task` with it. Between the
/// two calls the previously running task keeps executing.
///
/// [`Kernel::dispatch`]: crate::Kernel::dispatch
pub(crate) struct State {
    /// The task whose context is currently on the CPU, if any.
    pub(crate) running_task: Option<TaskIndex>,

    /// The scheduler's current selection. May lag behind reality when no
    /// task is eligible; [`Kernel::dispatch`] re-validates it before
    /// committing a switch.
    ///
    /// [`Kernel::dispatch`]: crate::Kernel::dispatch
    pub(crate) scheduled_task: Option<TaskIndex>,
}

impl Init for State {
    const INIT: Self = Self {
        running_task: None,
        scheduled_task: None,
    };
}

impl State {
    /// The task on whose behalf the current call executes.
    ///
    /// Returns `SystemError` if no task is bound to the processor; calls
    /// that block or act on "the calling task" require one.
    pub(crate) fn expect_running_task(&self) -> Result<TaskIndex, ResultCode> {
        self.running_task.ok_or(ResultCode::SystemError)
    }
}
