//! Wait queues and the generic wait/wake protocol.
//!
//! Every waitable object embeds a [`WaitQueue`]. A queue stores task-table
//! slot indices and chains its members through [`TaskWait::next`] inside the
//! task control blocks, so a task can belong to at most one wait queue at a
//! time by construction: there is only one link field to occupy.
//!
//! The protocol every blocking operation follows is:
//!
//! 1. if the wait condition is already satisfiable, satisfy it and return
//!    without touching any queue;
//! 2. for a polling call, fail with [`Timeout`] instead of queuing;
//! 3. otherwise enqueue the running task, call [`begin_wait`], and
//!    reschedule. The operation that later satisfies the condition (or the
//!    timeout scan) unlinks the task and calls [`complete_wait`] with the
//!    deferred result.
//!
//! [`Timeout`]: crate::error::ResultCode::Timeout
use crate::{
    event_flag::{EventFlagPattern, EventFlagWaitFlags},
    task::{TaskCb, TaskIndex, TaskSt},
    timeout::UTick,
    utils::Init,
    Kernel, Port,
};

/// What a waiting task is blocked on, together with the object-specific
/// parameters of the wait.
///
/// Storing the discriminant here — rather than deducing the object kind
/// from a stored pointer's address range — is what lets the timeout scan
/// unlink an expired task from the right queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitTarget {
    Semaphore(usize),
    Mutex(usize),
    EventFlag {
        index: usize,
        pattern: EventFlagPattern,
        flags: EventFlagWaitFlags,
    },
    /// A sender blocked on a full ring. `src`/`len` describe the caller's
    /// payload, which must remain valid for the duration of the wait.
    MessageBufferSend { index: usize, src: usize, len: usize },
    /// A receiver blocked on an empty ring. `dest` is the caller's receive
    /// buffer, at least the buffer's maximum message size long.
    MessageBufferRecv { index: usize, dest: usize },
    Mailbox(usize),
    /// `sleep`: objectless, ended by `wakeup` or by timeout.
    Sleep,
    /// `delay`: objectless, ended by timeout only; expiry is a success.
    Delay,
}

/// Per-task wait bookkeeping, embedded in [`TaskCb`].
pub(crate) struct TaskWait {
    /// What the task is waiting on. `Some(_)` iff the task is in the
    /// `Waiting` or `WaitingSuspended` state.
    pub(crate) target: Option<WaitTarget>,

    /// The next member of whichever wait queue this task occupies.
    pub(crate) next: Option<TaskIndex>,

    /// Absolute expiry tick, if the wait is timeout-bounded.
    pub(crate) deadline: Option<UTick>,
}

impl Init for TaskWait {
    const INIT: Self = Self {
        target: None,
        next: None,
        deadline: None,
    };
}

/// A FIFO queue of waiting tasks, linked through the task table.
pub(crate) struct WaitQueue {
    head: Option<TaskIndex>,
    tail: Option<TaskIndex>,
}

impl Init for WaitQueue {
    const INIT: Self = Self {
        head: None,
        tail: None,
    };
}

impl WaitQueue {
    /// The task at the head of the queue, without unlinking it.
    pub(crate) fn front(&self) -> Option<TaskIndex> {
        self.head
    }

    /// Append `task` at the tail.
    ///
    /// `task` must not currently be a member of any wait queue.
    pub(crate) fn enqueue(&mut self, tasks: &mut [TaskCb], task: TaskIndex) {
        debug_assert!(tasks[task].wait.next.is_none());
        debug_assert_ne!(self.tail, Some(task));
        match self.tail {
            Some(tail) => tasks[tail].wait.next = Some(task),
            None => self.head = Some(task),
        }
        self.tail = Some(task);
    }

    /// Unlink and return the head task.
    pub(crate) fn dequeue(&mut self, tasks: &mut [TaskCb]) -> Option<TaskIndex> {
        let head = self.head?;
        self.head = tasks[head].wait.next.take();
        if self.head.is_none() {
            self.tail = None;
        }
        Some(head)
    }

    /// Unlink an arbitrary member. Returns `false` if `task` was not queued
    /// here.
    pub(crate) fn remove(&mut self, tasks: &mut [TaskCb], task: TaskIndex) -> bool {
        let mut prev: Option<TaskIndex> = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            if c == task {
                let next = tasks[c].wait.next.take();
                match prev {
                    Some(p) => tasks[p].wait.next = next,
                    None => self.head = next,
                }
                if self.tail == Some(c) {
                    self.tail = prev;
                }
                return true;
            }
            prev = cur;
            cur = tasks[c].wait.next;
        }
        false
    }

    /// Iterate the queued slots in FIFO order.
    pub(crate) fn iter<'a>(&self, tasks: &'a [TaskCb]) -> Iter<'a> {
        Iter {
            tasks,
            cur: self.head,
        }
    }
}

pub(crate) struct Iter<'a> {
    tasks: &'a [TaskCb],
    cur: Option<TaskIndex>,
}

impl Iterator for Iter<'_> {
    type Item = TaskIndex;

    fn next(&mut self) -> Option<TaskIndex> {
        let cur = self.cur?;
        self.cur = self.tasks[cur].wait.next;
        Some(cur)
    }
}

/// Transition `task` (the running task) into the Waiting state on `target`.
///
/// The caller has already established that the wait condition is not
/// satisfiable, has rejected the polling case, and has enqueued the task on
/// the object's wait queue if `target` has one. The caller must invoke
/// `schedule` afterwards.
pub(crate) fn begin_wait(
    tasks: &mut [TaskCb],
    task: TaskIndex,
    target: WaitTarget,
    deadline: Option<UTick>,
) {
    let cb = &mut tasks[task];
    debug_assert_eq!(cb.st, TaskSt::Running);
    debug_assert!(cb.wait.target.is_none());
    cb.st = TaskSt::Waiting;
    cb.wait.target = Some(target);
    cb.wait.deadline = deadline;
}

/// Wake `task`, delivering `value` as its deferred call result.
///
/// The caller must already have unlinked the task from its wait queue. A
/// task that was suspended while waiting stays suspended: the wait is over
/// but the administrative suspension is not.
pub(crate) fn complete_wait(tasks: &mut [TaskCb], task: TaskIndex, value: isize) {
    let cb = &mut tasks[task];
    debug_assert!(cb.wait.next.is_none());
    cb.wait.target = None;
    cb.wait.deadline = None;
    cb.ctx.ret = value;
    cb.st = match cb.st {
        TaskSt::Waiting => TaskSt::Ready,
        TaskSt::WaitingSuspended => TaskSt::Suspended,
        _ => unreachable!("completing a wait of a task that isn't waiting"),
    };
}

impl<P: Port> Kernel<P> {
    /// Remove `task` from whichever object wait queue it occupies.
    ///
    /// Objectless waits (sleep, delay) have no queue to leave. The wait
    /// record itself is left for the caller to settle, either through
    /// [`complete_wait`] or by resetting the control block.
    pub(crate) fn unlink_from_wait_object(&mut self, task: TaskIndex) {
        let removed = match self.tasks[task].wait.target {
            Some(WaitTarget::Semaphore(i)) => {
                self.semaphores[i].wait_queue.remove(&mut self.tasks, task)
            }
            Some(WaitTarget::Mutex(i)) => {
                self.mutexes[i].wait_queue.remove(&mut self.tasks, task)
            }
            Some(WaitTarget::EventFlag { index, .. }) => self.event_flags[index]
                .wait_queue
                .remove(&mut self.tasks, task),
            Some(WaitTarget::MessageBufferSend { index, .. }) => self.message_buffers[index]
                .send_queue
                .remove(&mut self.tasks, task),
            Some(WaitTarget::MessageBufferRecv { index, .. }) => self.message_buffers[index]
                .recv_queue
                .remove(&mut self.tasks, task),
            Some(WaitTarget::Mailbox(i)) => {
                self.mailboxes[i].recv_queue.remove(&mut self.tasks, task)
            }
            Some(WaitTarget::Sleep) | Some(WaitTarget::Delay) | None => return,
        };
        debug_assert!(removed);
        let _ = removed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg;
    use quickcheck_macros::quickcheck;

    fn task_pool() -> [TaskCb; cfg::NUM_TASKS] {
        [TaskCb::INIT; cfg::NUM_TASKS]
    }

    #[test]
    fn fifo_order() {
        let mut tasks = task_pool();
        let mut q = WaitQueue::INIT;
        for i in [3, 1, 4, 1 + 10, 5] {
            q.enqueue(&mut tasks, i);
        }
        let mut order = vec![];
        while let Some(i) = q.dequeue(&mut tasks) {
            order.push(i);
        }
        assert_eq!(order, [3, 1, 4, 11, 5]);
        assert_eq!(q.front(), None);
    }

    #[test]
    fn remove_head_middle_tail() {
        let mut tasks = task_pool();
        let mut q = WaitQueue::INIT;
        for i in 0..5 {
            q.enqueue(&mut tasks, i);
        }
        assert!(q.remove(&mut tasks, 0));
        assert!(q.remove(&mut tasks, 2));
        assert!(q.remove(&mut tasks, 4));
        assert!(!q.remove(&mut tasks, 7));
        assert_eq!(q.iter(&tasks).collect::<Vec<_>>(), [1, 3]);

        // The tail link must be intact after removing the old tail.
        q.enqueue(&mut tasks, 4);
        assert_eq!(q.iter(&tasks).collect::<Vec<_>>(), [1, 3, 4]);
    }

    /// Random interleavings of enqueue/dequeue/remove behave like a `Vec`
    /// model.
    #[quickcheck]
    fn matches_vec_model(ops: Vec<(u8, u8)>) -> bool {
        let mut tasks = task_pool();
        let mut q = WaitQueue::INIT;
        let mut model: Vec<TaskIndex> = vec![];

        for (op, arg) in ops {
            let task = arg as usize % cfg::NUM_TASKS;
            match op % 3 {
                0 => {
                    if !model.contains(&task) {
                        q.enqueue(&mut tasks, task);
                        model.push(task);
                    }
                }
                1 => {
                    assert_eq!(q.dequeue(&mut tasks), model.first().copied());
                    if !model.is_empty() {
                        model.remove(0);
                    }
                }
                _ => {
                    let in_model = model.contains(&task);
                    assert_eq!(q.remove(&mut tasks, task), in_model);
                    model.retain(|&t| t != task);
                }
            }
            if q.iter(&tasks).collect::<Vec<_>>() != model {
                return false;
            }
        }
        true
    }
}
