//! Mailboxes
//!
//! A mailbox delivers pre-allocated message structures by pointer. Message
//! storage is a fixed pool owned by the embedder; the kernel only stores
//! and retrieves addresses, and every address it is asked to follow is
//! validated against the pool range configured at boot. A link that falls
//! outside the pool is discarded (with a warning) rather than followed, so
//! queue corruption cannot propagate.
use core::ptr;

use crate::{
    cfg,
    error::ResultCode,
    timeout::Timeout,
    utils::Init,
    wait::{self, WaitQueue, WaitTarget},
    Completion, Id, Kernel, Port,
};

/// Priority of a mailbox message. Unlike task priorities, a *larger* value
/// is delivered first.
pub type MessagePriority = usize;

/// The header every mailbox message must start with. The payload follows
/// it in the embedder's pool slot; the kernel never touches the payload.
#[repr(C)]
pub struct MessageHeader {
    /// The next message in the mailbox's delivery order. Owned by the
    /// kernel while the message is queued.
    pub next: *mut MessageHeader,
    pub priority: MessagePriority,
}

/// *Mailbox control block* - the state data of a mailbox.
pub(crate) struct MailboxCb {
    pub(crate) active: bool,

    /// Head of the delivery list, in descending priority order; equal
    /// priorities keep send order.
    pub(crate) head: *mut MessageHeader,

    pub(crate) recv_queue: WaitQueue,
}

impl Init for MailboxCb {
    const INIT: Self = Self {
        active: false,
        head: ptr::null_mut(),
        recv_queue: WaitQueue::INIT,
    };
}

impl<P: Port> Kernel<P> {
    fn mailbox_index(&self, id: Id) -> Result<usize, ResultCode> {
        let index = id.get() - 1;
        if index < cfg::NUM_MAILBOXES && self.mailboxes[index].active {
            Ok(index)
        } else {
            Err(ResultCode::NoExist)
        }
    }

    fn in_mailbox_pool(&self, addr: usize) -> bool {
        self.params.mailbox_pool.contains(&addr)
    }

    /// Create a mailbox in the first free table slot.
    pub fn mailbox_create(&mut self) -> Result<Id, ResultCode> {
        let index = self
            .mailboxes
            .iter()
            .position(|cb| !cb.active)
            .ok_or(ResultCode::Limit)?;
        self.mailboxes[index] = MailboxCb {
            active: true,
            head: ptr::null_mut(),
            recv_queue: WaitQueue::INIT,
        };
        Ok(Id::new(index + 1).unwrap())
    }

    /// Send a message. If a receiver is waiting, the message address is
    /// handed to it directly; otherwise the message is inserted into the
    /// delivery list at the first position where every predecessor has a
    /// priority greater than or equal to its own.
    ///
    /// # Safety contract
    ///
    /// `msg` must point to a live [`MessageHeader`] in the configured pool;
    /// the kernel owns its `next` field until the message is received.
    pub fn mailbox_send(&mut self, id: Id, msg: *mut MessageHeader) -> Result<(), ResultCode> {
        let index = self.mailbox_index(id)?;
        if !self.in_mailbox_pool(msg as usize) {
            return Err(ResultCode::BadParam);
        }

        if let Some(receiver) = self.mailboxes[index].recv_queue.dequeue(&mut self.tasks) {
            wait::complete_wait(&mut self.tasks, receiver, msg as usize as isize);
            self.schedule();
            return Ok(());
        }

        // Safety: `msg` was validated against the pool, and every link
        // already in the list was validated when it was inserted.
        unsafe {
            let priority = (*msg).priority;
            let mut cursor: *mut *mut MessageHeader = &mut self.mailboxes[index].head;
            while !(*cursor).is_null() && (**cursor).priority >= priority {
                cursor = &mut (**cursor).next;
            }
            (*msg).next = *cursor;
            *cursor = msg;
        }
        Ok(())
    }

    /// Receive the highest-priority message, blocking while the mailbox is
    /// empty. Completes with the message's address.
    pub fn mailbox_receive(
        &mut self,
        id: Id,
        timeout: Timeout,
    ) -> Result<Completion, ResultCode> {
        let task = self.state.expect_running_task()?;
        let index = self.mailbox_index(id)?;

        let head = self.mailboxes[index].head;
        if !head.is_null() {
            if !self.in_mailbox_pool(head as usize) {
                log::warn!(
                    "mailbox {}: head link {:#x} is outside the message pool; discarding",
                    id,
                    head as usize
                );
                self.mailboxes[index].head = ptr::null_mut();
            } else {
                // Safety: `head` was just validated against the pool.
                let next = unsafe { (*head).next };
                if !next.is_null() && !self.in_mailbox_pool(next as usize) {
                    log::warn!(
                        "mailbox {}: next link {:#x} is outside the message pool; discarding",
                        id,
                        next as usize
                    );
                    self.mailboxes[index].head = ptr::null_mut();
                } else {
                    self.mailboxes[index].head = next;
                }
                return Ok(Completion::Done(head as usize as isize));
            }
        }

        if timeout == Timeout::Poll {
            return Err(ResultCode::Timeout);
        }

        let deadline = timeout.deadline(self.port.tick_count());
        self.mailboxes[index]
            .recv_queue
            .enqueue(&mut self.tasks, task);
        wait::begin_wait(&mut self.tasks, task, WaitTarget::Mailbox(index), deadline);
        self.schedule();
        Ok(Completion::Blocked)
    }
}
