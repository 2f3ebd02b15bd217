//! Message buffers
//!
//! A byte ring of fixed capacity holding variable-length messages framed as
//! a two-byte little-endian length followed by the payload. When a
//! counterpart is already blocked, payloads are handed over directly and
//! the ring is bypassed.
//!
//! Payload addresses cross the call boundary as raw addresses; a blocked
//! sender's payload (and a blocked receiver's destination buffer) must stay
//! valid for the duration of the wait. That contract belongs to the caller
//! of the kernel, like any system call ABI.
use crate::{
    cfg,
    error::ResultCode,
    timeout::Timeout,
    utils::Init,
    wait::{self, WaitQueue, WaitTarget},
    Completion, Id, Kernel, Port,
};

/// Bytes occupied by the length prefix of a frame.
const HEADER_SIZE: usize = 2;

/// *Message buffer control block* - the state data of a message buffer.
pub(crate) struct MessageBufferCb {
    pub(crate) active: bool,

    /// Ring bytes in use; at most [`cfg::MESSAGE_BUFFER_CAPACITY`].
    pub(crate) capacity: usize,
    pub(crate) max_message_size: usize,

    /// Read position of the oldest frame.
    pub(crate) head: usize,
    /// Free bytes. `free == capacity` iff the ring is empty.
    pub(crate) free: usize,

    pub(crate) ring: [u8; cfg::MESSAGE_BUFFER_CAPACITY],

    pub(crate) send_queue: WaitQueue,
    pub(crate) recv_queue: WaitQueue,
}

impl Init for MessageBufferCb {
    const INIT: Self = Self {
        active: false,
        capacity: 0,
        max_message_size: 0,
        head: 0,
        free: 0,
        ring: [0; cfg::MESSAGE_BUFFER_CAPACITY],
        send_queue: WaitQueue::INIT,
        recv_queue: WaitQueue::INIT,
    };
}

impl MessageBufferCb {
    fn is_ring_empty(&self) -> bool {
        self.free == self.capacity
    }

    /// Append a frame. The caller has checked that `src.len() +
    /// HEADER_SIZE` bytes are free.
    fn write_frame(&mut self, src: &[u8]) {
        debug_assert!(self.free >= src.len() + HEADER_SIZE);
        let mut pos = (self.head + (self.capacity - self.free)) % self.capacity;
        for byte in (src.len() as u16).to_le_bytes() {
            self.ring[pos] = byte;
            pos = (pos + 1) % self.capacity;
        }
        for &byte in src {
            self.ring[pos] = byte;
            pos = (pos + 1) % self.capacity;
        }
        self.free -= src.len() + HEADER_SIZE;
    }

    /// Remove the oldest frame, copying its payload to `dest`. Returns the
    /// payload length.
    ///
    /// # Safety
    ///
    /// `dest` must be writable for at least `self.max_message_size` bytes.
    unsafe fn read_frame_into(&mut self, dest: *mut u8) -> usize {
        debug_assert!(!self.is_ring_empty());
        let mut pos = self.head;
        let mut prefix = [0u8; HEADER_SIZE];
        for byte in prefix.iter_mut() {
            *byte = self.ring[pos];
            pos = (pos + 1) % self.capacity;
        }
        let len = u16::from_le_bytes(prefix) as usize;
        debug_assert!(len <= self.max_message_size);
        for offset in 0..len {
            // Safety: `len <= max_message_size` and the caller guarantees
            // `dest` holds that many bytes.
            unsafe { *dest.add(offset) = self.ring[pos] };
            pos = (pos + 1) % self.capacity;
        }
        self.head = pos;
        self.free += len + HEADER_SIZE;
        len
    }
}

/// Copy `len` bytes between two caller-supplied buffers.
///
/// # Safety
///
/// `src..src + len` must be readable, `dest..dest + len` writable, and the
/// two regions must not overlap.
unsafe fn copy_bytes(src: usize, dest: usize, len: usize) {
    unsafe { core::ptr::copy_nonoverlapping(src as *const u8, dest as *mut u8, len) };
}

impl<P: Port> Kernel<P> {
    fn message_buffer_index(&self, id: Id) -> Result<usize, ResultCode> {
        let index = id.get() - 1;
        if index < cfg::NUM_MESSAGE_BUFFERS && self.message_buffers[index].active {
            Ok(index)
        } else {
            Err(ResultCode::NoExist)
        }
    }

    /// Create a message buffer in the first free table slot.
    ///
    /// `max_message_size` must leave room for a frame header within
    /// `capacity`.
    pub fn message_buffer_create(
        &mut self,
        capacity: usize,
        max_message_size: usize,
    ) -> Result<Id, ResultCode> {
        if capacity > cfg::MESSAGE_BUFFER_CAPACITY
            || max_message_size == 0
            || max_message_size + HEADER_SIZE > capacity
        {
            return Err(ResultCode::BadParam);
        }
        let index = self
            .message_buffers
            .iter()
            .position(|cb| !cb.active)
            .ok_or(ResultCode::Limit)?;
        self.message_buffers[index] = MessageBufferCb {
            active: true,
            capacity,
            max_message_size,
            head: 0,
            free: capacity,
            ring: [0; cfg::MESSAGE_BUFFER_CAPACITY],
            send_queue: WaitQueue::INIT,
            recv_queue: WaitQueue::INIT,
        };
        Ok(Id::new(index + 1).unwrap())
    }

    /// Send a message, blocking while the ring lacks space for the frame.
    ///
    /// If a receiver is already waiting the payload is copied straight into
    /// its buffer, bypassing the ring; the receiver's deferred result is
    /// the message size.
    ///
    /// # Safety contract
    ///
    /// `src..src + len` must be readable until the call completes — for a
    /// blocked sender, until the send is admitted or times out.
    pub fn message_buffer_send(
        &mut self,
        id: Id,
        src: *const u8,
        len: usize,
        timeout: Timeout,
    ) -> Result<Completion, ResultCode> {
        let task = self.state.expect_running_task()?;
        let index = self.message_buffer_index(id)?;

        if len == 0 || len > self.message_buffers[index].max_message_size {
            return Err(ResultCode::BadParam);
        }

        // A queued receiver implies an empty ring; hand the payload over
        // directly.
        if let Some(receiver) = self.message_buffers[index]
            .recv_queue
            .dequeue(&mut self.tasks)
        {
            debug_assert!(self.message_buffers[index].is_ring_empty());
            let dest = match self.tasks[receiver].wait.target {
                Some(WaitTarget::MessageBufferRecv { dest, .. }) => dest,
                _ => unreachable!("non-receive wait in a message buffer receive queue"),
            };
            // Safety: both ends are live caller buffers per the ABI
            // contract; the receiver's buffer holds `max_message_size`.
            unsafe { copy_bytes(src as usize, dest, len) };
            wait::complete_wait(&mut self.tasks, receiver, len as isize);
            self.schedule();
            return Ok(Completion::Done(0));
        }

        if self.message_buffers[index].free >= len + HEADER_SIZE {
            // Safety: the caller guarantees `src..src + len` is readable.
            let payload = unsafe { core::slice::from_raw_parts(src, len) };
            self.message_buffers[index].write_frame(payload);
            return Ok(Completion::Done(0));
        }
        if timeout == Timeout::Poll {
            return Err(ResultCode::Timeout);
        }

        let deadline = timeout.deadline(self.port.tick_count());
        self.message_buffers[index]
            .send_queue
            .enqueue(&mut self.tasks, task);
        wait::begin_wait(
            &mut self.tasks,
            task,
            WaitTarget::MessageBufferSend {
                index,
                src: src as usize,
                len,
            },
            deadline,
        );
        self.schedule();
        Ok(Completion::Blocked)
    }

    /// Receive the oldest message, blocking while none is available.
    /// Completes with the message size.
    ///
    /// The ring is drained first so messages arrive in send order; a
    /// blocked sender is handed over directly only when the ring is empty.
    /// After a ring read, the head of the send queue is admitted if the
    /// freed space now suffices — a one-shot check, not a cascading drain.
    ///
    /// # Safety contract
    ///
    /// `dest` must be writable for the buffer's maximum message size until
    /// the call completes — for a blocked receiver, until a send arrives or
    /// the wait times out.
    pub fn message_buffer_receive(
        &mut self,
        id: Id,
        dest: *mut u8,
        timeout: Timeout,
    ) -> Result<Completion, ResultCode> {
        let task = self.state.expect_running_task()?;
        let index = self.message_buffer_index(id)?;

        if !self.message_buffers[index].is_ring_empty() {
            // Safety: the caller guarantees `dest` holds `max_message_size`
            // bytes.
            let len = unsafe { self.message_buffers[index].read_frame_into(dest) };

            if let Some(sender) = self.message_buffers[index].send_queue.front() {
                let (src, sender_len) = match self.tasks[sender].wait.target {
                    Some(WaitTarget::MessageBufferSend { src, len, .. }) => (src, len),
                    _ => unreachable!("non-send wait in a message buffer send queue"),
                };
                if self.message_buffers[index].free >= sender_len + HEADER_SIZE {
                    self.message_buffers[index]
                        .send_queue
                        .dequeue(&mut self.tasks);
                    // Safety: the blocked sender's payload stays readable
                    // for the duration of its wait.
                    let payload =
                        unsafe { core::slice::from_raw_parts(src as *const u8, sender_len) };
                    self.message_buffers[index].write_frame(payload);
                    wait::complete_wait(&mut self.tasks, sender, 0);
                    self.schedule();
                }
            }
            return Ok(Completion::Done(len as isize));
        }

        if let Some(sender) = self.message_buffers[index]
            .send_queue
            .dequeue(&mut self.tasks)
        {
            let (src, sender_len) = match self.tasks[sender].wait.target {
                Some(WaitTarget::MessageBufferSend { src, len, .. }) => (src, len),
                _ => unreachable!("non-send wait in a message buffer send queue"),
            };
            // Safety: both ends are live caller buffers per the ABI
            // contract.
            unsafe { copy_bytes(src, dest as usize, sender_len) };
            wait::complete_wait(&mut self.tasks, sender, 0);
            self.schedule();
            return Ok(Completion::Done(sender_len as isize));
        }

        if timeout == Timeout::Poll {
            return Err(ResultCode::Timeout);
        }

        let deadline = timeout.deadline(self.port.tick_count());
        self.message_buffers[index]
            .recv_queue
            .enqueue(&mut self.tasks, task);
        wait::begin_wait(
            &mut self.tasks,
            task,
            WaitTarget::MessageBufferRecv {
                index,
                dest: dest as usize,
            },
            deadline,
        );
        self.schedule();
        Ok(Completion::Blocked)
    }

    /// The buffer's current free byte count.
    pub fn message_buffer_free(&self, id: Id) -> Result<usize, ResultCode> {
        Ok(self.message_buffers[self.message_buffer_index(id)?].free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::collections::VecDeque;

    const CAPACITY: usize = 64;
    const MAX_MSG: usize = 16;

    fn buffer() -> MessageBufferCb {
        MessageBufferCb {
            active: true,
            capacity: CAPACITY,
            max_message_size: MAX_MSG,
            free: CAPACITY,
            ..MessageBufferCb::INIT
        }
    }

    fn read(cb: &mut MessageBufferCb) -> Vec<u8> {
        let mut buf = vec![0u8; MAX_MSG];
        let len = unsafe { cb.read_frame_into(buf.as_mut_ptr()) };
        buf.truncate(len);
        buf
    }

    #[test]
    fn frames_wrap_around() {
        let mut cb = buffer();
        // Fill and drain repeatedly so frames straddle the wrap point.
        for round in 0..20u8 {
            let msg = [round; 15];
            cb.write_frame(&msg);
            cb.write_frame(&msg);
            assert_eq!(read(&mut cb), msg);
            assert_eq!(read(&mut cb), msg);
            assert!(cb.is_ring_empty());
        }
    }

    /// Any interleaving of writes and reads preserves FIFO order, and the
    /// free count always equals the capacity minus the framed bytes
    /// resident.
    #[quickcheck]
    fn ring_is_fifo(msgs: Vec<Vec<u8>>) -> bool {
        let mut cb = buffer();
        let mut model: VecDeque<Vec<u8>> = VecDeque::new();

        let check = |cb: &MessageBufferCb, model: &VecDeque<Vec<u8>>| {
            cb.free
                == CAPACITY
                    - model
                        .iter()
                        .map(|m| m.len() + HEADER_SIZE)
                        .sum::<usize>()
        };

        for msg in msgs {
            let msg = &msg[..msg.len().min(MAX_MSG)];
            if msg.is_empty() {
                continue;
            }
            while cb.free < msg.len() + HEADER_SIZE {
                if read(&mut cb) != model.pop_front().unwrap() {
                    return false;
                }
            }
            cb.write_frame(msg);
            model.push_back(msg.to_vec());
            if !check(&cb, &model) {
                return false;
            }
        }
        while let Some(expected) = model.pop_front() {
            if read(&mut cb) != expected {
                return false;
            }
        }
        cb.is_ring_empty()
    }
}
