//! Static kernel configuration.
//!
//! All kernel objects live in fixed-capacity tables sized by the constants
//! below; the kernel performs no dynamic allocation.
use core::ops::Range;

use crate::task::TaskPriority;

/// Capacity of the task table.
pub const NUM_TASKS: usize = 32;

/// Capacity of the semaphore table.
pub const NUM_SEMAPHORES: usize = 16;

/// Capacity of the mutex table.
pub const NUM_MUTEXES: usize = 16;

/// Capacity of the event flag table.
pub const NUM_EVENT_FLAGS: usize = 16;

/// Capacity of the message buffer table.
pub const NUM_MESSAGE_BUFFERS: usize = 8;

/// Capacity of the mailbox table.
pub const NUM_MAILBOXES: usize = 8;

/// Backing storage reserved for each message buffer's byte ring. A buffer
/// may be created with any capacity up to this.
pub const MESSAGE_BUFFER_CAPACITY: usize = 256;

/// The most urgent task priority. Lower numeric value = higher urgency.
pub const PRIORITY_MIN: TaskPriority = 1;

/// The least urgent task priority.
pub const PRIORITY_MAX: TaskPriority = 140;

// A message frame needs its two-byte length prefix to fit.
const _: () = assert!(MESSAGE_BUFFER_CAPACITY > 2);
const _: () = assert!(PRIORITY_MIN <= PRIORITY_MAX);

/// Boot-time parameters of a [`Kernel`] instance.
///
/// [`Kernel`]: crate::Kernel
pub struct KernelParams {
    /// The address range of the mailbox message pool. The pool itself is
    /// owned and managed by the embedder; the kernel only stores message
    /// addresses and rejects or discards any that fall outside this range.
    pub mailbox_pool: Range<usize>,
}
