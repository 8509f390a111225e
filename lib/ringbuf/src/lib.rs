// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trace ring buffers for the adapter command engine
//!
//! The engine has no console worth speaking of, and the two execution
//! contexts it runs on can both produce events at any point. Instead of
//! formatted logging, each module declares a static ring buffer of small
//! `Copy` payloads (usually a `Trace` enum) and records events into it. The
//! buffers live in RAM and are read out with a debugger or folded into a
//! diagnostic snapshot.
//!
//! ## Declaring a ring buffer
//!
//! ```
//! #[derive(Copy, Clone, PartialEq)]
//! enum Trace {
//!     Rx(u8),
//!     None,
//! }
//!
//! ringbuf!(Trace, 32, Trace::None);
//! ```
//!
//! and recording into it:
//!
//! ```
//! ringbuf_entry!(Trace::Rx(id));
//! ```
//!
//! A name may be given to keep more than one buffer in a module:
//!
//! ```
//! ringbuf!(JOB_RINGBUF, Trace, 16, Trace::None);
//! ringbuf_entry!(JOB_RINGBUF, Trace::Rx(id));
//! ```
//!
//! ## Concurrency
//!
//! Entries are inserted inside a `critical_section` region, so a buffer may
//! be shared between the command-accepting context and the deferred-work
//! context without further coordination. The platform supplies the
//! `critical-section` implementation; host tests use its `std` flavor.
//!
//! ## Coalescing
//!
//! An entry with the same source line and payload as the most recent one
//! bumps that entry's `count` instead of consuming a slot, so a poll loop
//! that keeps observing the same condition does not flush the history.

#![cfg_attr(not(test), no_std)]

use core::cell::RefCell;
use critical_section::Mutex;

/// Declares a static ring buffer in the current module.
///
/// `ringbuf!(NAME, Type, N, init)` declares `NAME`, holding `N` entries of
/// `Type`, every slot initialized to `init`. Without a name, the buffer is
/// called `__RINGBUF`, which is what the unnamed form of [`ringbuf_entry!`]
/// looks for.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::StaticRingbuf<$t, $n> =
            $crate::StaticRingbuf::new($init);
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
    ($t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
}

/// Records a payload into a ring buffer declared with [`ringbuf!`].
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate the payload before touching the buffer so the payload
        // expression never runs inside the critical section.
        let (p, buf) = ($payload, &$buf);
        $crate::StaticRingbuf::record(buf, line!() as u16, p);
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$buf;
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

/// One slot of a [`Ringbuf`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    /// Bumped every time the slot is overwritten; zero means never written.
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

/// A fixed-capacity ring of trace entries.
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        if let Some(ent) = self.last.and_then(|i| self.buffer.get_mut(i)) {
            if ent.line == line && ent.payload == payload {
                if let Some(count) = ent.count.checked_add(1) {
                    ent.count = count;
                    return;
                }
            }
        }

        let ndx = match self.last {
            Some(i) if i + 1 < N => i + 1,
            _ => 0,
        };

        // N == 0 is legal to declare and simply records nothing.
        let Some(ent) = self.buffer.get_mut(ndx) else {
            return;
        };
        *ent = RingbufEntry {
            line,
            generation: ent.generation.wrapping_add(1),
            count: 1,
            payload,
        };
        self.last = Some(ndx);
    }

    /// Returns the most recently recorded entry.
    pub fn last(&self) -> Option<&RingbufEntry<T>> {
        self.last.and_then(|i| self.buffer.get(i))
    }

    /// Iterates over recorded entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> {
        let start = match self.last {
            Some(i) => i + 1,
            None => N,
        };
        self.buffer[start.min(N)..]
            .iter()
            .chain(self.buffer[..start.min(N)].iter())
            .filter(|e| e.generation != 0)
    }
}

/// A [`Ringbuf`] that can live in a `static` and be written from any
/// execution context.
pub struct StaticRingbuf<T: Copy + PartialEq, const N: usize> {
    inner: Mutex<RefCell<Ringbuf<T, N>>>,
}

impl<T: Copy + PartialEq, const N: usize> StaticRingbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Ringbuf::new(init))),
        }
    }

    pub fn record(&self, line: u16, payload: T) {
        critical_section::with(|cs| {
            self.inner.borrow_ref_mut(cs).entry(line, payload);
        });
    }

    /// Runs `f` against a consistent view of the buffer.
    pub fn inspect<R>(&self, f: impl FnOnce(&Ringbuf<T, N>) -> R) -> R {
        critical_section::with(|cs| f(&self.inner.borrow_ref(cs)))
    }
}
