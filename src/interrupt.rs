use crate::sync::{AtomicPtr, Ordering};
use core::{fmt, ptr, time::Duration};
use derive_more::{Deref, Display};
use std::sync::Arc;

/// Identifier of a debugger breakpoint.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
#[display("breakpoint-{_0}")]
pub struct BreakpointId(pub u64);

/// Kind of memory access reported with a memory violation.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq)]
pub enum AccessKind {
    /// Load.
    #[display("read")]
    Read,
    /// Store.
    #[display("write")]
    Write,
    /// Instruction fetch.
    #[display("execute")]
    Execute,
}

/// Discriminant of an [`Interrupt`].
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq)]
pub enum InterruptKind {
    /// Time budget exhausted.
    Timeout,
    /// Debugger breakpoint hit.
    Breakpoint,
    /// Call stack exhausted.
    StackOverflow,
    /// Invalid memory access.
    MemoryViolation,
}

/// An externally raised signal observed by the scheduler only between node
/// executions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupt {
    /// Execution exceeded its time budget.
    Timeout(Duration),
    /// A debugger breakpoint was hit.
    Breakpoint(BreakpointId),
    /// The call stack exceeded its maximum depth.
    StackOverflow,
    /// A protected address was accessed.
    MemoryViolation {
        /// Faulting address.
        address: usize,
        /// Kind of the faulting access.
        access: AccessKind,
    },
}

impl Interrupt {
    /// Discriminant without payload.
    #[must_use]
    pub fn kind(&self) -> InterruptKind {
        match self {
            Self::Timeout(_) => InterruptKind::Timeout,
            Self::Breakpoint(_) => InterruptKind::Breakpoint,
            Self::StackOverflow => InterruptKind::StackOverflow,
            Self::MemoryViolation { .. } => InterruptKind::MemoryViolation,
        }
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(after) => write!(f, "timeout after {}ms", after.as_millis()),
            Self::Breakpoint(id) => write!(f, "{id}"),
            Self::StackOverflow => f.write_str("stack overflow"),
            Self::MemoryViolation { address, access } => {
                write!(f, "memory violation: {access} at {address:#018x}")
            }
        }
    }
}

/// Lock-free interrupt register holding at most one pending [`Interrupt`].
///
/// Any thread may raise an interrupt at any time. Each interrupt is boxed and
/// published with a single pointer swap, so its kind and payload are always
/// observed together. The scheduler takes the record by swapping the pointer
/// back to null.
///
/// A second interrupt raised before the first is observed replaces it; the
/// replaced one is dropped unreported.
#[derive(Debug)]
pub struct InterruptState {
    pending: AtomicPtr<Interrupt>,
}

impl Default for InterruptState {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptState {
    /// An empty register.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Take ownership of a record removed from the register.
    fn reclaim(record: *mut Interrupt) -> Option<Interrupt> {
        if record.is_null() {
            return None;
        }
        // SAFETY: non-null records are only created by `Box::into_raw` in
        // `raise`, and the swap that returned `record` removed it from the
        // register, so no other thread can reach it.
        Some(*unsafe { Box::from_raw(record) })
    }

    /// Publish `interrupt`, replacing any pending one.
    pub fn raise(&self, interrupt: Interrupt) {
        let record = Box::into_raw(Box::new(interrupt));
        let replaced = self.pending.swap(record, Ordering::AcqRel);
        drop(Self::reclaim(replaced));
    }

    /// Raise a `Timeout` interrupt.
    pub fn set_timeout(&self, duration: Duration) {
        self.raise(Interrupt::Timeout(duration));
    }

    /// Raise a `Breakpoint` interrupt.
    pub fn set_breakpoint(&self, id: BreakpointId) {
        self.raise(Interrupt::Breakpoint(id));
    }

    /// Raise a `StackOverflow` interrupt.
    pub fn report_stack_overflow(&self) {
        self.raise(Interrupt::StackOverflow);
    }

    /// Raise a `MemoryViolation` interrupt.
    pub fn report_memory_violation(&self, address: usize, access: AccessKind) {
        self.raise(Interrupt::MemoryViolation { address, access });
    }

    /// Return and clear the pending interrupt.
    pub fn check_and_clear(&self) -> Option<Interrupt> {
        // Fast path: nothing pending.
        if self.pending.load(Ordering::Relaxed).is_null() {
            return None;
        }
        Self::reclaim(self.pending.swap(ptr::null_mut(), Ordering::AcqRel))
    }

    /// Whether an interrupt is pending, without clearing it.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.pending.load(Ordering::Acquire).is_null()
    }

    /// Drop any pending interrupt without reporting it.
    pub fn clear(&self) {
        drop(self.check_and_clear());
    }
}

impl Drop for InterruptState {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Cloneable, thread-safe handle on a scheduler's [`InterruptState`].
///
/// Handed to debuggers, timeout supervisors and fault injectors through
/// `Scheduler::interrupt_handle`.
#[derive(Debug, Clone, Default, Deref)]
pub struct InterruptHandle(Arc<InterruptState>);

impl InterruptHandle {
    /// A handle on a fresh register.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether both handles refer to the same register.
    #[must_use]
    pub fn same_register(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(not(feature = "loom"))]
pub use watchdog::TimeoutGuard;

#[cfg(not(feature = "loom"))]
mod watchdog {
    use super::InterruptHandle;
    use core::time::Duration;
    use parking_lot::{Condvar, Mutex};
    use std::{io, sync::Arc, thread::JoinHandle};
    use tracing::{debug, warn};

    #[derive(Debug, Default)]
    struct Cancel {
        cancelled: Mutex<bool>,
        cond: Condvar,
    }

    /// Armed timeout: raises [`Interrupt::Timeout`](super::Interrupt::Timeout)
    /// when the duration elapses, unless dropped or cancelled first.
    #[derive(Debug)]
    #[must_use = "dropping the guard disarms the timeout"]
    pub struct TimeoutGuard {
        cancel: Arc<Cancel>,
        thread: Option<JoinHandle<()>>,
    }

    impl TimeoutGuard {
        /// Disarm the timeout. Has no effect if it already fired.
        pub fn cancel(mut self) {
            self.disarm();
        }

        fn disarm(&mut self) {
            *self.cancel.cancelled.lock() = true;
            self.cancel.cond.notify_all();
            if let Some(thread) = self.thread.take()
                && thread.join().is_err()
            {
                warn!("interrupt: timeout watchdog panicked");
            }
        }
    }

    impl Drop for TimeoutGuard {
        fn drop(&mut self) {
            self.disarm();
        }
    }

    impl InterruptHandle {
        /// Start a watchdog thread that raises a `Timeout` after `after`.
        ///
        /// # Errors
        /// If the watchdog thread cannot be spawned.
        pub fn arm_timeout(&self, after: Duration) -> io::Result<TimeoutGuard> {
            let cancel = Arc::new(Cancel::default());
            let handle = self.clone();
            let thread = std::thread::Builder::new()
                .name("flowdag-timeout".to_owned())
                .spawn({
                    let cancel = Arc::clone(&cancel);
                    move || {
                        let mut cancelled = cancel.cancelled.lock();
                        let waited = cancel
                            .cond
                            .wait_while_for(&mut cancelled, |cancelled| !*cancelled, after);
                        if waited.timed_out() && !*cancelled {
                            debug!(after_ms = after.as_millis(), "interrupt: timeout fired");
                            handle.set_timeout(after);
                        }
                    }
                })?;
            Ok(TimeoutGuard {
                cancel,
                thread: Some(thread),
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::io::Write;

        #[derive(Clone, Default)]
        struct Captured(Arc<Mutex<Vec<u8>>>);

        impl Write for Captured {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        #[test]
        fn disarming_reports_a_panicked_watchdog() {
            let log = Captured::default();
            let subscriber = tracing_subscriber::fmt()
                .with_writer({
                    let log = log.clone();
                    move || log.clone()
                })
                .with_ansi(false)
                .finish();
            let guard = TimeoutGuard {
                cancel: Arc::new(Cancel::default()),
                thread: Some(std::thread::spawn(|| panic!("watchdog failure"))),
            };
            tracing::subscriber::with_default(subscriber, || guard.cancel());
            let log = String::from_utf8(log.0.lock().clone()).unwrap();
            assert!(log.contains("timeout watchdog panicked"), "{log}");
        }
    }
}
