//! Scoped pinning of the calling thread
//!
//! The engine's open entry point must run start to finish on one OS thread
//! and processor. [`ThreadPin`] holds that pin for as long as it lives and
//! restores the previous state when dropped.

use std::marker::PhantomData;
use std::thread::{self, ThreadId};

use tracing::trace;

/// Pin of the current thread, released on drop
pub struct ThreadPin {
    thread: ThreadId,
    #[cfg(windows)]
    previous_mask: usize,
    // Must be released on the thread that acquired it
    _not_send: PhantomData<*const ()>,
}

impl ThreadPin {
    /// Pin the current thread to the processor it is running on
    pub fn acquire() -> Self {
        let thread = thread::current().id();

        #[cfg(windows)]
        {
            let previous_mask = sys::pin_to_current_processor();
            trace!(?thread, previous_mask, "Pinned thread");
            Self {
                thread,
                previous_mask,
                _not_send: PhantomData,
            }
        }

        #[cfg(not(windows))]
        {
            trace!(?thread, "Pinned thread");
            Self {
                thread,
                _not_send: PhantomData,
            }
        }
    }

    /// Thread holding the pin
    pub fn thread(&self) -> ThreadId {
        self.thread
    }
}

impl Drop for ThreadPin {
    fn drop(&mut self) {
        debug_assert_eq!(thread::current().id(), self.thread);

        #[cfg(windows)]
        sys::restore_mask(self.previous_mask);

        trace!(thread = ?self.thread, "Released thread pin");
    }
}

#[cfg(windows)]
mod sys {
    use winapi::um::processthreadsapi::{GetCurrentProcessorNumber, GetCurrentThread};
    use winapi::um::winbase::SetThreadAffinityMask;

    /// Returns the previous affinity mask, or 0 if it could not be changed
    pub fn pin_to_current_processor() -> usize {
        // SAFETY: pseudo-handle of the current thread, always valid
        unsafe {
            let cpu = GetCurrentProcessorNumber();
            let mask = 1usize.checked_shl(cpu).unwrap_or(0);
            if mask == 0 {
                return 0;
            }
            SetThreadAffinityMask(GetCurrentThread(), mask)
        }
    }

    pub fn restore_mask(previous: usize) {
        if previous == 0 {
            return;
        }
        // SAFETY: pseudo-handle of the current thread, always valid
        unsafe {
            SetThreadAffinityMask(GetCurrentThread(), previous);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_records_current_thread() {
        let pin = ThreadPin::acquire();
        assert_eq!(pin.thread(), thread::current().id());
        drop(pin);
    }

    #[test]
    fn test_pin_released_on_every_path() {
        fn fallible(fail: bool) -> Result<(), ()> {
            let _pin = ThreadPin::acquire();
            if fail {
                return Err(());
            }
            Ok(())
        }
        assert!(fallible(true).is_err());
        assert!(fallible(false).is_ok());
        // A fresh pin after both exits proves nothing leaked
        let _pin = ThreadPin::acquire();
    }
}
