//! Session handle
//!
//! A [`Handle`] owns one engine session from open to close. Operations take
//! `&self` so a second thread can shut the session down while the first is
//! blocked in a receive; serializing other concurrent use is up to the caller.
//!
//! Every engine call runs under a shared gate that [`Handle::close`] takes
//! exclusively, so the native handle is never released while a call on
//! another thread is still using it.

use std::ffi::CString;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::config::SessionConfig;
use crate::consts::{Layer, OpenFlags, Param, ShutdownHow, PRIORITY_HIGHEST, PRIORITY_LOWEST};
use crate::engine::{Engine, RawHandle};
use crate::error::{Error, Op, Result, ERROR_NO_DATA};
use crate::pin::ThreadPin;

/// Operational state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Open and usable in both directions
    Open,
    /// One or both directions shut down
    Shutdown(ShutdownHow),
    /// Released; every further operation fails
    Closed,
}

/// One open session with the diversion engine
pub struct Handle<E: Engine> {
    pub(crate) engine: E,
    raw: RawHandle,
    layer: Layer,
    priority: i16,
    flags: OpenFlags,
    state: Mutex<State>,
    gate: RwLock<()>,
    pending: AtomicUsize,
}

impl<E: Engine> Handle<E> {
    /// Open a session.
    ///
    /// The priority and filter are validated before the engine is called.
    /// The calling thread is pinned for the duration of the engine call.
    pub fn open(
        engine: E,
        filter: &str,
        layer: Layer,
        priority: i16,
        flags: OpenFlags,
    ) -> Result<Self> {
        if !(PRIORITY_LOWEST..=PRIORITY_HIGHEST).contains(&priority) {
            return Err(Error::InvalidPriority {
                priority,
                min: PRIORITY_LOWEST,
                max: PRIORITY_HIGHEST,
            });
        }
        if filter.trim().is_empty() {
            return Err(Error::InvalidFilter("Empty filter".into()));
        }
        let c_filter = CString::new(filter)
            .map_err(|_| Error::InvalidFilter("Filter contains a NUL byte".into()))?;

        info!(filter, %layer, priority, flags = flags.bits(), "Opening session");

        let raw = {
            let _pin = ThreadPin::acquire();
            engine.open(&c_filter, layer, priority, flags)?
        };

        info!(handle = raw.0, "Session opened");

        Ok(Self {
            engine,
            raw,
            layer,
            priority,
            flags,
            state: Mutex::new(State::Open),
            gate: RwLock::new(()),
            pending: AtomicUsize::new(0),
        })
    }

    /// Open a session described by `config` and apply its queue tuning.
    ///
    /// If a queue parameter is rejected the session is closed again.
    pub fn open_with_config(engine: E, config: &SessionConfig) -> Result<Self> {
        config.validate()?;
        let handle = Self::open(
            engine,
            &config.filter,
            config.layer,
            config.priority,
            config.open_flags()?,
        )?;

        if let Some(ref queue) = config.queue {
            let applied = handle
                .set_param(Param::QueueLength, queue.length)
                .and_then(|_| handle.set_param(Param::QueueTime, queue.time_ms))
                .and_then(|_| handle.set_param(Param::QueueSize, queue.size));
            if let Err(e) = applied {
                if let Err(close_err) = handle.close() {
                    warn!(error = %close_err, "Close after failed queue setup also failed");
                }
                return Err(e);
            }
        }

        Ok(handle)
    }

    /// Open a session, run `f` with it and close it on every exit path
    pub fn with_open<R>(
        engine: E,
        filter: &str,
        layer: Layer,
        priority: i16,
        flags: OpenFlags,
        f: impl FnOnce(&Self) -> Result<R>,
    ) -> Result<R> {
        let handle = Self::open(engine, filter, layer, priority, flags)?;
        let result = f(&handle);
        let closed = handle.close();

        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "Close failed after an earlier error");
                Err(e)
            }
        }
    }

    /// Layer the session was opened on
    pub fn layer(&self) -> Layer {
        self.layer
    }

    /// Priority the session was opened with
    pub fn priority(&self) -> i16 {
        self.priority
    }

    /// Flags the session was opened with
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Engine-assigned identifier
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    /// Current state
    pub fn state(&self) -> State {
        *self.state.lock()
    }

    /// Engine backing this session
    pub fn engine(&self) -> &E {
        &self.engine
    }

    // Recursive so a shutdown is not queued behind a close that is itself
    // waiting for a blocked receive.
    fn enter(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read_recursive()
    }

    fn live(&self) -> Result<RawHandle> {
        match *self.state.lock() {
            State::Closed => Err(Error::HandleClosed),
            _ => Ok(self.raw),
        }
    }

    /// Run `f` against the native handle unless the session is closed
    pub(crate) fn with_live<R>(&self, f: impl FnOnce(RawHandle) -> Result<R>) -> Result<R> {
        let _gate = self.enter();
        f(self.live()?)
    }

    pub(crate) fn register_overlapped(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unregister_overlapped(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    // A drained receive after shutdown surfaces as end-of-session.
    pub(crate) fn map_recv_error(&self, err: Error) -> Error {
        match (err.os_code(), self.state()) {
            (Some(ERROR_NO_DATA), State::Shutdown(how)) if how.covers_recv() => {
                Error::EndOfSession {
                    code: ERROR_NO_DATA,
                }
            }
            _ => err,
        }
    }

    pub(crate) fn check_layer(&self, addr: &Address) -> Result<()> {
        let found = addr.layer()?;
        if found != self.layer {
            return Err(Error::LayerMismatch {
                expected: self.layer,
                found,
            });
        }
        Ok(())
    }

    /// Receive one packet.
    ///
    /// Blocks until a packet is queued. Returns the number of bytes written
    /// to `packet`; `addr` is filled by the engine.
    pub fn recv(&self, packet: &mut [u8], addr: &mut Address) -> Result<usize> {
        if packet.is_empty() {
            return Err(Error::EmptyBuffer { op: Op::Recv });
        }
        self.with_live(|raw| self.engine.recv(raw, packet, addr))
            .map_err(|e| self.map_recv_error(e))
    }

    /// Inject one packet; `addr` must be on this session's layer
    pub fn send(&self, packet: &[u8], addr: &Address) -> Result<usize> {
        if packet.is_empty() {
            return Err(Error::EmptyBuffer { op: Op::Send });
        }
        self.check_layer(addr)?;
        self.with_live(|raw| self.engine.send(raw, packet, addr))
    }

    /// Disable receive, send or both without closing.
    ///
    /// A receive blocked on another thread returns once the queue drains.
    pub fn shutdown(&self, how: ShutdownHow) -> Result<()> {
        let _gate = self.enter();

        // Recorded before the engine call so a receive woken by it already
        // sees the shutdown.
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            *state = match previous {
                State::Open => State::Shutdown(how),
                State::Shutdown(prev) => State::Shutdown(prev.merge(how)),
                State::Closed => return Err(Error::HandleClosed),
            };
            previous
        };

        if let Err(e) = self.engine.shutdown(self.raw, how) {
            let mut state = self.state.lock();
            if *state != State::Closed {
                *state = previous;
            }
            return Err(e);
        }

        info!(handle = self.raw.0, %how, "Session shut down");
        Ok(())
    }

    /// Release the session.
    ///
    /// Waits for engine calls running on other threads, so a receive blocked
    /// elsewhere has to be woken with [`shutdown`](Self::shutdown) first.
    /// Refused while an overlapped receive is outstanding. The handle counts
    /// as released even if the engine reports a failure, which is still
    /// returned. Closing again is a no-op.
    pub fn close(&self) -> Result<()> {
        let _gate = self.gate.write();
        {
            let mut state = self.state.lock();
            if *state == State::Closed {
                return Ok(());
            }
            let count = self.pending.load(Ordering::Acquire);
            if count > 0 {
                return Err(Error::ReceivePending { count });
            }
            *state = State::Closed;
        }

        info!(handle = self.raw.0, "Closing session");
        self.engine.close(self.raw)
    }

    /// Write a tunable parameter
    pub fn set_param(&self, param: Param, value: u64) -> Result<()> {
        param.validate(value)?;
        self.with_live(|raw| self.engine.set_param(raw, param, value))?;
        debug!(%param, value, "Set parameter");
        Ok(())
    }

    /// Read a parameter
    pub fn get_param(&self, param: Param) -> Result<u64> {
        self.with_live(|raw| self.engine.get_param(raw, param))
    }

    /// Driver `(major, minor)` version
    pub fn driver_version(&self) -> Result<(u64, u64)> {
        Ok((
            self.get_param(Param::VersionMajor)?,
            self.get_param(Param::VersionMinor)?,
        ))
    }
}

impl<E: Engine> Drop for Handle<E> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(handle = self.raw.0, error = %e, "Failed to close session on drop");
        }
    }
}

impl<E: Engine> std::fmt::Debug for Handle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("raw", &self.raw)
            .field("layer", &self.layer)
            .field("priority", &self.priority)
            .field("flags", &self.flags)
            .field("state", &self.state())
            .finish()
    }
}
