//! Non-blocking codec sessions.
//!
//! A codec session is a pull-based state machine with two independent buffer pools:
//! the caller acquires an input buffer, fills it and queues it back; separately it polls for
//! finished output buffers and releases each one when done. Neither side ever blocks, so a
//! single loop can drive a decoder and an encoder together (see [`crate::pump`]).
//!
//! Lifecycle: `Configured → Started → Stopped → Released`. Running sessions should be held in a
//! [`Running`] guard so stop + release happen exactly once on every exit path.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use tracing::{debug, error};

use crate::error::{Error, Result};

pub mod decoder;
pub mod mp3;

pub use decoder::PcmDecoder;
pub use mp3::Mp3Encoder;

/// Flags carried by queued inputs and retrieved outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    pub key_frame: bool,
    /// Codec initialization data rather than media payload.
    pub codec_config: bool,
    pub end_of_stream: bool,
}

impl BufferFlags {
    pub fn end_of_stream() -> Self {
        Self {
            end_of_stream: true,
            ..Self::default()
        }
    }

    pub fn key_frame(is_sync: bool) -> Self {
        Self {
            key_frame: is_sync,
            ..Self::default()
        }
    }
}

/// Size, timestamp and flags of one buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub size: usize,
    pub pts_us: i64,
    pub flags: BufferFlags,
}

/// An input slot lent out by a session. Fill it, then hand it back via `queue_input`.
#[derive(Debug)]
pub struct InputBuffer {
    index: usize,
    capacity: usize,
    data: Vec<u8>,
}

impl InputBuffer {
    fn new(index: usize, capacity: usize) -> Self {
        Self {
            index,
            capacity,
            data: Vec::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes still free in this slot.
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Copy as much of `bytes` as fits and return the number of bytes copied.
    pub fn fill(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining());
        self.data.extend_from_slice(&bytes[..n]);
        n
    }
}

/// A finished buffer. Its slot stays busy until `release_output(index)`.
#[derive(Debug)]
pub struct OutputBuffer {
    pub index: usize,
    pub data: Vec<u8>,
    pub info: BufferInfo,
}

/// Result of polling a session for output.
#[derive(Debug)]
pub enum Dequeued {
    Buffer(OutputBuffer),
    /// The output layout is now known; emitted once before the first buffer.
    FormatChanged,
    /// Nothing available right now.
    TryAgainLater,
}

/// A pull-based codec state machine.
///
/// Timeouts bound how long a call may wait for a buffer. Implementations in this crate do
/// their work synchronously inside the calls and therefore never need to wait at all.
pub trait CodecSession {
    fn name(&self) -> &str;

    fn start(&mut self) -> Result<()>;

    fn try_acquire_input(&mut self, timeout: Duration) -> Result<Option<InputBuffer>>;

    fn queue_input(&mut self, buffer: InputBuffer, info: BufferInfo) -> Result<()>;

    fn try_retrieve_output(&mut self, timeout: Duration) -> Result<Dequeued>;

    fn release_output(&mut self, index: usize) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn release(&mut self);
}

/// The codec-specific half of a [`PooledSession`].
pub trait Processor {
    /// Turn one queued input into zero or more outputs.
    fn process(
        &mut self,
        data: &[u8],
        info: BufferInfo,
        out: &mut VecDeque<Produced>,
    ) -> Result<()>;

    /// Emit whatever is still buffered once end-of-stream has been queued.
    fn finish(&mut self, out: &mut VecDeque<Produced>) -> Result<()>;
}

/// One output produced by a [`Processor`], before it is assigned a slot.
#[derive(Debug)]
pub struct Produced {
    pub data: Vec<u8>,
    pub info: BufferInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Configured,
    Started,
    Stopped,
    Released,
}

/// Pool sizes of a [`PooledSession`].
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub input_buffers: usize,
    pub input_capacity: usize,
    pub output_buffers: usize,
}

/// Buffer-pool bookkeeping shared by every session in this crate.
///
/// Inputs are processed lazily when output is polled, and an input slot only returns to the
/// free list after its data was processed. A caller that never drains output therefore runs
/// out of input slots, exactly like a hardware codec would.
pub struct PooledSession<P: Processor> {
    name: String,
    processor: P,
    state: SessionState,
    pool: PoolConfig,
    free_inputs: Vec<usize>,
    lent_inputs: Vec<bool>,
    pending: VecDeque<(usize, Vec<u8>, BufferInfo)>,
    ready: VecDeque<Produced>,
    outstanding: Vec<usize>,
    next_output_index: usize,
    format_announced: bool,
    eos_queued: bool,
    eos_emitted: bool,
}

impl<P: Processor> PooledSession<P> {
    pub fn new(name: impl Into<String>, processor: P, pool: PoolConfig) -> Self {
        let input_buffers = pool.input_buffers.max(1);
        Self {
            name: name.into(),
            processor,
            state: SessionState::Configured,
            pool: PoolConfig {
                input_buffers,
                output_buffers: pool.output_buffers.max(1),
                ..pool
            },
            free_inputs: (0..input_buffers).rev().collect(),
            lent_inputs: vec![false; input_buffers],
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            outstanding: Vec::new(),
            next_output_index: 0,
            format_announced: false,
            eos_queued: false,
            eos_emitted: false,
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    fn ensure_started(&self, op: &str) -> Result<()> {
        if self.state == SessionState::Started {
            return Ok(());
        }
        Err(Error::codec(format!(
            "{}: {op} called in state {:?}",
            self.name, self.state
        )))
    }

    // Process queued inputs until something is ready or nothing is left to do.
    fn pump_pending(&mut self) -> Result<()> {
        while self.ready.is_empty() {
            let Some((index, data, info)) = self.pending.pop_front() else {
                return Ok(());
            };

            if !data.is_empty() {
                self.processor.process(&data, info, &mut self.ready)?;
            }

            if info.flags.end_of_stream {
                self.processor.finish(&mut self.ready)?;
                self.ready.push_back(Produced {
                    data: Vec::new(),
                    info: BufferInfo {
                        size: 0,
                        pts_us: info.pts_us,
                        flags: BufferFlags::end_of_stream(),
                    },
                });
            }

            self.lent_inputs[index] = false;
            self.free_inputs.push(index);
        }
        Ok(())
    }
}

impl<P: Processor> CodecSession for PooledSession<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Configured {
            return Err(Error::unsupported(format!(
                "{}: cannot start from state {:?}",
                self.name, self.state
            )));
        }
        self.state = SessionState::Started;
        debug!(session = %self.name, "codec session started");
        Ok(())
    }

    fn try_acquire_input(&mut self, _timeout: Duration) -> Result<Option<InputBuffer>> {
        self.ensure_started("try_acquire_input")?;
        if self.eos_queued {
            return Ok(None);
        }

        Ok(self.free_inputs.pop().map(|index| {
            self.lent_inputs[index] = true;
            InputBuffer::new(index, self.pool.input_capacity)
        }))
    }

    fn queue_input(&mut self, buffer: InputBuffer, info: BufferInfo) -> Result<()> {
        self.ensure_started("queue_input")?;

        let index = buffer.index;
        if !self.lent_inputs.get(index).copied().unwrap_or(false) {
            return Err(Error::codec(format!(
                "{}: input buffer {index} was not acquired",
                self.name
            )));
        }
        if self.eos_queued {
            return Err(Error::codec(format!(
                "{}: input queued after end-of-stream",
                self.name
            )));
        }

        self.eos_queued = info.flags.end_of_stream;
        self.pending.push_back((index, buffer.data, info));
        Ok(())
    }

    fn try_retrieve_output(&mut self, _timeout: Duration) -> Result<Dequeued> {
        self.ensure_started("try_retrieve_output")?;

        if self.eos_emitted || self.outstanding.len() >= self.pool.output_buffers {
            return Ok(Dequeued::TryAgainLater);
        }

        self.pump_pending()?;

        let Some(produced) = self.ready.pop_front() else {
            return Ok(Dequeued::TryAgainLater);
        };

        if !self.format_announced && !produced.data.is_empty() {
            self.format_announced = true;
            self.ready.push_front(produced);
            return Ok(Dequeued::FormatChanged);
        }

        let index = self.next_output_index;
        self.next_output_index = self.next_output_index.wrapping_add(1);
        self.outstanding.push(index);
        self.eos_emitted = produced.info.flags.end_of_stream;

        let mut info = produced.info;
        info.size = produced.data.len();
        Ok(Dequeued::Buffer(OutputBuffer {
            index,
            data: produced.data,
            info,
        }))
    }

    fn release_output(&mut self, index: usize) -> Result<()> {
        let Some(pos) = self.outstanding.iter().position(|i| *i == index) else {
            return Err(Error::codec(format!(
                "{}: output buffer {index} is not outstanding",
                self.name
            )));
        };
        self.outstanding.swap_remove(pos);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        match self.state {
            SessionState::Started | SessionState::Configured => {
                self.pending.clear();
                self.ready.clear();
                self.outstanding.clear();
                self.state = SessionState::Stopped;
                Ok(())
            }
            SessionState::Stopped => Ok(()),
            SessionState::Released => Err(Error::codec(format!(
                "{}: stop after release",
                self.name
            ))),
        }
    }

    fn release(&mut self) {
        self.state = SessionState::Released;
    }
}

/// Owns a started session and disposes of it exactly once.
///
/// Dropping the guard stops and releases the session. Failures during cleanup are logged,
/// never returned, so they cannot mask the error that caused the unwind.
pub struct Running<C: CodecSession> {
    session: C,
}

impl<C: CodecSession> Running<C> {
    /// Start `session`. On failure the session is released before the error is returned.
    pub fn start(mut session: C) -> Result<Self> {
        if let Err(err) = session.start() {
            session.release();
            return Err(match err {
                Error::UnsupportedCodec(_) => err,
                other => Error::unsupported(format!("{}: {other}", session.name())),
            });
        }
        Ok(Self { session })
    }
}

impl<C: CodecSession> Deref for Running<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.session
    }
}

impl<C: CodecSession> DerefMut for Running<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.session
    }
}

impl<C: CodecSession> Drop for Running<C> {
    fn drop(&mut self) {
        if let Err(err) = self.session.stop() {
            error!(session = %self.session.name(), error = %err, "codec stop failed");
        }
        self.session.release();
        debug!(session = %self.session.name(), "codec session released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Echoes every input back as one output.
    struct Echo;

    impl Processor for Echo {
        fn process(
            &mut self,
            data: &[u8],
            info: BufferInfo,
            out: &mut VecDeque<Produced>,
        ) -> Result<()> {
            out.push_back(Produced {
                data: data.to_vec(),
                info,
            });
            Ok(())
        }

        fn finish(&mut self, _out: &mut VecDeque<Produced>) -> Result<()> {
            Ok(())
        }
    }

    fn echo(inputs: usize, outputs: usize) -> PooledSession<Echo> {
        PooledSession::new(
            "echo",
            Echo,
            PoolConfig {
                input_buffers: inputs,
                input_capacity: 8,
                output_buffers: outputs,
            },
        )
    }

    fn next_buffer(session: &mut PooledSession<Echo>) -> OutputBuffer {
        loop {
            match session.try_retrieve_output(Duration::ZERO).unwrap() {
                Dequeued::Buffer(buf) => return buf,
                Dequeued::FormatChanged => continue,
                Dequeued::TryAgainLater => panic!("expected output"),
            }
        }
    }

    #[test]
    fn calls_before_start_are_rejected() {
        let mut session = echo(1, 1);
        assert!(session.try_acquire_input(Duration::ZERO).is_err());
    }

    #[test]
    fn input_pool_runs_dry_until_output_is_polled() -> anyhow::Result<()> {
        let mut session = echo(1, 4);
        session.start()?;

        let mut input = session.try_acquire_input(Duration::ZERO)?.expect("slot");
        assert_eq!(input.fill(&[1; 20]), 8);
        session.queue_input(input, BufferInfo::default())?;
        assert!(session.try_acquire_input(Duration::ZERO)?.is_none());

        let out = next_buffer(&mut session);
        assert_eq!(out.data, vec![1; 8]);
        assert!(session.try_acquire_input(Duration::ZERO)?.is_some());
        Ok(())
    }

    #[test]
    fn output_slots_must_be_released() -> anyhow::Result<()> {
        let mut session = echo(2, 1);
        session.start()?;

        for _ in 0..2 {
            let mut input = session.try_acquire_input(Duration::ZERO)?.expect("slot");
            input.fill(&[7]);
            session.queue_input(input, BufferInfo::default())?;
        }

        let first = next_buffer(&mut session);
        assert!(matches!(
            session.try_retrieve_output(Duration::ZERO)?,
            Dequeued::TryAgainLater
        ));
        session.release_output(first.index)?;
        let second = next_buffer(&mut session);
        assert!(session.release_output(first.index).is_err());
        session.release_output(second.index)?;
        Ok(())
    }

    #[test]
    fn end_of_stream_is_propagated_once() -> anyhow::Result<()> {
        let mut session = echo(2, 2);
        session.start()?;

        let input = session.try_acquire_input(Duration::ZERO)?.expect("slot");
        session.queue_input(
            input,
            BufferInfo {
                flags: BufferFlags::end_of_stream(),
                ..BufferInfo::default()
            },
        )?;
        assert!(session.try_acquire_input(Duration::ZERO)?.is_none());

        let eos = next_buffer(&mut session);
        assert!(eos.info.flags.end_of_stream);
        assert!(eos.data.is_empty());
        assert!(matches!(
            session.try_retrieve_output(Duration::ZERO)?,
            Dequeued::TryAgainLater
        ));
        Ok(())
    }

    #[test]
    fn running_guard_stops_and_releases_on_drop() -> anyhow::Result<()> {
        use std::cell::RefCell;
        use std::rc::Rc;

        struct Tracked {
            inner: PooledSession<Echo>,
            calls: Rc<RefCell<Vec<&'static str>>>,
        }

        impl CodecSession for Tracked {
            fn name(&self) -> &str {
                self.inner.name()
            }
            fn start(&mut self) -> Result<()> {
                self.calls.borrow_mut().push("start");
                self.inner.start()
            }
            fn try_acquire_input(&mut self, timeout: Duration) -> Result<Option<InputBuffer>> {
                self.inner.try_acquire_input(timeout)
            }
            fn queue_input(&mut self, buffer: InputBuffer, info: BufferInfo) -> Result<()> {
                self.inner.queue_input(buffer, info)
            }
            fn try_retrieve_output(&mut self, timeout: Duration) -> Result<Dequeued> {
                self.inner.try_retrieve_output(timeout)
            }
            fn release_output(&mut self, index: usize) -> Result<()> {
                self.inner.release_output(index)
            }
            fn stop(&mut self) -> Result<()> {
                self.calls.borrow_mut().push("stop");
                self.inner.stop()
            }
            fn release(&mut self) {
                self.calls.borrow_mut().push("release");
                self.inner.release()
            }
        }

        let calls = Rc::new(RefCell::new(Vec::new()));
        let running = Running::start(Tracked {
            inner: echo(1, 1),
            calls: Rc::clone(&calls),
        })?;
        drop(running);

        assert_eq!(*calls.borrow(), vec!["start", "stop", "release"]);
        Ok(())
    }

    #[test]
    fn stop_after_release_is_an_error() -> anyhow::Result<()> {
        let mut session = echo(1, 1);
        session.start()?;
        session.stop()?;
        session.release();
        assert!(session.stop().is_err());
        Ok(())
    }
}
