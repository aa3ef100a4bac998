//! Guest-visible standard streams.
//!
//! Guest code does not get ambient access to the host's stdin/stdout/stderr.
//! Unless the engine was built with the explicit opt-in
//! ([`EngineSettings::allow_stream_io`](super::EngineSettings)), the streams
//! handed to guest contexts fail loudly on any read or write.

use std::io::{self, Read, Write};

/// Error message raised by sealed guest streams.
pub const SEALED_STREAM_MESSAGE: &str = "cannot perform stream I/O inside guest code";

/// Stream access policy for guest contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPolicy {
    /// Reads and writes fail with [`SEALED_STREAM_MESSAGE`]
    Sealed,
    /// Streams pass through to the host process
    Inherited,
}

/// Factory for the standard streams a guest context sees.
#[derive(Debug, Clone, Copy)]
pub struct GuestStreams {
    policy: StreamPolicy,
}

impl GuestStreams {
    /// Streams for the given policy.
    pub fn new(policy: StreamPolicy) -> Self {
        Self { policy }
    }

    /// The active policy.
    pub fn policy(&self) -> StreamPolicy {
        self.policy
    }

    /// Guest stdin handle.
    pub fn stdin(&self) -> Box<dyn Read + Send> {
        match self.policy {
            StreamPolicy::Sealed => Box::new(SealedInput),
            StreamPolicy::Inherited => Box::new(io::stdin()),
        }
    }

    /// Guest stdout handle.
    pub fn stdout(&self) -> Box<dyn Write + Send> {
        match self.policy {
            StreamPolicy::Sealed => Box::new(SealedOutput),
            StreamPolicy::Inherited => Box::new(io::stdout()),
        }
    }

    /// Guest stderr handle.
    pub fn stderr(&self) -> Box<dyn Write + Send> {
        match self.policy {
            StreamPolicy::Sealed => Box::new(SealedOutput),
            StreamPolicy::Inherited => Box::new(io::stderr()),
        }
    }
}

fn sealed() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, SEALED_STREAM_MESSAGE)
}

struct SealedInput;

impl Read for SealedInput {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(sealed())
    }
}

struct SealedOutput;

impl Write for SealedOutput {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(sealed())
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(sealed())
    }
}
