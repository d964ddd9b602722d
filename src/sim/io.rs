//! Console IO for the machine.
//!
//! The interface for console devices is defined with the [`IODevice`] trait.
//! The machine reads debugger command lines from its device, and syscall
//! handlers may use the device for program input/output.
//!
//! Besides the trait, this module also includes:
//! - [`StdIO`]: the default device, bound to the process's stdin/stdout.
//! - [`EmptyIO`]: an `IODevice` holding the implementation for a lack of IO support.
//! - [`BufferedIO`]: an `IODevice` backed by memory buffers shared with the host.
//! - [`BiChannelIO`]: an `IODevice` holding a threaded/channel implementation.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::thread::JoinHandle;

use crossbeam_channel as cbc;

/// A console device the machine can read lines from and write bytes to.
pub trait IODevice {
    /// Reads one line of input, blocking until a line is available.
    ///
    /// Returns an error (conventionally [`io::ErrorKind::UnexpectedEof`])
    /// once the input is exhausted.
    fn read_line(&mut self) -> io::Result<String>;

    /// Writes the bytes to the device output.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
}
impl dyn IODevice {} // assert IODevice is dyn safe

/// The process's standard input and output.
///
/// This is the device a [`Machine`] is constructed with when no other
/// device is supplied.
///
/// [`Machine`]: super::Machine
#[derive(Debug, Default)]
pub struct StdIO;
impl IODevice for StdIO {
    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        match io::stdin().read_line(&mut line)? {
            0 => Err(io::ErrorKind::UnexpectedEof.into()),
            _ => Ok(line),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        use io::Write;

        let mut out = io::stdout().lock();
        out.write_all(buf)?;
        out.flush()
    }
}

/// No IO. All reads fail with [`io::ErrorKind::UnexpectedEof`] and all
/// writes are discarded.
///
/// Useful for running programs that never touch the console.
#[derive(Debug, Default)]
pub struct EmptyIO;
impl IODevice for EmptyIO {
    fn read_line(&mut self) -> io::Result<String> {
        Err(io::ErrorKind::UnexpectedEof.into())
    }

    fn write_all(&mut self, _buf: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

/// IO that reads from an input buffer and writes to an output buffer.
///
/// The buffers can be accessed by the host via [`BufferedIO::get_input`] and
/// [`BufferedIO::get_output`], so input can be queued before a debug session
/// and output inspected afterwards.
///
/// Note that if an input/output lock guard is acquired from one of the locks
/// of this IO, the input/output becomes temporarily inaccessible to the
/// machine. Thus, a lock guard should never be leaked, otherwise the machine
/// loses access to the input/output.
#[derive(Debug, Clone, Default)]
pub struct BufferedIO {
    input: Arc<RwLock<VecDeque<u8>>>,
    output: Arc<RwLock<Vec<u8>>>,
}
impl BufferedIO {
    /// Creates a new BufferedIO.
    pub fn new() -> Self {
        Self::default()
    }
    /// Creates a new BufferedIO from already defined buffers.
    pub fn with_bufs(input: Arc<RwLock<VecDeque<u8>>>, output: Arc<RwLock<Vec<u8>>>) -> Self {
        Self { input, output }
    }

    /// Gets a reference to the input buffer.
    pub fn get_input(&self) -> &Arc<RwLock<VecDeque<u8>>> {
        &self.input
    }
    /// Gets a reference to the output buffer.
    pub fn get_output(&self) -> &Arc<RwLock<Vec<u8>>> {
        &self.output
    }

    fn lock_input(&self) -> RwLockWriteGuard<'_, VecDeque<u8>> {
        self.input.write().unwrap_or_else(|e| e.into_inner())
    }
    fn lock_output(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.output.write().unwrap_or_else(|e| e.into_inner())
    }
}
impl IODevice for BufferedIO {
    fn read_line(&mut self) -> io::Result<String> {
        let mut input = self.lock_input();
        if input.is_empty() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        let mut line = Vec::new();
        while let Some(byte) = input.pop_front() {
            if byte == b'\n' {
                break;
            }
            line.push(byte);
        }

        String::from_utf8(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.lock_output().extend_from_slice(buf);
        Ok(())
    }
}

/// A helper struct for [`BiChannelIO::new`],
/// indicating the channel is closed and no more reads/writes will come from it.
#[derive(Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stop;

/// An IO that reads lines from one channel and writes bytes to another.
///
/// This is meant for hosts that drive the machine from a different thread
/// than the one producing its input (a GUI, a network session, a pty).
///
/// This uses threads to read and write from input and output. As such, the
/// reader callback continues to poll input even while the machine is not
/// between debugger prompts; care should be taken not to feed lines through
/// the reader while the machine is not running.
pub struct BiChannelIO {
    read_data: cbc::Receiver<String>,
    #[allow(unused)]
    read_handler: JoinHandle<()>,

    write_data: cbc::Sender<Box<[u8]>>,
    #[allow(unused)]
    write_handler: JoinHandle<()>,
}
impl BiChannelIO {
    /// Creates a new bi-channel IO device with the given reader and writer.
    ///
    /// The reader function is called every time the device needs a line of
    /// input. It should block until a line is ready, or return [`Stop`] if
    /// there are no more lines to read.
    ///
    /// The writer function is called every time bytes need to be written to
    /// the device output.
    pub fn new(
        mut reader: impl FnMut() -> Result<String, Stop> + Send + 'static,
        mut writer: impl FnMut(&[u8]) -> Result<(), Stop> + Send + 'static,
    ) -> Self {
        let (read_tx, read_rx) = cbc::bounded(1);
        let (write_tx, write_rx) = cbc::bounded::<Box<[u8]>>(1);

        // Reader thread:
        let read_handler = std::thread::spawn(move || loop {
            let Ok(line) = reader() else { return };
            let Ok(()) = read_tx.send(line) else { return };
        });

        // Writer thread:
        let write_handler = std::thread::spawn(move || {
            for bytes in write_rx {
                let Ok(()) = writer(&bytes) else { return };
            }
        });

        Self {
            read_data: read_rx,
            read_handler,
            write_data: write_tx,
            write_handler,
        }
    }

    /// Creates a bi-channel IO device with stdin as the read data and stdout
    /// as the write data.
    ///
    /// Unlike [`StdIO`], this polls stdin from its own thread. This flushes
    /// stdout every time bytes are written.
    pub fn stdio() -> Self {
        use std::io::Write;

        Self::new(
            || {
                let mut line = String::new();
                match io::stdin().read_line(&mut line) {
                    Ok(0) | Err(_) => Err(Stop),
                    Ok(_) => Ok(line),
                }
            },
            |bytes| {
                let mut out = io::stdout().lock();
                out.write_all(bytes).map_err(|_| Stop)?;
                out.flush().map_err(|_| Stop)
            },
        )
    }
}
impl IODevice for BiChannelIO {
    fn read_line(&mut self) -> io::Result<String> {
        self.read_data
            .recv()
            .map_err(|_| io::ErrorKind::UnexpectedEof.into())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_data
            .send(buf.into())
            .map_err(|_| io::ErrorKind::BrokenPipe.into())
    }
}
impl std::fmt::Debug for BiChannelIO {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiChannelIO").finish_non_exhaustive()
    }
}
