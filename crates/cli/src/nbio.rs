// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Non-blocking FIFO plumbing shared by the channel readers, the stdout
//! tap, and the routed-output writer.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::Path;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tokio::io::unix::AsyncFd;

/// Newtype wrapper around `OwnedFd` for use with `AsyncFd`.
#[derive(Debug)]
pub struct FifoFd(OwnedFd);

impl AsRawFd for FifoFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

impl AsFd for FifoFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

/// Set the given file descriptor to non-blocking mode.
pub fn set_nonblocking(fd: &impl AsFd) -> io::Result<()> {
    let borrowed = fd.as_fd();
    let flags = fcntl(borrowed, FcntlArg::F_GETFL).map_err(io_err)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(borrowed, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io_err)?;
    Ok(())
}

/// Open a FIFO for reading without blocking on writer arrival.
///
/// Opens with `O_RDWR | O_NONBLOCK`: `O_RDWR` keeps a write end alive so
/// the fd never reports EOF when the last producer closes; `O_NONBLOCK`
/// enables event-driven reads through [`AsyncFd`].
pub fn open_fifo_reader(path: &Path) -> io::Result<AsyncFd<FifoFd>> {
    let file = std::fs::OpenOptions::new().read(true).write(true).open(path)?;
    set_nonblocking(&file)?;
    let owned: OwnedFd = file.into();
    AsyncFd::new(FifoFd(owned))
}

/// Open a FIFO for writing without blocking on reader arrival.
///
/// Fails with `ENXIO` when no reader has the pipe open; the caller
/// surfaces that as a structured error rather than waiting.
pub fn open_fifo_writer(path: &Path) -> io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;

    std::fs::OpenOptions::new()
        .write(true)
        .custom_flags(nix::libc::O_NONBLOCK)
        .open(path)
}

/// Read a chunk of data from the async FIFO fd.
pub async fn read_chunk(afd: &AsyncFd<FifoFd>, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let mut guard = afd.readable().await?;
        match guard.try_io(|inner| {
            nix::unistd::read(inner.get_ref(), buf).map_err(io_err)
        }) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

fn io_err(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}
