//! Pseudo-terminal plumbing for pty-backed jobs.
//!
//! A pty job gets a master/slave pair from `openpty`. The slave is
//! dup'd onto the child's fds 0-2 and made its controlling terminal;
//! the master is split into a write side (kept by the job row for
//! `send` and `resize`) and a dup'd read side (owned by the job's I/O
//! task). Both sides are nonblocking and driven through `AsyncFd`.
//!
//! The master merges the child's stdout and stderr into one stream, so
//! pty jobs have no independent stderr channel.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::libc;
use nix::pty::{openpty, Winsize};
use tokio::io::unix::AsyncFd;

use crate::spawn::PtySize;

/// Write/control side of the master fd.
pub(crate) struct PtyMaster {
    io: AsyncFd<OwnedFd>,
}

/// Read side of the master fd (a dup, so the write side can be kept
/// open independently).
pub(crate) struct PtyReader {
    io: AsyncFd<OwnedFd>,
}

pub(crate) struct PtyPair {
    pub master: PtyMaster,
    pub reader: PtyReader,
    pub slave: OwnedFd,
}

/// Allocate a pty with the given initial geometry.
///
/// Must be called from within a tokio runtime (the fds are registered
/// with the reactor).
pub(crate) fn open(size: PtySize) -> io::Result<PtyPair> {
    let winsize = Winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let pty = openpty(Some(&winsize), None).map_err(io::Error::from)?;

    let read_fd = pty.master.try_clone()?;
    set_nonblocking(pty.master.as_raw_fd())?;
    set_nonblocking(read_fd.as_raw_fd())?;

    Ok(PtyPair {
        master: PtyMaster {
            io: AsyncFd::new(pty.master)?,
        },
        reader: PtyReader {
            io: AsyncFd::new(read_fd)?,
        },
        slave: pty.slave,
    })
}

impl PtyMaster {
    /// Write all of `data` to the child's terminal.
    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < data.len() {
            let mut guard = self.io.writable().await?;
            let res = guard.try_io(|inner| {
                let rest = &data[written..];
                // SAFETY: writing from a valid buffer to an owned, open fd.
                let n = unsafe {
                    libc::write(inner.get_ref().as_raw_fd(), rest.as_ptr().cast(), rest.len())
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });
            match res {
                Ok(Ok(n)) => written += n,
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(e),
                // Readiness was stale; poll again.
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    /// Propagate a new terminal geometry to the child.
    ///
    /// The kernel delivers SIGWINCH to the pty's foreground process
    /// group as a side effect of TIOCSWINSZ.
    pub fn resize(&self, rows: u16, cols: u16) -> io::Result<()> {
        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        // SAFETY: TIOCSWINSZ reads a Winsize through a valid pointer.
        let rc = unsafe {
            libc::ioctl(
                self.io.get_ref().as_raw_fd(),
                libc::TIOCSWINSZ as libc::c_ulong,
                &winsize,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl PtyReader {
    /// Read a chunk of merged output, `Ok(0)` at end of stream.
    ///
    /// A master read fails with EIO once the slave side is fully closed
    /// (the child exited); that is this stream's EOF.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.io.readable().await?;
            let res = guard.try_io(|inner| {
                // SAFETY: reading into a valid buffer from an owned, open fd.
                let n = unsafe {
                    libc::read(inner.get_ref().as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });
            match res {
                Ok(Ok(n)) => return Ok(n),
                Ok(Err(e)) if e.raw_os_error() == Some(libc::EIO) => return Ok(0),
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: plain fcntl flag manipulation on a valid fd.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Arrange for the child of `cmd` to run in a new session with its
/// slave pty (pre-wired as fd 0) as controlling terminal.
pub(crate) fn set_controlling_tty(cmd: &mut tokio::process::Command) {
    // SAFETY: the pre_exec closure only performs async-signal-safe
    // syscalls (setsid, ioctl) between fork and exec.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::ioctl(0, libc::TIOCSCTTY as libc::c_ulong, 0) < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}
