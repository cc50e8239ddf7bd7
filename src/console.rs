//! Operator console.
//!
//! When stdin is a terminal it is switched to non-canonical, no-echo mode so
//! single keypresses arrive immediately. `q` or `Q` requests shutdown; any
//! other key prints the participant count. The terminal is restored on drop.

use crate::runtime::{Operator, Shutdown};
use std::io;
use std::mem::MaybeUninit;
use tracing::{info, warn};

const PROMPT: &str = "press 'Q' to exit program";

/// Keypress control channel on stdin.
pub struct Console {
    shutdown: Shutdown,
    saved: libc::termios,
    /// Set once stdin hits end of file or fails.
    detached: bool,
}

impl Console {
    /// Take over the terminal, or return `None` when stdin is not a tty.
    pub fn attach(shutdown: Shutdown) -> io::Result<Option<Self>> {
        // SAFETY: isatty only inspects the descriptor.
        if unsafe { libc::isatty(libc::STDIN_FILENO) } != 1 {
            return Ok(None);
        }

        let mut saved = MaybeUninit::<libc::termios>::uninit();
        // SAFETY: tcgetattr fully initializes `saved` when it returns 0.
        let saved = unsafe {
            if libc::tcgetattr(libc::STDIN_FILENO, saved.as_mut_ptr()) != 0 {
                return Err(io::Error::last_os_error());
            }
            saved.assume_init()
        };

        let mut raw = saved;
        raw.c_lflag &= !(libc::ICANON | libc::ECHO);
        set_attr(&raw)?;

        println!("Press 'Q' to exit program");
        Ok(Some(Self {
            shutdown,
            saved,
            detached: false,
        }))
    }

    /// Read one pending key without blocking.
    fn poll_key(&mut self) -> io::Result<Option<u8>> {
        let mut fd = libc::pollfd {
            fd: libc::STDIN_FILENO,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: one valid pollfd, zero timeout.
        let rc = unsafe { libc::poll(&mut fd, 1, 0) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        if rc == 0 || fd.revents & (libc::POLLIN | libc::POLLHUP) == 0 {
            return Ok(None);
        }

        let mut key = 0u8;
        // SAFETY: reads at most one byte into `key`.
        let n = unsafe {
            libc::read(
                libc::STDIN_FILENO,
                (&mut key as *mut u8).cast::<libc::c_void>(),
                1,
            )
        };
        match n {
            1 => Ok(Some(key)),
            0 => {
                self.detached = true;
                Ok(None)
            }
            _ => Err(io::Error::last_os_error()),
        }
    }
}

impl Operator for Console {
    fn service(&mut self, participants: usize) {
        if self.detached {
            return;
        }

        match self.poll_key() {
            Ok(Some(b'q' | b'Q')) => {
                info!("Shutdown requested from console");
                self.shutdown.trigger();
            }
            Ok(Some(_)) => println!("{participants} participants currently; {PROMPT}"),
            Ok(None) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(error = %e, "Console read failed, ignoring further input");
                self.detached = true;
            }
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        if let Err(e) = set_attr(&self.saved) {
            warn!(error = %e, "Failed to restore terminal");
        }
    }
}

fn set_attr(attr: &libc::termios) -> io::Result<()> {
    // SAFETY: `attr` points to a valid termios.
    if unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, attr) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
