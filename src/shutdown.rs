// Self-pipe shutdown coordinator (Open Question resolution / REDESIGN
// FLAGS: "signal-to-shutdown wakeup"). The SIGHUP handler only sets an
// AtomicBool and writes one byte to a pipe; it never touches the capture
// handle or does anything else that is not async-signal-safe. The ingest
// loop polls the capture fd and the pipe's read end together and treats a
// readable pipe as the cue to close the capture handle and exit.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd;

use crate::error::{Error, Result};

static REQUESTED: AtomicBool = AtomicBool::new(false);
static WRITE_FD: AtomicI32 = AtomicI32::new(-1);

use std::sync::atomic::AtomicI32;

extern "C" fn on_sighup(_: libc::c_int) {
	REQUESTED.store(true, Ordering::SeqCst);
	let fd = WRITE_FD.load(Ordering::SeqCst);
	if fd >= 0 {
		let byte = [1u8];
		unsafe {
			libc::write(fd, byte.as_ptr() as *const libc::c_void, 1);
		}
	}
}

pub struct Shutdown {
	read_fd: RawFd,
	write_fd: RawFd,
}

impl Shutdown {
	/// Creates the self-pipe and installs the SIGHUP handler. Only one
	/// `Shutdown` should be live per process (the handler writes to a
	/// single global fd).
	pub fn install() -> Result<Arc<Shutdown>> {
		let (read_fd, write_fd) = unistd::pipe().map_err(|e| Error::Capture(format!("pipe: {}", e)))?;
		WRITE_FD.store(write_fd, Ordering::SeqCst);
		unsafe {
			signal::signal(Signal::SIGHUP, SigHandler::Handler(on_sighup))
				.map_err(|e| Error::Capture(format!("sigaction: {}", e)))?;
		}
		Ok(Arc::new(Shutdown { read_fd, write_fd }))
	}

	pub fn requested(&self) -> bool {
		REQUESTED.load(Ordering::SeqCst)
	}

	pub fn read_fd(&self) -> RawFd {
		self.read_fd
	}
}

impl Drop for Shutdown {
	fn drop(&mut self) {
		let _ = unistd::close(self.read_fd);
		let _ = unistd::close(self.write_fd);
	}
}
