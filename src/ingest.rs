// Ingest loop (C6): drives Capture -> Parser -> BlockBuffer, handing
// completed blocks to the committer pool over a bounded channel.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::Sender;

use crate::block::BlockBuffer;
use crate::capture::Capture;
use crate::error::{Error, Result};
use crate::parser::{self, RateLimiter};
use crate::shutdown::Shutdown;

/// Accommodates up to 64 batched packets, each at most 128 bytes (per the
/// kernel-side batch threshold set on the capture source).
const SCRATCH_BUF_SIZE: usize = 128 * 64 + 1;

fn now_secs() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs() as i64
}

/// Runs ingest runs back to back until shutdown is requested. Each
/// completed block is sent to `committer_tx`; sending blocks if the
/// channel is full, which is how the committer pool's capacity limits how
/// far ingest can run ahead of commits.
pub fn run(
	capture: Capture,
	shutdown: Arc<Shutdown>,
	capacity: usize,
	committer_tx: Sender<(crate::block::Header, Vec<u8>)>,
) -> Result<()> {
	let mut scratch = [0u8; SCRATCH_BUF_SIZE];
	let mut shutting_down = false;

	while !shutting_down {
		let mut block = BlockBuffer::new(capacity, now_secs());
		let mut rate_limiter = RateLimiter::new();

		while !block.is_full() {
			if shutdown.requested() {
				shutting_down = true;
				break;
			}
			match wait_readable(capture.fd(), shutdown.read_fd())? {
				ReadyFd::Capture => {}
				ReadyFd::Shutdown => {
					shutting_down = true;
					break;
				}
			}

			let n = unsafe {
				libc::read(
					capture.fd(),
					scratch.as_mut_ptr() as *mut libc::c_void,
					scratch.len(),
				)
			};
			if n <= 0 {
				// capture was closed out from under us (SIGHUP path) or a
				// transient read error; either way ingest is done.
				shutting_down = true;
				break;
			}
			capture.dispatch(&scratch[..n as usize], n as usize, |datagram| {
				let now = now_secs();
				if let Some(entry) = parser::parse(&datagram, now, &mut rate_limiter) {
					if !block.push(entry) {
						log::debug!("ingest: block full, dropping entry");
					}
				}
			});
		}

		// Whichever condition ended the inner loop (capacity reached or
		// shutdown requested), the in-flight block is still finished and
		// submitted: a SIGHUP must not discard entries already accumulated.
		let end_time = now_secs();
		log::debug!(
			"ingest: run complete, {} entries over [{}, {}]",
			block.len(),
			block.header.start_time,
			end_time
		);
		if !block.is_empty() {
			let (header, payload) = block.finish(end_time);
			if committer_tx.send((header, payload)).is_err() {
				log::warn!("ingest: committer pool gone, dropping final block");
				break;
			}
		}
	}

	capture.close();
	Ok(())
}

enum ReadyFd {
	Capture,
	Shutdown,
}

fn wait_readable(capture_fd: i32, shutdown_fd: i32) -> Result<ReadyFd> {
	let mut fds = [
		libc::pollfd {
			fd: capture_fd,
			events: libc::POLLIN,
			revents: 0,
		},
		libc::pollfd {
			fd: shutdown_fd,
			events: libc::POLLIN,
			revents: 0,
		},
	];
	loop {
		let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
		if rc < 0 {
			let err = std::io::Error::last_os_error();
			if err.kind() == std::io::ErrorKind::Interrupted {
				continue;
			}
			return Err(Error::Capture(format!("poll: {}", err)));
		}
		if fds[1].revents & libc::POLLIN != 0 {
			return Ok(ReadyFd::Shutdown);
		}
		if fds[0].revents & libc::POLLIN != 0 {
			return Ok(ReadyFd::Capture);
		}
	}
}
