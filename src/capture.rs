// Capture source: a raw AF_NETLINK/NETLINK_NETFILTER socket bound to an
// NFLOG group. No maintained safe wrapper crate for libnetfilter_log
// exists, so this talks nfnetlink directly via libc, the way the original
// collector spoke C ABI to libnetfilter_log. The wire format (nlmsghdr +
// nfgenmsg + a chain of netfilter attributes) is the kernel's C ABI, so
// the low-level structs here are `repr(C)` rather than hand-parsed byte
// slices, unlike the rest of this crate.

use std::io;
use std::os::unix::io::RawFd;

use crate::error::{Error, Result};

const NETLINK_NETFILTER: i32 = 12;
const NFNL_SUBSYS_ULOG: u8 = 4;

const NFULNL_MSG_PACKET: u8 = 0;
const NFULNL_MSG_CONFIG: u8 = 1;

const NFULNL_CFG_CMD_BIND: u8 = 1;
const NFULNL_CFG_CMD_UNBIND: u8 = 2;
const NFULNL_CFG_CMD_PF_BIND: u8 = 3;

const NFULNL_COPY_PACKET: u8 = 2;

const NFULA_PAYLOAD: u16 = 9;
const NFULA_UID: u16 = 11;

const NLM_F_REQUEST: u16 = 0x1;

const AF_INET: u8 = libc::AF_INET as u8;

/// Copy length: IPv4 header (20 bytes) + TCP header (20 bytes), matching
/// the spec's `sizeof(ipv4_header) + sizeof(tcp_header)`.
const COPY_RANGE: u32 = 20 + 20;
/// Kernel-side batching: accumulate up to this many packets before one
/// batched netlink delivery.
const QUEUE_THRESHOLD: u32 = 64;

#[repr(C)]
struct NlMsgHdr {
	len: u32,
	kind: u16,
	flags: u16,
	seq: u32,
	pid: u32,
}

#[repr(C)]
struct NfGenMsg {
	family: u8,
	version: u8,
	res_id: u16, // network byte order: the nflog group id
}

struct MsgBuilder {
	buf: Vec<u8>,
}

impl MsgBuilder {
	fn new(msg_type: u16, family: u8, group_id: u16) -> MsgBuilder {
		let mut buf = Vec::with_capacity(64);
		let hdr = NlMsgHdr {
			len: 0, // patched in finish()
			kind: ((NFNL_SUBSYS_ULOG as u16) << 8) | msg_type,
			flags: NLM_F_REQUEST,
			seq: 0,
			pid: 0,
		};
		buf.extend_from_slice(&hdr.len.to_ne_bytes());
		buf.extend_from_slice(&hdr.kind.to_ne_bytes());
		buf.extend_from_slice(&hdr.flags.to_ne_bytes());
		buf.extend_from_slice(&hdr.seq.to_ne_bytes());
		buf.extend_from_slice(&hdr.pid.to_ne_bytes());
		buf.push(family);
		buf.push(0); // version
		buf.extend_from_slice(&group_id.to_be_bytes());
		MsgBuilder { buf }
	}

	fn put_attr(&mut self, attr_type: u16, payload: &[u8]) {
		let len = 4 + payload.len();
		self.buf.extend_from_slice(&(len as u16).to_ne_bytes());
		self.buf.extend_from_slice(&attr_type.to_ne_bytes());
		self.buf.extend_from_slice(payload);
		while self.buf.len() % 4 != 0 {
			self.buf.push(0);
		}
	}

	fn finish(mut self) -> Vec<u8> {
		let len = self.buf.len() as u32;
		self.buf[0..4].copy_from_slice(&len.to_ne_bytes());
		self.buf
	}
}

/// One NFLOG payload plus the uid the kernel attributed it to.
pub struct Datagram<'a> {
	pub payload: &'a [u8],
	pub uid: Option<u32>,
}

pub struct Capture {
	fd: RawFd,
	group_id: u16,
}

impl Capture {
	/// Binds to the IPv4 family, binds to `group_id`, sets copy-packet mode
	/// with a copy length of `ipv4_header + tcp_header`, and sets the
	/// kernel-side batch threshold to 64.
	pub fn open(group_id: u16) -> Result<Capture> {
		let fd = unsafe { libc::socket(libc::AF_NETLINK, libc::SOCK_RAW, NETLINK_NETFILTER) };
		if fd < 0 {
			return Err(Error::Capture(format!(
				"socket(AF_NETLINK, NETLINK_NETFILTER): {}",
				io::Error::last_os_error()
			)));
		}

		let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
		addr.nl_family = libc::AF_NETLINK as u16;
		addr.nl_groups = 0;
		let rc = unsafe {
			libc::bind(
				fd,
				&addr as *const libc::sockaddr_nl as *const libc::sockaddr,
				std::mem::size_of::<libc::sockaddr_nl>() as u32,
			)
		};
		if rc < 0 {
			let err = io::Error::last_os_error();
			unsafe { libc::close(fd) };
			return Err(Error::Capture(format!("bind: {}", err)));
		}

		let capture = Capture { fd, group_id };
		capture.send_pf_bind()?;
		capture.send_config(NFULNL_CFG_CMD_BIND)?;
		capture.send_copy_mode()?;
		capture.send_qthresh()?;
		Ok(capture)
	}

	fn send_raw(&self, msg: Vec<u8>) -> Result<()> {
		let rc = unsafe {
			libc::send(
				self.fd,
				msg.as_ptr() as *const libc::c_void,
				msg.len(),
				0,
			)
		};
		if rc < 0 {
			return Err(Error::Capture(format!("send: {}", io::Error::last_os_error())));
		}
		Ok(())
	}

	fn send_pf_bind(&self) -> Result<()> {
		let mut builder = MsgBuilder::new(NFULNL_MSG_CONFIG as u16, AF_INET, 0);
		builder.put_attr(1 /* NFULA_CFG_CMD */, &[NFULNL_CFG_CMD_PF_BIND]);
		self.send_raw(builder.finish())
	}

	fn send_config(&self, cmd: u8) -> Result<()> {
		let group_id = if cmd == NFULNL_CFG_CMD_UNBIND {
			0
		} else {
			self.group_id
		};
		let mut builder = MsgBuilder::new(NFULNL_MSG_CONFIG as u16, AF_INET, group_id);
		builder.put_attr(1 /* NFULA_CFG_CMD */, &[cmd]);
		self.send_raw(builder.finish())
	}

	fn send_copy_mode(&self) -> Result<()> {
		let mut builder = MsgBuilder::new(NFULNL_MSG_CONFIG as u16, AF_INET, self.group_id);
		let mut payload = Vec::with_capacity(8);
		payload.push(NFULNL_COPY_PACKET);
		payload.push(0); // pad
		payload.extend_from_slice(&(COPY_RANGE as u16).to_be_bytes());
		builder.put_attr(2 /* NFULA_CFG_MODE */, &payload);
		self.send_raw(builder.finish())
	}

	fn send_qthresh(&self) -> Result<()> {
		let mut builder = MsgBuilder::new(NFULNL_MSG_CONFIG as u16, AF_INET, self.group_id);
		builder.put_attr(4 /* NFULA_CFG_QTHRESH */, &QUEUE_THRESHOLD.to_be_bytes());
		self.send_raw(builder.finish())
	}

	pub fn fd(&self) -> RawFd {
		self.fd
	}

	/// Parses `buf[..len]` as one or more framed netlink messages and
	/// invokes `handler` once per NFLOG packet payload found.
	pub fn dispatch(&self, buf: &[u8], len: usize, mut handler: impl FnMut(Datagram<'_>)) {
		let mut offset = 0;
		while offset + 16 <= len {
			let nlmsg_len = u32::from_ne_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
			let kind = u16::from_ne_bytes(buf[offset + 4..offset + 6].try_into().unwrap());
			if nlmsg_len < 16 || offset + nlmsg_len > len {
				break;
			}
			if kind & 0xff == NFULNL_MSG_PACKET as u16 {
				self.dispatch_packet(&buf[offset + 16..offset + nlmsg_len], &mut handler);
			}
			// netlink messages are 4-byte aligned
			offset += (nlmsg_len + 3) & !3;
		}
	}

	fn dispatch_packet(&self, body: &[u8], handler: &mut impl FnMut(Datagram<'_>)) {
		let mut payload: Option<&[u8]> = None;
		let mut uid: Option<u32> = None;
		// body starts with the nfgenmsg (4 bytes), then a chain of nfattrs
		let mut offset = 4;
		while offset + 4 <= body.len() {
			let attr_len = u16::from_ne_bytes(body[offset..offset + 2].try_into().unwrap()) as usize;
			let attr_type = u16::from_ne_bytes(body[offset + 2..offset + 4].try_into().unwrap()) & 0x7fff;
			if attr_len < 4 || offset + attr_len > body.len() {
				break;
			}
			let data = &body[offset + 4..offset + attr_len];
			match attr_type {
				t if t == NFULA_PAYLOAD => payload = Some(data),
				t if t == NFULA_UID => {
					if data.len() >= 4 {
						uid = Some(u32::from_be_bytes(data[0..4].try_into().unwrap()));
					}
				}
				_ => {}
			}
			offset += (attr_len + 3) & !3;
		}
		if let Some(payload) = payload {
			handler(Datagram { payload, uid });
		}
	}

	/// Unbinds the group and releases the socket. Closing the underlying
	/// fd causes a concurrent blocking `recv` on the same fd to fail, which
	/// is how the ingest loop notices a SIGHUP-triggered shutdown.
	pub fn close(self) {
		let _ = self.send_config(NFULNL_CFG_CMD_UNBIND);
		unsafe {
			libc::close(self.fd);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dispatch_ignores_truncated_trailing_message() {
		// a well-formed nlmsghdr claiming a length larger than the buffer
		// must be dropped rather than panicking.
		let mut buf = vec![0u8; 16];
		buf[0..4].copy_from_slice(&100u32.to_ne_bytes());
		let capture = Capture { fd: -1, group_id: 0 };
		let mut calls = 0;
		capture.dispatch(&buf, buf.len(), |_| calls += 1);
		assert_eq!(calls, 0);
	}

	#[test]
	fn dispatch_extracts_payload_and_uid() {
		let mut body = Vec::new();
		body.extend_from_slice(&[AF_INET, 0, 0, 0]); // nfgenmsg
		let payload = b"hello";
		// NFULA_PAYLOAD attr
		let attr_len = 4 + payload.len();
		body.extend_from_slice(&(attr_len as u16).to_ne_bytes());
		body.extend_from_slice(&NFULA_PAYLOAD.to_ne_bytes());
		body.extend_from_slice(payload);
		while body.len() % 4 != 0 {
			body.push(0);
		}
		// NFULA_UID attr
		body.extend_from_slice(&8u16.to_ne_bytes());
		body.extend_from_slice(&NFULA_UID.to_ne_bytes());
		body.extend_from_slice(&1000u32.to_be_bytes());

		let mut msg = Vec::new();
		let total_len = 16 + body.len();
		msg.extend_from_slice(&(total_len as u32).to_ne_bytes());
		msg.extend_from_slice(&((NFNL_SUBSYS_ULOG as u16) << 8 | NFULNL_MSG_PACKET as u16).to_ne_bytes());
		msg.extend_from_slice(&0u16.to_ne_bytes());
		msg.extend_from_slice(&0u32.to_ne_bytes());
		msg.extend_from_slice(&0u32.to_ne_bytes());
		msg.extend_from_slice(&body);

		let capture = Capture { fd: -1, group_id: 0 };
		let mut seen = None;
		capture.dispatch(&msg, msg.len(), |dgram| {
			seen = Some((dgram.payload.to_vec(), dgram.uid));
		});
		assert_eq!(seen, Some((payload.to_vec(), Some(1000))));
	}
}
