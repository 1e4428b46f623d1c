// Parses one captured IPv4 datagram into an Entry, or decides to drop it.
// Mirrors handle_packet() in the original collector: version check, TCP
// SYN/PSH gate (ACK-only noise suppressed), uid lookup, then the
// single-slot rate limiter.

use crate::capture::Datagram;
use crate::entry::{Entry, Protocol};

const IPV4_MIN_HEADER_LEN: usize = 20;
const TCP_MIN_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;

const TCP_FLAG_SYN: u8 = 0x02;
const TCP_FLAG_PSH: u8 = 0x08;

/// Holds the previous admitted entry's rate-limit hash for one ingest run.
/// An explicit per-run field rather than a shared static (Open Question
/// #5): only one ingest run is ever active at a time, but nothing stops a
/// future multi-capture configuration or a test harness from wanting two
/// independent rate limiters.
#[derive(Default)]
pub struct RateLimiter {
	prev_hash: Option<u64>,
}

impl RateLimiter {
	pub fn new() -> RateLimiter {
		RateLimiter::default()
	}

	/// Computes `sport XOR timestamp` and admits the entry unless it
	/// matches the previously admitted hash. Bursts from one process
	/// produce identical (sport, one-second timestamp) keys, and the
	/// kernel delivers one process's packets contiguously, so this
	/// trivial single-slot de-duplicator catches floods.
	fn admit(&mut self, sport: u16, timestamp: i64) -> bool {
		let hash = sport as u64 ^ timestamp as u64;
		if self.prev_hash == Some(hash) {
			return false;
		}
		self.prev_hash = Some(hash);
		true
	}
}

/// Parses `datagram` and stamps `now` as the entry timestamp. Returns
/// `None` for anything the filter drops: non-IPv4, non-TCP/UDP, ACK-only
/// TCP, missing uid, or rate-limited.
pub fn parse(datagram: &Datagram<'_>, now: i64, rate_limiter: &mut RateLimiter) -> Option<Entry> {
	let payload = datagram.payload;
	if payload.len() < IPV4_MIN_HEADER_LEN {
		return None;
	}
	if payload[0] >> 4 != 4 {
		return None; // IPv6 (or anything else non-v4) dropped silently
	}
	let ihl = (payload[0] & 0x0f) as usize * 4;
	if ihl < IPV4_MIN_HEADER_LEN || payload.len() < ihl {
		return None;
	}
	let protocol_byte = payload[9];
	let daddr = u32::from_be_bytes(payload[16..20].try_into().ok()?);
	let inner = &payload[ihl..];

	let (protocol, sport, dport) = match protocol_byte {
		6 => {
			if inner.len() < TCP_MIN_HEADER_LEN {
				return None;
			}
			let flags = inner[13];
			if flags & (TCP_FLAG_SYN | TCP_FLAG_PSH) == 0 {
				return None; // ACK-only noise
			}
			let sport = u16::from_be_bytes(inner[0..2].try_into().ok()?);
			let dport = u16::from_be_bytes(inner[2..4].try_into().ok()?);
			(Protocol::Tcp, sport, dport)
		}
		17 => {
			if inner.len() < UDP_HEADER_LEN {
				return None;
			}
			let sport = u16::from_be_bytes(inner[0..2].try_into().ok()?);
			let dport = u16::from_be_bytes(inner[2..4].try_into().ok()?);
			(Protocol::Udp, sport, dport)
		}
		_ => return None,
	};

	let uid = datagram.uid?;

	if !rate_limiter.admit(sport, now) {
		return None;
	}

	Some(Entry {
		timestamp: now,
		daddr,
		uid,
		protocol,
		sport,
		dport,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ipv4_tcp_packet(flags: u8, sport: u16, dport: u16, daddr: [u8; 4]) -> Vec<u8> {
		let mut buf = vec![0u8; 20 + 20];
		buf[0] = 0x45; // version 4, ihl 5
		buf[9] = 6; // TCP
		buf[16..20].copy_from_slice(&daddr);
		buf[20..22].copy_from_slice(&sport.to_be_bytes());
		buf[22..24].copy_from_slice(&dport.to_be_bytes());
		buf[33] = flags;
		buf
	}

	fn ipv4_udp_packet(sport: u16, dport: u16) -> Vec<u8> {
		let mut buf = vec![0u8; 20 + 8];
		buf[0] = 0x45;
		buf[9] = 17; // UDP
		buf[16..20].copy_from_slice(&[1, 2, 3, 4]);
		buf[20..22].copy_from_slice(&sport.to_be_bytes());
		buf[22..24].copy_from_slice(&dport.to_be_bytes());
		buf
	}

	#[test]
	fn admits_tcp_syn() {
		let mut rl = RateLimiter::new();
		let pkt = ipv4_tcp_packet(TCP_FLAG_SYN, 1000, 80, [1, 2, 3, 4]);
		let dgram = Datagram { payload: &pkt, uid: Some(1000) };
		let entry = parse(&dgram, 42, &mut rl).expect("should admit SYN");
		assert_eq!(entry.sport, 1000);
		assert_eq!(entry.dport, 80);
		assert_eq!(entry.daddr_string(), "1.2.3.4");
		assert_eq!(entry.protocol, Protocol::Tcp);
	}

	#[test]
	fn drops_ack_only() {
		let mut rl = RateLimiter::new();
		let pkt = ipv4_tcp_packet(0x10 /* ACK */, 1000, 80, [1, 2, 3, 4]);
		let dgram = Datagram { payload: &pkt, uid: Some(1000) };
		assert!(parse(&dgram, 42, &mut rl).is_none());
	}

	#[test]
	fn admits_udp() {
		let mut rl = RateLimiter::new();
		let pkt = ipv4_udp_packet(5353, 5353);
		let dgram = Datagram { payload: &pkt, uid: Some(0) };
		assert!(parse(&dgram, 1, &mut rl).is_some());
	}

	#[test]
	fn drops_missing_uid() {
		let mut rl = RateLimiter::new();
		let pkt = ipv4_tcp_packet(TCP_FLAG_SYN, 1000, 80, [1, 2, 3, 4]);
		let dgram = Datagram { payload: &pkt, uid: None };
		assert!(parse(&dgram, 42, &mut rl).is_none());
	}

	#[test]
	fn drops_ipv6() {
		let mut rl = RateLimiter::new();
		let mut pkt = ipv4_tcp_packet(TCP_FLAG_SYN, 1000, 80, [1, 2, 3, 4]);
		pkt[0] = 0x60;
		let dgram = Datagram { payload: &pkt, uid: Some(0) };
		assert!(parse(&dgram, 42, &mut rl).is_none());
	}

	#[test]
	fn rate_limits_identical_burst() {
		let mut rl = RateLimiter::new();
		let pkt = ipv4_tcp_packet(TCP_FLAG_SYN, 1000, 80, [1, 2, 3, 4]);
		let dgram = Datagram { payload: &pkt, uid: Some(1000) };
		assert!(parse(&dgram, 42, &mut rl).is_some());
		for _ in 0..99 {
			let dgram = Datagram { payload: &pkt, uid: Some(1000) };
			assert!(parse(&dgram, 42, &mut rl).is_none());
		}
	}

	#[test]
	fn admits_again_once_timestamp_changes() {
		let mut rl = RateLimiter::new();
		let pkt = ipv4_tcp_packet(TCP_FLAG_SYN, 1000, 80, [1, 2, 3, 4]);
		let dgram = Datagram { payload: &pkt, uid: Some(1000) };
		assert!(parse(&dgram, 42, &mut rl).is_some());
		let dgram = Datagram { payload: &pkt, uid: Some(1000) };
		assert!(parse(&dgram, 43, &mut rl).is_some());
	}
}
