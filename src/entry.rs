// On-disk entry layout.
//
// [timestamp: 8][daddr: 4][uid: 4][_pad1: 1][protocol: 1][_pad2: 2][sport: 2][dport: 2]
// Little-endian, 24 bytes total. Field order and padding mirror the packed
// C struct this format was inherited from, so a block written by an old
// collector decodes identically today.

use byteorder::{ByteOrder, LittleEndian};

pub const ENTRY_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
	Tcp,
	Udp,
}

impl Protocol {
	pub fn as_u8(self) -> u8 {
		match self {
			Protocol::Tcp => 6,
			Protocol::Udp => 17,
		}
	}

	pub fn from_u8(v: u8) -> Option<Protocol> {
		match v {
			6 => Some(Protocol::Tcp),
			17 => Some(Protocol::Udp),
			_ => None,
		}
	}

	pub fn name(self) -> &'static str {
		match self {
			Protocol::Tcp => "TCP",
			Protocol::Udp => "UDP",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
	pub timestamp: i64,
	pub daddr: u32,
	pub uid: u32,
	pub protocol: Protocol,
	pub sport: u16,
	pub dport: u16,
}

impl Entry {
	pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
		let mut buf = [0u8; ENTRY_SIZE];
		LittleEndian::write_i64(&mut buf[0..8], self.timestamp);
		LittleEndian::write_u32(&mut buf[8..12], self.daddr);
		LittleEndian::write_u32(&mut buf[12..16], self.uid);
		// buf[16] is padding, left zero
		buf[17] = self.protocol.as_u8();
		// buf[18..20] is padding, left zero
		LittleEndian::write_u16(&mut buf[20..22], self.sport);
		LittleEndian::write_u16(&mut buf[22..24], self.dport);
		buf
	}

	pub fn from_bytes(buf: &[u8]) -> Option<Entry> {
		if buf.len() < ENTRY_SIZE {
			return None;
		}
		let protocol = Protocol::from_u8(buf[17])?;
		Some(Entry {
			timestamp: LittleEndian::read_i64(&buf[0..8]),
			daddr: LittleEndian::read_u32(&buf[8..12]),
			uid: LittleEndian::read_u32(&buf[12..16]),
			protocol,
			sport: LittleEndian::read_u16(&buf[20..22]),
			dport: LittleEndian::read_u16(&buf[22..24]),
		})
	}

	/// Render the destination address as dotted-quad, e.g. "1.2.3.4".
	pub fn daddr_string(&self) -> String {
		let o = self.daddr.to_be_bytes();
		format!("{}.{}.{}.{}", o[0], o[1], o[2], o[3])
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_through_bytes() {
		let e = Entry {
			timestamp: 1_700_000_000,
			daddr: 0x0102_0304,
			uid: 1000,
			protocol: Protocol::Tcp,
			sport: 54321,
			dport: 80,
		};
		let bytes = e.to_bytes();
		assert_eq!(bytes.len(), ENTRY_SIZE);
		assert_eq!(Entry::from_bytes(&bytes), Some(e));
	}

	#[test]
	fn daddr_string_is_dotted_quad() {
		let e = Entry {
			timestamp: 0,
			daddr: 0x0102_0304,
			uid: 0,
			protocol: Protocol::Udp,
			sport: 0,
			dport: 0,
		};
		assert_eq!(e.daddr_string(), "1.2.3.4");
	}

	#[test]
	fn rejects_unknown_protocol_byte() {
		let mut buf = [0u8; ENTRY_SIZE];
		buf[17] = 1; // ICMP, not TCP/UDP
		assert_eq!(Entry::from_bytes(&buf), None);
	}

	#[test]
	fn rejects_short_buffers() {
		assert_eq!(Entry::from_bytes(&[0u8; 10]), None);
	}
}
