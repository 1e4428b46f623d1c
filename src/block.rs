// In-memory block buffer: the unit ingest fills and a committer consumes.

use crate::codec::CompressionType;
use crate::entry::{Entry, ENTRY_SIZE};

/// Entries fit roughly 256 KiB of raw payload per block.
pub const DEFAULT_CAPACITY: usize = 256 * 1024 / ENTRY_SIZE;

#[derive(Debug, Clone)]
pub struct Header {
	pub nr_entries: u32,
	pub raw_size: u32,
	pub compression_type: CompressionType,
	pub start_time: i64,
	pub end_time: i64,
	pub checksum: u32,
}

impl Header {
	/// CRC32 over the other five fields, in field order. Recovers the
	/// original implementation's header checksum, which the distillation
	/// this crate was rebuilt from had dropped (see DESIGN.md).
	pub fn compute_checksum(
		nr_entries: u32,
		raw_size: u32,
		compression_type: CompressionType,
		start_time: i64,
		end_time: i64,
	) -> u32 {
		let mut hasher = crc32fast::Hasher::new();
		hasher.update(&nr_entries.to_le_bytes());
		hasher.update(&raw_size.to_le_bytes());
		hasher.update(&compression_type.as_i32().to_le_bytes());
		hasher.update(&start_time.to_le_bytes());
		hasher.update(&end_time.to_le_bytes());
		hasher.finalize()
	}

	pub fn verify_checksum(&self) -> bool {
		self.checksum
			== Self::compute_checksum(
				self.nr_entries,
				self.raw_size,
				self.compression_type,
				self.start_time,
				self.end_time,
			)
	}
}

/// Owned exclusively by one ingest run until handed off to a committer.
/// `entries` is reserved to `capacity` up front but left empty; it is
/// filled one push at a time so unfilled pages are never touched (keeps
/// RSS low for bursty, partially-filled blocks).
pub struct BlockBuffer {
	pub header: Header,
	pub capacity: usize,
	entries: Vec<Entry>,
}

impl BlockBuffer {
	pub fn new(capacity: usize, start_time: i64) -> BlockBuffer {
		BlockBuffer {
			header: Header {
				nr_entries: 0,
				raw_size: 0,
				compression_type: CompressionType::None,
				start_time,
				end_time: start_time,
				checksum: 0,
			},
			capacity,
			entries: Vec::with_capacity(capacity),
		}
	}

	pub fn is_full(&self) -> bool {
		self.entries.len() >= self.capacity
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Appends `entry` if there is room. Returns false (and drops the entry)
	/// when the buffer is full.
	pub fn push(&mut self, entry: Entry) -> bool {
		if self.is_full() {
			return false;
		}
		self.entries.push(entry);
		self.header.nr_entries = self.entries.len() as u32;
		true
	}

	pub fn entries(&self) -> &[Entry] {
		&self.entries
	}

	/// Serializes entries to their on-disk byte layout and finalizes
	/// `raw_size` / `end_time` / `checksum` ahead of compression.
	pub fn finish(mut self, end_time: i64) -> (Header, Vec<u8>) {
		self.header.end_time = end_time;
		self.header.raw_size = (self.entries.len() * ENTRY_SIZE) as u32;
		let mut payload = Vec::with_capacity(self.entries.len() * ENTRY_SIZE);
		for entry in &self.entries {
			payload.extend_from_slice(&entry.to_bytes());
		}
		self.header.checksum = Header::compute_checksum(
			self.header.nr_entries,
			self.header.raw_size,
			self.header.compression_type,
			self.header.start_time,
			self.header.end_time,
		);
		(self.header, payload)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::entry::Protocol;

	fn sample_entry(ts: i64) -> Entry {
		Entry {
			timestamp: ts,
			daddr: 0x0102_0304,
			uid: 1000,
			protocol: Protocol::Tcp,
			sport: 1000,
			dport: 80,
		}
	}

	#[test]
	fn push_respects_capacity() {
		let mut block = BlockBuffer::new(2, 0);
		assert!(block.push(sample_entry(0)));
		assert!(block.push(sample_entry(1)));
		assert!(!block.push(sample_entry(2)));
		assert_eq!(block.len(), 2);
		assert!(block.is_full());
	}

	#[test]
	fn finish_sets_raw_size_and_checksum() {
		let mut block = BlockBuffer::new(4, 10);
		block.push(sample_entry(10));
		block.push(sample_entry(11));
		let (header, payload) = block.finish(20);
		assert_eq!(header.nr_entries, 2);
		assert_eq!(header.raw_size, 2 * ENTRY_SIZE as u32);
		assert_eq!(payload.len(), header.raw_size as usize);
		assert!(header.verify_checksum());
	}

	#[test]
	fn tampered_header_fails_checksum() {
		let mut block = BlockBuffer::new(4, 0);
		block.push(sample_entry(0));
		let (mut header, _) = block.finish(1);
		header.nr_entries += 1;
		assert!(!header.verify_checksum());
	}
}
