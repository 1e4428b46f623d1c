// Query engine (C8): time-ranged extract. Opens the store read-only,
// streams candidate rows, validates and decompresses each, then emits
// entries in `[range.from, range.until)` in the order they appear within
// their block. Corrupt rows are logged and skipped; the query continues.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::block::Header;
use crate::codec;
use crate::entry::{Entry, ENTRY_SIZE};
use crate::error::Result;
use crate::store::{Store, Timerange};

fn now_secs() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs() as i64
}

fn header_is_sane(header: &Header, capacity: usize) -> bool {
	header.nr_entries as usize <= capacity
		&& header.start_time <= header.end_time
		&& header.end_time <= now_secs()
		&& header.raw_size > 0
		&& header.verify_checksum()
}

/// Streams entries in `range` to `emit`, in row order as returned by the
/// store (rows themselves may arrive in any order — callers that need a
/// single chronological sequence across rows should sort by `start_time`
/// first; within one row, entries are already chronological).
pub fn extract(
	storage_path: &Path,
	block_capacity: usize,
	range: Timerange,
	mut emit: impl FnMut(Entry),
) -> Result<()> {
	let store = Store::open(storage_path, false)?;
	store.select_overlapping(range, |header, bytes| {
		if !header_is_sane(&header, block_capacity) {
			log::warn!("query: skipping row with invalid header");
			return;
		}
		if bytes.len() != header.raw_size as usize {
			log::warn!(
				"query: skipping row, raw_size {} does not match stored blob length {}",
				header.raw_size,
				bytes.len()
			);
			return;
		}
		let expected = header.nr_entries as usize * ENTRY_SIZE;
		let decompressed = match codec::decompress(header.compression_type, &bytes, expected) {
			Ok(bytes) => bytes,
			Err(err) => {
				log::warn!("query: skipping row, decompression failed: {}", err);
				return;
			}
		};

		let mut i = 0;
		let nr_entries = header.nr_entries as usize;
		while i < nr_entries {
			let entry = match Entry::from_bytes(&decompressed[i * ENTRY_SIZE..(i + 1) * ENTRY_SIZE]) {
				Some(e) => e,
				None => {
					log::warn!("query: skipping corrupt entry at offset {}", i);
					i += 1;
					continue;
				}
			};
			if entry.timestamp < range.from {
				i += 1;
				continue;
			}
			if entry.timestamp >= range.until {
				break;
			}
			emit(entry);
			i += 1;
		}
	})?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::block::BlockBuffer;
	use crate::codec::CompressionType;
	use crate::committer::CommitContext;
	use crate::entry::Protocol;

	fn sample_block(n: usize, start: i64) -> (Header, Vec<u8>) {
		let mut block = BlockBuffer::new(n, start);
		for i in 0..n {
			block.push(Entry {
				timestamp: start + i as i64,
				daddr: 0x0102_0304,
				uid: 1000,
				protocol: Protocol::Tcp,
				sport: 1000 + i as u16,
				dport: 80,
			});
		}
		block.finish(start + n as i64)
	}

	#[test]
	fn empty_store_yields_no_entries() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("store.db");
		Store::open(&path, false).unwrap();

		let mut seen = Vec::new();
		extract(&path, 16, Timerange { from: 0, until: now_secs() + 1 }, |e| seen.push(e)).unwrap();
		assert!(seen.is_empty());
	}

	#[test]
	fn extract_respects_range_and_order() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("store.db");
		let ctx = CommitContext::new(path.clone(), 10 * 1024 * 1024, CompressionType::None);
		let (header, payload) = sample_block(10, 1000);
		crate::committer::commit_one(&ctx, header, payload).unwrap();

		let mut seen = Vec::new();
		extract(&path, 16, Timerange { from: 1003, until: 1007 }, |e| seen.push(e.timestamp)).unwrap();
		assert_eq!(seen, vec![1003, 1004, 1005, 1006]);
	}
}
