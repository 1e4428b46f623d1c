// Compression dispatch. A sum type matched per operation, not a function
// pointer table keyed by an integer (see DESIGN.md, "dispatch over variants").

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
	None,
	Lz4,
	Zstd,
}

impl CompressionType {
	pub fn as_i32(self) -> i32 {
		match self {
			CompressionType::None => 0,
			CompressionType::Lz4 => 1,
			CompressionType::Zstd => 2,
		}
	}

	pub fn from_i32(v: i32) -> Option<CompressionType> {
		match v {
			0 => Some(CompressionType::None),
			1 => Some(CompressionType::Lz4),
			2 => Some(CompressionType::Zstd),
			_ => None,
		}
	}

	/// Parse the `-c|--compression` CLI flag value.
	pub fn from_flag(s: &str) -> Option<CompressionType> {
		match s {
			"lz4" => Some(CompressionType::Lz4),
			"zstd" | "zstandard" => Some(CompressionType::Zstd),
			_ => None,
		}
	}
}

const ZSTD_LEVEL: i32 = 1;

pub fn compress(algo: CompressionType, input: &[u8]) -> Result<Vec<u8>> {
	match algo {
		CompressionType::None => Ok(input.to_vec()),
		CompressionType::Lz4 => lz4::block::compress(input, None, true)
			.map_err(|e| Error::Compression(format!("lz4: {}", e))),
		CompressionType::Zstd => zstd::stream::encode_all(input, ZSTD_LEVEL)
			.map_err(|e| Error::Compression(format!("zstd: {}", e))),
	}
}

pub fn decompress(
	algo: CompressionType,
	input: &[u8],
	expected_uncompressed_size: usize,
) -> Result<Vec<u8>> {
	let out = match algo {
		CompressionType::None => input.to_vec(),
		CompressionType::Lz4 => lz4::block::decompress(input, None)
			.map_err(|e| Error::Compression(format!("lz4: {}", e)))?,
		CompressionType::Zstd => zstd::stream::decode_all(input)
			.map_err(|e| Error::Compression(format!("zstd: {}", e)))?,
	};
	if out.len() != expected_uncompressed_size {
		return Err(Error::Compression(format!(
			"expected decompressed size {}, got {}",
			expected_uncompressed_size,
			out.len()
		)));
	}
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn round_trip(algo: CompressionType) {
		let input = b"the quick brown fox jumps over the lazy dog".repeat(64);
		let compressed = compress(algo, &input).expect("compress");
		let decompressed = decompress(algo, &compressed, input.len()).expect("decompress");
		assert_eq!(decompressed, input);
	}

	#[test]
	fn none_is_identity() {
		round_trip(CompressionType::None);
	}

	#[test]
	fn lz4_round_trips() {
		round_trip(CompressionType::Lz4);
	}

	#[test]
	fn zstd_round_trips() {
		round_trip(CompressionType::Zstd);
	}

	#[test]
	fn zstd_rejects_wrong_expected_size() {
		let input = b"some payload bytes".repeat(8);
		let compressed = compress(CompressionType::Zstd, &input).unwrap();
		assert!(decompress(CompressionType::Zstd, &compressed, input.len() + 1).is_err());
	}

	#[test]
	fn from_flag_accepts_known_aliases() {
		assert_eq!(CompressionType::from_flag("zstd"), Some(CompressionType::Zstd));
		assert_eq!(CompressionType::from_flag("zstandard"), Some(CompressionType::Zstd));
		assert_eq!(CompressionType::from_flag("lz4"), Some(CompressionType::Lz4));
		assert_eq!(CompressionType::from_flag("bogus"), None);
	}
}
