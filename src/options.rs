// Validated, immutable configuration built once at startup. Parsing the raw
// CLI flags happens in cli/collect and cli/extract; this module only knows
// about already-parsed values and the validation rules from the spec.

use std::path::{Path, PathBuf};

use crate::codec::CompressionType;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct CollectOptions {
	pub nflog_group: u16,
	pub storage_path: PathBuf,
	pub storage_budget_bytes: u64,
	pub compression: CompressionType,
	pub vacuum_on_startup: bool,
	pub max_workers: usize,
	pub block_capacity: usize,
}

impl CollectOptions {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		nflog_group: u16,
		storage_path: PathBuf,
		storage_size_mib: u64,
		compression_flag: Option<&str>,
		vacuum_on_startup: bool,
		max_workers: Option<usize>,
	) -> Result<CollectOptions> {
		if storage_size_mib == 0 {
			return Err(Error::Config(
				"storage_size must be a positive number of MiB".into(),
			));
		}
		let parent = storage_path.parent().filter(|p| !p.as_os_str().is_empty());
		if let Some(parent) = parent {
			if !parent.is_dir() {
				return Err(Error::Config(format!(
					"storage directory '{}' does not exist",
					parent.display()
				)));
			}
		}
		let compression = match compression_flag {
			None => CompressionType::None,
			Some(flag) => CompressionType::from_flag(flag)
				.ok_or_else(|| Error::Config(format!("unknown compression algorithm '{}'", flag)))?,
		};
		let max_workers = max_workers.unwrap_or_else(default_max_workers);
		Ok(CollectOptions {
			nflog_group,
			storage_path,
			storage_budget_bytes: storage_size_mib * 1024 * 1024,
			compression,
			vacuum_on_startup,
			max_workers,
			block_capacity: crate::block::DEFAULT_CAPACITY,
		})
	}
}

pub fn default_max_workers() -> usize {
	num_cpus::get().saturating_sub(1).max(1)
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
	pub storage_path: PathBuf,
	pub since: i64,
	pub until: i64,
}

impl ExtractOptions {
	pub fn new(storage_path: PathBuf, since: i64, until: i64) -> Result<ExtractOptions> {
		if !Path::new(&storage_path).is_file() {
			return Err(Error::Config(format!(
				"storage file '{}' does not exist",
				storage_path.display()
			)));
		}
		Ok(ExtractOptions {
			storage_path,
			since,
			until,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_zero_storage_size() {
		let err = CollectOptions::new(0, PathBuf::from("/tmp/x.db"), 0, None, false, None)
			.unwrap_err();
		assert!(matches!(err, Error::Config(_)));
	}

	#[test]
	fn rejects_unknown_compression() {
		let err = CollectOptions::new(
			0,
			PathBuf::from("/tmp/x.db"),
			1,
			Some("bogus"),
			false,
			None,
		)
		.unwrap_err();
		assert!(matches!(err, Error::Config(_)));
	}

	#[test]
	fn rejects_missing_storage_dir() {
		let err = CollectOptions::new(
			0,
			PathBuf::from("/no/such/dir/x.db"),
			1,
			None,
			false,
			None,
		)
		.unwrap_err();
		assert!(matches!(err, Error::Config(_)));
	}
}
