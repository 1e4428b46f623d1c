// Persistent (header, payload) store, backed by a single SQLite file in
// WAL mode. Two tables, their names and column order are an on-disk
// contract (see SPEC_FULL.md §6):
//
//   data(id PRIMARY KEY, bytes BLOB)
//   header(id PRIMARY KEY, nr_entries, raw_size, compression_type,
//          start_time, end_time, checksum, data_id REFERENCES data(id)
//          ON DELETE SET NULL)

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::thread;
use std::time::Duration;

use fs2::FileExt;
use rusqlite::{params, Connection, OptionalExtension};

use crate::block::Header;
use crate::codec::CompressionType;
use crate::error::{Error, Result};

const TABLE_DATA: &str = "nfcollect_v1_data";
const TABLE_HEADER: &str = "nfcollect_v1_header";
const CREATE_RETRY: u32 = 8;
const CREATE_RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct Timerange {
	pub from: i64,
	pub until: i64,
}

pub struct Store {
	conn: Connection,
	/// Advisory lock on the storage file for as long as the handle lives,
	/// enforcing the single-writer non-goal. Released on drop.
	_lock: Option<File>,
}

fn is_transient(err: &rusqlite::Error) -> bool {
	matches!(
		err,
		rusqlite::Error::SqliteFailure(e, _)
			if matches!(
				e.code,
				rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
			)
	)
}

/// A concurrent schema change reported on statement finalize. Distinct from
/// `is_transient`'s busy/locked DDL retry: this is `insert`'s own retry
/// trigger, per SPEC_FULL.md §4.2.
fn is_schema_changed(err: &rusqlite::Error) -> bool {
	matches!(
		err,
		rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::SchemaChanged
	)
}

impl Store {
	/// Opens (creating if absent) the storage file, sets WAL journaling and
	/// foreign-key enforcement, and takes an advisory exclusive lock on the
	/// path. Table creation is retried up to `CREATE_RETRY` times on
	/// transient busy/locked errors before giving up fatally.
	pub fn open(path: &Path, lock: bool) -> Result<Store> {
		let file_lock = if lock {
			let file = OpenOptions::new()
				.create(true)
				.write(true)
				.open(path)?;
			file.try_lock_exclusive().map_err(|_| {
				Error::Config(format!(
					"storage file '{}' is already locked by another process",
					path.display()
				))
			})?;
			Some(file)
		} else {
			None
		};

		let conn = Connection::open(path)?;
		conn.pragma_update(None, "journal_mode", &"WAL")?;
		conn.pragma_update(None, "foreign_keys", &"ON")?;

		let mut attempt = 0;
		loop {
			match Store::create_tables(&conn) {
				Ok(()) => break,
				Err(rusqlite::Error::SqliteFailure(e, msg))
					if attempt + 1 < CREATE_RETRY
						&& matches!(
							e.code,
							rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
						) =>
				{
					log::warn!("store: table creation busy/locked ({:?}), retrying", msg);
					attempt += 1;
					thread::sleep(CREATE_RETRY_BACKOFF);
				}
				Err(e) => return Err(Error::Sql(e)),
			}
		}

		Ok(Store {
			conn,
			_lock: file_lock,
		})
	}

	fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
		conn.execute_batch(&format!(
			"CREATE TABLE IF NOT EXISTS {data} (id INTEGER PRIMARY KEY, bytes BLOB);
			 CREATE TABLE IF NOT EXISTS {header} (
			 	id INTEGER PRIMARY KEY,
			 	nr_entries INTEGER,
			 	raw_size INTEGER,
			 	compression_type INTEGER,
			 	start_time INTEGER,
			 	end_time INTEGER,
			 	checksum INTEGER,
			 	data_id INTEGER REFERENCES {data}(id) ON DELETE SET NULL
			 );",
			data = TABLE_DATA,
			header = TABLE_HEADER,
		))
	}

	/// Writes the data blob then the header row referencing it, atomically.
	/// A `SQLITE_SCHEMA` error on statement finalize is retried within the
	/// same transaction, matching the original's handling of concurrent
	/// schema changes from another connection.
	pub fn insert(&mut self, header: &Header, payload: &[u8]) -> Result<()> {
		let tx = self.conn.transaction()?;
		loop {
			let data_id: i64 = {
				let mut stmt = tx.prepare(&format!(
					"INSERT INTO {} (bytes) VALUES (?1)",
					TABLE_DATA
				))?;
				stmt.execute(params![payload])?;
				tx.last_insert_rowid()
			};
			let result = tx.execute(
				&format!(
					"INSERT INTO {} (nr_entries, raw_size, compression_type, start_time, end_time, checksum, data_id)
					 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
					TABLE_HEADER
				),
				params![
					header.nr_entries,
					header.raw_size,
					header.compression_type.as_i32(),
					header.start_time,
					header.end_time,
					header.checksum,
					data_id,
				],
			);
			match result {
				Ok(_) => break,
				Err(e) if is_transient(&e) || is_schema_changed(&e) => continue,
				Err(e) => return Err(Error::Sql(e)),
			}
		}
		tx.commit()?;
		Ok(())
	}

	/// Streams rows whose `[start_time, end_time]` overlaps `range`,
	/// invoking `callback` once per row in whatever order SQLite returns
	/// them (commit order is not guaranteed, see SPEC_FULL.md §5).
	pub fn select_overlapping(
		&self,
		range: Timerange,
		mut callback: impl FnMut(Header, Vec<u8>),
	) -> Result<usize> {
		let mut stmt = self.conn.prepare(&format!(
			"SELECT h.nr_entries, h.raw_size, h.compression_type, h.start_time, h.end_time, h.checksum, d.bytes
			 FROM {header} h INNER JOIN {data} d ON h.data_id = d.id
			 WHERE h.end_time > ?1 AND h.start_time < ?2",
			header = TABLE_HEADER,
			data = TABLE_DATA,
		))?;
		let mut count = 0;
		let rows = stmt.query_map(params![range.from, range.until], |row| {
			let compression_type: i32 = row.get(2)?;
			Ok((
				Header {
					nr_entries: row.get(0)?,
					raw_size: row.get(1)?,
					compression_type: CompressionType::from_i32(compression_type)
						.unwrap_or(CompressionType::None),
					start_time: row.get(3)?,
					end_time: row.get(4)?,
					checksum: row.get(5)?,
				},
				row.get::<_, Vec<u8>>(6)?,
				compression_type,
			))
		})?;
		for row in rows {
			let (header, bytes, raw_compression_type) = row?;
			if CompressionType::from_i32(raw_compression_type).is_none() {
				log::warn!(
					"store: skipping row with unknown compression_type {}",
					raw_compression_type
				);
				continue;
			}
			callback(header, bytes);
			count += 1;
		}
		Ok(count)
	}

	/// Deletes oldest header/data rows until at least `n` bytes of raw
	/// payload have been removed (or the store is exhausted). A no-op for
	/// `n <= 0`. Header rows are left behind with a dangling `data_id` and
	/// are ignored by subsequent queries.
	pub fn delete_oldest_bytes(&mut self, n: i64) -> Result<usize> {
		if n <= 0 {
			return Ok(0);
		}
		let tx = self.conn.transaction()?;
		let mut ids = Vec::new();
		let mut freed: i64 = 0;
		{
			let mut stmt = tx.prepare(&format!(
				"SELECT raw_size, data_id FROM {} WHERE data_id IS NOT NULL ORDER BY end_time ASC",
				TABLE_HEADER
			))?;
			let mut rows = stmt.query([])?;
			while freed < n {
				let row = match rows.next()? {
					Some(row) => row,
					None => break,
				};
				let raw_size: i64 = row.get(0)?;
				let data_id: i64 = row.get(1)?;
				ids.push(data_id);
				freed += raw_size;
			}
		}
		let deleted = ids.len();
		if !ids.is_empty() {
			let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
			let sql = format!("DELETE FROM {} WHERE id IN ({})", TABLE_DATA, placeholders);
			let params = rusqlite::params_from_iter(ids.iter());
			tx.execute(&sql, params)?;
		}
		tx.commit()?;
		Ok(deleted)
	}

	pub fn vacuum(&self) -> Result<()> {
		self.conn.execute_batch("VACUUM")?;
		Ok(())
	}

	/// Current on-disk byte length of the database file. Used by retention
	/// instead of the original's unstepped `sqlite3_column_int64` query
	/// (see Open Question #3 in SPEC_FULL.md).
	pub fn file_size(path: &Path) -> Result<u64> {
		Ok(std::fs::metadata(path)?.len())
	}

	#[cfg(test)]
	pub fn row_count(&self) -> Result<(i64, i64)> {
		let data: i64 = self
			.conn
			.query_row(&format!("SELECT COUNT(*) FROM {}", TABLE_DATA), [], |r| r.get(0))?;
		let header: i64 = self
			.conn
			.query_row(&format!("SELECT COUNT(*) FROM {}", TABLE_HEADER), [], |r| r.get(0))
			.optional()?
			.unwrap_or(0);
		Ok((data, header))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::codec::CompressionType;

	fn sample_header(start: i64, end: i64, raw_size: u32) -> Header {
		Header {
			nr_entries: raw_size / 24,
			raw_size,
			compression_type: CompressionType::None,
			start_time: start,
			end_time: end,
			checksum: 0,
		}
	}

	#[test]
	fn insert_and_select_overlapping() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("store.db");
		let mut store = Store::open(&path, false).unwrap();
		store
			.insert(&sample_header(100, 200, 240), &vec![0u8; 240])
			.unwrap();
		store
			.insert(&sample_header(300, 400, 240), &vec![1u8; 240])
			.unwrap();

		let mut seen = Vec::new();
		let count = store
			.select_overlapping(Timerange { from: 0, until: 250 }, |h, _| seen.push(h.start_time))
			.unwrap();
		assert_eq!(count, 1);
		assert_eq!(seen, vec![100]);
	}

	#[test]
	fn delete_oldest_bytes_is_noop_for_zero() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("store.db");
		let mut store = Store::open(&path, false).unwrap();
		store.insert(&sample_header(1, 2, 24), &vec![0u8; 24]).unwrap();
		assert_eq!(store.delete_oldest_bytes(0).unwrap(), 0);
		let (data, _) = store.row_count().unwrap();
		assert_eq!(data, 1);
	}

	#[test]
	fn delete_oldest_bytes_removes_in_end_time_order() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("store.db");
		let mut store = Store::open(&path, false).unwrap();
		store.insert(&sample_header(1, 10, 100), &vec![0u8; 100]).unwrap();
		store.insert(&sample_header(2, 20, 100), &vec![1u8; 100]).unwrap();
		store.insert(&sample_header(3, 30, 100), &vec![2u8; 100]).unwrap();

		let deleted = store.delete_oldest_bytes(150).unwrap();
		assert_eq!(deleted, 2);
		let (data, _) = store.row_count().unwrap();
		assert_eq!(data, 1);

		let mut seen = Vec::new();
		store
			.select_overlapping(Timerange { from: 0, until: 1000 }, |h, _| seen.push(h.start_time))
			.unwrap();
		assert_eq!(seen, vec![3]);
	}
}
