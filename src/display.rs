// Small formatting helpers shared by the two CLIs and used for debug
// tracing inside the engine itself.

/// Renders `bytes` as a lowercase hex string, e.g. for logging a raw
/// datagram at trace level.
pub fn hex(bytes: &[u8]) -> String {
	bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// `YYYY-MM-DD HH:MM:SS`, local time, matching the extractor's output
/// format.
pub fn format_timestamp(epoch_secs: i64) -> String {
	use chrono::{Local, TimeZone};
	match Local.timestamp_opt(epoch_secs, 0) {
		chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
		_ => format!("invalid({})", epoch_secs),
	}
}
