// Error taxonomy for the ingest/store/query engine.
//
// Mirrors the split the original C implementation made ad hoc between
// "fatal, exit(1)" and "log and continue": here that split is a type,
// not a call to exit() scattered through the core. Only the two binaries
// in cli/ decide to turn an `Error` into a process exit.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// Bad flags, missing required options, non-existent storage directory,
	/// unknown compression algorithm. Caller should exit(1) before starting
	/// any subsystem.
	Config(String),
	Io(std::io::Error),
	Sql(rusqlite::Error),
	/// The capture source (netlink/NFLOG) could not be opened or bound.
	Capture(String),
	/// A stored row failed header validation or checksum verification.
	Corruption(String),
	/// The codec rejected an unknown compression type, or a frame was
	/// corrupt / declared the wrong uncompressed size.
	Compression(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::Config(msg) => write!(f, "configuration error: {}", msg),
			Error::Io(err) => write!(f, "i/o error: {}", err),
			Error::Sql(err) => write!(f, "storage error: {}", err),
			Error::Capture(msg) => write!(f, "capture error: {}", msg),
			Error::Corruption(msg) => write!(f, "corrupt row: {}", msg),
			Error::Compression(msg) => write!(f, "compression error: {}", msg),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Error::Io(err) => Some(err),
			Error::Sql(err) => Some(err),
			_ => None,
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Error::Io(err)
	}
}

impl From<rusqlite::Error> for Error {
	fn from(err: rusqlite::Error) -> Self {
		Error::Sql(err)
	}
}
