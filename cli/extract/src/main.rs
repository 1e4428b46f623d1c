use std::path::PathBuf;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{NaiveDateTime, TimeZone, Utc};
use structopt::StructOpt;

use nfcollect_core::block::DEFAULT_CAPACITY;
use nfcollect_core::display;
use nfcollect_core::options::ExtractOptions;
use nfcollect_core::query;
use nfcollect_core::store::Timerange;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DATE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%d"];

#[derive(StructOpt)]
#[structopt(name = "nfextract", no_version, about = "Extracts firewall log entries from a local store")]
struct Opt {
	/// Path to the storage file to read
	#[structopt(short = "d", long = "storage_file", parse(from_os_str))]
	storage_file: PathBuf,

	/// Start of the query range, e.g. "2024-01-02 15:04:05"
	#[structopt(short = "s", long = "since")]
	since: Option<String>,

	/// End of the query range, defaults to now
	#[structopt(short = "u", long = "until")]
	until: Option<String>,

	/// Print version and exit
	#[structopt(short = "v", long = "version")]
	version: bool,
}

fn now_secs() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs() as i64
}

fn parse_date(s: &str) -> Option<i64> {
	for fmt in DATE_FORMATS {
		if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
			return Some(Utc.from_utc_datetime(&dt).timestamp());
		}
		if *fmt == "%Y-%m-%d" {
			if let Ok(d) = chrono::NaiveDate::parse_from_str(s, fmt) {
				let dt = d.and_hms_opt(0, 0, 0)?;
				return Some(Utc.from_utc_datetime(&dt).timestamp());
			}
		}
	}
	None
}

/// `-v|--version` and `-h|--help` must short-circuit even when the other
/// required flags are absent, matching `original_source/nfextract.c`'s
/// `getopt_long` loop (it prints and calls `exit(0)` independent of what
/// else was parsed). `Opt::from_args()` enforces required fields before
/// `main` ever sees `opt.version`, so both flags are checked against the
/// raw argument list first.
fn early_exit_flag() {
	let args: Vec<String> = std::env::args().skip(1).collect();
	if args.iter().any(|a| a == "-v" || a == "--version") {
		println!("nfextract {}", VERSION);
		process::exit(0);
	}
	if args.iter().any(|a| a == "-h" || a == "--help") {
		let _ = Opt::clap().print_help();
		println!();
		process::exit(0);
	}
}

fn main() {
	early_exit_flag();
	let opt = Opt::from_args();
	if opt.version {
		println!("nfextract {}", VERSION);
		return;
	}

	env_logger::init();

	let since = match opt.since {
		Some(ref s) => match parse_date(s) {
			Some(ts) => ts,
			None => {
				eprintln!("nfextract: could not parse --since '{}'", s);
				process::exit(1);
			}
		},
		None => 0,
	};
	let until = match opt.until {
		Some(ref s) => match parse_date(s) {
			Some(ts) => ts,
			None => {
				eprintln!("nfextract: could not parse --until '{}'", s);
				process::exit(1);
			}
		},
		None => now_secs(),
	};

	let options = match ExtractOptions::new(opt.storage_file, since, until) {
		Ok(options) => options,
		Err(err) => {
			eprintln!("nfextract: {}", err);
			process::exit(1);
		}
	};

	let mut last_timestamp: Option<i64> = None;
	let range = Timerange {
		from: options.since,
		until: options.until,
	};
	let result = query::extract(&options.storage_path, DEFAULT_CAPACITY, range, |entry| {
		let ts_column = if last_timestamp == Some(entry.timestamp) {
			String::new()
		} else {
			last_timestamp = Some(entry.timestamp);
			display::format_timestamp(entry.timestamp)
		};
		println!(
			"  {:<18}:\tdaddr={:<16}\tproto={}\tuid={}\tsport={}\tdport={}",
			ts_column,
			entry.daddr_string(),
			entry.protocol.name(),
			entry.uid,
			entry.sport,
			entry.dport
		);
	});

	if let Err(err) = result {
		eprintln!("nfextract: {}", err);
		process::exit(1);
	}
}
