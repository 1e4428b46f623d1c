use std::path::PathBuf;
use std::process;

use structopt::StructOpt;

use nfcollect_core::committer::CommitterPool;
use nfcollect_core::options::CollectOptions;
use nfcollect_core::shutdown::Shutdown;
use nfcollect_core::store::Store;
use nfcollect_core::{capture::Capture, ingest};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(StructOpt)]
#[structopt(name = "nfcollect", no_version, about = "Collects firewall log entries into a local store")]
struct Opt {
	/// NFLOG group id to bind
	#[structopt(short = "g", long = "nflog_group")]
	nflog_group: u16,

	/// Path to the storage file
	#[structopt(short = "d", long = "storage", parse(from_os_str))]
	storage: PathBuf,

	/// Storage budget, in MiB
	#[structopt(short = "s", long = "storage_size")]
	storage_size: u64,

	/// Compression algorithm: lz4, zstd
	#[structopt(short = "c", long = "compression")]
	compression: Option<String>,

	/// Vacuum the storage file at startup
	#[structopt(short = "V", long = "vacuum")]
	vacuum: bool,

	/// Print version and exit
	#[structopt(short = "v", long = "version")]
	version: bool,
}

/// `-v|--version` and `-h|--help` must short-circuit even when the other
/// required flags are absent, matching `original_source/main.c`'s
/// `getopt_long` loop (it prints and calls `exit(0)` independent of what
/// else was parsed). `Opt::from_args()` enforces required fields before
/// `main` ever sees `opt.version`, so both flags are checked against the
/// raw argument list first.
fn early_exit_flag() {
	let args: Vec<String> = std::env::args().skip(1).collect();
	if args.iter().any(|a| a == "-v" || a == "--version") {
		println!("nfcollect {}", VERSION);
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
		println!("nfcollect {}", VERSION);
		return;
	}

	env_logger::init();

	if let Err(err) = fdlimit::raise_fd_limit() {
		log::warn!("startup: could not raise fd limit: {}", err);
	}

	let options = match CollectOptions::new(
		opt.nflog_group,
		opt.storage,
		opt.storage_size,
		opt.compression.as_deref(),
		opt.vacuum,
		None,
	) {
		Ok(options) => options,
		Err(err) => {
			eprintln!("nfcollect: {}", err);
			process::exit(1);
		}
	};

	// Held for the life of the process: enforces the single-writer
	// non-goal against a second nfcollect instance on the same file.
	// Committer handles are opened per-commit without the lock, since an
	// flock is keyed to the open file description, not the process, and
	// would otherwise serialize our own committer pool against itself.
	let _lock_guard = match Store::open(&options.storage_path, true) {
		Ok(store) => store,
		Err(err) => {
			eprintln!("nfcollect: {}", err);
			process::exit(1);
		}
	};

	if options.vacuum_on_startup {
		if let Err(err) = _lock_guard.vacuum() {
			eprintln!("nfcollect: {}", err);
			process::exit(1);
		}
		log::info!("startup: vacuumed {}", options.storage_path.display());
	}

	let shutdown = match Shutdown::install() {
		Ok(shutdown) => shutdown,
		Err(err) => {
			eprintln!("nfcollect: {}", err);
			process::exit(1);
		}
	};

	let capture = match Capture::open(options.nflog_group) {
		Ok(capture) => capture,
		Err(err) => {
			eprintln!("nfcollect: {}", err);
			process::exit(1);
		}
	};

	let (tx, rx) = crossbeam_channel::bounded(options.max_workers);
	let pool = CommitterPool::spawn(&options, rx);

	log::info!(
		"nfcollect: listening on nflog group {} -> {}",
		options.nflog_group,
		options.storage_path.display()
	);

	let result = ingest::run(capture, shutdown, options.block_capacity, tx);

	pool.join();

	match result {
		Ok(()) => {
			println!("Terminated due to SIGHUP ...");
			process::exit(0);
		}
		Err(err) => {
			eprintln!("nfcollect: {}", err);
			process::exit(1);
		}
	}
}
