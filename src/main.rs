use clap::{Arg, Command};
use filerd_core::config::FilerConfig;
use filerd_core::logging::init_tracing;
use filerd_core::store::RedbFilerStore;
use std::error::Error;
use std::fs;
use std::path::PathBuf;

/// Minimal CLI wrapping the filer-core library: loading/validating
/// configuration and opening the embedded store. Serving HTTP uploads,
/// the master/volume wire protocols and peer replication transport are
/// out of scope for this crate — callers embed `filerd_core` and supply
/// their own `MasterClient`/`VolumeClient`/`PeerSource` implementations.
fn load_config(path: Option<&str>) -> Result<FilerConfig, Box<dyn Error>> {
	match path {
		Some(path) => {
			let text = fs::read_to_string(path)?;
			let config: FilerConfig = toml::from_str(&text)?;
			Ok(config)
		}
		None => Ok(FilerConfig::default()),
	}
}

fn main() -> Result<(), Box<dyn Error>> {
	init_tracing();

	let matches = Command::new("filerd")
		.version("0.1.0")
		.author("filerd contributors")
		.about("distributed filesystem metadata service")
		.subcommand_required(true)
		.arg(Arg::new("config").short('c').long("config").value_name("PATH").help("Path to a TOML config file"))
		.subcommand(Command::new("check").about("Validate configuration and open the embedded store"))
		.get_matches();

	let config = load_config(matches.get_one::<String>("config").map(|s| s.as_str()))?;
	config.validate()?;

	if matches.subcommand_matches("check").is_some() {
		fs::create_dir_all(&config.filer_dir)?;
		let db_path: PathBuf = config.filer_dir.join("filer.redb");
		let _store = RedbFilerStore::open(&db_path)?;
		println!("config ok, store opened at {:?}", db_path);
	}

	Ok(())
}

// vim: ts=4
