mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{ErrorLevel, Verbosity};

/// Resolve, cache and pre-fetch slippy-map tiles.
#[derive(Parser, Debug)]
#[command(
	author,
	version,
	about,
	long_about = None,
	propagate_version = true,
	disable_help_subcommand = true,
)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	#[command(flatten)]
	verbose: Verbosity<ErrorLevel>,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Estimate tile count and download size of an area
	Estimate(tools::estimate::Subcommand),

	/// Export stored tiles of an area into an offline archive
	Export(tools::export::Subcommand),

	/// Import a legacy file-tree tile cache into the tile store
	Import(tools::import::Subcommand),

	#[clap(alias = "download")]
	/// Download every tile of an area into the tile store
	Prefetch(tools::prefetch::Subcommand),

	/// Show the tile sources of an offline archive
	Probe(tools::probe::Subcommand),

	/// Inspect, trim or purge the tile store
	Store(tools::store::Subcommand),
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	env_logger::Builder::new()
		.filter_level(cli.verbose.log_level_filter())
		.format_timestamp(None)
		.init();

	run(cli)
}

fn run(cli: Cli) -> Result<()> {
	match &cli.command {
		Commands::Estimate(arguments) => tools::estimate::run(arguments),
		Commands::Export(arguments) => tools::export::run(arguments),
		Commands::Import(arguments) => tools::import::run(arguments),
		Commands::Prefetch(arguments) => tools::prefetch::run(arguments),
		Commands::Probe(arguments) => tools::probe::run(arguments),
		Commands::Store(arguments) => tools::store::run(arguments),
	}
}

#[cfg(test)]
mod tests {
	use crate::{Cli, run};
	use anyhow::Result;
	use clap::Parser;

	pub fn run_command(arg_vec: Vec<&str>) -> Result<String> {
		let cli = Cli::try_parse_from(arg_vec)?;
		let msg = format!("{cli:?}");
		run(cli)?;
		Ok(msg)
	}

	#[test]
	fn help() {
		let err = run_command(vec!["mapstash"]).unwrap_err().to_string();
		assert!(err.starts_with("Resolve, cache and pre-fetch slippy-map tiles"));
		assert!(err.contains("\nUsage: mapstash [OPTIONS] <COMMAND>"));
	}

	#[test]
	fn version() {
		let err = run_command(vec!["mapstash", "-V"]).unwrap_err().to_string();
		assert!(err.starts_with("mapstash "));
	}

	#[test]
	fn subcommands_need_arguments() {
		for (name, about) in [
			("estimate", "Estimate tile count and download size of an area"),
			("export", "Export stored tiles of an area into an offline archive"),
			("import", "Import a legacy file-tree tile cache into the tile store"),
			("prefetch", "Download every tile of an area into the tile store"),
			("probe", "Show the tile sources of an offline archive"),
			("store", "Inspect, trim or purge the tile store"),
		] {
			let output = run_command(vec!["mapstash", name]).unwrap_err().to_string();
			assert!(output.starts_with(about), "{name}: {output}");
		}
	}
}
