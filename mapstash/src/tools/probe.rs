use super::{format_bytes, parse_tile};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use mapstash_container::{ArchiveRegistry, OpenOptions};
use std::path::PathBuf;

#[derive(Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// archive to probe
	/// supported formats are: *.sqlite, *.mbtiles, *.zip, *.gemf
	#[arg(required = true, verbatim_doc_comment)]
	filename: PathBuf,

	/// also read one tile, given as z/x/y
	#[arg(long, short)]
	tile: Option<String>,

	/// tile source to read the tile from; defaults to the first one
	#[arg(long, short)]
	source: Option<String>,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	eprintln!("probe {:?}", arguments.filename);

	let registry = ArchiveRegistry::default();
	let handle = registry.open(&arguments.filename, OpenOptions::default())?;

	println!("{}", "archive".bold());
	println!("  path:   {:?}", handle.path());
	println!("  format: {}", handle.format());
	println!("{}", "tile sources".bold());
	for name in handle.tile_source_names() {
		println!("  {name}");
	}

	if let Some(tile) = &arguments.tile {
		let index = parse_tile(tile)?;
		let source = arguments
			.source
			.clone()
			.or_else(|| handle.tile_source_names().iter().next().cloned())
			.unwrap_or_default();
		match handle.read_tile(&source, &index)? {
			Some(blob) => println!("tile {index} of '{source}': {}", format_bytes(blob.len())),
			None => println!("tile {index} of '{source}': missing"),
		}
	}

	handle.close();
	Ok(())
}
