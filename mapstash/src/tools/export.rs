use super::open_store;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use mapstash_core::{GeoBBox, PipelineConfig};
use std::path::PathBuf;

#[derive(Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// pipeline configuration (YAML) with a store section
	#[arg(required = true)]
	config: PathBuf,

	/// archive to create; its extension (sqlite, mbtiles or zip) selects the format
	#[arg(required = true)]
	output: PathBuf,

	/// area as "west,south,east,north" in degrees
	#[arg(long, short, allow_hyphen_values = true)]
	bbox: GeoBBox,

	/// lowest zoom level
	#[arg(long, default_value_t = 0)]
	min_zoom: u8,

	/// highest zoom level
	#[arg(long)]
	max_zoom: u8,

	/// provider to export, defaults to the configured tile source
	#[arg(long)]
	provider: Option<String>,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let config = PipelineConfig::from_path(&arguments.config)?;
	let store = open_store(&config, &arguments.config)?;
	let provider = arguments.provider.as_deref().unwrap_or(&config.tile_source);

	let result = store.export_archive(
		provider,
		&arguments.bbox,
		arguments.min_zoom,
		arguments.max_zoom,
		&arguments.output,
	)?;

	println!("{}", "export".bold());
	println!("  archive:  {:?}", arguments.output);
	println!("  provider: {provider}");
	println!("  exported: {}", result.exported);
	println!("  missing:  {}", result.missing);
	Ok(())
}

#[cfg(test)]
mod tests {
	use crate::tests::run_command;
	use assert_fs::{TempDir, prelude::*};
	use mapstash_container::{ArchiveRegistry, OpenOptions, PersistentStore};
	use mapstash_core::{Blob, TileIndex};

	fn setup() -> anyhow::Result<TempDir> {
		let dir = TempDir::new()?;
		dir.child("config.yaml").write_str(
			"tile_source: Mapnik\nstore:\n  path: cache.sqlite\n  capacity_bytes: 100000\n  trim_target_bytes: 50000\n",
		)?;
		let store = PersistentStore::open(&dir.path().join("cache.sqlite"), 100_000, 50_000)?;
		store.write("Mapnik", &TileIndex::new(1, 0, 0)?, &Blob::from("west"), None)?;
		store.write("Mapnik", &TileIndex::new(1, 1, 0)?, &Blob::from("east"), None)?;
		store.write("Cycle", &TileIndex::new(1, 0, 0)?, &Blob::from("cycle"), None)?;
		Ok(dir)
	}

	#[test]
	fn export_western_hemisphere() -> anyhow::Result<()> {
		let dir = setup()?;
		let output = dir.path().join("west.sqlite");
		run_command(vec![
			"mapstash",
			"export",
			dir.child("config.yaml").path().to_str().unwrap(),
			output.to_str().unwrap(),
			"--bbox=-179,1,-1,80",
			"--min-zoom",
			"1",
			"--max-zoom",
			"1",
		])?;

		let archive = ArchiveRegistry::default().open(&output, OpenOptions::default())?;
		assert_eq!(archive.read_tile("Mapnik", &TileIndex::new(1, 0, 0)?)?, Some(Blob::from("west")));
		assert_eq!(archive.read_tile("Mapnik", &TileIndex::new(1, 1, 0)?)?, None);
		assert_eq!(archive.read_tile("Cycle", &TileIndex::new(1, 0, 0)?)?, None);
		Ok(())
	}

	#[test]
	fn export_other_provider() -> anyhow::Result<()> {
		let dir = setup()?;
		let output = dir.path().join("cycle.zip");
		run_command(vec![
			"mapstash",
			"export",
			dir.child("config.yaml").path().to_str().unwrap(),
			output.to_str().unwrap(),
			"--bbox=-180,-85,180,85",
			"--max-zoom",
			"1",
			"--provider",
			"Cycle",
		])?;

		let archive = ArchiveRegistry::default().open(&output, OpenOptions::default())?;
		assert_eq!(archive.tile_source_names().len(), 1);
		assert_eq!(archive.read_tile("Cycle", &TileIndex::new(1, 0, 0)?)?, Some(Blob::from("cycle")));
		Ok(())
	}

	#[test]
	fn export_refuses_existing_output() -> anyhow::Result<()> {
		let dir = setup()?;
		dir.child("taken.mbtiles").write_str("keep")?;
		let output = dir.path().join("taken.mbtiles");
		let err = run_command(vec![
			"mapstash",
			"export",
			dir.child("config.yaml").path().to_str().unwrap(),
			output.to_str().unwrap(),
			"--bbox=-180,-85,180,85",
			"--max-zoom",
			"1",
		])
		.unwrap_err();
		assert!(err.to_string().contains("refusing to overwrite"), "{err}");
		dir.child("taken.mbtiles").assert("keep");
		Ok(())
	}
}
