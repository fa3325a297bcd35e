use super::open_store;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use mapstash_core::PipelineConfig;
use std::path::PathBuf;

#[derive(Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// pipeline configuration (YAML) with a store section
	#[arg(required = true)]
	config: PathBuf,

	/// root of the legacy cache, laid out as <provider>/<z>/<x>/<y>.<ext>
	#[arg(required = true)]
	legacy_cache: PathBuf,

	/// delete every file after it was imported
	#[arg(long)]
	delete_source: bool,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let config = PipelineConfig::from_path(&arguments.config)?;
	let store = open_store(&config, &arguments.config)?;

	eprintln!("import {:?} into {:?}", arguments.legacy_cache, store.path());
	let result = store.import_legacy_file_cache(&arguments.legacy_cache, arguments.delete_source)?;

	println!("{}", "legacy cache import".bold());
	println!("  imported:        {}", result.success);
	println!("  already present: {}", result.already_present);
	println!("  failed:          {}", result.failure);
	println!("  unparseable:     {}", result.unparseable);
	if arguments.delete_source {
		println!("  deleted:         {}", result.deleted);
		println!("  delete failed:   {}", result.delete_failed);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use crate::tests::run_command;
	use assert_fs::{TempDir, prelude::*};
	use mapstash_container::PersistentStore;
	use mapstash_core::{Blob, TileIndex};

	#[test]
	fn import_and_delete() -> anyhow::Result<()> {
		let dir = TempDir::new()?;
		dir.child("legacy/Mapnik/1/0/1.png.tile").write_binary(b"tile")?;
		dir.child("legacy/Mapnik/1/0/readme.txt").write_str("not a tile")?;
		dir.child("config.yaml").write_str(
			"tile_source: Mapnik\nstore:\n  path: cache.sqlite\n  capacity_bytes: 100000\n  trim_target_bytes: 50000\n",
		)?;

		let config = dir.child("config.yaml");
		let legacy = dir.child("legacy");
		run_command(vec![
			"mapstash",
			"import",
			config.path().to_str().unwrap(),
			legacy.path().to_str().unwrap(),
			"--delete-source",
		])?;

		let store = PersistentStore::open(&dir.path().join("cache.sqlite"), 100_000, 50_000)?;
		assert_eq!(store.read("Mapnik", &TileIndex::new(1, 0, 1)?)?, Some(Blob::from("tile")));
		assert!(!dir.child("legacy/Mapnik/1/0/1.png.tile").path().exists());
		assert!(dir.child("legacy/Mapnik/1/0/readme.txt").path().exists());
		Ok(())
	}

	#[test]
	fn config_without_store() -> anyhow::Result<()> {
		let dir = TempDir::new()?;
		dir.child("config.yaml").write_str("tile_source: Mapnik\n")?;
		let config = dir.child("config.yaml");
		let err = run_command(vec![
			"mapstash",
			"import",
			config.path().to_str().unwrap(),
			dir.path().to_str().unwrap(),
		])
		.unwrap_err();
		assert!(err.to_string().ends_with("does not configure a store"), "{err}");
		Ok(())
	}
}
