use super::{format_bytes, open_store};
use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use mapstash_core::{GeoBBox, PipelineConfig};
use std::{path::PathBuf, time::SystemTime};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

#[derive(Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// pipeline configuration (YAML) with a store section
	#[arg(required = true)]
	config: PathBuf,

	/// trim the store down to its trim target
	#[arg(long)]
	trim: bool,

	/// delete the tiles of one provider
	#[arg(long, value_name = "PROVIDER", conflicts_with = "purge_all")]
	purge: Option<String>,

	/// delete every tile
	#[arg(long)]
	purge_all: bool,

	/// delete tiles whose expiry has passed
	#[arg(long)]
	purge_expired: bool,

	/// delete the tiles of one provider inside --bbox, from --min-zoom to --max-zoom
	#[arg(long, value_name = "PROVIDER", requires_all = ["bbox", "max_zoom"])]
	purge_area: Option<String>,

	/// area as "west,south,east,north" in degrees
	#[arg(long, short, allow_hyphen_values = true, requires = "purge_area")]
	bbox: Option<GeoBBox>,

	/// lowest zoom level of --purge-area
	#[arg(long, default_value_t = 0)]
	min_zoom: u8,

	/// highest zoom level of --purge-area
	#[arg(long, requires = "purge_area")]
	max_zoom: Option<u8>,
}

fn format_time(time: SystemTime) -> String {
	OffsetDateTime::from(time)
		.format(&Rfc3339)
		.unwrap_or_else(|_| format!("{time:?}"))
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let config = PipelineConfig::from_path(&arguments.config)?;
	let store = open_store(&config, &arguments.config)?;

	if arguments.purge_all {
		println!("purged {} tiles", store.purge(None)?);
	}
	if let Some(provider) = &arguments.purge {
		println!("purged {} tiles of '{provider}'", store.purge(Some(provider))?);
	}
	if arguments.purge_expired {
		println!("purged {} expired tiles", store.purge_expired(SystemTime::now())?);
	}
	if let Some(provider) = &arguments.purge_area {
		let (Some(bbox), Some(max_zoom)) = (&arguments.bbox, arguments.max_zoom) else {
			bail!("--purge-area needs --bbox and --max-zoom");
		};
		let removed = store.purge_area(provider, bbox, arguments.min_zoom, max_zoom)?;
		println!("purged {removed} tiles of '{provider}' in {bbox:?}");
	}
	if arguments.trim {
		let report = store.trim()?;
		println!(
			"trimmed {} tiles, freed {}",
			report.removed_tiles,
			format_bytes(report.freed_bytes)
		);
	}

	println!("{}", "tile store".bold());
	println!("  path:        {:?}", store.path());
	println!("  usage:       {}", format_bytes(store.current_usage_bytes()?));
	println!("  capacity:    {}", format_bytes(store.capacity_bytes()));
	println!("  trim target: {}", format_bytes(store.trim_target_bytes()));
	if let Some(expiry) = store.first_expiry()? {
		println!("  next expiry: {}", format_time(expiry));
	}
	println!("{}", "providers".bold());
	for usage in store.provider_usage()? {
		println!(
			"  {}: {} tiles, {}",
			usage.provider,
			usage.tiles,
			format_bytes(usage.bytes)
		);
	}
	Ok(())
}
