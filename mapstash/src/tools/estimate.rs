use super::format_bytes;
use anyhow::Result;
use clap::Args;
use mapstash_core::{GeoBBox, projection::count_tiles};
use mapstash_pipeline::{estimate_download_bytes, estimate_tile_count};

#[derive(Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// area as "west,south,east,north" in degrees
	#[arg(long, short, allow_hyphen_values = true)]
	bbox: GeoBBox,

	/// lowest zoom level
	#[arg(long, default_value_t = 0)]
	min_zoom: u8,

	/// highest zoom level
	#[arg(long)]
	max_zoom: u8,

	/// assumed average tile size in bytes
	#[arg(long, default_value_t = 15_000)]
	tile_size: u64,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let bbox = &arguments.bbox;
	let total = estimate_tile_count(bbox, arguments.min_zoom, arguments.max_zoom)?;

	for zoom in arguments.min_zoom..=arguments.max_zoom {
		println!("zoom {zoom:>2}: {:>12} tiles", count_tiles(bbox, zoom)?);
	}
	let bytes = estimate_download_bytes(bbox, arguments.min_zoom, arguments.max_zoom, arguments.tile_size)?;
	println!("total:   {total:>12} tiles, about {}", format_bytes(bytes));
	Ok(())
}
