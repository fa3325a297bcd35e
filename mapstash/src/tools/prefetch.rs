use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use mapstash_container::ArchiveRegistry;
use mapstash_core::{GeoBBox, PipelineConfig, progress::get_progress_bar};
use mapstash_pipeline::{BulkAreaJob, ProviderPipeline};
use std::{path::PathBuf, sync::Arc};

#[derive(Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// pipeline configuration (YAML)
	#[arg(required = true)]
	config: PathBuf,

	/// area as "west,south,east,north" in degrees
	#[arg(long, short, allow_hyphen_values = true)]
	bbox: GeoBBox,

	/// lowest zoom level
	#[arg(long, default_value_t = 0)]
	min_zoom: u8,

	/// highest zoom level
	#[arg(long)]
	max_zoom: u8,

	/// requests kept outstanding at once, overrides bulk.max_in_flight
	#[arg(long)]
	max_in_flight: Option<usize>,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let config = PipelineConfig::from_path(&arguments.config)?;
	if config.store.is_none() {
		bail!("{:?} does not configure a store, prefetched tiles would be lost", arguments.config);
	}

	let pipeline = Arc::new(ProviderPipeline::new(&config, Arc::new(ArchiveRegistry::default()))?);
	if pipeline.store().is_none() {
		bail!("the tile store could not be opened");
	}

	let mut job = BulkAreaJob::new(pipeline.clone(), arguments.bbox, arguments.min_zoom, arguments.max_zoom)?
		.with_config(&config.bulk);
	if let Some(max_in_flight) = arguments.max_in_flight {
		job = job.with_max_in_flight(max_in_flight);
	}

	let progress = get_progress_bar("prefetching tiles", job.total()?);
	let progress_ref = progress.clone();
	let handle = job.run(
		move |completed, failed, _total| progress_ref.set_counts(completed, failed),
		|summary| log::debug!("prefetch complete: {summary:?}"),
	)?;
	let summary = handle.wait()?;
	pipeline.shutdown();
	progress.finish();

	println!("{}", "prefetch".bold());
	println!("  tiles:     {}", summary.total);
	println!("  completed: {}", summary.completed);
	println!("  failed:    {}", summary.failed);
	if summary.cancelled > 0 {
		println!("  cancelled: {}", summary.cancelled);
	}
	Ok(())
}
