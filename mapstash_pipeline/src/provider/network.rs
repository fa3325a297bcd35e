//! Tile download from a tile server.
//!
//! Requests run on a small tokio runtime owned by the fetcher; [`TileProvider::load`] blocks the
//! calling worker thread until the download finished or failed.

use super::{LoadedTile, TileProvider};
use anyhow::{Context, Result, bail};
use mapstash_core::{Blob, NetworkConfig, ProviderId, TileIndex};
use reqwest::{
	Client, StatusCode, Url,
	header::{CACHE_CONTROL, EXPIRES, HeaderMap, HeaderName, HeaderValue},
};
use std::{
	fmt::Debug,
	time::{Duration, SystemTime},
};
use time::{PrimitiveDateTime, format_description::BorrowedFormatItem, macros::format_description};
use tokio::{runtime::Runtime, time::sleep};

/// IMF-fixdate, e.g. `Fri, 19 Oct 2018 17:47:00 GMT`.
const HTTP_DATE: &[BorrowedFormatItem<'static>] =
	format_description!("[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT");

pub struct NetworkFetcher {
	config: NetworkConfig,
	client: Client,
	runtime: Runtime,
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
	err.is_connect() || err.is_timeout() || err.is_body()
}

/// `max-age` of a `Cache-Control` header.
fn max_age(headers: &HeaderMap) -> Option<Duration> {
	headers
		.get(CACHE_CONTROL)?
		.to_str()
		.ok()?
		.split(',')
		.find_map(|directive| {
			let (name, value) = directive.trim().split_once('=')?;
			if !name.eq_ignore_ascii_case("max-age") {
				return None;
			}
			value.trim_matches('"').parse::<u64>().ok()
		})
		.map(Duration::from_secs)
}

/// Point in time of an `Expires` header.
fn expires_header(headers: &HeaderMap) -> Option<SystemTime> {
	let value = headers.get(EXPIRES)?.to_str().ok()?;
	let date = PrimitiveDateTime::parse(value.trim(), HTTP_DATE).ok()?;
	Some(SystemTime::from(date.assume_utc()))
}

/// `max-age` wins over `Expires`; without either the tile lives for `default_lifetime`.
fn expiry(headers: &HeaderMap, now: SystemTime, default_lifetime: Duration) -> SystemTime {
	max_age(headers)
		.map(|lifetime| now + lifetime)
		.or_else(|| expires_header(headers))
		.unwrap_or(now + default_lifetime)
}

impl NetworkFetcher {
	pub fn new(config: &NetworkConfig) -> Result<NetworkFetcher> {
		config.validate()?;

		let mut headers = HeaderMap::new();
		for (name, value) in &config.headers {
			let name = HeaderName::from_bytes(name.as_bytes()).with_context(|| format!("invalid header name '{name}'"))?;
			let value = HeaderValue::from_str(value).with_context(|| format!("invalid value for header '{name}'"))?;
			headers.insert(name, value);
		}

		let client = Client::builder()
			.user_agent(config.user_agent.as_str())
			.default_headers(headers)
			.timeout(config.timeout())
			.tcp_keepalive(Duration::from_secs(600))
			.build()?;

		let runtime = tokio::runtime::Builder::new_multi_thread()
			.worker_threads(2)
			.thread_name("mapstash-http")
			.enable_all()
			.build()?;

		Ok(NetworkFetcher {
			config: config.clone(),
			client,
			runtime,
		})
	}

	pub fn config(&self) -> &NetworkConfig {
		&self.config
	}

	/// Fills the `{z}`, `{x}` and `{y}` placeholders of the URL template. `{source}` is replaced
	/// by the tile source name when present.
	pub fn tile_url(&self, source: &str, index: &TileIndex) -> Result<Url> {
		let url = self
			.config
			.url_template
			.replace("{z}", &index.zoom.to_string())
			.replace("{x}", &index.x.to_string())
			.replace("{y}", &index.y.to_string())
			.replace("{source}", source);
		Url::parse(&url).with_context(|| format!("invalid tile URL '{url}'"))
	}

	async fn fetch(&self, url: &Url) -> Result<Option<LoadedTile>> {
		let max_retries = self.config.max_retries;

		for attempt in 0..=max_retries {
			if attempt > 0 {
				let backoff = Duration::from_secs(1 << (attempt - 1));
				log::warn!("retry attempt {attempt}/{max_retries} fetching '{url}', waiting {backoff:?}");
				sleep(backoff).await;
			}

			let response = match self.client.get(url.clone()).send().await {
				Ok(r) => r,
				Err(e) if is_retryable_error(&e) && attempt < max_retries => {
					log::warn!("retryable error: {e}");
					continue;
				}
				Err(e) => return Err(e).with_context(|| format!("fetching '{url}'")),
			};

			let status = response.status();
			if status == StatusCode::NOT_FOUND {
				log::trace!("'{url}' not found");
				return Ok(None);
			}
			if !status.is_success() {
				bail!("tile server answered {status} for '{url}'");
			}

			let expires = expiry(response.headers(), SystemTime::now(), self.config.default_expiry());

			match response.bytes().await {
				Ok(bytes) => {
					log::trace!("fetched {} bytes from '{url}'", bytes.len());
					return Ok(Some(
						LoadedTile::new(Blob::from(bytes.to_vec())).with_expires(Some(expires)),
					));
				}
				Err(e) if is_retryable_error(&e) && attempt < max_retries => {
					log::warn!("retryable error reading body: {e}");
				}
				Err(e) => return Err(e).with_context(|| format!("reading body of '{url}'")),
			}
		}

		bail!("giving up on '{url}' after {max_retries} retries")
	}
}

impl TileProvider for NetworkFetcher {
	fn id(&self) -> ProviderId {
		ProviderId::Network
	}

	fn load(&self, source: &str, index: &TileIndex) -> Result<Option<LoadedTile>> {
		let url = self.tile_url(source, index)?;
		self.runtime.block_on(self.fetch(&url))
	}
}

impl Debug for NetworkFetcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("NetworkFetcher")
			.field("url_template", &self.config.url_template)
			.field("timeout", &self.config.timeout())
			.finish()
	}
}
