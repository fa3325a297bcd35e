use anyhow::{Result, ensure};
use serde::Deserialize;
use std::{collections::BTreeMap, time::Duration};

/// Tile server access.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
	/// URL with `{z}`, `{x}` and `{y}` placeholders
	pub url_template: String,

	/// Sent as `User-Agent`; many tile servers reject requests without a meaningful one
	#[serde(default = "default_user_agent")]
	pub user_agent: String,

	/// Extra request headers
	#[serde(default)]
	pub headers: BTreeMap<String, String>,

	/// Upper bound for a single fetch, in seconds
	#[serde(default = "default_timeout_secs")]
	pub timeout_secs: u64,

	/// Retries after connection or timeout errors
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,

	/// Lifetime of tiles whose response carries no `Cache-Control: max-age`, in seconds
	#[serde(default = "default_expiry_secs")]
	pub default_expiry_secs: u64,
}

fn default_user_agent() -> String {
	format!("mapstash/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_secs() -> u64 {
	30
}

fn default_max_retries() -> u32 {
	3
}

fn default_expiry_secs() -> u64 {
	7 * 24 * 3600
}

impl NetworkConfig {
	pub fn new(url_template: &str) -> Self {
		NetworkConfig {
			url_template: url_template.to_string(),
			user_agent: default_user_agent(),
			headers: BTreeMap::new(),
			timeout_secs: default_timeout_secs(),
			max_retries: default_max_retries(),
			default_expiry_secs: default_expiry_secs(),
		}
	}

	pub fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout_secs)
	}

	pub fn default_expiry(&self) -> Duration {
		Duration::from_secs(self.default_expiry_secs)
	}

	pub fn validate(&self) -> Result<()> {
		for placeholder in ["{z}", "{x}", "{y}"] {
			ensure!(
				self.url_template.contains(placeholder),
				"network.url_template '{}' lacks the {placeholder} placeholder",
				self.url_template
			);
		}
		ensure!(self.timeout_secs > 0, "network.timeout_secs must be positive");
		Ok(())
	}
}
