use std::{collections::HashMap, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};

pub const DEFAULT_BASE_URL: &str = "https://schluterditraheat.com/api/";
pub const DEFAULT_AUTH_URL: &str = "https://mobile-api.neviweb.com/api/";

/// Typical heating-cable output in watts per square foot.
pub const DEFAULT_FLOOR_WATTAGE: f64 = 15.0;

// ---------------------------------------------------------------------------
// FloorConfig
// ---------------------------------------------------------------------------

/// User-supplied heated floor description used for power estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloorConfig {
    /// Heated area in square feet.
    pub area_sq_ft: f64,
    /// Cable output in watts per square foot.
    pub watts_per_sq_ft: f64,
}

impl FromStr for FloorConfig {
    type Err = anyhow::Error;

    /// Parses `"area"` or `"area:watts_per_sq_ft"`.
    fn from_str(s: &str) -> Result<Self> {
        let (area, wattage) = match s.split_once(':') {
            Some((area, wattage)) => (area, Some(wattage)),
            None => (s, None),
        };

        let area_sq_ft = area
            .trim()
            .parse::<f64>()
            .with_context(|| format!("floor area must be a number, got: {area:?}"))?;
        let watts_per_sq_ft = match wattage {
            Some(w) => w
                .trim()
                .parse::<f64>()
                .with_context(|| format!("floor wattage must be a number, got: {w:?}"))?,
            None => DEFAULT_FLOOR_WATTAGE,
        };

        anyhow::ensure!(
            area_sq_ft.is_finite() && watts_per_sq_ft.is_finite(),
            "floor area and wattage must be finite, got: {s:?}"
        );
        anyhow::ensure!(
            area_sq_ft >= 0.0 && watts_per_sq_ft >= 0.0,
            "floor area and wattage must not be negative, got: {s:?}"
        );

        Ok(Self { area_sq_ft, watts_per_sq_ft })
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub auth_url: String,
    /// JSON file holding config entries (location id + refresh token).
    pub state_path: PathBuf,
    pub server_host: String,
    pub server_port: u16,
    /// Device polling interval in seconds.
    pub poll_interval_secs: u64,
    /// Timeout applied to every vendor API request.
    pub request_timeout_secs: u64,
    /// Maps device_id → floor description,
    /// Format: `"id1:area,id2:area:watts"` (e.g. `"1001:45,1002:60:12"`).
    pub floor_areas: HashMap<i64, FloorConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            base_url: optional("SCHLUTER_BASE_URL", DEFAULT_BASE_URL),
            auth_url: optional("SCHLUTER_AUTH_URL", DEFAULT_AUTH_URL),
            state_path: optional("STATE_PATH", "schluter_entries.json").into(),
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            poll_interval_secs: optional("POLL_INTERVAL_SECS", "30")
                .parse()
                .context("POLL_INTERVAL_SECS must be a positive integer")?,
            request_timeout_secs: optional("REQUEST_TIMEOUT_SECS", "30")
                .parse()
                .context("REQUEST_TIMEOUT_SECS must be a positive integer")?,
            floor_areas: parse_floor_areas(&optional("FLOOR_AREAS", ""))?,
        };

        anyhow::ensure!(config.poll_interval_secs > 0, "POLL_INTERVAL_SECS must be greater than 0");
        anyhow::ensure!(
            config.request_timeout_secs > 0,
            "REQUEST_TIMEOUT_SECS must be greater than 0"
        );

        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn floor(&self, device_id: i64) -> Option<FloorConfig> {
        self.floor_areas.get(&device_id).copied()
    }

    /// Configuration pointing both API hosts at `url`, used by tests
    /// against a mock server.
    #[cfg(test)]
    pub(crate) fn for_mock_server(url: &str, state_path: PathBuf) -> Self {
        Self {
            base_url: format!("{url}/api/"),
            auth_url: format!("{url}/auth/"),
            state_path,
            server_host: "127.0.0.1".to_owned(),
            server_port: 0,
            poll_interval_secs: 30,
            request_timeout_secs: 5,
            floor_areas: HashMap::new(),
        }
    }
}

/// Parse `"id1:area,id2:area:watts"` into a `HashMap<i64, FloorConfig>`.
///
/// Returns an error immediately if any entry is malformed.
fn parse_floor_areas(raw: &str) -> Result<HashMap<i64, FloorConfig>> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|entry| {
            let (id, floor) = entry.split_once(':').with_context(|| {
                format!("FLOOR_AREAS entry must be 'device_id:area[:watts]', got: {entry:?}")
            })?;
            let id = id
                .trim()
                .parse::<i64>()
                .with_context(|| format!("invalid device id in FLOOR_AREAS entry {entry:?}"))?;
            let floor = floor
                .parse::<FloorConfig>()
                .with_context(|| format!("invalid floor description in FLOOR_AREAS entry {entry:?}"))?;
            Ok((id, floor))
        })
        .collect()
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
