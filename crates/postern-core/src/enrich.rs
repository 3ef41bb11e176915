//! Optional IP / location enrichment for usage records.
//!
//! Resolves the device's public IP and a coarse location through a single
//! metadata endpoint and files them into the record's audit fields. Purely
//! diagnostic: a lookup failure degrades to placeholder values and the
//! admission decision never depends on anything resolved here.

use thiserror::Error;

/// Placeholder filed when a lookup fails.
pub const UNKNOWN: &str = "unknown";

const DEFAULT_ENDPOINT: &str = "http://ip-api.com/json";

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("lookup request failed: {0}")]
    Http(#[from] ureq::Error),
    #[error("lookup response was not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Resolved public-network metadata for the current device.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub ip: String,
    pub location: String,
}

impl Lookup {
    fn unknown() -> Self {
        Self {
            ip: UNKNOWN.to_string(),
            location: UNKNOWN.to_string(),
        }
    }
}

/// IP/location resolver against one metadata endpoint.
pub struct Enricher {
    endpoint: String,
}

impl Enricher {
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// Resolve IP and location, degrading to [`UNKNOWN`] placeholders on any
    /// transport or parse failure. Never fails.
    pub async fn lookup(&self) -> Lookup {
        let endpoint = self.endpoint.clone();
        match tokio::task::spawn_blocking(move || fetch(&endpoint)).await {
            Ok(Ok(lookup)) => lookup,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "ip/location lookup failed — recording placeholders");
                Lookup::unknown()
            }
            Err(e) => {
                tracing::warn!(error = %e, "ip/location lookup task failed — recording placeholders");
                Lookup::unknown()
            }
        }
    }
}

impl Default for Enricher {
    fn default() -> Self {
        Self::new()
    }
}

fn fetch(endpoint: &str) -> Result<Lookup, EnrichError> {
    let body = ureq::get(endpoint).call()?.into_body().read_to_string()?;
    parse_lookup(&body)
}

fn parse_lookup(body: &str) -> Result<Lookup, EnrichError> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    let field = |name: &str| {
        value
            .get(name)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    };

    let ip = field("query").unwrap_or(UNKNOWN).to_string();
    let location = match (field("city"), field("country")) {
        (Some(city), Some(country)) => format!("{city}, {country}"),
        (None, Some(country)) => country.to_string(),
        (Some(city), None) => city.to_string(),
        (None, None) => UNKNOWN.to_string(),
    };

    Ok(Lookup { ip, location })
}
