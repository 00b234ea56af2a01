use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::geo::{GeoError, GeoProvider};
use crate::models::driver::GeoPoint;

const USER_AGENT: &str = concat!("parcel-dispatch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    requires_key: bool,
}

#[derive(Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

impl NominatimGeocoder {
    pub fn new(base_url: String, api_key: Option<String>, requires_key: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            requires_key,
        }
    }
}

#[async_trait]
impl GeoProvider for NominatimGeocoder {
    async fn geocode(&self, place: &str) -> Result<GeoPoint, GeoError> {
        let place = place.trim();
        if place.is_empty() {
            return Err(GeoError::EmptyQuery);
        }

        if self.requires_key && self.api_key.is_none() {
            return Err(GeoError::MissingCredentials);
        }

        let mut query = vec![("q", place), ("format", "json"), ("limit", "1")];
        if let Some(key) = &self.api_key {
            query.push(("key", key.as_str()));
        }

        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .query(&query)
            .send()
            .await
            .map_err(|err| GeoError::Provider(format!("request failed: {err}")))?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(GeoError::QuotaExceeded),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(GeoError::MissingCredentials);
            }
            status if !status.is_success() => {
                return Err(GeoError::Provider(format!("unexpected status {status}")));
            }
            _ => {}
        }

        let hits: Vec<SearchHit> = response
            .json()
            .await
            .map_err(|err| GeoError::Provider(format!("invalid response body: {err}")))?;

        let hit = hits
            .into_iter()
            .next()
            .ok_or_else(|| GeoError::NoResults(place.to_string()))?;

        let lat = hit
            .lat
            .parse::<f64>()
            .map_err(|err| GeoError::Provider(format!("invalid latitude {:?}: {err}", hit.lat)))?;
        let lng = hit
            .lon
            .parse::<f64>()
            .map_err(|err| GeoError::Provider(format!("invalid longitude {:?}: {err}", hit.lon)))?;

        Ok(GeoPoint { lat, lng })
    }
}
