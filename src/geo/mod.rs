pub mod gazetteer;
pub mod nominatim;

use async_trait::async_trait;
use mockall::automock;
use thiserror::Error;
use tracing::warn;

use crate::models::driver::GeoPoint;

pub use gazetteer::Gazetteer;
pub use nominatim::NominatimGeocoder;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeoError {
    #[error("place name cannot be empty")]
    EmptyQuery,

    #[error("geocoding provider credentials are not configured")]
    MissingCredentials,

    #[error("geocoding quota exhausted")]
    QuotaExceeded,

    #[error("no results for {0:?}")]
    NoResults(String),

    #[error("geocoding provider error: {0}")]
    Provider(String),
}

#[automock]
#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn geocode(&self, place: &str) -> Result<GeoPoint, GeoError>;

    async fn distance_km(&self, from: &GeoPoint, to: &GeoPoint) -> Result<f64, GeoError> {
        Ok(haversine_km(from, to))
    }
}

pub struct FallbackGeocoder {
    primary: Box<dyn GeoProvider>,
    fallback: Box<dyn GeoProvider>,
}

impl FallbackGeocoder {
    pub fn new(primary: Box<dyn GeoProvider>, fallback: Box<dyn GeoProvider>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl GeoProvider for FallbackGeocoder {
    async fn geocode(&self, place: &str) -> Result<GeoPoint, GeoError> {
        if place.trim().is_empty() {
            return Err(GeoError::EmptyQuery);
        }

        match self.primary.geocode(place).await {
            Ok(point) => Ok(point),
            Err(err) => {
                warn!(place, error = %err, "primary geocoder failed; trying fallback");
                self.fallback.geocode(place).await
            }
        }
    }

    async fn distance_km(&self, from: &GeoPoint, to: &GeoPoint) -> Result<f64, GeoError> {
        match self.primary.distance_km(from, to).await {
            Ok(km) => Ok(km),
            Err(err) => {
                warn!(error = %err, "primary distance lookup failed; trying fallback");
                self.fallback.distance_km(from, to).await
            }
        }
    }
}
