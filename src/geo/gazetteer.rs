use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::geo::{GeoError, GeoProvider};
use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Default)]
pub struct Gazetteer {
    places: HashMap<String, GeoPoint>,
}

impl Gazetteer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_place(mut self, name: &str, point: GeoPoint) -> Self {
        self.insert(name, point);
        self
    }

    pub fn insert(&mut self, name: &str, point: GeoPoint) {
        self.places.insert(normalize(name), point);
    }

    pub fn from_json_file(path: &Path) -> Result<Self, GeoError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| GeoError::Provider(format!("failed to read {}: {err}", path.display())))?;
        let entries: HashMap<String, GeoPoint> = serde_json::from_str(&raw)
            .map_err(|err| GeoError::Provider(format!("invalid gazetteer {}: {err}", path.display())))?;

        let mut gazetteer = Self::new();
        for (name, point) in entries {
            gazetteer.insert(&name, point);
        }

        Ok(gazetteer)
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

#[async_trait]
impl GeoProvider for Gazetteer {
    async fn geocode(&self, place: &str) -> Result<GeoPoint, GeoError> {
        let key = normalize(place);
        if key.is_empty() {
            return Err(GeoError::EmptyQuery);
        }

        self.places
            .get(&key)
            .copied()
            .ok_or_else(|| GeoError::NoResults(place.to_string()))
    }
}
