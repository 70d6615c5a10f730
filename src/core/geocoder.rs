use crate::domain::model::{Branch, BranchId, Coordinate};
use crate::domain::ports::Geocoder;
use crate::utils::error::{BloodSearchError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    lat: f64,
    lng: f64,
}

/// Forward geocoding against an OpenCage-compatible endpoint:
/// `GET {endpoint}?q={district},{city}&key={api_key}`.
pub struct HttpGeocoder {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpGeocoder {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BloodSearchError::ConfigError {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, city: &str, district: &str) -> Result<Coordinate> {
        let (city, district) = (city.trim(), district.trim());
        if city.is_empty() || district.is_empty() {
            return Err(BloodSearchError::InvalidInput {
                message: format!("Invalid city or district: '{}', '{}'", city, district),
            });
        }

        let query = format!("{},{}", district, city);
        tracing::debug!(query = %query, endpoint = %self.endpoint, "Geocoding");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query.as_str()), ("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| BloodSearchError::ProviderError {
                message: format!("Geocoding request failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(BloodSearchError::ProviderError {
                message: format!("Geocoding request failed with status: {}", response.status()),
            });
        }

        let body: GeocodeResponse = response.json().await.map_err(|e| BloodSearchError::ProviderError {
            message: format!("Unreadable geocoding response: {}", e),
        })?;

        let geometry = body
            .results
            .into_iter()
            .next()
            .and_then(|r| r.geometry)
            .ok_or_else(|| BloodSearchError::NoResult { query: query.clone() })?;

        tracing::debug!(query = %query, latitude = geometry.lat, longitude = geometry.lng, "Geocoded");
        Ok(Coordinate::new(geometry.lat, geometry.lng))
    }
}

#[derive(Debug, Clone)]
struct CachedLocation {
    city: String,
    town: String,
    coordinate: Coordinate,
}

/// Geocodes requesters fresh every time and branches through a cache keyed
/// by branch id. An entry is refreshed when the branch's city or town no
/// longer matches what was cached.
pub struct BranchLocator<G: Geocoder> {
    geocoder: G,
    cache: Option<RwLock<HashMap<BranchId, CachedLocation>>>,
}

impl<G: Geocoder> BranchLocator<G> {
    pub fn new(geocoder: G) -> Self {
        Self {
            geocoder,
            cache: Some(RwLock::new(HashMap::new())),
        }
    }

    pub fn uncached(geocoder: G) -> Self {
        Self { geocoder, cache: None }
    }

    pub async fn locate_requester(&self, city: &str, district: &str) -> Result<Coordinate> {
        self.geocoder.geocode(city, district).await
    }

    pub async fn locate_branch(&self, branch: &Branch) -> Result<Coordinate> {
        let Some(cache) = &self.cache else {
            return self.geocoder.geocode(&branch.city, &branch.town).await;
        };

        if let Some(hit) = cache.read().await.get(&branch.id) {
            if hit.city == branch.city && hit.town == branch.town {
                return Ok(hit.coordinate);
            }
            tracing::debug!(branch_id = branch.id, "Branch location changed, refreshing cache");
        }

        let coordinate = self.geocoder.geocode(&branch.city, &branch.town).await?;
        cache.write().await.insert(
            branch.id,
            CachedLocation {
                city: branch.city.clone(),
                town: branch.town.clone(),
                coordinate,
            },
        );
        Ok(coordinate)
    }

    /// Drops cached coordinates for branches that no longer exist.
    pub async fn retain_branches(&self, branches: &[Branch]) {
        if let Some(cache) = &self.cache {
            cache
                .write()
                .await
                .retain(|id, _| branches.iter().any(|b| b.id == *id));
        }
    }

    pub async fn cached_len(&self) -> usize {
        match &self.cache {
            Some(cache) => cache.read().await.len(),
            None => 0,
        }
    }
}
