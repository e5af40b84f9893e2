//! Route marker tables and the waypoint data service

use std::collections::HashMap;
use std::path::Path;

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::error::RouteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    /// Turn the navigation pointer
    Direction,
    /// Arrived at a named destination on the way
    Destination,
    /// Last marker of the route
    End,
}

/// One waypoint, keyed by the code printed on the physical marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub id: String,
    #[serde(alias = "type")]
    pub kind: MarkerKind,
    #[serde(default, alias = "rotation")]
    pub rotation_degrees: f32,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Markers of one route indexed by id
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    name: String,
    markers: HashMap<String, MarkerRecord>,
}

impl RouteTable {
    pub fn from_records(name: impl Into<String>, records: Vec<MarkerRecord>) -> Self {
        let markers = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Self {
            name: name.into(),
            markers,
        }
    }

    pub fn from_json(name: impl Into<String>, json: &str) -> Result<Self, RouteError> {
        let records: Vec<MarkerRecord> = serde_json::from_str(json)?;
        Ok(Self::from_records(name, records))
    }

    /// Load a route saved as a JSON array; the route is named after the file stem.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RouteError> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let json = std::fs::read_to_string(path)?;
        Self::from_json(name, &json)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, code: &str) -> Option<&MarkerRecord> {
        self.markers.get(code)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

/// HTTP client for `GET {base}/get-points/{route}/`
#[derive(Debug, Clone)]
pub struct WaypointClient {
    base_url: String,
    http: reqwest::Client,
}

impl WaypointClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn url_for(&self, route: &str) -> String {
        format!("{}/get-points/{}/", self.base_url, route)
    }

    #[instrument(skip(self))]
    pub async fn download(&self, route: &str) -> Result<RouteTable, RouteError> {
        if route.is_empty() {
            return Err(RouteError::MissingRouteName);
        }

        let url = self.url_for(route);
        info!("Downloading waypoints from {}", url);

        let response = self
            .http
            .get(&url)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| {
                error!("Error loading waypoints: {}", e);
                RouteError::NoServerResponse(Some(e))
            })?;

        check_status(response.status(), route)?;

        let body = response
            .text()
            .await
            .map_err(|e| RouteError::NoServerResponse(Some(e)))?;
        let table = RouteTable::from_json(route, &body)?;
        info!("Route {} loaded with {} markers", route, table.len());
        Ok(table)
    }
}

fn check_status(status: StatusCode, route: &str) -> Result<(), RouteError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::NOT_FOUND {
        Err(RouteError::RouteNotFound(route.to_string()))
    } else {
        Err(RouteError::NoServerResponse(None))
    }
}
