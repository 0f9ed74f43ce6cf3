// src/api/types.rs
use crate::proxy::{BackendSnapshot, HealthStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    pub id: String,
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServerRequest {
    pub weight: Option<u32>,
    pub health_status: Option<HealthStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AlgorithmBody {
    pub algorithm: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsView {
    pub total_requests: u64,
    pub requests_per_second: f64,
    pub backends: Vec<BackendSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
