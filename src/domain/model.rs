use serde::{Deserialize, Serialize};

pub type BranchId = i64;
pub type DonorId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Branch {
    #[sqlx(rename = "idbranch")]
    pub id: BranchId,
    pub city: String,
    pub town: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Donor {
    #[sqlx(rename = "iddonor")]
    pub id: DonorId,
    pub branch_id: BranchId,
    pub blood_type: String,
    #[sqlx(rename = "units_of_blood")]
    pub units_available: i64,
}

/// Degrees, WGS84.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A blood request as it travels on the queue.
///
/// `duration` is the remaining retry budget, counted in scheduled runs.
/// `processed` is set once the request reaches a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BloodRequest {
    pub selected_city: String,
    pub selected_town: String,
    pub blood_type: String,
    pub units: u32,
    pub duration: u32,
    pub email: String,
    #[serde(default)]
    pub processed: bool,
}

impl BloodRequest {
    pub fn from_json(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Copy for the next queue cycle with one less retry.
    pub fn retried(&self) -> Self {
        Self {
            duration: self.duration.saturating_sub(1),
            ..self.clone()
        }
    }

    pub fn mark_processed(&self) -> Self {
        Self {
            processed: true,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationOutcome {
    Fulfilled,
    Insufficient,
}

/// One donor row change produced by the allocation walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DonorDebit {
    pub donor_id: DonorId,
    pub previous_units: i64,
    pub new_units: i64,
}

impl DonorDebit {
    pub fn consumed(&self) -> i64 {
        self.previous_units - self.new_units
    }
}
