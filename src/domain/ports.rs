use crate::domain::model::{Branch, BranchId, Coordinate, Donor, DonorDebit};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Read access to branches and donors plus atomic application of debits.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// All branches in storage order.
    async fn list_branches(&self) -> Result<Vec<Branch>>;

    async fn list_donors(&self, branch_id: BranchId, blood_type: &str) -> Result<Vec<Donor>>;

    /// Applies every debit or none of them. Each debit only lands if the
    /// donor still holds `previous_units`; returns `false` (and changes
    /// nothing) when any row moved underneath.
    async fn apply_debits(&self, debits: &[DonorDebit]) -> Result<bool>;
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, city: &str, district: &str) -> Result<Coordinate>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub payload: Vec<u8>,
}

/// A durable work queue with manual acknowledgement.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Messages ready for delivery.
    async fn depth(&self) -> Result<u32>;

    /// Next message, unacknowledged, or `None` when the queue is empty.
    async fn fetch(&self) -> Result<Option<Delivery>>;

    async fn ack(&self, tag: u64) -> Result<()>;

    /// Hands the delivery back to the broker for redelivery.
    async fn requeue(&self, tag: u64) -> Result<()>;

    async fn publish(&self, payload: &[u8]) -> Result<()>;

    /// Drops every ready message, returning how many were removed.
    async fn purge(&self) -> Result<u32>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

#[async_trait]
impl<T: Notifier + ?Sized> Notifier for Box<T> {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        (**self).send(to, subject, body).await
    }
}
