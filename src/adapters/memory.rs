//! In-process implementations of the ports. They back the test suites and
//! local dry runs where no database, broker or provider is available.

use crate::domain::model::{Branch, BranchId, Coordinate, Donor, DonorDebit};
use crate::domain::ports::{Delivery, Geocoder, InventoryStore, MessageQueue, Notifier};
use crate::utils::error::{BloodSearchError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
pub struct InMemoryStore {
    branches: Arc<Vec<Branch>>,
    donors: Arc<Mutex<Vec<Donor>>>,
    donor_queries: Arc<Mutex<Vec<BranchId>>>,
}

impl InMemoryStore {
    pub fn new(branches: Vec<Branch>, donors: Vec<Donor>) -> Self {
        Self {
            branches: Arc::new(branches),
            donors: Arc::new(Mutex::new(donors)),
            donor_queries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn units_of(&self, donor_id: i64) -> Option<i64> {
        let donors = self.donors.lock().await;
        donors.iter().find(|d| d.id == donor_id).map(|d| d.units_available)
    }

    pub async fn total_units(&self, branch_id: BranchId, blood_type: &str) -> i64 {
        let donors = self.donors.lock().await;
        donors
            .iter()
            .filter(|d| d.branch_id == branch_id && d.blood_type == blood_type)
            .map(|d| d.units_available)
            .sum()
    }

    /// Branches whose donors have been queried, in query order.
    pub async fn donor_queries(&self) -> Vec<BranchId> {
        self.donor_queries.lock().await.clone()
    }
}

#[async_trait]
impl InventoryStore for InMemoryStore {
    async fn list_branches(&self) -> Result<Vec<Branch>> {
        Ok(self.branches.as_ref().clone())
    }

    async fn list_donors(&self, branch_id: BranchId, blood_type: &str) -> Result<Vec<Donor>> {
        self.donor_queries.lock().await.push(branch_id);
        let donors = self.donors.lock().await;
        Ok(donors
            .iter()
            .filter(|d| d.branch_id == branch_id && d.blood_type == blood_type)
            .cloned()
            .collect())
    }

    async fn apply_debits(&self, debits: &[DonorDebit]) -> Result<bool> {
        let mut donors = self.donors.lock().await;

        let current_matches = debits.iter().all(|debit| {
            donors
                .iter()
                .any(|d| d.id == debit.donor_id && d.units_available == debit.previous_units)
        });
        if !current_matches {
            return Ok(false);
        }

        for debit in debits {
            if let Some(donor) = donors.iter_mut().find(|d| d.id == debit.donor_id) {
                donor.units_available = debit.new_units;
            }
        }
        Ok(true)
    }
}

/// A queue held in memory. Tags are unique per instance; unacknowledged
/// deliveries are tracked until acked or requeued.
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    ready: Arc<Mutex<VecDeque<Vec<u8>>>>,
    unacked: Arc<Mutex<HashMap<u64, Vec<u8>>>>,
    next_tag: Arc<AtomicU64>,
    acked: Arc<AtomicU64>,
    published: Arc<AtomicU64>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues without counting as a publish.
    pub async fn seed(&self, payload: Vec<u8>) {
        self.ready.lock().await.push_back(payload);
    }

    pub async fn ready_messages(&self) -> Vec<Vec<u8>> {
        self.ready.lock().await.iter().cloned().collect()
    }

    pub async fn unacked_count(&self) -> usize {
        self.unacked.lock().await.len()
    }

    pub fn acked_count(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn depth(&self) -> Result<u32> {
        Ok(self.ready.lock().await.len() as u32)
    }

    async fn fetch(&self) -> Result<Option<Delivery>> {
        let Some(payload) = self.ready.lock().await.pop_front() else {
            return Ok(None);
        };
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        self.unacked.lock().await.insert(tag, payload.clone());
        Ok(Some(Delivery { tag, payload }))
    }

    async fn ack(&self, tag: u64) -> Result<()> {
        match self.unacked.lock().await.remove(&tag) {
            Some(_) => {
                self.acked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(BloodSearchError::QueueError {
                message: format!("Unknown delivery tag {}", tag),
            }),
        }
    }

    async fn requeue(&self, tag: u64) -> Result<()> {
        let payload = self.unacked.lock().await.remove(&tag).ok_or_else(|| BloodSearchError::QueueError {
            message: format!("Unknown delivery tag {}", tag),
        })?;
        self.ready.lock().await.push_front(payload);
        Ok(())
    }

    async fn publish(&self, payload: &[u8]) -> Result<()> {
        self.ready.lock().await.push_back(payload.to_vec());
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn purge(&self) -> Result<u32> {
        let mut ready = self.ready.lock().await;
        let count = ready.len() as u32;
        ready.clear();
        Ok(count)
    }
}

/// Resolves from a fixed table and records every lookup.
#[derive(Clone, Default)]
pub struct FixedGeocoder {
    places: Arc<HashMap<(String, String), Coordinate>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl FixedGeocoder {
    pub fn new<I, C, D>(places: I) -> Self
    where
        I: IntoIterator<Item = (C, D, Coordinate)>,
        C: Into<String>,
        D: Into<String>,
    {
        let places = places
            .into_iter()
            .map(|(city, district, coordinate)| ((city.into(), district.into()), coordinate))
            .collect();
        Self {
            places: Arc::new(places),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// `(city, district)` pairs looked up so far.
    pub async fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl Geocoder for FixedGeocoder {
    async fn geocode(&self, city: &str, district: &str) -> Result<Coordinate> {
        self.calls
            .lock()
            .await
            .push((city.to_string(), district.to_string()));
        self.places
            .get(&(city.to_string(), district.to_string()))
            .copied()
            .ok_or_else(|| BloodSearchError::NoResult {
                query: format!("{},{}", district, city),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Keeps notifications instead of sending them. Can be told to fail.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentNotification>>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        if self.fail {
            return Err(BloodSearchError::NotificationError {
                message: "notifier configured to fail".to_string(),
            });
        }
        self.sent.lock().await.push(SentNotification {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
