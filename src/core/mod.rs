pub mod allocator;
pub mod distance;
pub mod drain;
pub mod geocoder;
pub mod processor;
pub mod scheduler;

pub use crate::domain::model::{AllocationOutcome, BloodRequest, Branch, Coordinate, Donor, DonorDebit};
pub use crate::domain::ports::{Delivery, Geocoder, InventoryStore, MessageQueue, Notifier};
pub use crate::utils::error::Result;
