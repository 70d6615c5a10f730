//! Greedy donor allocation.
//!
//! Donors are drained smallest balance first. A donor that can cover what is
//! still owed absorbs the whole remainder and the walk stops; any smaller
//! donor is zeroed. Planning is pure; the store applies the resulting debits
//! as one check-and-set batch, and the allocation is re-planned when another
//! writer touched the same rows in between.

use crate::domain::model::{AllocationOutcome, BranchId, Donor, DonorDebit};
use crate::domain::ports::InventoryStore;
use crate::utils::error::{BloodSearchError, Result};
use crate::utils::timeout::with_timeout;
use std::time::Duration;

pub const MAX_ALLOCATION_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationPlan {
    Insufficient { available: i64 },
    Debits(Vec<DonorDebit>),
}

pub fn plan_allocation(donors: &[Donor], requested: i64) -> AllocationPlan {
    let available: i64 = donors.iter().map(|d| d.units_available.max(0)).sum();
    if available < requested {
        return AllocationPlan::Insufficient { available };
    }

    let mut sorted: Vec<&Donor> = donors.iter().filter(|d| d.units_available > 0).collect();
    sorted.sort_by_key(|d| d.units_available);

    let mut remaining = requested;
    let mut debits = Vec::new();
    for donor in sorted {
        if remaining <= 0 {
            break;
        }
        if donor.units_available >= remaining {
            debits.push(DonorDebit {
                donor_id: donor.id,
                previous_units: donor.units_available,
                new_units: donor.units_available - remaining,
            });
            remaining = 0;
        } else {
            debits.push(DonorDebit {
                donor_id: donor.id,
                previous_units: donor.units_available,
                new_units: 0,
            });
            remaining -= donor.units_available;
        }
    }

    AllocationPlan::Debits(debits)
}

/// Allocates `units` of `blood_type` from `branch_id`'s donors.
///
/// Donor reads run under `read_timeout`. Applying debits does not: once a
/// batch is handed to the store it runs to completion, so a commit is never
/// reported as failed after it landed. The store bounds it with its own
/// connection and lock timeouts.
pub async fn allocate<S>(
    store: &S,
    branch_id: BranchId,
    blood_type: &str,
    units: u32,
    read_timeout: Duration,
) -> Result<AllocationOutcome>
where
    S: InventoryStore + ?Sized,
{
    let requested = i64::from(units);

    for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
        let donors = with_timeout("list donors", read_timeout, store.list_donors(branch_id, blood_type)).await?;
        tracing::debug!(
            branch_id,
            blood_type,
            donors = donors.len(),
            attempt,
            "Loaded donors for allocation"
        );

        let debits = match plan_allocation(&donors, requested) {
            AllocationPlan::Insufficient { available } => {
                tracing::info!(
                    branch_id,
                    blood_type,
                    requested,
                    available,
                    "Not enough blood units available"
                );
                return Ok(AllocationOutcome::Insufficient);
            }
            AllocationPlan::Debits(debits) => debits,
        };

        if debits.is_empty() || store.apply_debits(&debits).await? {
            for debit in &debits {
                tracing::debug!(
                    donor_id = debit.donor_id,
                    consumed = debit.consumed(),
                    remaining = debit.new_units,
                    "Updated donor"
                );
            }
            tracing::info!(branch_id, blood_type, requested, "Allocated blood units");
            return Ok(AllocationOutcome::Fulfilled);
        }

        tracing::warn!(branch_id, attempt, "Donor balances changed during allocation, re-planning");
    }

    Err(BloodSearchError::ConcurrentModification { branch_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryStore;
    use crate::domain::model::Branch;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn donor(id: i64, units: i64) -> Donor {
        Donor {
            id,
            branch_id: 1,
            blood_type: "O+".to_string(),
            units_available: units,
        }
    }

    fn debits_of(plan: AllocationPlan) -> Vec<DonorDebit> {
        match plan {
            AllocationPlan::Debits(debits) => debits,
            other => panic!("expected debits, got {:?}", other),
        }
    }

    #[test]
    fn test_small_donor_drained_before_larger() {
        let donors = vec![donor(1, 2), donor(2, 5)];
        let debits = debits_of(plan_allocation(&donors, 4));

        assert_eq!(
            debits,
            vec![
                DonorDebit {
                    donor_id: 1,
                    previous_units: 2,
                    new_units: 0
                },
                DonorDebit {
                    donor_id: 2,
                    previous_units: 5,
                    new_units: 3
                },
            ]
        );
        assert_eq!(debits.iter().map(DonorDebit::consumed).sum::<i64>(), 4);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let donors = vec![donor(2, 5), donor(3, 1), donor(1, 2)];
        let debits = debits_of(plan_allocation(&donors, 6));

        let touched: Vec<i64> = debits.iter().map(|d| d.donor_id).collect();
        assert_eq!(touched, vec![3, 1, 2]);
        assert_eq!(debits[2].new_units, 2);
    }

    #[test]
    fn test_single_donor_absorbs_remainder() {
        let donors = vec![donor(1, 10), donor(2, 20)];
        let debits = debits_of(plan_allocation(&donors, 3));

        assert_eq!(debits.len(), 1);
        assert_eq!(debits[0].donor_id, 1);
        assert_eq!(debits[0].new_units, 7);
    }

    #[test]
    fn test_insufficient_plan() {
        let donors = vec![donor(1, 2), donor(2, 1)];
        assert_eq!(plan_allocation(&donors, 4), AllocationPlan::Insufficient { available: 3 });
        assert_eq!(plan_allocation(&[], 1), AllocationPlan::Insufficient { available: 0 });
    }

    #[test]
    fn test_exact_total_zeroes_everyone() {
        let donors = vec![donor(1, 2), donor(2, 3)];
        let debits = debits_of(plan_allocation(&donors, 5));
        assert!(debits.iter().all(|d| d.new_units == 0));
    }

    #[test]
    fn test_conservation_across_many_donor_sets() {
        let sets: Vec<Vec<i64>> = vec![
            vec![1],
            vec![4, 4, 4],
            vec![9, 1, 3, 0, 7],
            vec![2, 2, 2, 2, 2, 2],
            vec![100, 1, 50],
            vec![0, 0, 6],
        ];

        for balances in sets {
            let donors: Vec<Donor> = balances
                .iter()
                .enumerate()
                .map(|(i, &u)| donor(i as i64 + 1, u))
                .collect();
            let total: i64 = balances.iter().sum();

            for requested in 0..=total + 1 {
                match plan_allocation(&donors, requested) {
                    AllocationPlan::Insufficient { available } => {
                        assert!(requested > total);
                        assert_eq!(available, total);
                    }
                    AllocationPlan::Debits(debits) => {
                        assert!(requested <= total);
                        let consumed: i64 = debits.iter().map(DonorDebit::consumed).sum();
                        assert_eq!(consumed, requested, "balances {:?}", balances);
                        assert!(debits.iter().all(|d| d.new_units >= 0));
                        assert!(debits.iter().all(|d| d.new_units < d.previous_units));
                    }
                }
            }
        }
    }

    fn seeded_store(balances: &[i64]) -> InMemoryStore {
        let branches = vec![Branch {
            id: 1,
            city: "A".to_string(),
            town: "X".to_string(),
        }];
        let donors = balances
            .iter()
            .enumerate()
            .map(|(i, &u)| donor(i as i64 + 1, u))
            .collect();
        InMemoryStore::new(branches, donors)
    }

    #[tokio::test]
    async fn test_allocate_updates_store() {
        let store = seeded_store(&[2, 5]);

        let outcome = allocate(&store, 1, "O+", 4, TIMEOUT).await.unwrap();

        assert_eq!(outcome, AllocationOutcome::Fulfilled);
        assert_eq!(store.units_of(1).await, Some(0));
        assert_eq!(store.units_of(2).await, Some(3));
        assert_eq!(store.total_units(1, "O+").await, 3);
    }

    #[tokio::test]
    async fn test_allocate_insufficient_leaves_store_untouched() {
        let store = seeded_store(&[2, 1]);

        let outcome = allocate(&store, 1, "O+", 4, TIMEOUT).await.unwrap();

        assert_eq!(outcome, AllocationOutcome::Insufficient);
        assert_eq!(store.units_of(1).await, Some(2));
        assert_eq!(store.units_of(2).await, Some(1));
    }

    #[tokio::test]
    async fn test_allocate_ignores_other_blood_types() {
        let store = seeded_store(&[5]);
        let outcome = allocate(&store, 1, "AB-", 1, TIMEOUT).await.unwrap();
        assert_eq!(outcome, AllocationOutcome::Insufficient);
        assert_eq!(store.units_of(1).await, Some(5));
    }

    /// Lets another writer take one unit from every donor right after the
    /// first read.
    struct RacingStore {
        inner: InMemoryStore,
        races_left: AtomicUsize,
    }

    #[async_trait]
    impl InventoryStore for RacingStore {
        async fn list_branches(&self) -> Result<Vec<Branch>> {
            self.inner.list_branches().await
        }

        async fn list_donors(&self, branch_id: BranchId, blood_type: &str) -> Result<Vec<Donor>> {
            let donors = self.inner.list_donors(branch_id, blood_type).await?;
            if self.races_left.load(Ordering::SeqCst) > 0 {
                self.races_left.fetch_sub(1, Ordering::SeqCst);
                let stolen: Vec<DonorDebit> = donors
                    .iter()
                    .filter(|d| d.units_available > 0)
                    .map(|d| DonorDebit {
                        donor_id: d.id,
                        previous_units: d.units_available,
                        new_units: d.units_available - 1,
                    })
                    .collect();
                assert!(self.inner.apply_debits(&stolen).await?);
            }
            Ok(donors)
        }

        async fn apply_debits(&self, debits: &[DonorDebit]) -> Result<bool> {
            self.inner.apply_debits(debits).await
        }
    }

    #[tokio::test]
    async fn test_allocate_replans_after_concurrent_write() {
        let store = RacingStore {
            inner: seeded_store(&[3, 5]),
            races_left: AtomicUsize::new(1),
        };

        let outcome = allocate(&store, 1, "O+", 4, TIMEOUT).await.unwrap();

        // The racer left [2, 4]; the second plan takes 2 + 2.
        assert_eq!(outcome, AllocationOutcome::Fulfilled);
        assert_eq!(store.inner.units_of(1).await, Some(0));
        assert_eq!(store.inner.units_of(2).await, Some(2));
    }

    #[tokio::test]
    async fn test_allocate_gives_up_after_repeated_conflicts() {
        let store = RacingStore {
            inner: seeded_store(&[10, 10]),
            races_left: AtomicUsize::new(MAX_ALLOCATION_ATTEMPTS),
        };

        let result = allocate(&store, 1, "O+", 4, TIMEOUT).await;

        assert!(matches!(
            result,
            Err(BloodSearchError::ConcurrentModification { branch_id: 1 })
        ));
        // Only the racer's writes landed.
        assert_eq!(store.inner.total_units(1, "O+").await, 20 - 2 * MAX_ALLOCATION_ATTEMPTS as i64);
    }

    /// Donor reads hang or debits are slow, depending on the field set.
    struct SlowStore {
        inner: InMemoryStore,
        read_delay: Duration,
        write_delay: Duration,
    }

    #[async_trait]
    impl InventoryStore for SlowStore {
        async fn list_branches(&self) -> Result<Vec<Branch>> {
            self.inner.list_branches().await
        }

        async fn list_donors(&self, branch_id: BranchId, blood_type: &str) -> Result<Vec<Donor>> {
            tokio::time::sleep(self.read_delay).await;
            self.inner.list_donors(branch_id, blood_type).await
        }

        async fn apply_debits(&self, debits: &[DonorDebit]) -> Result<bool> {
            tokio::time::sleep(self.write_delay).await;
            self.inner.apply_debits(debits).await
        }
    }

    #[tokio::test]
    async fn test_slow_debit_commit_is_not_cut_off() {
        let store = SlowStore {
            inner: seeded_store(&[2, 5]),
            read_delay: Duration::ZERO,
            write_delay: Duration::from_millis(200),
        };

        let outcome = allocate(&store, 1, "O+", 4, Duration::from_millis(20)).await.unwrap();

        assert_eq!(outcome, AllocationOutcome::Fulfilled);
        assert_eq!(store.inner.units_of(1).await, Some(0));
        assert_eq!(store.inner.units_of(2).await, Some(3));
    }

    #[tokio::test]
    async fn test_hanging_donor_read_times_out_without_debits() {
        let store = SlowStore {
            inner: seeded_store(&[2, 5]),
            read_delay: Duration::from_secs(10),
            write_delay: Duration::ZERO,
        };

        let result = allocate(&store, 1, "O+", 4, Duration::from_millis(20)).await;

        assert!(matches!(result, Err(BloodSearchError::Timeout { .. })));
        assert_eq!(store.inner.total_units(1, "O+").await, 7);
    }
}
