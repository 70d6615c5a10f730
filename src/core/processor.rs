//! Request lifecycle.
//!
//! ```text
//! received ──► geocoding ──► searching ──► fulfilled
//!    │             │             ├───────► retrying   (budget left)
//!    │             │             ├───────► expired    (budget spent)
//!    │             └─────────────┴───────► failed
//!    └──► duplicate (already processed)
//! ```
//!
//! [`transition`] is the whole decision table; [`RequestProcessor`] only
//! performs the effects it asks for.

use crate::core::allocator;
use crate::core::distance::haversine_km;
use crate::core::geocoder::BranchLocator;
use crate::domain::model::{AllocationOutcome, BloodRequest, Branch, BranchId, Coordinate};
use crate::domain::ports::{Geocoder, InventoryStore};
use crate::utils::error::{BloodSearchError, Result};
use crate::utils::timeout::with_timeout;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_MAX_DISTANCE_KM: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Geocoding,
    Searching,
    Fulfilled,
    Retrying,
    Expired,
    Duplicate,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Received | Self::Geocoding | Self::Searching)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Geocoding => "geocoding",
            Self::Searching => "searching",
            Self::Fulfilled => "fulfilled",
            Self::Retrying => "retrying",
            Self::Expired => "expired",
            Self::Duplicate => "duplicate",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of walking the branch list.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Fulfilled { branch_id: BranchId, distance_km: f64 },
    Insufficient { branch_id: BranchId, distance_km: f64 },
    /// The in-range branch was tried but allocation errored.
    AllocationFailed { branch_id: BranchId },
    NoBranchInRange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Started,
    Geocoded(Coordinate),
    Searched(SearchOutcome),
    Aborted(String),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => f.write_str("started"),
            Self::Geocoded(_) => f.write_str("geocoded"),
            Self::Searched(_) => f.write_str("searched"),
            Self::Aborted(reason) => write!(f, "aborted ({})", reason),
        }
    }
}

/// What to do with the queue message once the request is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the message; nothing else.
    Acknowledge,
    /// Send the confirmation to `request.email`, then remove the message.
    NotifyAndAcknowledge(BloodRequest),
    /// Publish `request` as a new message, then remove the original.
    Requeue(BloodRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    GeocodeRequester,
    SearchBranches(Coordinate),
    Finish(Disposition),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: RequestState,
    pub effect: Effect,
}

impl Transition {
    fn to(next: RequestState, effect: Effect) -> Self {
        Self { next, effect }
    }
}

pub fn transition(state: RequestState, request: &BloodRequest, outcome: &Outcome) -> Result<Transition> {
    use RequestState::*;

    let step = match (state, outcome) {
        (Received, Outcome::Started) if request.processed => {
            Transition::to(Duplicate, Effect::Finish(Disposition::Acknowledge))
        }
        (Received, Outcome::Started) => Transition::to(Geocoding, Effect::GeocodeRequester),
        (Geocoding, Outcome::Geocoded(origin)) => Transition::to(Searching, Effect::SearchBranches(*origin)),
        (Searching, Outcome::Searched(SearchOutcome::Fulfilled { .. })) => Transition::to(
            Fulfilled,
            Effect::Finish(Disposition::NotifyAndAcknowledge(request.mark_processed())),
        ),
        (Searching, Outcome::Searched(_)) if request.duration > 0 => {
            Transition::to(Retrying, Effect::Finish(Disposition::Requeue(request.retried())))
        }
        (Searching, Outcome::Searched(_)) => Transition::to(Expired, Effect::Finish(Disposition::Acknowledge)),
        (Geocoding | Searching, Outcome::Aborted(_)) => {
            Transition::to(Failed, Effect::Finish(Disposition::Acknowledge))
        }
        _ => {
            return Err(BloodSearchError::InvalidTransition {
                state: state.to_string(),
                outcome: outcome.to_string(),
            })
        }
    };
    Ok(step)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub state: RequestState,
    pub disposition: Disposition,
}

pub struct RequestProcessor<S: InventoryStore, G: Geocoder> {
    store: S,
    locator: BranchLocator<G>,
    max_distance_km: f64,
    call_timeout: Duration,
}

impl<S: InventoryStore, G: Geocoder> RequestProcessor<S, G> {
    pub fn new(store: S, locator: BranchLocator<G>, max_distance_km: f64, call_timeout: Duration) -> Self {
        Self {
            store,
            locator,
            max_distance_km,
            call_timeout,
        }
    }

    /// Drives one request from `received` to a terminal state.
    pub async fn process(&self, request: &BloodRequest) -> Resolution {
        let mut state = RequestState::Received;
        let mut outcome = Outcome::Started;

        loop {
            let step = match transition(state, request, &outcome) {
                Ok(step) => step,
                Err(e) => {
                    tracing::error!(error = %e, "Request state machine stuck, dropping request");
                    return Resolution {
                        state: RequestState::Failed,
                        disposition: Disposition::Acknowledge,
                    };
                }
            };
            tracing::debug!(from = %state, to = %step.next, "Request transition");
            state = step.next;

            outcome = match step.effect {
                Effect::GeocodeRequester => match self.geocode_requester(request).await {
                    Ok(origin) => Outcome::Geocoded(origin),
                    Err(e) => {
                        tracing::warn!(
                            city = %request.selected_city,
                            town = %request.selected_town,
                            error = %e,
                            "Could not geocode requester"
                        );
                        Outcome::Aborted(e.to_string())
                    }
                },
                Effect::SearchBranches(origin) => match self.search(request, origin).await {
                    Ok(found) => Outcome::Searched(found),
                    Err(e) => {
                        tracing::error!(error = %e, "Branch search aborted");
                        Outcome::Aborted(e.to_string())
                    }
                },
                Effect::Finish(disposition) => return Resolution { state, disposition },
            };
        }
    }

    async fn geocode_requester(&self, request: &BloodRequest) -> Result<Coordinate> {
        with_timeout(
            "geocode requester",
            self.call_timeout,
            self.locator
                .locate_requester(&request.selected_city, &request.selected_town),
        )
        .await
    }

    /// Walks branches in storage order and allocates from the first one in
    /// range. Later branches are never looked at, even if the first one
    /// comes up short.
    pub async fn search(&self, request: &BloodRequest, origin: Coordinate) -> Result<SearchOutcome> {
        let branches = with_timeout("list branches", self.call_timeout, self.store.list_branches()).await?;
        if branches.is_empty() {
            tracing::warn!("No branches found");
        }
        self.locator.retain_branches(&branches).await;

        for branch in &branches {
            let distance_km = match self.distance_to(branch, origin).await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(
                        branch_id = branch.id,
                        city = %branch.city,
                        town = %branch.town,
                        error = %e,
                        "Error processing branch, skipping"
                    );
                    continue;
                }
            };

            if distance_km >= self.max_distance_km {
                tracing::debug!(branch_id = branch.id, distance_km, "No match at branch");
                continue;
            }

            tracing::info!(
                branch_id = branch.id,
                city = %branch.city,
                town = %branch.town,
                distance_km,
                "Found a branch in range"
            );

            let allocation = allocator::allocate(
                &self.store,
                branch.id,
                &request.blood_type,
                request.units,
                self.call_timeout,
            )
            .await;

            return Ok(match allocation {
                Ok(AllocationOutcome::Fulfilled) => SearchOutcome::Fulfilled {
                    branch_id: branch.id,
                    distance_km,
                },
                Ok(AllocationOutcome::Insufficient) => SearchOutcome::Insufficient {
                    branch_id: branch.id,
                    distance_km,
                },
                Err(e) => {
                    tracing::error!(branch_id = branch.id, error = %e, "Error searching blood");
                    SearchOutcome::AllocationFailed { branch_id: branch.id }
                }
            });
        }

        Ok(SearchOutcome::NoBranchInRange)
    }

    async fn distance_to(&self, branch: &Branch, origin: Coordinate) -> Result<f64> {
        let location = with_timeout("geocode branch", self.call_timeout, self.locator.locate_branch(branch)).await?;
        Ok(haversine_km(origin, location))
    }
}
