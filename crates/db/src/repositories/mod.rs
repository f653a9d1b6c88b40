use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use accolade_core::domain::employee::{EmployeeId, EmployeeProfile};
use accolade_core::domain::nomination::{
    FinalizationRecord, Nomination, NominationId, PopulatedNomination, Vote, VoterId,
};
use accolade_core::domain::period::{PeriodWindow, WinnerScope};

pub mod employee;
pub mod memory;
pub mod nomination;

pub use employee::SqlEmployeeRepository;
pub use memory::InMemoryRecognitionStore;
pub use nomination::SqlNominationRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
}

impl RepositoryError {
    /// Whether the failure came from contention with another writer and the
    /// operation can be attempted again unchanged.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Database(sqlx::Error::Database(error)) => {
                matches!(error.code().as_deref(), Some("5" | "6" | "517" | "262"))
                    || error.message().contains("database is locked")
            }
            _ => false,
        }
    }
}

/// Reference population applied when reading nominations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Populate {
    #[default]
    None,
    /// Join the nominated employee with avatar, department and position.
    Employee,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NominationSort {
    /// Oldest nomination first, ties broken by id.
    #[default]
    NominationDateAsc,
    /// Most recently finalized first, ties broken by id.
    FinalizationDateDesc,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NominationFilter {
    pub is_winner: Option<bool>,
    pub finalized: Option<bool>,
    pub employee_id: Option<EmployeeId>,
    pub nominated_within: Option<PeriodWindow>,
    pub finalized_within: Option<PeriodWindow>,
    /// Whether the nomination appears in the finalization log, including retracted winners.
    pub ever_finalized: Option<bool>,
}

impl NominationFilter {
    /// Checks the row-local criteria. `ever_finalized` needs the finalization log and is
    /// applied by each store.
    pub fn matches(&self, nomination: &Nomination) -> bool {
        if self.is_winner.is_some_and(|winner| winner != nomination.is_winner) {
            return false;
        }
        if self
            .finalized
            .is_some_and(|finalized| finalized != nomination.finalization_date.is_some())
        {
            return false;
        }
        if self.employee_id.as_ref().is_some_and(|employee| *employee != nomination.employee_id) {
            return false;
        }
        if self.nominated_within.is_some_and(|window| !window.contains(nomination.nomination_date))
        {
            return false;
        }
        if let Some(window) = self.finalized_within {
            match nomination.finalization_date {
                Some(at) if window.contains(at) => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NominationQuery {
    pub filter: NominationFilter,
    pub sort: NominationSort,
    pub limit: Option<u32>,
    pub populate: Populate,
}

impl NominationQuery {
    pub fn new(filter: NominationFilter) -> Self {
        Self { filter, ..Self::default() }
    }

    pub fn sorted_by(mut self, sort: NominationSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn populate(mut self, populate: Populate) -> Self {
        self.populate = populate;
        self
    }
}

/// Result of promoting a nomination to winner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalizationOutcome {
    pub nomination: Nomination,
    pub record: FinalizationRecord,
}

#[async_trait]
pub trait NominationRepository: Send + Sync {
    /// Stores a new nomination. Fails with [`RepositoryError::Constraint`] when the
    /// employee reference does not resolve.
    async fn create(&self, nomination: &Nomination) -> Result<(), RepositoryError>;

    async fn find_by_id(
        &self,
        id: &NominationId,
        populate: Populate,
    ) -> Result<Option<PopulatedNomination>, RepositoryError>;

    /// Atomically inserts or replaces the voter's ballot. `None` when the nomination
    /// does not exist.
    async fn upsert_vote(
        &self,
        id: &NominationId,
        vote: Vote,
    ) -> Result<Option<Nomination>, RepositoryError>;

    async fn find_vote(
        &self,
        id: &NominationId,
        voter: &VoterId,
    ) -> Result<Option<Vote>, RepositoryError>;

    /// Signed sum of ballot values. `None` when the nomination does not exist.
    async fn tally(&self, id: &NominationId) -> Result<Option<i64>, RepositoryError>;

    /// Marks `id` as winner and retracts the standing winners within `scope` as one
    /// atomic unit. Returns `None` when the nomination does not exist; a global scope
    /// still clears every standing winner in that case, a cycle scope changes nothing.
    async fn finalize(
        &self,
        id: &NominationId,
        scope: WinnerScope,
        at: DateTime<Utc>,
    ) -> Result<Option<FinalizationOutcome>, RepositoryError>;

    async fn query(
        &self,
        query: &NominationQuery,
    ) -> Result<Vec<PopulatedNomination>, RepositoryError>;

    /// Most recent finalizations first.
    async fn finalization_history(
        &self,
        limit: u32,
    ) -> Result<Vec<FinalizationRecord>, RepositoryError>;
}

#[async_trait]
pub trait EmployeeRepository: Send + Sync {
    async fn find_by_id(&self, id: &EmployeeId)
        -> Result<Option<EmployeeProfile>, RepositoryError>;
    async fn save(&self, employee: EmployeeProfile) -> Result<(), RepositoryError>;
}

pub(crate) fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp `{raw}`: {error}")))
}

#[cfg(test)]
mod tests {
    use accolade_core::chrono::{Duration, TimeZone, Utc};
    use accolade_core::domain::employee::EmployeeId;
    use accolade_core::domain::nomination::{MetricSnapshot, Nomination};
    use accolade_core::domain::period::PeriodWindow;

    use super::{decode_timestamp, encode_timestamp, NominationFilter, RepositoryError};

    #[test]
    fn encoded_timestamps_sort_chronologically() {
        let base = Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).single().expect("valid time");
        let earlier = encode_timestamp(base + Duration::microseconds(9));
        let later = encode_timestamp(base + Duration::microseconds(120));

        assert_eq!(earlier, "2026-02-03T04:05:06.000009Z");
        assert!(earlier < later);
        assert_eq!(decode_timestamp(&later).expect("decode"), base + Duration::microseconds(120));
    }

    #[test]
    fn malformed_timestamp_is_a_decode_error() {
        assert!(matches!(decode_timestamp("yesterday"), Err(RepositoryError::Decode(_))));
    }

    #[test]
    fn filter_requires_finalization_inside_window() {
        let now = Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).single().expect("valid time");
        let mut nomination = Nomination::open(
            EmployeeId("emp-1".to_string()),
            MetricSnapshot::default(),
            "",
            now - Duration::days(3),
        );
        let filter = NominationFilter {
            is_winner: Some(true),
            finalized_within: Some(PeriodWindow::trailing_days(now, 31)),
            ..NominationFilter::default()
        };

        assert!(!filter.matches(&nomination));

        nomination.mark_winner(now - Duration::days(40));
        assert!(!filter.matches(&nomination));

        nomination.mark_winner(now - Duration::days(1));
        assert!(filter.matches(&nomination));
    }

    #[test]
    fn lock_contention_is_classified_as_conflict() {
        assert!(RepositoryError::Conflict("version moved".to_string()).is_conflict());
        assert!(!RepositoryError::Constraint("unknown employee".to_string()).is_conflict());
        assert!(!RepositoryError::Database(sqlx::Error::PoolTimedOut).is_conflict());
    }
}
