use std::collections::HashMap;

use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use accolade_core::domain::employee::{EmployeeId, EmployeeProfile};
use accolade_core::domain::nomination::{
    FinalizationId, FinalizationRecord, Nomination, NominationId, PopulatedNomination, Vote,
    VoterId,
};
use accolade_core::domain::period::{PeriodWindow, WinnerScope};

use super::{
    EmployeeRepository, FinalizationOutcome, NominationQuery, NominationRepository,
    NominationSort, Populate, RepositoryError,
};

#[derive(Default)]
struct MemoryState {
    nominations: HashMap<String, Nomination>,
    employees: HashMap<String, EmployeeProfile>,
    finalizations: Vec<FinalizationRecord>,
}

impl MemoryState {
    fn populate(&self, nomination: &Nomination, populate: Populate) -> PopulatedNomination {
        let employee = match populate {
            Populate::None => None,
            Populate::Employee => self.employees.get(&nomination.employee_id.0).cloned(),
        };
        PopulatedNomination { nomination: nomination.clone(), employee }
    }

    fn was_finalized(&self, id: &NominationId) -> bool {
        self.finalizations.iter().any(|record| record.nomination_id == *id)
    }

    /// Clears every standing winner except `keep` inside `window` (or everywhere).
    fn retract_winners(
        &mut self,
        keep: Option<&NominationId>,
        window: Option<PeriodWindow>,
    ) -> Vec<NominationId> {
        let mut retracted = Vec::new();
        for nomination in self.nominations.values_mut() {
            if !nomination.is_winner || keep.is_some_and(|keep| *keep == nomination.id) {
                continue;
            }
            if window.is_some_and(|window| !window.contains(nomination.nomination_date)) {
                continue;
            }
            nomination.retract_winner();
            retracted.push(nomination.id.clone());
        }
        retracted.sort();
        retracted
    }
}

/// Record store held entirely in memory. One lock guards nominations and
/// employees together so every mutation is atomic with respect to readers.
#[derive(Default)]
pub struct InMemoryRecognitionStore {
    state: RwLock<MemoryState>,
}

impl InMemoryRecognitionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl NominationRepository for InMemoryRecognitionStore {
    async fn create(&self, nomination: &Nomination) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if !state.employees.contains_key(&nomination.employee_id.0) {
            return Err(RepositoryError::Constraint(format!(
                "employee {} does not exist",
                nomination.employee_id.0
            )));
        }
        if state.nominations.contains_key(&nomination.id.0) {
            return Err(RepositoryError::Constraint(format!(
                "nomination {} already exists",
                nomination.id.0
            )));
        }
        state.nominations.insert(nomination.id.0.clone(), nomination.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &NominationId,
        populate: Populate,
    ) -> Result<Option<PopulatedNomination>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.nominations.get(&id.0).map(|nomination| state.populate(nomination, populate)))
    }

    async fn upsert_vote(
        &self,
        id: &NominationId,
        vote: Vote,
    ) -> Result<Option<Nomination>, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(nomination) = state.nominations.get_mut(&id.0) else {
            return Ok(None);
        };
        nomination.votes.upsert(vote.voter, vote.value, vote.voted_at);
        Ok(Some(nomination.clone()))
    }

    async fn find_vote(
        &self,
        id: &NominationId,
        voter: &VoterId,
    ) -> Result<Option<Vote>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.nominations.get(&id.0).and_then(|nomination| nomination.votes.get(voter).cloned()))
    }

    async fn tally(&self, id: &NominationId) -> Result<Option<i64>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.nominations.get(&id.0).map(Nomination::tally))
    }

    async fn finalize(
        &self,
        id: &NominationId,
        scope: WinnerScope,
        at: DateTime<Utc>,
    ) -> Result<Option<FinalizationOutcome>, RepositoryError> {
        let at = at.trunc_subsecs(6);
        let mut state = self.state.write().await;
        let Some(nominated_at) = state.nominations.get(&id.0).map(|target| target.nomination_date)
        else {
            if scope == WinnerScope::Global {
                state.retract_winners(None, None);
            }
            return Ok(None);
        };
        let retracted = state.retract_winners(Some(id), scope.retraction_window(nominated_at));

        let Some(target) = state.nominations.get_mut(&id.0) else {
            return Ok(None);
        };
        target.mark_winner(at);
        target.check_invariants().map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let nomination = target.clone();

        let record = FinalizationRecord {
            id: FinalizationId(Uuid::new_v4().to_string()),
            nomination_id: id.clone(),
            retracted,
            scope,
            finalized_at: at,
        };
        state.finalizations.push(record.clone());

        Ok(Some(FinalizationOutcome { nomination, record }))
    }

    async fn query(
        &self,
        query: &NominationQuery,
    ) -> Result<Vec<PopulatedNomination>, RepositoryError> {
        let state = self.state.read().await;
        let mut matched = state
            .nominations
            .values()
            .filter(|nomination| query.filter.matches(nomination))
            .filter(|nomination| {
                query
                    .filter
                    .ever_finalized
                    .map_or(true, |wanted| wanted == state.was_finalized(&nomination.id))
            })
            .collect::<Vec<_>>();

        match query.sort {
            NominationSort::NominationDateAsc => matched.sort_by(|left, right| {
                left.nomination_date.cmp(&right.nomination_date).then_with(|| left.id.cmp(&right.id))
            }),
            NominationSort::FinalizationDateDesc => matched.sort_by(|left, right| {
                right
                    .finalization_date
                    .cmp(&left.finalization_date)
                    .then_with(|| right.id.cmp(&left.id))
            }),
        }

        let limit = query.limit.map_or(usize::MAX, |limit| limit as usize);
        Ok(matched
            .into_iter()
            .take(limit)
            .map(|nomination| state.populate(nomination, query.populate))
            .collect())
    }

    async fn finalization_history(
        &self,
        limit: u32,
    ) -> Result<Vec<FinalizationRecord>, RepositoryError> {
        let state = self.state.read().await;
        // Appended in commit order, so newest last.
        Ok(state.finalizations.iter().rev().take(limit as usize).cloned().collect())
    }
}

#[async_trait::async_trait]
impl EmployeeRepository for InMemoryRecognitionStore {
    async fn find_by_id(
        &self,
        id: &EmployeeId,
    ) -> Result<Option<EmployeeProfile>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.employees.get(&id.0).cloned())
    }

    async fn save(&self, employee: EmployeeProfile) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.employees.insert(employee.id.0.clone(), employee);
        Ok(())
    }
}
