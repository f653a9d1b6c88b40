//! Nomination lifecycle, voting, finalization and period queries over a
//! [`NominationRepository`].
//!
//! The engine keeps no state of its own between calls. Every mutation is a single
//! atomic repository call, so concurrent callers only ever contend inside the store,
//! and store conflicts are absorbed by the [`RetryPolicy`].

use std::sync::Arc;

use tracing::{debug, info};

use accolade_core::config::{RecognitionConfig, MAX_CANDIDATES};
use accolade_core::domain::employee::EmployeeId;
use accolade_core::domain::nomination::{
    FinalizationRecord, MetricSnapshot, Nomination, NominationId, PopulatedNomination, Vote,
    VoteValue, VoterId, WinnerCheck,
};
use accolade_core::domain::period::{PeriodRange, PeriodWindow};
use accolade_core::ApplicationError;
use accolade_db::repositories::{
    NominationFilter, NominationQuery, NominationRepository, NominationSort, Populate,
};

use crate::clock::{Clock, SystemClock};
use crate::retry::RetryPolicy;

pub struct RecognitionEngine {
    nominations: Arc<dyn NominationRepository>,
    settings: RecognitionConfig,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl RecognitionEngine {
    pub fn new(nominations: Arc<dyn NominationRepository>, settings: RecognitionConfig) -> Self {
        let retry = RetryPolicy::from(&settings);
        Self { nominations, settings, retry, clock: Arc::new(SystemClock) }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn settings(&self) -> &RecognitionConfig {
        &self.settings
    }

    /// Opens a nomination for `employee_id` dated now. Repeat nominations of the same
    /// employee are allowed. An unknown employee fails as a persistence error.
    pub async fn nominate(
        &self,
        employee_id: EmployeeId,
        metrics: MetricSnapshot,
        message: impl Into<String>,
    ) -> Result<Nomination, ApplicationError> {
        let nomination = Nomination::open(employee_id, metrics, message, self.clock.now());
        self.retry.run("nominate", || self.nominations.create(&nomination)).await?;

        info!(
            event_name = "recognition.nomination.created",
            nomination_id = %nomination.id.0,
            employee_id = %nomination.employee_id.0,
            metric_count = nomination.metrics.len(),
            "nomination created"
        );
        Ok(nomination)
    }

    pub async fn get_nomination(
        &self,
        id: &NominationId,
    ) -> Result<Option<PopulatedNomination>, ApplicationError> {
        let found = self
            .retry
            .run("get_nomination", || self.nominations.find_by_id(id, Populate::Employee))
            .await?;

        debug!(
            event_name = "recognition.nomination.lookup",
            nomination_id = %id.0,
            found = found.is_some(),
            "nomination lookup"
        );
        Ok(found)
    }

    /// Records `value` as `voter`'s ballot, replacing any earlier ballot from the same
    /// voter. `None` when the nomination does not exist. Finalized nominations still
    /// accept votes.
    pub async fn cast_vote(
        &self,
        id: &NominationId,
        voter: VoterId,
        value: VoteValue,
    ) -> Result<Option<Nomination>, ApplicationError> {
        let vote = Vote { voter, value, voted_at: self.clock.now() };
        let updated = self
            .retry
            .run("cast_vote", || self.nominations.upsert_vote(id, vote.clone()))
            .await?;

        match &updated {
            Some(nomination) => info!(
                event_name = "recognition.vote.cast",
                nomination_id = %id.0,
                voter_id = %vote.voter.0,
                value = value.weight(),
                tally = nomination.tally(),
                "vote recorded"
            ),
            None => debug!(
                event_name = "recognition.vote.nomination_missing",
                nomination_id = %id.0,
                voter_id = %vote.voter.0,
                "vote ignored, nomination not found"
            ),
        }
        Ok(updated)
    }

    pub async fn get_user_vote_for_candidate(
        &self,
        id: &NominationId,
        voter: &VoterId,
    ) -> Result<Option<Vote>, ApplicationError> {
        let vote = self
            .retry
            .run("get_user_vote_for_candidate", || self.nominations.find_vote(id, voter))
            .await?;

        debug!(
            event_name = "recognition.vote.lookup",
            nomination_id = %id.0,
            voter_id = %voter.0,
            found = vote.is_some(),
            "ballot lookup"
        );
        Ok(vote)
    }

    /// Signed sum of ballots, recomputed on every call. `None` for an unknown nomination.
    pub async fn calculate_votes(
        &self,
        id: &NominationId,
    ) -> Result<Option<i64>, ApplicationError> {
        let tally = self.retry.run("calculate_votes", || self.nominations.tally(id)).await?;

        debug!(
            event_name = "recognition.vote.tally",
            nomination_id = %id.0,
            tally = ?tally,
            "tally computed"
        );
        Ok(tally)
    }

    /// Promotes `id` to winner and retracts the standing winners within the configured
    /// scope, all in one step. `None`, with nothing changed, when `id` does not exist.
    pub async fn finalize_winner(
        &self,
        id: &NominationId,
    ) -> Result<Option<Nomination>, ApplicationError> {
        let scope = self.settings.winner_scope;
        let at = self.clock.now();
        let outcome =
            self.retry.run("finalize_winner", || self.nominations.finalize(id, scope, at)).await?;

        let Some(outcome) = outcome else {
            debug!(
                event_name = "recognition.winner.nomination_missing",
                nomination_id = %id.0,
                "finalization skipped, nomination not found"
            );
            return Ok(None);
        };

        info!(
            event_name = "recognition.winner.finalized",
            nomination_id = %id.0,
            employee_id = %outcome.nomination.employee_id.0,
            finalization_id = %outcome.record.id.0,
            winner_scope = scope.as_str(),
            retracted = ?retracted_ids(&outcome.record),
            "winner finalized"
        );
        Ok(Some(outcome.nomination))
    }

    /// Open, never-finalized nominations made inside the window, oldest first, capped
    /// at the configured candidate limit and never more than [`MAX_CANDIDATES`].
    /// A retracted winner was finalized once and stays out. Defaults to the current
    /// calendar month.
    pub async fn get_nominations_in_range(
        &self,
        range: PeriodRange,
    ) -> Result<Vec<PopulatedNomination>, ApplicationError> {
        let window = range.resolve(PeriodWindow::current_month(self.clock.now()))?;
        let query = NominationQuery::new(NominationFilter {
            is_winner: Some(false),
            finalized: Some(false),
            ever_finalized: Some(false),
            nominated_within: Some(window),
            ..NominationFilter::default()
        })
        .sorted_by(NominationSort::NominationDateAsc)
        .limit(self.settings.candidate_limit.min(MAX_CANDIDATES))
        .populate(Populate::Employee);

        let candidates =
            self.retry.run("get_nominations_in_range", || self.nominations.query(&query)).await?;
        debug!(
            event_name = "recognition.period.candidates",
            window_start = %window.start,
            window_end = %window.end,
            count = candidates.len(),
            "candidate window read"
        );
        Ok(candidates)
    }

    /// The winner finalized inside the window, most recent first when several
    /// qualify. Defaults to the trailing winner window.
    pub async fn get_winner_for_period(
        &self,
        range: PeriodRange,
    ) -> Result<Option<PopulatedNomination>, ApplicationError> {
        let window = self.winner_window(range)?;
        let query = winners_query(window, None).limit(1);

        let mut winners =
            self.retry.run("get_winner_for_period", || self.nominations.query(&query)).await?;
        debug!(
            event_name = "recognition.period.winner",
            window_start = %window.start,
            window_end = %window.end,
            found = !winners.is_empty(),
            "winner window read"
        );
        Ok(winners.pop())
    }

    /// Every winner finalized inside the window, newest finalization first. Defaults
    /// to the trailing history window.
    pub async fn get_winners_for_period(
        &self,
        range: PeriodRange,
    ) -> Result<Vec<PopulatedNomination>, ApplicationError> {
        let now = self.clock.now();
        let defaults = PeriodWindow::trailing_months(now, self.settings.history_months);
        let window = range.resolve(defaults)?;
        let query = winners_query(window, None);

        let winners =
            self.retry.run("get_winners_for_period", || self.nominations.query(&query)).await?;
        debug!(
            event_name = "recognition.period.winners",
            window_start = %window.start,
            window_end = %window.end,
            count = winners.len(),
            "winner history read"
        );
        Ok(winners)
    }

    pub async fn is_winner_for_period(
        &self,
        employee_id: &EmployeeId,
        range: PeriodRange,
    ) -> Result<WinnerCheck, ApplicationError> {
        let window = self.winner_window(range)?;
        let query = winners_query(window, Some(employee_id.clone())).limit(1);

        let item = self
            .retry
            .run("is_winner_for_period", || self.nominations.query(&query))
            .await?
            .pop();
        debug!(
            event_name = "recognition.period.is_winner",
            employee_id = %employee_id.0,
            is_winner = item.is_some(),
            "winner check"
        );
        Ok(WinnerCheck { is_winner: item.is_some(), item })
    }

    /// Most recent finalizations first.
    pub async fn get_finalization_history(
        &self,
        limit: u32,
    ) -> Result<Vec<FinalizationRecord>, ApplicationError> {
        self.retry
            .run("get_finalization_history", || self.nominations.finalization_history(limit))
            .await
    }

    fn winner_window(&self, range: PeriodRange) -> Result<PeriodWindow, ApplicationError> {
        let defaults =
            PeriodWindow::trailing_days(self.clock.now(), self.settings.winner_window_days);
        Ok(range.resolve(defaults)?)
    }
}

fn retracted_ids(record: &FinalizationRecord) -> Vec<&str> {
    record.retracted.iter().map(|id| id.0.as_str()).collect()
}

fn winners_query(window: PeriodWindow, employee_id: Option<EmployeeId>) -> NominationQuery {
    NominationQuery::new(NominationFilter {
        is_winner: Some(true),
        finalized_within: Some(window),
        employee_id,
        ..NominationFilter::default()
    })
    .sorted_by(NominationSort::FinalizationDateDesc)
    .populate(Populate::Employee)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use accolade_core::config::{RecognitionConfig, MAX_CANDIDATES};
    use accolade_core::domain::employee::{EmployeeId, EmployeeProfile};
    use accolade_core::domain::nomination::{
        MetricSnapshot, Nomination, NominationId, VoteValue, VoterId,
    };
    use accolade_core::domain::period::{PeriodRange, WinnerScope};
    use accolade_core::{ApplicationError, DomainError};
    use accolade_db::repositories::{EmployeeRepository, InMemoryRecognitionStore};

    use super::RecognitionEngine;
    use crate::clock::ManualClock;

    struct Harness {
        engine: RecognitionEngine,
        clock: Arc<ManualClock>,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 10, 9, 0, 0).single().expect("valid time")
    }

    async fn harness(settings: RecognitionConfig) -> Harness {
        let store = Arc::new(InMemoryRecognitionStore::new());
        for id in ["emp-1", "emp-2", "emp-3"] {
            store
                .save(EmployeeProfile {
                    id: EmployeeId(id.to_string()),
                    full_name: format!("Employee {id}"),
                    email: format!("{id}@example.com"),
                    avatar: None,
                    department: None,
                    position: None,
                })
                .await
                .expect("save employee");
        }
        let clock = Arc::new(ManualClock::new(start()));
        let engine = RecognitionEngine::new(store, settings).with_clock(clock.clone());
        Harness { engine, clock }
    }

    fn metrics() -> MetricSnapshot {
        MetricSnapshot::new([("tasksCompleted", Decimal::from(10))]).expect("valid metrics")
    }

    fn voter(id: &str) -> VoterId {
        VoterId(id.to_string())
    }

    #[tokio::test]
    async fn nominate_then_vote_scenario() {
        let Harness { engine, .. } = harness(RecognitionConfig::default()).await;

        let nomination = engine
            .nominate(EmployeeId("emp-1".to_string()), metrics(), "Great job")
            .await
            .expect("nominate");
        assert!(!nomination.is_winner);
        assert_eq!(nomination.nomination_date, start());

        engine.cast_vote(&nomination.id, voter("voter1"), VoteValue::Accept).await.expect("vote");
        assert_eq!(engine.calculate_votes(&nomination.id).await.expect("tally"), Some(1));

        let ballot = engine
            .get_user_vote_for_candidate(&nomination.id, &voter("voter1"))
            .await
            .expect("lookup")
            .expect("ballot present");
        assert_eq!(ballot.value, VoteValue::Accept);
    }

    #[tokio::test]
    async fn revote_replaces_value_and_refreshes_timestamp() {
        let Harness { engine, clock } = harness(RecognitionConfig::default()).await;
        let nomination = engine
            .nominate(EmployeeId("emp-1".to_string()), metrics(), "")
            .await
            .expect("nominate");

        engine.cast_vote(&nomination.id, voter("voter1"), VoteValue::Accept).await.expect("vote");
        clock.advance(Duration::minutes(3));
        let updated = engine
            .cast_vote(&nomination.id, voter("voter1"), VoteValue::Reject)
            .await
            .expect("revote")
            .expect("nomination exists");

        assert_eq!(updated.votes.len(), 1);
        let ballot = updated.votes.get(&voter("voter1")).expect("ballot");
        assert_eq!(ballot.value, VoteValue::Reject);
        assert_eq!(ballot.voted_at, start() + Duration::minutes(3));
        assert_eq!(engine.calculate_votes(&nomination.id).await.expect("tally"), Some(-1));
    }

    #[tokio::test]
    async fn lookups_on_unknown_nomination_return_none() {
        let Harness { engine, .. } = harness(RecognitionConfig::default()).await;
        let missing = NominationId("nonexistent-id".to_string());

        assert_eq!(engine.cast_vote(&missing, voter("voter1"), VoteValue::Accept).await, Ok(None));
        assert_eq!(engine.calculate_votes(&missing).await, Ok(None));
        assert_eq!(engine.finalize_winner(&missing).await, Ok(None));
        assert_eq!(engine.get_nomination(&missing).await, Ok(None));
        assert_eq!(engine.get_user_vote_for_candidate(&missing, &voter("voter1")).await, Ok(None));
    }

    async fn nominate(engine: &RecognitionEngine, employee: &str) -> Nomination {
        engine
            .nominate(EmployeeId(employee.to_string()), metrics(), "")
            .await
            .expect("nominate")
    }

    async fn candidate_ids(engine: &RecognitionEngine) -> Vec<NominationId> {
        engine
            .get_nominations_in_range(PeriodRange::default())
            .await
            .expect("candidates")
            .into_iter()
            .map(|item| item.nomination.id)
            .collect()
    }

    #[tokio::test]
    async fn finalized_nominations_leave_the_candidate_window() {
        let Harness { engine, clock } = harness(RecognitionConfig::default()).await;
        let mut ids = Vec::new();
        for employee in ["emp-1", "emp-2", "emp-3"] {
            ids.push(nominate(&engine, employee).await.id);
            clock.advance(Duration::minutes(1));
        }

        engine.finalize_winner(&ids[1]).await.expect("finalize").expect("exists");
        let candidates =
            engine.get_nominations_in_range(PeriodRange::default()).await.expect("candidates");

        let found = candidates.iter().map(|item| item.nomination.id.clone()).collect::<Vec<_>>();
        assert_eq!(found, vec![ids[0].clone(), ids[2].clone()]);
        assert!(candidates.iter().all(|item| item.employee.is_some()));
    }

    #[tokio::test]
    async fn retracted_winner_does_not_return_to_the_candidate_window() {
        let Harness { engine, clock } = harness(RecognitionConfig::default()).await;
        let first = nominate(&engine, "emp-1").await;
        clock.advance(Duration::minutes(1));
        let second = nominate(&engine, "emp-2").await;
        clock.advance(Duration::minutes(1));
        let open = nominate(&engine, "emp-3").await;

        engine.finalize_winner(&first.id).await.expect("finalize first");
        engine.finalize_winner(&second.id).await.expect("finalize second");

        let retracted = engine.get_nomination(&first.id).await.expect("read").expect("present");
        assert!(!retracted.nomination.is_winner);
        assert_eq!(candidate_ids(&engine).await, vec![open.id]);
    }

    #[tokio::test]
    async fn candidate_window_is_capped_by_configuration() {
        let settings = RecognitionConfig { candidate_limit: 2, ..RecognitionConfig::default() };
        let Harness { engine, clock } = harness(settings).await;
        for _ in 0..4 {
            nominate(&engine, "emp-1").await;
            clock.advance(Duration::seconds(1));
        }

        let candidates =
            engine.get_nominations_in_range(PeriodRange::default()).await.expect("candidates");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].nomination.nomination_date, start());
    }

    #[tokio::test]
    async fn candidate_window_never_exceeds_five() {
        let settings = RecognitionConfig { candidate_limit: 50, ..RecognitionConfig::default() };
        let Harness { engine, clock } = harness(settings).await;
        let mut ids = Vec::new();
        for _ in 0..8 {
            ids.push(nominate(&engine, "emp-2").await.id);
            clock.advance(Duration::seconds(1));
        }

        let found = candidate_ids(&engine).await;
        assert_eq!(found.len(), MAX_CANDIDATES as usize);
        assert_eq!(found, ids[..5].to_vec());
    }

    #[tokio::test]
    async fn winner_queries_respect_windows() {
        let Harness { engine, clock } = harness(RecognitionConfig::default()).await;
        let first = nominate(&engine, "emp-1").await;
        engine.finalize_winner(&first.id).await.expect("finalize");

        let winner = engine
            .get_winner_for_period(PeriodRange::default())
            .await
            .expect("winner")
            .expect("winner present");
        assert_eq!(winner.nomination.id, first.id);

        let check = engine
            .is_winner_for_period(&EmployeeId("emp-1".to_string()), PeriodRange::default())
            .await
            .expect("check");
        assert!(check.is_winner);
        let other = engine
            .is_winner_for_period(&EmployeeId("emp-2".to_string()), PeriodRange::default())
            .await
            .expect("check");
        assert!(!other.is_winner);
        assert_eq!(other.item, None);

        clock.advance(Duration::days(40));
        assert_eq!(engine.get_winner_for_period(PeriodRange::default()).await, Ok(None));
        let history = engine.get_winners_for_period(PeriodRange::default()).await.expect("history");
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn cycle_scope_keeps_one_winner_per_month() {
        let settings =
            RecognitionConfig { winner_scope: WinnerScope::Cycle, ..RecognitionConfig::default() };
        let Harness { engine, clock } = harness(settings).await;

        let june = nominate(&engine, "emp-1").await;
        engine.finalize_winner(&june.id).await.expect("finalize june");

        clock.advance(Duration::days(30));
        let july = nominate(&engine, "emp-2").await;
        engine.finalize_winner(&july.id).await.expect("finalize july");

        let winners = engine.get_winners_for_period(PeriodRange::default()).await.expect("winners");
        let ids = winners.iter().map(|item| item.nomination.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids, vec![july.id.clone(), june.id.clone()]);

        let history = engine.get_finalization_history(10).await.expect("history");
        assert!(history.iter().all(|record| record.retracted.is_empty()));
    }

    #[tokio::test]
    async fn inverted_range_is_a_domain_error() {
        let Harness { engine, .. } = harness(RecognitionConfig::default()).await;
        let range = PeriodRange::between(start(), start() - Duration::days(1));

        let error = engine.get_nominations_in_range(range).await.expect_err("inverted window");
        assert!(matches!(error, ApplicationError::Domain(DomainError::InvalidPeriod { .. })));
    }

    #[tokio::test]
    async fn unknown_employee_cannot_be_nominated() {
        let Harness { engine, .. } = harness(RecognitionConfig::default()).await;

        let error = engine
            .nominate(EmployeeId("emp-ghost".to_string()), metrics(), "")
            .await
            .expect_err("unknown employee");
        assert!(matches!(
            error,
            ApplicationError::Persistence(ref message) if message.contains("emp-ghost")
        ));
    }
}
