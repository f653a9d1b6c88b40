use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::domain::employee::{EmployeeId, EmployeeProfile};
use crate::domain::period::WinnerScope;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NominationId(pub String);

impl NominationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoterId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FinalizationId(pub String);

/// A single ballot. Stored and serialized as its signed integer weight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum VoteValue {
    Reject,
    Neutral,
    Accept,
}

impl VoteValue {
    pub fn weight(self) -> i64 {
        match self {
            Self::Reject => -1,
            Self::Neutral => 0,
            Self::Accept => 1,
        }
    }
}

impl From<VoteValue> for i64 {
    fn from(value: VoteValue) -> Self {
        value.weight()
    }
}

impl TryFrom<i64> for VoteValue {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Reject),
            0 => Ok(Self::Neutral),
            1 => Ok(Self::Accept),
            other => Err(DomainError::InvalidVoteValue(other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub voter: VoterId,
    pub value: VoteValue,
    pub voted_at: DateTime<Utc>,
}

/// Ballots on one nomination, keyed by voter so each voter holds at most one entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VoteLedger(BTreeMap<VoterId, Vote>);

impl VoteLedger {
    /// Records `value` for `voter`, replacing any earlier ballot from the same voter.
    pub fn upsert(&mut self, voter: VoterId, value: VoteValue, at: DateTime<Utc>) -> &Vote {
        let vote = self.0.entry(voter.clone()).or_insert(Vote { voter, value, voted_at: at });
        vote.value = value;
        vote.voted_at = at;
        vote
    }

    pub fn get(&self, voter: &VoterId) -> Option<&Vote> {
        self.0.get(voter)
    }

    pub fn tally(&self) -> i64 {
        self.0.values().map(|vote| vote.value.weight()).sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vote> {
        self.0.values()
    }
}

impl FromIterator<Vote> for VoteLedger {
    fn from_iter<I: IntoIterator<Item = Vote>>(iter: I) -> Self {
        Self(iter.into_iter().map(|vote| (vote.voter.clone(), vote)).collect())
    }
}

impl Serialize for VoteLedger {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.values())
    }
}

impl<'de> Deserialize<'de> for VoteLedger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Vec::<Vote>::deserialize(deserializer)?.into_iter().collect())
    }
}

/// Metric values captured when the nomination was made.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSnapshot(BTreeMap<String, Decimal>);

impl MetricSnapshot {
    pub fn new<I, K>(metrics: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = (K, Decimal)>,
        K: Into<String>,
    {
        let mut snapshot = BTreeMap::new();
        for (name, value) in metrics {
            let name = name.into();
            if name.trim().is_empty() {
                return Err(DomainError::InvalidMetric("metric name must not be empty".to_owned()));
            }
            if snapshot.insert(name.clone(), value).is_some() {
                return Err(DomainError::InvalidMetric(format!("metric `{name}` supplied twice")));
            }
        }
        Ok(Self(snapshot))
    }

    pub fn get(&self, name: &str) -> Option<Decimal> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.0.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nomination {
    pub id: NominationId,
    pub employee_id: EmployeeId,
    pub metrics: MetricSnapshot,
    pub message: String,
    pub votes: VoteLedger,
    pub is_winner: bool,
    pub nomination_date: DateTime<Utc>,
    pub finalization_date: Option<DateTime<Utc>>,
}

impl Nomination {
    pub fn open(
        employee_id: EmployeeId,
        metrics: MetricSnapshot,
        message: impl Into<String>,
        nominated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NominationId::generate(),
            employee_id,
            metrics,
            message: message.into(),
            votes: VoteLedger::default(),
            is_winner: false,
            nomination_date: nominated_at,
            finalization_date: None,
        }
    }

    pub fn tally(&self) -> i64 {
        self.votes.tally()
    }

    pub fn mark_winner(&mut self, at: DateTime<Utc>) {
        self.is_winner = true;
        self.finalization_date = Some(at);
    }

    pub fn retract_winner(&mut self) {
        self.is_winner = false;
        self.finalization_date = None;
    }

    /// Winner flag and finalization date must move together.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        match (self.is_winner, self.finalization_date) {
            (true, None) => Err(DomainError::InvariantViolation(format!(
                "nomination {} is a winner without a finalization date",
                self.id.0
            ))),
            (false, Some(_)) => Err(DomainError::InvariantViolation(format!(
                "nomination {} has a finalization date but is not a winner",
                self.id.0
            ))),
            _ => Ok(()),
        }
    }
}

/// A nomination with its employee reference resolved for presentation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulatedNomination {
    #[serde(flatten)]
    pub nomination: Nomination,
    pub employee: Option<EmployeeProfile>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerCheck {
    pub is_winner: bool,
    pub item: Option<PopulatedNomination>,
}

/// Append-only record of one finalization and the winners it retracted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizationRecord {
    pub id: FinalizationId,
    pub nomination_id: NominationId,
    pub retracted: Vec<NominationId>,
    pub scope: WinnerScope,
    pub finalized_at: DateTime<Utc>,
}
