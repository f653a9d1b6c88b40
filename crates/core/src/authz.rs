//! Actor authorization interface consulted before user-facing recognition mutations.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Permission expression: a bare token, or an `any`/`all` combination of sub-expressions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Token(String),
    Any { any: Vec<Condition> },
    All { all: Vec<Condition> },
}

impl Condition {
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token(token.into())
    }

    pub fn any<I, T>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::Any { any: tokens.into_iter().map(|token| Self::Token(token.into())).collect() }
    }

    pub fn all<I, T>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::All { all: tokens.into_iter().map(|token| Self::Token(token.into())).collect() }
    }

    /// Evaluates the expression, deciding each token with `holds`.
    /// An empty `any` is false and an empty `all` is true.
    pub fn evaluate(&self, holds: &impl Fn(&str) -> bool) -> bool {
        match self {
            Self::Token(token) => holds(token),
            Self::Any { any } => any.iter().any(|condition| condition.evaluate(holds)),
            Self::All { all } => all.iter().all(|condition| condition.evaluate(holds)),
        }
    }
}

/// Ownership hints for grants that only apply to the actor's own resources.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub resource_owner_id: Option<String>,
    pub target_user_id: Option<String>,
}

#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    async fn can(&self, actor_id: &str, condition: &Condition, context: Option<&AuthContext>)
        -> bool;
}

/// Grant table keyed by actor id.
///
/// A token ending in `:own` is satisfied only when the context names the actor as the
/// resource owner.
#[derive(Clone, Debug, Default)]
pub struct StaticGrantGate {
    grants: HashMap<String, HashSet<String>>,
}

impl StaticGrantGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant<I, T>(mut self, actor_id: impl Into<String>, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.grants
            .entry(actor_id.into())
            .or_default()
            .extend(tokens.into_iter().map(|token| normalize_token(&token.into())));
        self
    }

    fn holds(&self, actor_id: &str, token: &str, context: Option<&AuthContext>) -> bool {
        let token = normalize_token(token);
        let Some(granted) = self.grants.get(actor_id) else {
            return false;
        };
        if !granted.contains(&token) {
            return false;
        }
        if token.ends_with(":own") {
            return context
                .and_then(|context| context.resource_owner_id.as_deref())
                .is_some_and(|owner| owner == actor_id);
        }
        true
    }
}

#[async_trait]
impl AuthorizationGate for StaticGrantGate {
    async fn can(
        &self,
        actor_id: &str,
        condition: &Condition,
        context: Option<&AuthContext>,
    ) -> bool {
        condition.evaluate(&|token: &str| self.holds(actor_id, token, context))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardedOperation {
    Nominate,
    CastVote,
    FinalizeWinner,
}

impl GuardedOperation {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Nominate => "nominate an employee",
            Self::CastVote => "vote on a nomination",
            Self::FinalizeWinner => "finalize a winner",
        }
    }
}

/// Condition required for each guarded operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub nominate: Condition,
    pub cast_vote: Condition,
    pub finalize_winner: Condition,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            nominate: Condition::any(["recognition:nominate", "recognition:admin"]),
            cast_vote: Condition::any(["recognition:vote", "recognition:admin"]),
            finalize_winner: Condition::any(["recognition:finalize", "recognition:admin"]),
        }
    }
}

impl AccessPolicy {
    pub fn condition_for(&self, operation: GuardedOperation) -> &Condition {
        match operation {
            GuardedOperation::Nominate => &self.nominate,
            GuardedOperation::CastVote => &self.cast_vote,
            GuardedOperation::FinalizeWinner => &self.finalize_winner,
        }
    }
}

fn normalize_token(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{
        AccessPolicy, AuthContext, AuthorizationGate, Condition, GuardedOperation, StaticGrantGate,
    };

    #[tokio::test]
    async fn any_and_all_combine_tokens() {
        let gate = StaticGrantGate::new().grant("emp-1", ["recognition:vote", "reports:read"]);

        let any = Condition::any(["recognition:admin", "recognition:vote"]);
        let all = Condition::all(["recognition:vote", "recognition:finalize"]);

        assert!(gate.can("emp-1", &any, None).await);
        assert!(!gate.can("emp-1", &all, None).await);
        assert!(!gate.can("emp-2", &any, None).await);
    }

    #[tokio::test]
    async fn empty_combinators_follow_identity_rules() {
        let gate = StaticGrantGate::new();

        assert!(!gate.can("emp-1", &Condition::Any { any: Vec::new() }, None).await);
        assert!(gate.can("emp-1", &Condition::All { all: Vec::new() }, None).await);
    }

    #[tokio::test]
    async fn own_tokens_require_matching_resource_owner() {
        let gate = StaticGrantGate::new().grant("emp-1", ["recognition:nominate:own"]);
        let condition = Condition::token("recognition:nominate:own");

        let owned = AuthContext { resource_owner_id: Some("emp-1".to_string()), ..Default::default() };
        let foreign =
            AuthContext { resource_owner_id: Some("emp-2".to_string()), ..Default::default() };

        assert!(gate.can("emp-1", &condition, Some(&owned)).await);
        assert!(!gate.can("emp-1", &condition, Some(&foreign)).await);
        assert!(!gate.can("emp-1", &condition, None).await);
    }

    #[test]
    fn conditions_deserialize_from_nested_json() {
        let raw = r#"{"all": ["recognition:vote", {"any": ["team:lead", "recognition:admin"]}]}"#;
        let condition: Condition = serde_json::from_str(raw).expect("parse condition");

        let holds = |token: &str| token == "recognition:vote" || token == "team:lead";
        assert!(condition.evaluate(&holds));

        let lacks_lead = |token: &str| token == "recognition:vote";
        assert!(!condition.evaluate(&lacks_lead));
    }

    #[tokio::test]
    async fn default_policy_admits_admins_everywhere() {
        let gate = StaticGrantGate::new().grant("hr-1", ["Recognition:Admin"]);
        let policy = AccessPolicy::default();

        for operation in
            [GuardedOperation::Nominate, GuardedOperation::CastVote, GuardedOperation::FinalizeWinner]
        {
            assert!(gate.can("hr-1", policy.condition_for(operation), None).await);
        }
    }
}
