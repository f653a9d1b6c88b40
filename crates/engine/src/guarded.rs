//! Authorization-checked entry points for the user-facing recognition mutations.

use std::sync::Arc;

use tracing::warn;

use accolade_core::authz::{AccessPolicy, AuthContext, AuthorizationGate, GuardedOperation};
use accolade_core::domain::employee::EmployeeId;
use accolade_core::domain::nomination::{
    MetricSnapshot, Nomination, NominationId, VoteValue, VoterId,
};
use accolade_core::ApplicationError;

use crate::engine::RecognitionEngine;

/// Wraps a [`RecognitionEngine`] and consults the gate before each mutation.
pub struct GuardedRecognition<G> {
    engine: Arc<RecognitionEngine>,
    gate: G,
    policy: AccessPolicy,
}

impl<G: AuthorizationGate> GuardedRecognition<G> {
    pub fn new(engine: Arc<RecognitionEngine>, gate: G) -> Self {
        Self { engine, gate, policy: AccessPolicy::default() }
    }

    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn engine(&self) -> &RecognitionEngine {
        &self.engine
    }

    pub async fn nominate(
        &self,
        actor_id: &str,
        employee_id: EmployeeId,
        metrics: MetricSnapshot,
        message: impl Into<String>,
    ) -> Result<Nomination, ApplicationError> {
        let context = AuthContext {
            resource_owner_id: Some(actor_id.to_owned()),
            target_user_id: Some(employee_id.0.clone()),
        };
        self.authorize(actor_id, GuardedOperation::Nominate, &context).await?;
        self.engine.nominate(employee_id, metrics, message).await
    }

    /// The acting user casts their own ballot; the nominee is passed to the gate as
    /// the target user.
    pub async fn cast_vote(
        &self,
        actor_id: &str,
        id: &NominationId,
        value: VoteValue,
    ) -> Result<Option<Nomination>, ApplicationError> {
        let Some(nomination) = self.engine.get_nomination(id).await? else {
            return Ok(None);
        };
        let context = AuthContext {
            resource_owner_id: Some(actor_id.to_owned()),
            target_user_id: Some(nomination.nomination.employee_id.0),
        };
        self.authorize(actor_id, GuardedOperation::CastVote, &context).await?;
        self.engine.cast_vote(id, VoterId(actor_id.to_owned()), value).await
    }

    pub async fn finalize_winner(
        &self,
        actor_id: &str,
        id: &NominationId,
    ) -> Result<Option<Nomination>, ApplicationError> {
        let context = AuthContext { resource_owner_id: None, target_user_id: None };
        self.authorize(actor_id, GuardedOperation::FinalizeWinner, &context).await?;
        self.engine.finalize_winner(id).await
    }

    async fn authorize(
        &self,
        actor_id: &str,
        operation: GuardedOperation,
        context: &AuthContext,
    ) -> Result<(), ApplicationError> {
        let condition = self.policy.condition_for(operation);
        if self.gate.can(actor_id, condition, Some(context)).await {
            return Ok(());
        }

        warn!(
            event_name = "recognition.authz.denied",
            actor_id,
            operation = operation.describe(),
            "recognition operation denied"
        );
        Err(ApplicationError::Forbidden {
            actor: actor_id.to_owned(),
            operation: operation.describe().to_owned(),
        })
    }
}
