//! Subcommands that drive the recognition engine against the configured database.

use std::str::FromStr;

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use accolade_core::config::LoadOptions;
use accolade_core::{
    ApplicationError, EmployeeId, InterfaceError, MetricSnapshot, NominationId, PeriodRange,
    VoteValue, VoterId,
};
use accolade_engine::{bootstrap, BootstrapError, RecognitionEngine};

use crate::commands::{build_runtime, CommandResult, Failure};

/// Raw period bounds as typed on the command line.
#[derive(Debug, Clone, Default)]
pub struct PeriodBounds {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone)]
pub enum RecognitionRequest {
    Nominate { employee: String, metrics: Vec<String>, message: String },
    Vote { nomination: String, voter: String, value: i64 },
    Ballot { nomination: String, voter: String },
    Tally { nomination: String },
    Finalize { nomination: String },
    Candidates(PeriodBounds),
    Winner(PeriodBounds),
    Winners(PeriodBounds),
    IsWinner { employee: String, period: PeriodBounds },
    History { limit: u32 },
}

impl RecognitionRequest {
    pub fn command_name(&self) -> &'static str {
        match self {
            Self::Nominate { .. } => "nominate",
            Self::Vote { .. } => "vote",
            Self::Ballot { .. } => "ballot",
            Self::Tally { .. } => "tally",
            Self::Finalize { .. } => "finalize",
            Self::Candidates(_) => "candidates",
            Self::Winner(_) => "winner",
            Self::Winners(_) => "winners",
            Self::IsWinner { .. } => "is-winner",
            Self::History { .. } => "history",
        }
    }
}

pub fn run(options: &LoadOptions, request: RecognitionRequest) -> CommandResult {
    let command = request.command_name();
    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(failure) => return CommandResult::from_failure(command, failure),
    };

    let result = runtime.block_on(async {
        let app = bootstrap(options.clone()).await.map_err(bootstrap_failure)?;
        let outcome = execute(&app.engine, request).await;
        app.db_pool.close().await;
        outcome
    });

    match result {
        Ok(result) => result,
        Err(failure) => CommandResult::from_failure(command, failure),
    }
}

async fn execute(
    engine: &RecognitionEngine,
    request: RecognitionRequest,
) -> Result<CommandResult, Failure> {
    let command = request.command_name();

    match request {
        RecognitionRequest::Nominate { employee, metrics, message } => {
            let metrics = parse_metrics(&metrics).map_err(bad_input)?;
            let nomination = engine
                .nominate(EmployeeId(employee), metrics, message)
                .await
                .map_err(application_failure)?;
            Ok(CommandResult::success_with_data(command, "nomination created", &nomination))
        }
        RecognitionRequest::Vote { nomination, voter, value } => {
            let value = VoteValue::try_from(value)
                .map_err(|error| application_failure(error.into()))?;
            let id = NominationId(nomination);
            match engine.cast_vote(&id, VoterId(voter), value).await.map_err(application_failure)? {
                Some(updated) => Ok(CommandResult::success_with_data(command, "vote recorded", &updated)),
                None => Err(nomination_not_found(&id)),
            }
        }
        RecognitionRequest::Ballot { nomination, voter } => {
            let id = NominationId(nomination);
            let voter = VoterId(voter);
            match engine
                .get_user_vote_for_candidate(&id, &voter)
                .await
                .map_err(application_failure)?
            {
                Some(vote) => Ok(CommandResult::success_with_data(command, "ballot found", &vote)),
                None => Err((
                    "not_found",
                    format!("no ballot from `{}` on nomination `{}`", voter.0, id.0),
                    11,
                )),
            }
        }
        RecognitionRequest::Tally { nomination } => {
            let id = NominationId(nomination);
            match engine.calculate_votes(&id).await.map_err(application_failure)? {
                Some(tally) => Ok(CommandResult::success_with_data(
                    command,
                    "tally computed",
                    &json!({ "nomination_id": id, "tally": tally }),
                )),
                None => Err(nomination_not_found(&id)),
            }
        }
        RecognitionRequest::Finalize { nomination } => {
            let id = NominationId(nomination);
            match engine.finalize_winner(&id).await.map_err(application_failure)? {
                Some(winner) => Ok(CommandResult::success_with_data(command, "winner finalized", &winner)),
                None => Err(nomination_not_found(&id)),
            }
        }
        RecognitionRequest::Candidates(bounds) => {
            let range = parse_period(&bounds).map_err(bad_input)?;
            let candidates =
                engine.get_nominations_in_range(range).await.map_err(application_failure)?;
            Ok(CommandResult::success_with_data(
                command,
                format!("{} candidates", candidates.len()),
                &candidates,
            ))
        }
        RecognitionRequest::Winner(bounds) => {
            let range = parse_period(&bounds).map_err(bad_input)?;
            let winner = engine.get_winner_for_period(range).await.map_err(application_failure)?;
            let message = if winner.is_some() { "winner found" } else { "no winner in period" };
            Ok(CommandResult::success_with_data(command, message, &winner))
        }
        RecognitionRequest::Winners(bounds) => {
            let range = parse_period(&bounds).map_err(bad_input)?;
            let winners = engine.get_winners_for_period(range).await.map_err(application_failure)?;
            Ok(CommandResult::success_with_data(
                command,
                format!("{} winners", winners.len()),
                &winners,
            ))
        }
        RecognitionRequest::IsWinner { employee, period } => {
            let range = parse_period(&period).map_err(bad_input)?;
            let check = engine
                .is_winner_for_period(&EmployeeId(employee), range)
                .await
                .map_err(application_failure)?;
            let message = if check.is_winner { "employee won in period" } else { "employee did not win in period" };
            Ok(CommandResult::success_with_data(command, message, &check))
        }
        RecognitionRequest::History { limit } => {
            let history = engine.get_finalization_history(limit).await.map_err(application_failure)?;
            Ok(CommandResult::success_with_data(
                command,
                format!("{} finalizations", history.len()),
                &history,
            ))
        }
    }
}

fn parse_metrics(raw: &[String]) -> anyhow::Result<MetricSnapshot> {
    let mut pairs = Vec::with_capacity(raw.len());
    for entry in raw {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("metric `{entry}` must look like name=value"))?;
        let value = Decimal::from_str(value.trim())
            .with_context(|| format!("metric `{}` has a non-numeric value", name.trim()))?;
        pairs.push((name.trim().to_string(), value));
    }
    Ok(MetricSnapshot::new(pairs)?)
}

fn parse_period(bounds: &PeriodBounds) -> anyhow::Result<PeriodRange> {
    let start = bounds.start.as_deref().map(|raw| parse_instant(raw, false)).transpose()?;
    let end = bounds.end.as_deref().map(|raw| parse_instant(raw, true)).transpose()?;
    Ok(PeriodRange { start, end })
}

/// Accepts RFC 3339 or a bare `YYYY-MM-DD`; a bare end date covers the whole day.
fn parse_instant(raw: &str, end_of_day: bool) -> anyhow::Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("`{raw}` is neither RFC 3339 nor YYYY-MM-DD"))?;
    let time = if end_of_day {
        NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)
    } else {
        Some(NaiveTime::MIN)
    };
    let Some(time) = time else {
        bail!("could not resolve the time of day for `{raw}`");
    };
    Ok(date.and_time(time).and_utc())
}

fn bad_input(error: anyhow::Error) -> Failure {
    ("bad_request", format!("{error:#}"), 7)
}

fn nomination_not_found(id: &NominationId) -> Failure {
    ("not_found", format!("nomination `{}` not found", id.0), 11)
}

fn application_failure(error: ApplicationError) -> Failure {
    let correlation_id = Uuid::new_v4().to_string();
    let interface = error.into_interface(correlation_id.clone());
    let (error_class, exit_code) = match &interface {
        InterfaceError::BadRequest { .. } => ("bad_request", 7),
        InterfaceError::Forbidden { .. } => ("forbidden", 8),
        InterfaceError::ServiceUnavailable { .. } => ("persistence", 9),
        InterfaceError::Internal { .. } => ("internal", 10),
    };

    warn!(
        event_name = "cli.command.failed",
        correlation_id = %correlation_id,
        error_class,
        error = %interface,
        "recognition command failed"
    );
    (error_class, format!("{interface} (correlation id {correlation_id})"), exit_code)
}

fn bootstrap_failure(error: BootstrapError) -> Failure {
    match error {
        BootstrapError::Config(error) => {
            ("config_validation", format!("configuration issue: {error}"), 2)
        }
        BootstrapError::DatabaseConnect(error) => ("db_connectivity", error.to_string(), 4),
        BootstrapError::Migration(error) => ("migration", error.to_string(), 5),
    }
}
