use std::collections::HashMap;

use chrono::{DateTime, SubsecRound, Utc};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqliteConnection};
use uuid::Uuid;

use accolade_core::domain::employee::EmployeeId;
use accolade_core::domain::nomination::{
    FinalizationId, FinalizationRecord, MetricSnapshot, Nomination, NominationId,
    PopulatedNomination, Vote, VoteLedger, VoteValue, VoterId,
};
use accolade_core::domain::period::WinnerScope;

use super::employee::{profile_from_row, EMPLOYEE_PROFILE_COLUMNS, EMPLOYEE_PROFILE_JOINS};
use super::{
    decode_timestamp, encode_timestamp, FinalizationOutcome, NominationQuery, NominationRepository,
    NominationSort, Populate, RepositoryError,
};
use crate::DbPool;

const NOMINATION_COLUMNS: &str = "
    n.id AS nomination_id,
    n.employee_id AS nomination_employee_id,
    n.metrics_json,
    n.message,
    n.is_winner,
    n.nomination_date,
    n.finalization_date";

pub struct SqlNominationRepository {
    pool: DbPool,
}

impl SqlNominationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn select_head(populate: Populate) -> String {
    match populate {
        Populate::None => format!("SELECT {NOMINATION_COLUMNS} FROM nomination n"),
        Populate::Employee => format!(
            "SELECT {NOMINATION_COLUMNS}, {EMPLOYEE_PROFILE_COLUMNS}
             FROM nomination n
             LEFT JOIN employee e ON e.id = n.employee_id {EMPLOYEE_PROFILE_JOINS}"
        ),
    }
}

fn decode_err(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

fn nomination_from_row(row: &SqliteRow) -> Result<Nomination, RepositoryError> {
    let id: String = row.try_get("nomination_id").map_err(decode_err)?;
    let employee_id: String = row.try_get("nomination_employee_id").map_err(decode_err)?;
    let metrics_json: String = row.try_get("metrics_json").map_err(decode_err)?;
    let message: String = row.try_get("message").map_err(decode_err)?;
    let is_winner: bool = row.try_get("is_winner").map_err(decode_err)?;
    let nomination_date: String = row.try_get("nomination_date").map_err(decode_err)?;
    let finalization_date: Option<String> =
        row.try_get("finalization_date").map_err(decode_err)?;

    let metrics = serde_json::from_str::<MetricSnapshot>(&metrics_json).map_err(|error| {
        RepositoryError::Decode(format!("nomination {id} has unreadable metrics: {error}"))
    })?;

    let nomination = Nomination {
        id: NominationId(id),
        employee_id: EmployeeId(employee_id),
        metrics,
        message,
        votes: VoteLedger::default(),
        is_winner,
        nomination_date: decode_timestamp(&nomination_date)?,
        finalization_date: finalization_date.as_deref().map(decode_timestamp).transpose()?,
    };
    nomination.check_invariants().map_err(|error| RepositoryError::Decode(error.to_string()))?;
    Ok(nomination)
}

fn vote_from_row(row: &SqliteRow) -> Result<Vote, RepositoryError> {
    let voter_id: String = row.try_get("voter_id").map_err(decode_err)?;
    let vote_value: i64 = row.try_get("vote_value").map_err(decode_err)?;
    let voted_at: String = row.try_get("voted_at").map_err(decode_err)?;

    Ok(Vote {
        voter: VoterId(voter_id),
        value: VoteValue::try_from(vote_value)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?,
        voted_at: decode_timestamp(&voted_at)?,
    })
}

fn finalization_from_row(row: &SqliteRow) -> Result<FinalizationRecord, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_err)?;
    let nomination_id: String = row.try_get("nomination_id").map_err(decode_err)?;
    let retracted_json: String = row.try_get("retracted_json").map_err(decode_err)?;
    let scope: String = row.try_get("winner_scope").map_err(decode_err)?;
    let finalized_at: String = row.try_get("finalized_at").map_err(decode_err)?;

    Ok(FinalizationRecord {
        retracted: serde_json::from_str(&retracted_json).map_err(|error| {
            RepositoryError::Decode(format!("finalization {id} has unreadable retractions: {error}"))
        })?,
        scope: WinnerScope::parse(&scope)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown winner scope `{scope}`")))?,
        finalized_at: decode_timestamp(&finalized_at)?,
        id: FinalizationId(id),
        nomination_id: NominationId(nomination_id),
    })
}

/// Loads the ballots for every listed nomination, grouped by nomination id.
async fn load_votes(
    conn: &mut SqliteConnection,
    nomination_ids: &[&str],
) -> Result<HashMap<String, Vec<Vote>>, RepositoryError> {
    let mut grouped: HashMap<String, Vec<Vote>> = HashMap::new();
    if nomination_ids.is_empty() {
        return Ok(grouped);
    }

    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT nomination_id, voter_id, vote_value, voted_at FROM nomination_vote WHERE nomination_id IN (",
    );
    let mut separated = builder.separated(", ");
    for id in nomination_ids {
        separated.push_bind(id.to_string());
    }
    separated.push_unseparated(")");

    let rows = builder.build().fetch_all(&mut *conn).await?;
    for row in &rows {
        let nomination_id: String = row.try_get("nomination_id").map_err(decode_err)?;
        grouped.entry(nomination_id).or_default().push(vote_from_row(row)?);
    }

    Ok(grouped)
}

async fn attach_votes(
    conn: &mut SqliteConnection,
    rows: &[SqliteRow],
    populate: Populate,
) -> Result<Vec<PopulatedNomination>, RepositoryError> {
    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let nomination = nomination_from_row(row)?;
        let employee = match populate {
            Populate::None => None,
            Populate::Employee => profile_from_row(row)?,
        };
        items.push(PopulatedNomination { nomination, employee });
    }

    let ids = items.iter().map(|item| item.nomination.id.0.as_str()).collect::<Vec<_>>();
    let mut votes = load_votes(conn, &ids).await?;
    for item in &mut items {
        if let Some(ballots) = votes.remove(&item.nomination.id.0) {
            item.nomination.votes = ballots.into_iter().collect();
        }
    }

    Ok(items)
}

async fn load_nomination(
    conn: &mut SqliteConnection,
    id: &NominationId,
    populate: Populate,
) -> Result<Option<PopulatedNomination>, RepositoryError> {
    let sql = format!("{} WHERE n.id = ?", select_head(populate));
    let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&mut *conn).await?;

    match row {
        Some(row) => Ok(attach_votes(conn, &[row], populate).await?.pop()),
        None => Ok(None),
    }
}

#[async_trait::async_trait]
impl NominationRepository for SqlNominationRepository {
    async fn create(&self, nomination: &Nomination) -> Result<(), RepositoryError> {
        let metrics_json = serde_json::to_string(&nomination.metrics)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO nomination (id, employee_id, metrics_json, message, is_winner,
                                     nomination_date, finalization_date)
             SELECT ?, ?, ?, ?, ?, ?, ?
             WHERE EXISTS (SELECT 1 FROM employee WHERE id = ?)",
        )
        .bind(&nomination.id.0)
        .bind(&nomination.employee_id.0)
        .bind(&metrics_json)
        .bind(&nomination.message)
        .bind(nomination.is_winner)
        .bind(encode_timestamp(nomination.nomination_date))
        .bind(nomination.finalization_date.map(encode_timestamp))
        .bind(&nomination.employee_id.0)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(RepositoryError::Constraint(format!(
                "employee {} does not exist",
                nomination.employee_id.0
            )));
        }

        for vote in nomination.votes.iter() {
            sqlx::query(
                "INSERT INTO nomination_vote (nomination_id, voter_id, vote_value, voted_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&nomination.id.0)
            .bind(&vote.voter.0)
            .bind(vote.value.weight())
            .bind(encode_timestamp(vote.voted_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &NominationId,
        populate: Populate,
    ) -> Result<Option<PopulatedNomination>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let found = load_nomination(&mut tx, id, populate).await?;
        tx.commit().await?;
        Ok(found)
    }

    async fn upsert_vote(
        &self,
        id: &NominationId,
        vote: Vote,
    ) -> Result<Option<Nomination>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let written = sqlx::query(
            "INSERT INTO nomination_vote (nomination_id, voter_id, vote_value, voted_at)
             SELECT ?, ?, ?, ? WHERE EXISTS (SELECT 1 FROM nomination WHERE id = ?)
             ON CONFLICT(nomination_id, voter_id) DO UPDATE SET
                 vote_value = excluded.vote_value,
                 voted_at = excluded.voted_at",
        )
        .bind(&id.0)
        .bind(&vote.voter.0)
        .bind(vote.value.weight())
        .bind(encode_timestamp(vote.voted_at))
        .bind(&id.0)
        .execute(&mut *tx)
        .await?;

        if written.rows_affected() == 0 {
            return Ok(None);
        }

        let updated = load_nomination(&mut tx, id, Populate::None).await?;
        tx.commit().await?;
        Ok(updated.map(|item| item.nomination))
    }

    async fn find_vote(
        &self,
        id: &NominationId,
        voter: &VoterId,
    ) -> Result<Option<Vote>, RepositoryError> {
        let row = sqlx::query(
            "SELECT voter_id, vote_value, voted_at FROM nomination_vote
             WHERE nomination_id = ? AND voter_id = ?",
        )
        .bind(&id.0)
        .bind(&voter.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(vote_from_row).transpose()
    }

    async fn tally(&self, id: &NominationId) -> Result<Option<i64>, RepositoryError> {
        let tally: Option<i64> = sqlx::query_scalar(
            "SELECT (SELECT COALESCE(SUM(v.vote_value), 0) FROM nomination_vote v
                     WHERE v.nomination_id = n.id)
             FROM nomination n WHERE n.id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tally)
    }

    async fn finalize(
        &self,
        id: &NominationId,
        scope: WinnerScope,
        at: DateTime<Utc>,
    ) -> Result<Option<FinalizationOutcome>, RepositoryError> {
        let at = at.trunc_subsecs(6);
        let finalized_at = encode_timestamp(at);
        let mut tx = self.pool.begin().await?;

        // Promote first so the transaction holds the write lock before reading anything.
        let promoted = sqlx::query(
            "UPDATE nomination SET is_winner = 1, finalization_date = ?
             WHERE id = ?
             RETURNING nomination_date",
        )
        .bind(&finalized_at)
        .bind(&id.0)
        .fetch_optional(&mut *tx)
        .await?;

        // A global scope clears standing winners even when the target is unknown.
        let Some(promoted) = promoted else {
            if scope == WinnerScope::Global {
                sqlx::query(
                    "UPDATE nomination SET is_winner = 0, finalization_date = NULL
                     WHERE is_winner = 1",
                )
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
            }
            return Ok(None);
        };
        let nominated_at: String = promoted.try_get("nomination_date").map_err(decode_err)?;
        let nominated_at = decode_timestamp(&nominated_at)?;

        let retracted_rows = match scope.retraction_window(nominated_at) {
            None => {
                sqlx::query(
                    "UPDATE nomination SET is_winner = 0, finalization_date = NULL
                     WHERE is_winner = 1 AND id <> ?
                     RETURNING id",
                )
                .bind(&id.0)
                .fetch_all(&mut *tx)
                .await?
            }
            Some(window) => {
                sqlx::query(
                    "UPDATE nomination SET is_winner = 0, finalization_date = NULL
                     WHERE is_winner = 1 AND id <> ? AND nomination_date BETWEEN ? AND ?
                     RETURNING id",
                )
                .bind(&id.0)
                .bind(encode_timestamp(window.start))
                .bind(encode_timestamp(window.end))
                .fetch_all(&mut *tx)
                .await?
            }
        };

        let mut retracted = retracted_rows
            .iter()
            .map(|row| row.try_get::<String, _>("id").map(NominationId))
            .collect::<Result<Vec<_>, _>>()
            .map_err(decode_err)?;
        retracted.sort();

        let record = FinalizationRecord {
            id: FinalizationId(Uuid::new_v4().to_string()),
            nomination_id: id.clone(),
            retracted,
            scope,
            finalized_at: at,
        };
        let retracted_json = serde_json::to_string(&record.retracted)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO nomination_finalization (id, nomination_id, retracted_json, winner_scope, finalized_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(&record.nomination_id.0)
        .bind(&retracted_json)
        .bind(record.scope.as_str())
        .bind(&finalized_at)
        .execute(&mut *tx)
        .await?;

        let nomination = load_nomination(&mut tx, id, Populate::None)
            .await?
            .map(|item| item.nomination)
            .ok_or_else(|| {
                RepositoryError::Decode(format!("nomination {} vanished during finalization", id.0))
            })?;

        tx.commit().await?;
        Ok(Some(FinalizationOutcome { nomination, record }))
    }

    async fn query(
        &self,
        query: &NominationQuery,
    ) -> Result<Vec<PopulatedNomination>, RepositoryError> {
        let filter = &query.filter;
        let mut builder = QueryBuilder::<Sqlite>::new(select_head(query.populate));
        builder.push(" WHERE 1 = 1");

        if let Some(is_winner) = filter.is_winner {
            builder.push(" AND n.is_winner = ").push_bind(is_winner);
        }
        match filter.finalized {
            Some(true) => {
                builder.push(" AND n.finalization_date IS NOT NULL");
            }
            Some(false) => {
                builder.push(" AND n.finalization_date IS NULL");
            }
            None => {}
        }
        match filter.ever_finalized {
            Some(true) => {
                builder.push(
                    " AND EXISTS (SELECT 1 FROM nomination_finalization f WHERE f.nomination_id = n.id)",
                );
            }
            Some(false) => {
                builder.push(
                    " AND NOT EXISTS (SELECT 1 FROM nomination_finalization f WHERE f.nomination_id = n.id)",
                );
            }
            None => {}
        }
        if let Some(employee_id) = &filter.employee_id {
            builder.push(" AND n.employee_id = ").push_bind(employee_id.0.clone());
        }
        if let Some(window) = filter.nominated_within {
            builder
                .push(" AND n.nomination_date BETWEEN ")
                .push_bind(encode_timestamp(window.start))
                .push(" AND ")
                .push_bind(encode_timestamp(window.end));
        }
        if let Some(window) = filter.finalized_within {
            builder
                .push(" AND n.finalization_date BETWEEN ")
                .push_bind(encode_timestamp(window.start))
                .push(" AND ")
                .push_bind(encode_timestamp(window.end));
        }

        builder.push(match query.sort {
            NominationSort::NominationDateAsc => " ORDER BY n.nomination_date ASC, n.id ASC",
            NominationSort::FinalizationDateDesc => {
                " ORDER BY n.finalization_date DESC, n.id DESC"
            }
        });
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let mut tx = self.pool.begin().await?;
        let rows = builder.build().fetch_all(&mut *tx).await?;
        let items = attach_votes(&mut tx, &rows, query.populate).await?;
        tx.commit().await?;

        Ok(items)
    }

    async fn finalization_history(
        &self,
        limit: u32,
    ) -> Result<Vec<FinalizationRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, nomination_id, retracted_json, winner_scope, finalized_at
             FROM nomination_finalization
             ORDER BY finalized_at DESC, id DESC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(finalization_from_row).collect()
    }
}
