use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Roster rows the demo fixture guarantees, with the references each one carries.
const ROSTER: &[RosterEntry] = &[
    RosterEntry {
        employee_id: "emp-ada",
        full_name: "Ada Lovelace",
        avatar_id: Some("avatar-ada"),
        department_id: Some("dept-eng"),
        position_id: Some("pos-staff-eng"),
    },
    RosterEntry {
        employee_id: "emp-grace",
        full_name: "Grace Hopper",
        avatar_id: Some("avatar-grace"),
        department_id: Some("dept-eng"),
        position_id: Some("pos-staff-eng"),
    },
    RosterEntry {
        employee_id: "emp-linus",
        full_name: "Linus Pauling",
        avatar_id: Some("avatar-linus"),
        department_id: Some("dept-ops"),
        position_id: Some("pos-sre"),
    },
    RosterEntry {
        employee_id: "emp-mary",
        full_name: "Mary Jackson",
        avatar_id: None,
        department_id: Some("dept-support"),
        position_id: Some("pos-support-lead"),
    },
    RosterEntry {
        employee_id: "emp-alan",
        full_name: "Alan Kay",
        avatar_id: None,
        department_id: None,
        position_id: None,
    },
];

const AVATAR_IDS: &[&str] = &["avatar-ada", "avatar-grace", "avatar-linus"];
const DEPARTMENT_IDS: &[&str] = &["dept-eng", "dept-ops", "dept-support"];
const POSITION_IDS: &[&str] = &["pos-staff-eng", "pos-sre", "pos-support-lead"];

/// Small employee roster so nominations can be created against a fresh database.
pub struct DemoRoster;

impl DemoRoster {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_roster.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let employees_seeded = ROSTER
            .iter()
            .map(|entry| EmployeeSeedInfo {
                employee_id: entry.employee_id,
                full_name: entry.full_name,
            })
            .collect();

        Ok(SeedResult { employees_seeded })
    }

    /// Checks that every roster row exists with the references it was seeded with.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        checks.push(("avatars", count_present(pool, "employee_avatar", AVATAR_IDS).await?));
        checks.push(("departments", count_present(pool, "department", DEPARTMENT_IDS).await?));
        checks.push(("positions", count_present(pool, "job_position", POSITION_IDS).await?));

        for entry in ROSTER {
            let matches: i64 = sqlx::query_scalar(
                "SELECT EXISTS(
                     SELECT 1 FROM employee
                     WHERE id = ?1
                       AND full_name = ?2
                       AND avatar_id IS ?3
                       AND department_id IS ?4
                       AND position_id IS ?5
                 )",
            )
            .bind(entry.employee_id)
            .bind(entry.full_name)
            .bind(entry.avatar_id)
            .bind(entry.department_id)
            .bind(entry.position_id)
            .fetch_one(pool)
            .await?;
            checks.push((entry.employee_id, matches == 1));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the roster. Fails if nominations still reference a demo employee.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let employee_ids = ROSTER.iter().map(|entry| entry.employee_id).collect::<Vec<_>>();
        let mut tx = pool.begin().await?;

        sqlx::query(&format!("DELETE FROM employee WHERE id IN {}", sql_array_from_ids(&employee_ids)))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM employee_avatar WHERE id IN {}", sql_array_from_ids(AVATAR_IDS)))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM department WHERE id IN {}", sql_array_from_ids(DEPARTMENT_IDS)))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM job_position WHERE id IN {}", sql_array_from_ids(POSITION_IDS)))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

/// Loads the demo roster. Entry point used by `accolade seed`.
pub async fn seed_demo(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
    DemoRoster::load(pool).await
}

async fn count_present(
    pool: &DbPool,
    table: &str,
    ids: &[&str],
) -> Result<bool, RepositoryError> {
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(1) FROM {table} WHERE id IN {}",
        sql_array_from_ids(ids)
    ))
    .fetch_one(pool)
    .await?;
    Ok(count == ids.len() as i64)
}

#[derive(Debug, Clone, Copy)]
struct RosterEntry {
    employee_id: &'static str,
    full_name: &'static str,
    avatar_id: Option<&'static str>,
    department_id: Option<&'static str>,
    position_id: Option<&'static str>,
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{id}'")).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub employees_seeded: Vec<EmployeeSeedInfo>,
}

#[derive(Debug)]
pub struct EmployeeSeedInfo {
    pub employee_id: &'static str,
    pub full_name: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
