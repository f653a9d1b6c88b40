use sqlx::{sqlite::SqliteRow, Row};

use accolade_core::domain::employee::{
    Avatar, Department, EmployeeId, EmployeeProfile, Position,
};

use super::{EmployeeRepository, RepositoryError};
use crate::DbPool;

/// Column list shared by every query that joins an employee with its references.
/// Expects the employee table aliased as `e`.
pub(crate) const EMPLOYEE_PROFILE_COLUMNS: &str = "
    e.id AS employee_id,
    e.full_name AS employee_full_name,
    e.email AS employee_email,
    a.id AS avatar_id,
    a.url AS avatar_url,
    d.id AS department_id,
    d.name AS department_name,
    p.id AS position_id,
    p.title AS position_title";

pub(crate) const EMPLOYEE_PROFILE_JOINS: &str = "
    LEFT JOIN employee_avatar a ON a.id = e.avatar_id
    LEFT JOIN department d ON d.id = e.department_id
    LEFT JOIN job_position p ON p.id = e.position_id";

pub struct SqlEmployeeRepository {
    pool: DbPool,
}

impl SqlEmployeeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Decodes the aliased profile columns. `None` when the left join found no employee.
pub(crate) fn profile_from_row(row: &SqliteRow) -> Result<Option<EmployeeProfile>, RepositoryError> {
    let decode = |error: sqlx::Error| RepositoryError::Decode(error.to_string());

    let Some(id) = row.try_get::<Option<String>, _>("employee_id").map_err(decode)? else {
        return Ok(None);
    };
    let full_name: String = row.try_get("employee_full_name").map_err(decode)?;
    let email: String = row.try_get("employee_email").map_err(decode)?;

    let avatar_id: Option<String> = row.try_get("avatar_id").map_err(decode)?;
    let avatar_url: Option<String> = row.try_get("avatar_url").map_err(decode)?;
    let department_id: Option<String> = row.try_get("department_id").map_err(decode)?;
    let department_name: Option<String> = row.try_get("department_name").map_err(decode)?;
    let position_id: Option<String> = row.try_get("position_id").map_err(decode)?;
    let position_title: Option<String> = row.try_get("position_title").map_err(decode)?;

    Ok(Some(EmployeeProfile {
        id: EmployeeId(id),
        full_name,
        email,
        avatar: avatar_id.zip(avatar_url).map(|(id, url)| Avatar { id, url }),
        department: department_id.zip(department_name).map(|(id, name)| Department { id, name }),
        position: position_id.zip(position_title).map(|(id, title)| Position { id, title }),
    }))
}

#[async_trait::async_trait]
impl EmployeeRepository for SqlEmployeeRepository {
    async fn find_by_id(
        &self,
        id: &EmployeeId,
    ) -> Result<Option<EmployeeProfile>, RepositoryError> {
        let sql = format!(
            "SELECT {EMPLOYEE_PROFILE_COLUMNS} FROM employee e {EMPLOYEE_PROFILE_JOINS} WHERE e.id = ?"
        );
        let row = sqlx::query(&sql).bind(&id.0).fetch_optional(&self.pool).await?;

        match row {
            Some(ref row) => profile_from_row(row),
            None => Ok(None),
        }
    }

    async fn save(&self, employee: EmployeeProfile) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        if let Some(avatar) = &employee.avatar {
            sqlx::query(
                "INSERT INTO employee_avatar (id, url) VALUES (?, ?)
                 ON CONFLICT(id) DO UPDATE SET url = excluded.url",
            )
            .bind(&avatar.id)
            .bind(&avatar.url)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(department) = &employee.department {
            sqlx::query(
                "INSERT INTO department (id, name) VALUES (?, ?)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            )
            .bind(&department.id)
            .bind(&department.name)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(position) = &employee.position {
            sqlx::query(
                "INSERT INTO job_position (id, title) VALUES (?, ?)
                 ON CONFLICT(id) DO UPDATE SET title = excluded.title",
            )
            .bind(&position.id)
            .bind(&position.title)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO employee (id, full_name, email, avatar_id, department_id, position_id)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 full_name = excluded.full_name,
                 email = excluded.email,
                 avatar_id = excluded.avatar_id,
                 department_id = excluded.department_id,
                 position_id = excluded.position_id",
        )
        .bind(&employee.id.0)
        .bind(&employee.full_name)
        .bind(&employee.email)
        .bind(employee.avatar.as_ref().map(|avatar| avatar.id.as_str()))
        .bind(employee.department.as_ref().map(|department| department.id.as_str()))
        .bind(employee.position.as_ref().map(|position| position.id.as_str()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
