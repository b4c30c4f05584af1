//! SQLite implementation of [`ClearanceStorage`]
//!
//! A settlement is one transaction. The first statement is a compare-and-swap
//! on the profile revision, so a concurrent writer that committed first makes
//! this commit fail instead of double-applying.

use std::str::FromStr;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::{is_unique_violation, schema};
use crate::traits::*;
use crate::types::*;
use crate::utils::normalize::normalize_key;

const PROFILE_COLUMNS: &str = "username, email, school_fee_due, penalty_fee, excess_fee, \
     graduation_fee_paid, internship_fee_paid, revision";

const USER_COLUMNS: &str = "username, email, password_hash, matricule, created_at";

/// SQLite implementation of ClearanceStorage
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage over an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for `url`
    pub async fn connect(url: &str) -> ClearanceResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Initialize the database schema
    pub async fn init(&self) -> ClearanceResult<()> {
        for statement in schema::ALL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Clearance history for one profile, oldest first
    async fn load_history(&self, username: &str) -> ClearanceResult<Vec<ClearanceEntry>> {
        let rows = sqlx::query(
            "SELECT c.clearance_id, c.receipt_user, cr.receipt_id \
             FROM clearances c \
             LEFT JOIN clearance_receipts cr ON cr.clearance_id = c.clearance_id \
             WHERE c.username = ?1 \
             ORDER BY c.clearance_id, cr.position",
        )
        .bind(username.trim())
        .fetch_all(&self.pool)
        .await?;

        let mut history: Vec<ClearanceEntry> = Vec::new();
        for row in rows {
            let clearance_id: i64 = row.try_get("clearance_id")?;
            let receipt_id: Option<String> = row.try_get("receipt_id")?;
            match history.last_mut() {
                Some(entry) if entry.clearance_id == clearance_id => {
                    entry.receipt_ids.extend(receipt_id);
                }
                _ => history.push(ClearanceEntry {
                    clearance_id,
                    email: row.try_get("receipt_user")?,
                    receipt_ids: receipt_id.into_iter().collect(),
                }),
            }
        }
        Ok(history)
    }

    async fn with_history(&self, mut profile: Profile) -> ClearanceResult<Profile> {
        profile.used_receipt = self.load_history(&profile.username).await?;
        Ok(profile)
    }

    async fn apply_settlement(&self, settlement: &Settlement) -> ClearanceResult<Clearance> {
        let username = settlement.username.trim();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE profiles SET penalty_fee = '0', excess_fee = ?1, revision = revision + 1 \
             WHERE username = ?2 AND revision = ?3",
        )
        .bind(settlement.excess_fee.to_string())
        .bind(username)
        .bind(settlement.expected_revision)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(ClearanceError::CommitFailed(format!(
                "profile '{}' changed since it was read",
                settlement.username
            )));
        }

        let email: String = sqlx::query_scalar("SELECT email FROM profiles WHERE username = ?1")
            .bind(username)
            .fetch_one(&mut *tx)
            .await?;

        let created_at = chrono::Utc::now().naive_utc();
        let inserted = sqlx::query(
            "INSERT INTO clearances (username, receipt_user, receipt_id, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(username)
        .bind(&email)
        .bind(&settlement.reference)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
        let clearance_id = inserted.last_insert_rowid();

        for (position, receipt_id) in settlement.receipt_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO clearance_receipts (clearance_id, position, receipt_id) \
                 VALUES (?1, ?2, ?3)",
            )
            .bind(clearance_id)
            .bind(position as i64)
            .bind(receipt_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO used_receipts (receipt_key, receipt_id, user_key, receipt_user, used_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(normalize_key(receipt_id))
            .bind(receipt_id)
            .bind(normalize_key(username))
            .bind(username)
            .bind(created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ClearanceError::CommitFailed(format!(
                        "receipt '{}' is already used",
                        receipt_id
                    ))
                } else {
                    ClearanceError::from(e)
                }
            })?;
        }

        tx.commit().await?;
        debug!(username, clearance_id, "settlement committed");

        Ok(Clearance {
            clearance_id,
            receipt_user: email,
            receipt_id: settlement.reference.clone(),
            created_at,
        })
    }
}

fn decimal(row: &SqliteRow, column: &str) -> ClearanceResult<BigDecimal> {
    let text: String = row.try_get(column)?;
    BigDecimal::from_str(&text)
        .map_err(|e| ClearanceError::Storage(format!("column {} holds '{}': {}", column, text, e)))
}

fn profile_from_row(row: &SqliteRow) -> ClearanceResult<Profile> {
    Ok(Profile {
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        school_fee_due: decimal(row, "school_fee_due")?,
        penalty_fee: decimal(row, "penalty_fee")?,
        excess_fee: decimal(row, "excess_fee")?,
        used_receipt: Vec::new(),
        graduation_fee_paid: row.try_get("graduation_fee_paid")?,
        internship_fee_paid: row.try_get("internship_fee_paid")?,
        revision: row.try_get("revision")?,
    })
}

fn user_from_row(row: &SqliteRow) -> ClearanceResult<User> {
    Ok(User {
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        matricule: row.try_get("matricule")?,
        created_at: row.try_get::<NaiveDateTime, _>("created_at")?,
    })
}

fn used_receipt_from_row(row: &SqliteRow) -> ClearanceResult<UsedReceipt> {
    Ok(UsedReceipt {
        receipt_id: row.try_get("receipt_id")?,
        receipt_user: row.try_get("receipt_user")?,
        used_at: row.try_get::<NaiveDateTime, _>("used_at")?,
    })
}

/// Lowercased search term, `None` for no filter
fn search_term(search: Option<&str>) -> Option<String> {
    search.map(normalize_key).filter(|s| !s.is_empty())
}

/// Conflict message for a failed registration insert
fn registration_conflict(err: &sqlx::Error, user: &User) -> ClearanceError {
    let message = err
        .as_database_error()
        .map(|db| db.message().to_string())
        .unwrap_or_default();
    if message.contains("users.email") {
        ClearanceError::Conflict(format!("Account with the email '{}' already exists", user.email))
    } else if message.contains("users.matricule") {
        ClearanceError::Conflict(format!(
            "Matricule '{}' is already registered",
            user.matricule.as_deref().unwrap_or_default()
        ))
    } else {
        ClearanceError::Conflict(format!("Username '{}' is already registered", user.username))
    }
}

#[async_trait]
impl ProfileStore for SqliteStorage {
    async fn get_profile(&self, username: &str) -> ClearanceResult<Option<Profile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM profiles WHERE username = ?1",
            PROFILE_COLUMNS
        ))
        .bind(username.trim())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.with_history(profile_from_row(&row)?).await?)),
            None => Ok(None),
        }
    }

    async fn list_profiles(&self, search: Option<&str>) -> ClearanceResult<Vec<Profile>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM profiles \
             WHERE ?1 IS NULL OR instr(lower(email), ?1) > 0 OR instr(lower(username), ?1) > 0 \
             ORDER BY username",
            PROFILE_COLUMNS
        ))
        .bind(search_term(search))
        .fetch_all(&self.pool)
        .await?;

        let mut profiles = Vec::with_capacity(rows.len());
        for row in &rows {
            profiles.push(self.with_history(profile_from_row(row)?).await?);
        }
        Ok(profiles)
    }

    async fn update_fees(&self, username: &str, fees: &FeeSchedule) -> ClearanceResult<Profile> {
        let updated = sqlx::query(
            "UPDATE profiles SET school_fee_due = ?1, penalty_fee = ?2, excess_fee = ?3, \
             revision = revision + 1 WHERE username = ?4",
        )
        .bind(fees.school_fee_due.to_string())
        .bind(fees.penalty_fee.to_string())
        .bind(fees.excess_fee.to_string())
        .bind(username.trim())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(ClearanceError::ProfileNotFound(username.to_string()));
        }
        self.get_profile(username)
            .await?
            .ok_or_else(|| ClearanceError::ProfileNotFound(username.to_string()))
    }
}

#[async_trait]
impl UsageStore for SqliteStorage {
    async fn used_receipts_for_user(&self, username: &str) -> ClearanceResult<Vec<UsedReceipt>> {
        let rows = sqlx::query(
            "SELECT receipt_id, receipt_user, used_at FROM used_receipts WHERE user_key = ?1",
        )
        .bind(normalize_key(username))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(used_receipt_from_row).collect()
    }

    async fn find_used_receipts(&self, receipt_ids: &[String]) -> ClearanceResult<Vec<UsedReceipt>> {
        if receipt_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; receipt_ids.len()].join(", ");
        let sql = format!(
            "SELECT receipt_id, receipt_user, used_at FROM used_receipts WHERE receipt_key IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for receipt_id in receipt_ids {
            query = query.bind(normalize_key(receipt_id));
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(used_receipt_from_row).collect()
    }

    async fn list_used_receipts(&self, search: Option<&str>) -> ClearanceResult<Vec<UsedReceipt>> {
        let rows = sqlx::query(
            "SELECT receipt_id, receipt_user, used_at FROM used_receipts \
             WHERE ?1 IS NULL OR instr(user_key, ?1) > 0 OR instr(receipt_key, ?1) > 0 \
             ORDER BY used_at, receipt_id",
        )
        .bind(search_term(search))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(used_receipt_from_row).collect()
    }
}

#[async_trait]
impl ClearanceStorage for SqliteStorage {
    async fn register_user(&self, user: &User, profile: &Profile) -> ClearanceResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO users ({}) VALUES (?1, ?2, ?3, ?4, ?5)",
            USER_COLUMNS
        ))
        .bind(user.username.trim())
        .bind(user.email.trim())
        .bind(&user.password_hash)
        .bind(user.matricule.as_deref().map(str::trim))
        .bind(user.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                registration_conflict(&e, user)
            } else {
                ClearanceError::from(e)
            }
        })?;

        sqlx::query(&format!(
            "INSERT INTO profiles ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            PROFILE_COLUMNS
        ))
        .bind(profile.username.trim())
        .bind(profile.email.trim())
        .bind(profile.school_fee_due.to_string())
        .bind(profile.penalty_fee.to_string())
        .bind(profile.excess_fee.to_string())
        .bind(profile.graduation_fee_paid)
        .bind(profile.internship_fee_paid)
        .bind(profile.revision)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                registration_conflict(&e, user)
            } else {
                ClearanceError::from(e)
            }
        })?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_user(&self, username: &str) -> ClearanceResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE username = ?1",
            USER_COLUMNS
        ))
        .bind(username.trim())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_users(&self, search: Option<&str>) -> ClearanceResult<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users \
             WHERE ?1 IS NULL OR instr(lower(email), ?1) > 0 OR instr(lower(username), ?1) > 0 \
             OR instr(lower(coalesce(matricule, '')), ?1) > 0 \
             ORDER BY username",
            USER_COLUMNS
        ))
        .bind(search_term(search))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn update_identity(&self, change: &IdentityChange) -> ClearanceResult<()> {
        let old_username = change.old_username.trim();
        let new_username = change.new_username.trim();
        let new_email = change.new_email.trim();
        let mut tx = self.pool.begin().await?;

        let conflict = |e: sqlx::Error| {
            if is_unique_violation(&e) {
                ClearanceError::Conflict(format!(
                    "email '{}' or username '{}' belongs to another user",
                    change.new_email, change.new_username
                ))
            } else {
                ClearanceError::from(e)
            }
        };

        let updated = sqlx::query(
            "UPDATE users SET username = ?1, email = ?2 WHERE username = ?3 AND email = ?4",
        )
        .bind(new_username)
        .bind(new_email)
        .bind(old_username)
        .bind(change.old_email.trim())
        .execute(&mut *tx)
        .await
        .map_err(conflict)?;
        if updated.rows_affected() == 0 {
            return Err(ClearanceError::UserNotFound(format!(
                "no user with email '{}' and username '{}'",
                change.old_email, change.old_username
            )));
        }

        sqlx::query(
            "UPDATE profiles SET username = ?1, email = ?2, revision = revision + 1 \
             WHERE username = ?3",
        )
        .bind(new_username)
        .bind(new_email)
        .bind(old_username)
        .execute(&mut *tx)
        .await
        .map_err(conflict)?;

        sqlx::query("UPDATE clearances SET username = ?1 WHERE username = ?2")
            .bind(new_username)
            .bind(old_username)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn commit_settlement(&self, settlement: &Settlement) -> ClearanceResult<Clearance> {
        // The transaction rolls back when dropped uncommitted
        self.apply_settlement(settlement).await.map_err(|e| match e {
            ClearanceError::CommitFailed(msg) => ClearanceError::CommitFailed(msg),
            other => ClearanceError::CommitFailed(other.to_string()),
        })
    }

    async fn list_clearances(&self, search: Option<&str>) -> ClearanceResult<Vec<Clearance>> {
        let rows = sqlx::query(
            "SELECT clearance_id, receipt_user, receipt_id, created_at FROM clearances \
             WHERE ?1 IS NULL OR instr(lower(receipt_user), ?1) > 0 OR instr(lower(receipt_id), ?1) > 0 \
             ORDER BY clearance_id",
        )
        .bind(search_term(search))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> ClearanceResult<Clearance> {
                Ok(Clearance {
                    clearance_id: row.try_get("clearance_id")?,
                    receipt_user: row.try_get("receipt_user")?,
                    receipt_id: row.try_get("receipt_id")?,
                    created_at: row.try_get::<NaiveDateTime, _>("created_at")?,
                })
            })
            .collect()
    }
}
