//! Database access layer for sessions and photos

use super::types::{PhotoRow, SessionRow, SessionStatus};
use crate::error::Result;
use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Statuses a new session displaces on create
const NON_TERMINAL: &str = "'active', 'countdown', 'capturing'";

/// Session/photo repository
#[derive(Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    /// Create new repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    const SESSION_COLUMNS: &'static str =
        "id, created_at, expires_at, status, upload_token, photo_count";
    const PHOTO_COLUMNS: &'static str =
        "id, session_id, sequence, captured_at, web_path, thumbnail_path";

    // ========================================
    // Session CRUD
    // ========================================

    /// Create a new Active session. Every other non-terminal session is
    /// forced to Completed in the same transaction; their ids are returned
    /// so the caller can tear down their live connections.
    pub async fn create_session(&self, expiry_minutes: i64) -> Result<(SessionRow, Vec<String>)> {
        let mut tx = self.pool.begin().await?;

        let displaced: Vec<String> = sqlx::query_scalar::<_, String>(&format!(
            "SELECT id FROM sessions WHERE status IN ({})",
            NON_TERMINAL
        ))
        .fetch_all(&mut *tx)
        .await?;

        if !displaced.is_empty() {
            sqlx::query(&format!(
                "UPDATE sessions SET status = 'completed' WHERE status IN ({})",
                NON_TERMINAL
            ))
            .execute(&mut *tx)
            .await?;
        }

        let now = Utc::now();
        let session = SessionRow {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            expires_at: now + Duration::minutes(expiry_minutes),
            status: SessionStatus::Active.as_str().to_string(),
            upload_token: generate_upload_token(),
            photo_count: 0,
        };

        sqlx::query(
            r#"
            INSERT INTO sessions (id, created_at, expires_at, status, upload_token, photo_count)
            VALUES (?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&session.id)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(&session.status)
        .bind(&session.upload_token)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            session_id = %session.id,
            displaced = displaced.len(),
            "Session created"
        );

        Ok((session, displaced))
    }

    /// Get session by id
    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRow>> {
        let query = format!(
            "SELECT {} FROM sessions WHERE id = ?",
            Self::SESSION_COLUMNS
        );
        let session = sqlx::query_as::<_, SessionRow>(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    /// Update session status
    pub async fn update_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        sqlx::query("UPDATE sessions SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Increment photo count by one, returning the new count
    pub async fn increment_photo_count(&self, session_id: &str) -> Result<i64> {
        sqlx::query("UPDATE sessions SET photo_count = photo_count + 1 WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        let count: i64 =
            sqlx::query_scalar("SELECT photo_count FROM sessions WHERE id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Latest non-terminal session, if any (captive portal landing)
    pub async fn latest_active_session(&self) -> Result<Option<SessionRow>> {
        let query = format!(
            "SELECT {} FROM sessions WHERE status IN ({}) ORDER BY created_at DESC LIMIT 1",
            Self::SESSION_COLUMNS,
            NON_TERMINAL
        );
        let session = sqlx::query_as::<_, SessionRow>(&query)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    /// True when any session other than `exclude_id` is mid-burst
    pub async fn other_session_mid_burst(&self, exclude_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sessions WHERE status IN ('countdown', 'capturing') AND id != ?",
        )
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// Delete a session and, via cascade, its photos
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================
    // Photo CRUD
    // ========================================

    /// Create a photo record
    pub async fn create_photo(
        &self,
        session_id: &str,
        sequence: i64,
        web_path: &str,
        thumbnail_path: &str,
    ) -> Result<PhotoRow> {
        let photo = PhotoRow {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            sequence,
            captured_at: Utc::now(),
            web_path: web_path.to_string(),
            thumbnail_path: thumbnail_path.to_string(),
        };

        sqlx::query(
            r#"
            INSERT INTO photos (id, session_id, sequence, captured_at, web_path, thumbnail_path)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&photo.id)
        .bind(&photo.session_id)
        .bind(photo.sequence)
        .bind(photo.captured_at)
        .bind(&photo.web_path)
        .bind(&photo.thumbnail_path)
        .execute(&self.pool)
        .await?;

        Ok(photo)
    }

    /// List a session's photos ordered by sequence
    pub async fn list_photos(&self, session_id: &str) -> Result<Vec<PhotoRow>> {
        let query = format!(
            "SELECT {} FROM photos WHERE session_id = ? ORDER BY sequence",
            Self::PHOTO_COLUMNS
        );
        let photos = sqlx::query_as::<_, PhotoRow>(&query)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(photos)
    }

    /// Get one photo within a session
    pub async fn get_photo(&self, session_id: &str, photo_id: &str) -> Result<Option<PhotoRow>> {
        let query = format!(
            "SELECT {} FROM photos WHERE session_id = ? AND id = ?",
            Self::PHOTO_COLUMNS
        );
        let photo = sqlx::query_as::<_, PhotoRow>(&query)
            .bind(session_id)
            .bind(photo_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(photo)
    }
}

/// Capability secret handed to the kiosk at session creation
fn generate_upload_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(43)
        .map(char::from)
        .collect()
}
