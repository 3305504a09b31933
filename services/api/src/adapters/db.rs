//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` and `DiagnosticsSink` ports from the core crate. It
//! handles all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use production_core::diagnostics::{
    DiagnosticEntry, DiagnosticRecord, FunnelEvent, FunnelStep,
};
use production_core::domain::{NewPublishedVideo, Profile, PublishedVideo, Visibility};
use production_core::policy::QuotaState;
use production_core::ports::{DatabaseService, DiagnosticsSink, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ProfileRecord {
    id: Uuid,
    username: Option<String>,
    ia_face_url: Option<String>,
    daily_video_count: i32,
    last_video_date: Option<NaiveDate>,
    last_bonus_date: Option<NaiveDate>,
    is_admin: bool,
}
impl ProfileRecord {
    fn to_domain(self) -> Profile {
        Profile {
            id: self.id,
            username: self.username,
            face_url: self.ia_face_url,
            quota: QuotaState {
                daily_count: self.daily_video_count.max(0) as u32,
                last_count_date: self.last_video_date,
                last_bonus_date: self.last_bonus_date,
            },
            is_admin: self.is_admin,
        }
    }
}

#[derive(FromRow)]
struct DebugLogRecord {
    id: i64,
    device_info: String,
    error_message: String,
    context: String,
    created_at: DateTime<Utc>,
}
impl DebugLogRecord {
    fn to_domain(self) -> DiagnosticRecord {
        DiagnosticRecord {
            id: self.id,
            device_info: self.device_info,
            error_message: self.error_message,
            context: self.context,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct FunnelEventRecord {
    session_id: String,
    step_name: String,
    created_at: DateTime<Utc>,
}
impl FunnelEventRecord {
    /// Steps this core does not know about are skipped.
    fn to_domain(self) -> Option<FunnelEvent> {
        Some(FunnelEvent {
            step: FunnelStep::from_str_value(&self.step_name)?,
            session_id: self.session_id,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct PublishedRecord {
    id: Uuid,
    user_id: Uuid,
    video_url: String,
    caption: String,
    category: String,
    oscar_count: i32,
    created_at: DateTime<Utc>,
}
impl PublishedRecord {
    fn to_domain(self, visibility: Visibility) -> PublishedVideo {
        PublishedVideo {
            id: self.id,
            user_id: self.user_id,
            video_url: self.video_url,
            caption: self.caption,
            category: self.category,
            visibility,
            oscar_count: self.oscar_count,
            created_at: self.created_at,
        }
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn resolve_bearer(&self, token: &str) -> PortResult<Uuid> {
        let user_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > NOW()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        user_id.ok_or(PortError::Unauthorized)
    }

    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile> {
        let record = sqlx::query_as::<_, ProfileRecord>(
            "SELECT id, username, ia_face_url, daily_video_count, last_video_date, \
             last_bonus_date, is_admin FROM profiles WHERE id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Profile {} not found", user_id)),
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn try_record_usage(
        &self,
        user_id: Uuid,
        today: NaiveDate,
        limit: u32,
    ) -> PortResult<Option<u32>> {
        // Single conditional statement: concurrent submissions cannot both
        // take the last slot.
        let count: Option<i32> = sqlx::query_scalar(
            "UPDATE profiles \
             SET daily_video_count = CASE WHEN last_video_date = $2 \
                     THEN daily_video_count + 1 ELSE 1 END, \
                 last_video_date = $2 \
             WHERE id = $1 \
               AND (CASE WHEN last_video_date = $2 THEN daily_video_count ELSE 0 END) < $3 \
             RETURNING daily_video_count",
        )
        .bind(user_id)
        .bind(today)
        .bind(limit as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(count.map(|c| c.max(0) as u32))
    }

    async fn save_quota(&self, user_id: Uuid, quota: &QuotaState) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE profiles SET daily_video_count = $1, last_video_date = $2, \
             last_bonus_date = $3 WHERE id = $4",
        )
        .bind(quota.daily_count as i32)
        .bind(quota.last_count_date)
        .bind(quota.last_bonus_date)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Profile {} not found", user_id)));
        }
        Ok(())
    }

    async fn maintenance_mode(&self) -> PortResult<bool> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT maintenance_mode FROM system_config WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(unexpected)?;
        Ok(flag.unwrap_or(false))
    }

    async fn set_maintenance_mode(&self, enabled: bool) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO system_config (id, maintenance_mode, updated_at) VALUES (1, $1, NOW()) \
             ON CONFLICT (id) DO UPDATE SET maintenance_mode = $1, updated_at = NOW()",
        )
        .bind(enabled)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn insert_published_video(
        &self,
        video: &NewPublishedVideo,
    ) -> PortResult<PublishedVideo> {
        let query = match video.visibility {
            Visibility::Public => {
                "INSERT INTO public_videos (id, user_id, video_url, caption, category, oscar_count) \
                 VALUES ($1, $2, $3, $4, $5, 0) \
                 RETURNING id, user_id, video_url, caption, category, oscar_count, created_at"
            }
            Visibility::Private => {
                "INSERT INTO films (id, user_id, video_url, prompt, category, status) \
                 VALUES ($1, $2, $3, $4, $5, 'privato') \
                 RETURNING id, user_id, video_url, prompt AS caption, category, \
                 0 AS oscar_count, created_at"
            }
        };
        let record = sqlx::query_as::<_, PublishedRecord>(query)
            .bind(Uuid::new_v4())
            .bind(video.user_id)
            .bind(&video.video_url)
            .bind(&video.caption)
            .bind(&video.category)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(record.to_domain(video.visibility))
    }

    async fn recent_diagnostics(&self, limit: i64) -> PortResult<Vec<DiagnosticRecord>> {
        let records = sqlx::query_as::<_, DebugLogRecord>(
            "SELECT id, device_info, error_message, context, created_at FROM debug_logs \
             ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn funnel_events_since(&self, since: DateTime<Utc>) -> PortResult<Vec<FunnelEvent>> {
        let records = sqlx::query_as::<_, FunnelEventRecord>(
            "SELECT session_id, step_name, created_at FROM funnel_events \
             WHERE created_at >= $1 ORDER BY created_at ASC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().filter_map(|r| r.to_domain()).collect())
    }
}

//=========================================================================================
// `DiagnosticsSink` Trait Implementation
//=========================================================================================

#[async_trait]
impl DiagnosticsSink for DbAdapter {
    async fn record_error(&self, entry: &DiagnosticEntry) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO debug_logs (device_info, error_message, context) VALUES ($1, $2, $3)",
        )
        .bind(&entry.device_info)
        .bind(&entry.error_message)
        .bind(&entry.context)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn record_funnel(
        &self,
        step: FunnelStep,
        client_key: &str,
        user_id: Option<Uuid>,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO funnel_events (step_name, user_id, session_id) VALUES ($1, $2, $3)",
        )
        .bind(step.as_str())
        .bind(user_id)
        .bind(client_key)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}
