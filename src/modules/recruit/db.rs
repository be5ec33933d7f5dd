use poise::serenity_prelude::{self as serenity};

use super::session::{Outcome, RosterSnapshot, SessionId};
use crate::types::Error;

/// Write-only copy of sessions in durable storage, nothing reads it back
#[serenity::async_trait]
pub(crate) trait SessionMirror: Send + Sync {
    async fn record_created(&self, session: &RosterSnapshot) -> Result<(), Error>;
    async fn record_outcome(&self, id: SessionId, outcome: Outcome) -> Result<(), Error>;
}

pub(crate) struct PgMirror {
    db: sqlx::PgPool,
}

impl PgMirror {
    pub(crate) fn new(db: sqlx::PgPool) -> Self {
        Self { db }
    }
}

#[serenity::async_trait]
impl SessionMirror for PgMirror {
    async fn record_created(&self, session: &RosterSnapshot) -> Result<(), Error> {
        let info = &session.info;
        let guild_id = info.guild_id.map(|g| i64::try_from(g.get())).transpose()?;

        sqlx::query(
            "INSERT INTO mod_recruit_sessions \
             (session_id, guild_id, channel_id, host_id, host_name, game, description, max_players, broadcast_scope, fire_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(i64::try_from(info.id.get())?)
        .bind(guild_id)
        .bind(i64::try_from(info.channel_id.get())?)
        .bind(i64::try_from(info.host.id.get())?)
        .bind(&info.host.name)
        .bind(&info.game)
        .bind(&info.description)
        .bind(i16::from(info.max_players))
        .bind(info.scope.as_str())
        .bind(info.fire_at)
        .bind(info.created_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn record_outcome(&self, id: SessionId, outcome: Outcome) -> Result<(), Error> {
        sqlx::query(
            "UPDATE mod_recruit_sessions SET outcome = $2, finished_at = $3 WHERE session_id = $1",
        )
        .bind(i64::try_from(id.get())?)
        .bind(outcome.as_str())
        .bind(chrono::Utc::now())
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
