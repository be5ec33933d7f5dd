use std::sync::Arc;

use poise::serenity_prelude::{self as serenity};

use super::error::RecruitError;
use super::session::{Outcome, RosterSnapshot};
use super::view;
use crate::types::Error;

/// Everything the session manager sends to the outside world.
///
/// The manager never retries, it only looks at whether a send worked.
#[serenity::async_trait]
pub(crate) trait Dispatch: Send + Sync {
    /// Public notice about how a session ended
    async fn announce(&self, session: &RosterSnapshot, outcome: Outcome) -> Result<(), Error>;

    async fn direct(
        &self,
        user: serenity::UserId,
        session: &RosterSnapshot,
        outcome: Outcome,
    ) -> Result<(), Error>;

    /// Redraws the open status message with the current roster
    async fn update_status(&self, session: &RosterSnapshot) -> Result<(), Error>;

    /// Switches the status message to its final state and disables the buttons
    async fn close_status(&self, session: &RosterSnapshot, outcome: Outcome) -> Result<(), Error>;

    async fn report_degraded(
        &self,
        session: &RosterSnapshot,
        degraded: &RecruitError,
    ) -> Result<(), Error>;
}

pub(crate) struct DiscordDispatch {
    http: Arc<serenity::Http>,
}

impl DiscordDispatch {
    pub(crate) fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[serenity::async_trait]
impl Dispatch for DiscordDispatch {
    async fn announce(&self, session: &RosterSnapshot, outcome: Outcome) -> Result<(), Error> {
        let mentioned: Vec<serenity::UserId> = match outcome {
            Outcome::Filled => session.roster.iter().map(|p| p.id).collect(),
            Outcome::Cancelled | Outcome::Expired => vec![],
        };

        let message = serenity::CreateMessage::new()
            .content(view::announcement(session, outcome))
            .embed(view::closed_embed(session, outcome))
            .allowed_mentions(serenity::CreateAllowedMentions::new().users(mentioned));

        session
            .info
            .channel_id
            .send_message(&*self.http, message)
            .await?;

        Ok(())
    }

    async fn direct(
        &self,
        user: serenity::UserId,
        session: &RosterSnapshot,
        outcome: Outcome,
    ) -> Result<(), Error> {
        let message =
            serenity::CreateMessage::new().content(view::direct_message(session, outcome));

        user.direct_message(&*self.http, message).await?;
        Ok(())
    }

    async fn update_status(&self, session: &RosterSnapshot) -> Result<(), Error> {
        let Some(message_id) = session.status_message else {
            return Err(format!("session {} has no status message", session.id()).into());
        };

        let edit = serenity::EditMessage::new()
            .embed(view::open_embed(session))
            .components(view::buttons(session.id(), false));

        session
            .info
            .channel_id
            .edit_message(&*self.http, message_id, edit)
            .await?;

        Ok(())
    }

    async fn close_status(&self, session: &RosterSnapshot, outcome: Outcome) -> Result<(), Error> {
        let Some(message_id) = session.status_message else {
            return Err(format!("session {} has no status message", session.id()).into());
        };

        let edit = serenity::EditMessage::new()
            .embed(view::closed_embed(session, outcome))
            .components(view::buttons(session.id(), true));

        session
            .info
            .channel_id
            .edit_message(&*self.http, message_id, edit)
            .await?;

        Ok(())
    }

    async fn report_degraded(
        &self,
        session: &RosterSnapshot,
        degraded: &RecruitError,
    ) -> Result<(), Error> {
        session
            .info
            .channel_id
            .say(&*self.http, degraded.user_message())
            .await?;

        Ok(())
    }
}
