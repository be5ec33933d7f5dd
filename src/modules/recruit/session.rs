use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use poise::serenity_prelude::{self as serenity};

use super::error::RecruitError;

/// Correlates buttons, timers and mirror rows with a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct SessionId(u64);

impl SessionId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub(crate) fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = RecruitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(SessionId)
            .map_err(|_| RecruitError::NotFound)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Participant {
    pub(crate) id: serenity::UserId,
    pub(crate) name: String,
}

impl Participant {
    pub(crate) fn new(id: serenity::UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub(crate) enum BroadcastScope {
    #[name = "서버 전체"]
    Server,
    #[name = "참가자만"]
    Participants,
}

impl BroadcastScope {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Participants => "participants",
        }
    }
}

/// When a session stops taking players
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activation {
    Countdown(chrono::Duration),
    At(DateTime<Utc>),
}

impl Activation {
    pub(crate) fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Countdown(duration) => now + *duration,
            Self::At(instant) => *instant,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Filled,
    Cancelled,
    Expired,
}

impl Outcome {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

/// Everything the "start recruitment" command supplies
#[derive(Debug, Clone)]
pub(crate) struct NewSession {
    pub(crate) host: Participant,
    pub(crate) game: String,
    pub(crate) description: String,
    pub(crate) max_players: u8,
    pub(crate) activation: Activation,
    pub(crate) scope: BroadcastScope,
    pub(crate) guild_id: Option<serenity::GuildId>,
    pub(crate) channel_id: serenity::ChannelId,
}

/// The parts of a session that never change after creation
#[derive(Debug)]
pub(crate) struct SessionInfo {
    pub(crate) id: SessionId,
    pub(crate) host: Participant,
    pub(crate) game: String,
    pub(crate) description: String,
    pub(crate) max_players: u8,
    pub(crate) fire_at: DateTime<Utc>,
    pub(crate) scope: BroadcastScope,
    pub(crate) guild_id: Option<serenity::GuildId>,
    pub(crate) channel_id: serenity::ChannelId,
    pub(crate) created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub(crate) struct RecruitmentSession {
    info: Arc<SessionInfo>,
    roster: Vec<Participant>,
    status_message: Option<serenity::MessageId>,
}

impl RecruitmentSession {
    pub(crate) fn new(
        id: SessionId,
        req: NewSession,
        fire_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let roster = vec![req.host.clone()];

        Self {
            info: Arc::new(SessionInfo {
                id,
                host: req.host,
                game: req.game,
                description: req.description,
                max_players: req.max_players,
                fire_at,
                scope: req.scope,
                guild_id: req.guild_id,
                channel_id: req.channel_id,
                created_at,
            }),
            roster,
            status_message: None,
        }
    }

    pub(crate) fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub(crate) fn is_full(&self) -> bool {
        self.roster.len() >= usize::from(self.info.max_players)
    }

    pub(crate) fn set_status_message(&mut self, message: serenity::MessageId) {
        self.status_message = Some(message);
    }

    /// Appends a non-host participant, keeping join order
    pub(crate) fn admit(&mut self, participant: Participant) -> Result<(), RecruitError> {
        if participant.id == self.info.host.id {
            return Err(RecruitError::AlreadyHost);
        }
        if self.roster.iter().any(|p| p.id == participant.id) {
            return Err(RecruitError::AlreadyJoined);
        }
        if self.is_full() {
            return Err(RecruitError::Full);
        }

        self.roster.push(participant);
        Ok(())
    }

    /// Removes a non-host participant, the rest keep their relative order
    pub(crate) fn release(&mut self, user: serenity::UserId) -> Result<(), RecruitError> {
        if user == self.info.host.id {
            return Err(RecruitError::IsHost);
        }

        let Some(pos) = self.roster.iter().position(|p| p.id == user) else {
            return Err(RecruitError::NotJoined);
        };

        self.roster.remove(pos);
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot {
            info: self.info.clone(),
            roster: self.roster.clone(),
            status_message: self.status_message,
        }
    }
}

/// A copy of a session taken at one point in time.
///
/// Rendering and notifications always work off a snapshot so they never need
/// the live table.
#[derive(Debug, Clone)]
pub(crate) struct RosterSnapshot {
    pub(crate) info: Arc<SessionInfo>,
    pub(crate) roster: Vec<Participant>,
    pub(crate) status_message: Option<serenity::MessageId>,
}

impl RosterSnapshot {
    pub(crate) fn id(&self) -> SessionId {
        self.info.id
    }

    pub(crate) fn is_full(&self) -> bool {
        self.roster.len() >= usize::from(self.info.max_players)
    }

    pub(crate) fn remaining(&self) -> usize {
        usize::from(self.info.max_players).saturating_sub(self.roster.len())
    }

    pub(crate) fn roster_lines(&self) -> String {
        self.roster
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {}", i + 1, p.name))
            .collect::<Vec<String>>()
            .join("\n")
    }

    pub(crate) fn mentions(&self) -> String {
        self.roster
            .iter()
            .map(|p| format!("<@{}>", p.id.get()))
            .collect::<Vec<String>>()
            .join(", ")
    }
}
