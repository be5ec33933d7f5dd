use chrono::Utc;
use poise::serenity_prelude::{self as serenity};

use super::session::{Outcome, RosterSnapshot, SessionId};
use crate::util::{discord_timestamp, format_kst, minutes_until};

const COLOR_OPEN: u32 = 0x0099ff;
const COLOR_FILLED: u32 = 0x00ff00;
const COLOR_CLOSED: u32 = 0xff0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ButtonAction {
    Join,
    Leave,
    Cancel,
}

impl ButtonAction {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Cancel => "cancel",
        }
    }

    pub(crate) fn custom_id(&self, id: SessionId) -> String {
        format!("{}_{}", self.prefix(), id)
    }

    /// Splits `join_<id>` and friends, the id part is returned unparsed.
    ///
    /// `None` means the component belongs to someone else.
    pub(crate) fn parse(custom_id: &str) -> Option<(Self, &str)> {
        let (prefix, rest) = custom_id.split_once('_')?;
        let action = match prefix {
            "join" => Self::Join,
            "leave" => Self::Leave,
            "cancel" => Self::Cancel,
            _ => return None,
        };

        Some((action, rest))
    }
}

pub(crate) fn buttons(id: SessionId, disabled: bool) -> Vec<serenity::CreateActionRow> {
    vec![serenity::CreateActionRow::Buttons(vec![
        serenity::CreateButton::new(ButtonAction::Join.custom_id(id))
            .label("참가하기")
            .style(serenity::ButtonStyle::Primary)
            .disabled(disabled),
        serenity::CreateButton::new(ButtonAction::Leave.custom_id(id))
            .label("도망가기")
            .style(serenity::ButtonStyle::Secondary)
            .disabled(disabled),
        serenity::CreateButton::new(ButtonAction::Cancel.custom_id(id))
            .label("모집 취소하기")
            .style(serenity::ButtonStyle::Danger)
            .disabled(disabled),
    ])]
}

fn base_embed(session: &RosterSnapshot) -> serenity::CreateEmbed {
    let info = &session.info;

    serenity::CreateEmbed::new()
        .field("모집자", &info.host.name, true)
        .field("모집 인원", format!("{}명", info.max_players), true)
        .field("현재 인원", format!("{}명", session.roster.len()), true)
        .field("설명", &info.description, false)
        .field("참가자 목록", session.roster_lines(), false)
        .footer(serenity::CreateEmbedFooter::new(format!("모집 번호 {}", info.id)))
        .timestamp(info.created_at)
}

/// The public status message while the session is still taking players
pub(crate) fn open_embed(session: &RosterSnapshot) -> serenity::CreateEmbed {
    let info = &session.info;

    base_embed(session)
        .colour(COLOR_OPEN)
        .title(format!("🎮 {} 모집 중!", info.game))
        .field(
            "마감",
            format!(
                "{} ({}, {}분 남음)",
                format_kst(info.fire_at),
                discord_timestamp(info.fire_at, 'R'),
                minutes_until(info.fire_at, Utc::now())
            ),
            true,
        )
        .field("남은 자리", format!("{}자리", session.remaining()), true)
}

pub(crate) fn closed_embed(session: &RosterSnapshot, outcome: Outcome) -> serenity::CreateEmbed {
    let (colour, title) = match outcome {
        Outcome::Filled => (COLOR_FILLED, "✅ 모집 완료!"),
        Outcome::Cancelled => (COLOR_CLOSED, "❌ 모집이 취소됐습니다"),
        Outcome::Expired => (COLOR_CLOSED, "⏰ 시간 초과!"),
    };

    base_embed(session)
        .colour(colour)
        .title(format!("{} ({})", title, session.info.game))
        .field("마감", "종료", true)
}

/// Channel post for a terminal transition
pub(crate) fn announcement(session: &RosterSnapshot, outcome: Outcome) -> String {
    match outcome {
        Outcome::Filled => format!(
            "{}\n일나라! 모집 완료다! {} 하자! 🎮",
            session.mentions(),
            session.info.game
        ),
        Outcome::Cancelled => format!(
            "❌ {}님이 {} 모집을 취소했습니다.",
            session.info.host.name, session.info.game
        ),
        Outcome::Expired => format!(
            "⏰ {} 모집 시간이 끝났습니다. {}/{}명으로 파티가 터졌어요!",
            session.info.game,
            session.roster.len(),
            session.info.max_players
        ),
    }
}

pub(crate) fn direct_message(session: &RosterSnapshot, outcome: Outcome) -> String {
    let names = session
        .roster
        .iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<&str>>()
        .join(", ");

    match outcome {
        Outcome::Filled => format!(
            "🎮 {} 모집 완료!\n{}\n얼른 들어오세요!",
            session.info.game, names
        ),
        Outcome::Cancelled => format!(
            "❌ 참가했던 {} 모집이 모집자에 의해 취소됐습니다.",
            session.info.game
        ),
        Outcome::Expired => format!(
            "⏰ 참가했던 {} 모집이 인원이 모자라 취소됐습니다. ({}/{}명)",
            session.info.game,
            session.roster.len(),
            session.info.max_players
        ),
    }
}

/// One line per session for the listing command
pub(crate) fn listing_line(session: &RosterSnapshot) -> String {
    format!(
        "`{}` **{}** • {}/{}명 • 모집자 {} • 마감 {}",
        session.info.id,
        session.info.game,
        session.roster.len(),
        session.info.max_players,
        session.info.host.name,
        discord_timestamp(session.info.fire_at, 'R'),
    )
}
