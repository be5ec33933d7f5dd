use chrono::Utc;
use poise::serenity_prelude::{self as serenity};
use tracing::{debug, warn};

use super::error::RecruitError;
use super::session::{Activation, BroadcastScope, NewSession, Participant};
use super::view;
use crate::types::{Context, Error};
use crate::util::{duration_from_minutes, parse_kst_schedule};

async fn reject(ctx: Context<'_>, err: RecruitError) -> Result<(), Error> {
    debug!(user.id = ctx.author().id.get(), "rejected: {}", err);
    ctx.send(
        poise::CreateReply::default()
            .content(err.user_message())
            .ephemeral(true),
    )
    .await?;

    Ok(())
}

async fn author_participant(ctx: Context<'_>) -> Participant {
    let name = match ctx.author_member().await {
        Some(member) => member.display_name().to_owned(),
        None => ctx.author().display_name().to_owned(),
    };

    Participant::new(ctx.author().id, name)
}

/// 게임 참가자를 모집합니다
#[poise::command(slash_command, guild_only = true, rename = "게임모집")]
pub(crate) async fn start_recruitment(
    ctx: Context<'_>,
    #[rename = "게임"]
    #[description = "게임 이름을 입력하세요"]
    game: String,
    #[rename = "인원"]
    #[description = "모집 인원을 입력하세요 (모집자 포함)"]
    #[min = 2]
    #[max = 10]
    players: u8,
    #[rename = "설명"]
    #[description = "게임 설명이나 하고 싶은 말을 입력하세요"]
    description: String,
    #[rename = "기간"]
    #[description = "모집 기간, 분 단위 (최대 180분)"]
    #[min = 1]
    #[max = 180]
    minutes: Option<u32>,
    #[rename = "시작시간"]
    #[description = "시작 시간 (한국 시간, 예: 21:30 또는 2026-10-20 21:30)"]
    start_at: Option<String>,
    #[rename = "알림범위"]
    #[description = "마감 알림을 서버 전체에 보낼지 참가자에게만 보낼지"]
    scope: Option<BroadcastScope>,
) -> Result<(), Error> {
    let now = Utc::now();

    let activation = match (minutes, start_at) {
        (Some(minutes), None) => Activation::Countdown(duration_from_minutes(minutes)),
        (None, Some(text)) => match parse_kst_schedule(&text, now) {
            Some(at) => Activation::At(at),
            None => {
                let reason = format!("'{}'은(는) 알 수 없는 시간 형식입니다 (예: 21:30)", text);
                return reject(ctx, RecruitError::InvalidSchedule(reason)).await;
            }
        },
        _ => {
            let reason = "기간 또는 시작시간 중 하나만 입력해주세요".to_string();
            return reject(ctx, RecruitError::InvalidSchedule(reason)).await;
        }
    };

    let manager = ctx.data().recruit.clone();
    let request = NewSession {
        host: author_participant(ctx).await,
        game,
        description,
        max_players: players,
        activation,
        scope: scope.unwrap_or(BroadcastScope::Server),
        guild_id: ctx.guild_id(),
        channel_id: ctx.channel_id(),
    };

    let id = match manager.create_session(request) {
        Ok(id) => id,
        Err(err) => return reject(ctx, err).await,
    };

    let Some(snapshot) = manager.snapshot(id) else {
        return reject(ctx, RecruitError::NotFound).await;
    };

    let posted = ctx
        .send(
            poise::CreateReply::default()
                .embed(view::open_embed(&snapshot))
                .components(view::buttons(id, false)),
        )
        .await;

    // a session nobody can see must not stay live
    let reply = match posted {
        Ok(reply) => reply,
        Err(err) => {
            manager.discard(id);
            return Err(err.into());
        }
    };
    let message = match reply.message().await {
        Ok(message) => message,
        Err(err) => {
            manager.discard(id);
            return Err(err.into());
        }
    };

    if let Err(err) = manager.attach_status_message(id, message.id) {
        warn!(session.id = id.get(), "couldn't attach status message: {}", err);
    }

    Ok(())
}

/// 진행 중인 모집 목록을 봅니다
#[poise::command(slash_command, guild_only = true, rename = "모집목록")]
pub(crate) async fn list_recruitments(ctx: Context<'_>) -> Result<(), Error> {
    let sessions = ctx.data().recruit.live_sessions(ctx.guild_id());

    let body = if sessions.is_empty() {
        "진행 중인 모집이 없습니다.".to_string()
    } else {
        sessions
            .iter()
            .map(view::listing_line)
            .collect::<Vec<String>>()
            .join("\n")
    };

    let embed = serenity::CreateEmbed::new()
        .title(format!("🎮 진행 중인 모집 ({}개)", sessions.len()))
        .description(body);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;

    Ok(())
}
