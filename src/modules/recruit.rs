use std::sync::Arc;

use poise::serenity_prelude::{self as serenity};

use crate::spawn_task;
use crate::types::{Data, Error};

pub(crate) mod commands;
pub(crate) mod db;
pub(crate) mod dispatch;
pub(crate) mod error;
pub(crate) mod interactions;
pub(crate) mod manager;
pub(crate) mod session;
pub(crate) mod tasks;
pub(crate) mod timer;
pub(crate) mod view;

pub(crate) use manager::{RecruitPolicy, RecruitmentSessionManager};

pub(crate) fn commands() -> Vec<poise::Command<Arc<Data>, Error>> {
    vec![commands::start_recruitment(), commands::list_recruitments()]
}

pub(crate) fn start_tasks(ctx: serenity::Context, data: Arc<Data>, sweep_interval: u32) {
    spawn_task!(sweep_interval, tasks::sweep_sessions, ctx, data);
}
