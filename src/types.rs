use std::sync::Arc;

use crate::modules::recruit::RecruitmentSessionManager;

pub(crate) struct Data {
    pub(crate) recruit: Arc<RecruitmentSessionManager>,
}

impl Data {
    pub(crate) fn new(recruit: Arc<RecruitmentSessionManager>) -> Self {
        Self { recruit }
    }
}

pub(crate) type Error = Box<dyn std::error::Error + Send + Sync>;
pub(crate) type Context<'a> = poise::Context<'a, Arc<Data>, Error>;
