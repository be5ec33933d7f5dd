use std::sync::Arc;

use poise::serenity_prelude::{self as serenity};
use tracing::{debug, info};

use crate::types::{Data, Error};

/// Catches sessions whose expiry timer never fired
pub(crate) async fn sweep_sessions(_ctx: &serenity::Context, data: Arc<Data>) -> Result<(), Error> {
    let swept = data.recruit.sweep().await;

    if swept > 0 {
        info!(swept, live = data.recruit.live_count(), "swept overdue recruitment sessions");
    } else {
        debug!(live = data.recruit.live_count(), "no overdue recruitment sessions");
    }

    Ok(())
}
