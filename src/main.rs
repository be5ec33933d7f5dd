use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use poise::serenity_prelude::{self as serenity};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    ConnectOptions,
};
use tracing::{debug, error, info, log::LevelFilter};

use crate::modules::recruit::{
    self, db::PgMirror, dispatch::DiscordDispatch, RecruitPolicy, RecruitmentSessionManager,
};
use crate::types::Data;

mod config;
mod events;
mod modules;
mod task;
mod types;
mod util;

/// Drops every live session and its timer before the shards go away
fn handle_shutdown(manager: Arc<RecruitmentSessionManager>, shard_manager: Arc<serenity::ShardManager>) {
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("couldn't listen for ctrl-c: {}", err);
            return;
        }

        info!("received ctrl-c, shutting down");
        manager.shutdown();
        shard_manager.shutdown_all().await;
    });
}

/// Runs once the client has stopped, whatever took the gateway down
fn shutdown_sessions(manager: &OnceLock<Arc<RecruitmentSessionManager>>) {
    if let Some(manager) = manager.get() {
        manager.shutdown();
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = config::load_config().expect("error loading envfile");
    let connect_opts = config
        .db
        .url
        .parse::<PgConnectOptions>()
        .unwrap_or_else(|err| panic!("couldn't parse db url: {}", err))
        .log_statements(LevelFilter::Trace)
        .log_slow_statements(LevelFilter::Warn, Duration::from_secs(5));

    let db = PgPoolOptions::new()
        .max_connections(5)
        .connect_with(connect_opts)
        .await
        .expect("error connecting to db");

    sqlx::migrate!()
        .run(&db)
        .await
        .expect("error running migrations");

    let policy = RecruitPolicy {
        min_lead: chrono::Duration::seconds(i64::from(config.recruit.min_lead_seconds)),
        ..Default::default()
    };
    let sweep_interval = config.recruit.sweep_interval;

    let live_manager: Arc<OnceLock<Arc<RecruitmentSessionManager>>> = Arc::default();
    let setup_manager = live_manager.clone();

    let intents = serenity::GatewayIntents::non_privileged();
    let options = poise::FrameworkOptions {
        pre_command: |ctx| {
            Box::pin(async move {
                debug!("executing command /{}...", ctx.invoked_command_name());
            })
        },
        post_command: |ctx| {
            Box::pin(async move {
                debug!("finished executing command /{}", ctx.invoked_command_name());
            })
        },
        event_handler: |ctx, event, framework, data| {
            Box::pin(events::handler(ctx, event, framework, data))
        },
        commands: recruit::commands(),
        ..Default::default()
    };

    let framework = poise::Framework::builder()
        .options(options)
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let manager = RecruitmentSessionManager::new(
                    Arc::new(DiscordDispatch::new(ctx.http.clone())),
                    Arc::new(PgMirror::new(db)),
                    policy,
                );
                let data = Arc::new(Data::new(manager.clone()));
                let _ = setup_manager.set(manager.clone());

                recruit::start_tasks(ctx.to_owned(), data.clone(), sweep_interval);
                handle_shutdown(manager, framework.shard_manager().clone());

                Ok(data)
            })
        })
        .build();

    let client = serenity::ClientBuilder::new(config.bot.token, intents)
        .framework(framework)
        .await;

    let result = client.unwrap().start().await;
    shutdown_sessions(&live_manager);

    if let Err(err) = result {
        error!("client stopped: {}", err);
    }
}
