use serde::Deserialize;

use crate::types::Error;

#[derive(Deserialize, Debug)]
pub(crate) struct BotConfig {
    pub(crate) token: String,
}

#[derive(Deserialize, Debug)]
pub(crate) struct DatabaseConfig {
    pub(crate) url: String,
}

/// Optional tuning, everything in the env file is a string so it's parsed by hand
#[derive(Deserialize, Debug, Default)]
struct RawRecruitConfig {
    sweep_interval: Option<String>,
    min_lead_seconds: Option<String>,
}

#[derive(Debug)]
pub(crate) struct RecruitConfig {
    /// seconds between sweeps for sessions whose timer never fired
    pub(crate) sweep_interval: u32,
    /// a session has to fire strictly later than this many seconds from creation
    pub(crate) min_lead_seconds: u32,
}

impl TryFrom<RawRecruitConfig> for RecruitConfig {
    type Error = Error;

    fn try_from(raw: RawRecruitConfig) -> Result<Self, Self::Error> {
        let sweep_interval = match raw.sweep_interval {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|err| format!("invalid RECRUIT_SWEEP_INTERVAL '{}': {}", value, err))?,
            None => 3600,
        };
        let min_lead_seconds = match raw.min_lead_seconds {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|err| format!("invalid RECRUIT_MIN_LEAD_SECONDS '{}': {}", value, err))?,
            None => 30,
        };

        if sweep_interval == 0 {
            return Err("RECRUIT_SWEEP_INTERVAL must be at least 1 second".into());
        }
        // the shortest countdown the command offers is one minute
        if min_lead_seconds >= 60 {
            return Err("RECRUIT_MIN_LEAD_SECONDS must be below 60".into());
        }

        Ok(Self {
            sweep_interval,
            min_lead_seconds,
        })
    }
}

pub(crate) struct Config {
    pub(crate) bot: BotConfig,
    pub(crate) db: DatabaseConfig,
    pub(crate) recruit: RecruitConfig,
}

pub(crate) fn load_config() -> Result<Config, Error> {
    // also exports the file into the process env
    let path = dotenvy::dotenv().map_err(|err| format!("couldn't load .env: {}", err))?;

    let bot: BotConfig = serde_envfile::prefixed("RECRUITBOT_").from_file(&path)?;
    let db: DatabaseConfig = serde_envfile::prefixed("DATABASE_").from_file(&path)?;
    let recruit: RawRecruitConfig = serde_envfile::prefixed("RECRUIT_").from_file(&path)?;

    Ok(Config {
        bot,
        db,
        recruit: recruit.try_into()?,
    })
}
