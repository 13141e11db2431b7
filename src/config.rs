use std::time::Duration;

use clap::ValueEnum;

/// Environment variable holding the relay credential token.
pub const API_KEY_ENV: &str = "PHONE_API_KEY";

/// Default relay base URL. The control and signaling endpoints hang off it.
pub const DEFAULT_RELAY_URL: &str = "wss://relay.phonebell.dev/phonebell";

/// Fixed backoff between reconnect attempts for both relay channels.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Numbers the dial plate can reach. Must contain the operator fallback "0".
pub const KNOWN_NUMBERS: [&str; 5] = [
    "0", // operator / fallback
    "349",
    "4225",
    "34643664",
    "47932786463439686262438634258447455587853896846",
];

/// Which physical handset this process drives. Determines the control
/// channel the relay scopes us to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PhoneSide {
    Inside,
    Outside,
}

impl PhoneSide {
    pub fn path_segment(&self) -> &'static str {
        match self {
            PhoneSide::Inside => "inside",
            PhoneSide::Outside => "outside",
        }
    }
}

impl std::fmt::Display for PhoneSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path_segment())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub side: PhoneSide,
    pub relay_url: String,
    /// Opaque credential sent as the first payload on every control connect.
    pub api_key: String,
    pub reconnect_delay: Duration,
}

impl Config {
    /// Build a config for `side`, reading the credential from the
    /// environment. `relay_url` overrides the default relay base.
    pub fn from_env(side: PhoneSide, relay_url: Option<String>) -> anyhow::Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| anyhow::anyhow!("{API_KEY_ENV} is not set"))?;
        Ok(Self {
            side,
            relay_url: relay_url.unwrap_or_else(|| DEFAULT_RELAY_URL.to_string()),
            api_key,
            reconnect_delay: RECONNECT_DELAY,
        })
    }

    pub fn control_url(&self) -> String {
        format!("{}/{}", self.relay_url, self.side.path_segment())
    }

    pub fn signaling_url(&self) -> String {
        format!("{}/signaling", self.relay_url)
    }
}
