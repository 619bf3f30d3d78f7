use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use huddle_db::VotePolicy;
use huddle_gateway::{Moderation, Policy};
use huddle_gateway::moderation::DEFAULT_DENYLIST;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub channel: String,
    /// Identity every connection acts as until real authentication exists
    pub default_user: String,
    pub edit_window: chrono::Duration,
    pub allow_multiple_votes: bool,
    pub blocklist: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port = var("HUDDLE_PORT", "5500")
            .parse()
            .context("HUDDLE_PORT must be a port number")?;
        let edit_window_secs: i64 = var("HUDDLE_EDIT_WINDOW_SECS", "300")
            .parse()
            .context("HUDDLE_EDIT_WINDOW_SECS must be a number of seconds")?;
        if edit_window_secs < 0 {
            bail!("HUDDLE_EDIT_WINDOW_SECS cannot be negative");
        }
        let edit_window = chrono::Duration::try_seconds(edit_window_secs)
            .context("HUDDLE_EDIT_WINDOW_SECS is out of range")?;
        let allow_multiple_votes = var("HUDDLE_ALLOW_MULTIPLE_VOTES", "true")
            .parse()
            .context("HUDDLE_ALLOW_MULTIPLE_VOTES must be true or false")?;

        let blocklist = match lookup("HUDDLE_BLOCKLIST") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_DENYLIST.iter().map(|w| w.to_string()).collect(),
        };

        Ok(Self {
            host: var("HUDDLE_HOST", "0.0.0.0"),
            port,
            db_path: PathBuf::from(var("HUDDLE_DB_PATH", "huddle.db")),
            upload_dir: PathBuf::from(var("HUDDLE_UPLOAD_DIR", "./uploads")),
            channel: var("HUDDLE_CHANNEL", "general"),
            default_user: var("HUDDLE_DEFAULT_USER", "default"),
            edit_window,
            allow_multiple_votes,
            blocklist,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    pub fn policy(&self) -> Policy {
        Policy {
            channel_id: self.channel.clone(),
            edit_window: self.edit_window,
            votes: VotePolicy {
                allow_multiple_votes_per_voter: self.allow_multiple_votes,
            },
            moderation: Moderation::new(self.blocklist.iter().cloned()),
            ..Policy::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 5500);
        assert_eq!(config.channel, "general");
        assert_eq!(config.default_user, "default");
        assert_eq!(config.edit_window, chrono::Duration::minutes(5));
        assert!(config.allow_multiple_votes);
        assert_eq!(config.blocklist, vec!["badword1", "badword2", "badword3"]);
        assert_eq!(config.addr().unwrap().port(), 5500);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("HUDDLE_PORT", "8080"),
            ("HUDDLE_HOST", "127.0.0.1"),
            ("HUDDLE_EDIT_WINDOW_SECS", "60"),
            ("HUDDLE_ALLOW_MULTIPLE_VOTES", "false"),
            ("HUDDLE_BLOCKLIST", " spam, ,eggs "),
        ])
        .unwrap();

        assert_eq!(config.addr().unwrap().to_string(), "127.0.0.1:8080");
        assert_eq!(config.blocklist, vec!["spam", "eggs"]);

        let policy = config.policy();
        assert_eq!(policy.edit_window, chrono::Duration::seconds(60));
        assert!(!policy.votes.allow_multiple_votes_per_voter);
        assert_eq!(policy.max_poll_options, 10);
    }

    #[test]
    fn invalid_values_are_startup_errors() {
        assert!(config(&[("HUDDLE_PORT", "eighty")]).is_err());
        assert!(config(&[("HUDDLE_EDIT_WINDOW_SECS", "5m")]).is_err());
        assert!(config(&[("HUDDLE_ALLOW_MULTIPLE_VOTES", "yes")]).is_err());
    }

    #[test]
    fn edit_window_must_be_a_representable_non_negative_duration() {
        assert!(config(&[("HUDDLE_EDIT_WINDOW_SECS", "-5")]).is_err());
        assert!(config(&[("HUDDLE_EDIT_WINDOW_SECS", "99999999999999999")]).is_err());

        let closed = config(&[("HUDDLE_EDIT_WINDOW_SECS", "0")]).unwrap();
        assert_eq!(closed.policy().edit_window, chrono::Duration::zero());
    }
}
