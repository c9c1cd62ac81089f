use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a new subscription starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InitialPosition {
    #[serde(alias = "earliest", alias = "EARLIEST")]
    Earliest,
    #[default]
    #[serde(alias = "latest", alias = "LATEST")]
    Latest,
}

impl fmt::Display for InitialPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitialPosition::Earliest => f.write_str("Earliest"),
            InitialPosition::Latest => f.write_str("Latest"),
        }
    }
}

impl FromStr for InitialPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "earliest" => Ok(InitialPosition::Earliest),
            "latest" => Ok(InitialPosition::Latest),
            other => Err(format!("unknown initial position: {}", other)),
        }
    }
}

/// Connection and topic settings for the Pulsar cluster.
///
/// Loaded once at startup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSettings {
    pub url: String,
    #[serde(default)]
    pub token: String,
    pub topic: String,
    pub subscription_name: String,
    #[serde(default)]
    pub initial_position: InitialPosition,
    #[serde(default = "default_topic1")]
    pub topic1: String,
    #[serde(default = "default_topic2")]
    pub topic2: String,
    #[serde(default = "default_allow_insecure")]
    pub allow_insecure_connection: bool,
}

fn default_topic1() -> String {
    "Topic1".to_string()
}

fn default_topic2() -> String {
    "Topic2".to_string()
}

fn default_allow_insecure() -> bool {
    true
}

impl BrokerSettings {
    /// Topics served by the fan-out consumer
    pub fn fanout_topics(&self) -> Vec<String> {
        vec![self.topic1.clone(), self.topic2.clone()]
    }

    /// Token to authenticate with, if one was configured
    pub fn auth_token(&self) -> Option<&str> {
        let token = self.token.trim();
        (!token.is_empty()).then_some(token)
    }
}
