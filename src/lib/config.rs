use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use alloy::primitives::Address;
use serde::Deserialize;

use crate::domain::resolution::TiePolicy;
use crate::retry::RetryPolicy;
use crate::submit::{PollPolicy, SubmissionPolicy, TRANSFER_GAS};

/// Top-level configuration loaded from TOML.
///
/// Only `[settlement]` is required; every other section has defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct AuctionConfig {
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub confidential: ConfidentialConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub submission: SubmissionConfig,
    #[serde(default)]
    pub auction: AuctionSection,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

/// Public settlement chain.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// Signing key for direct transfers. Absent for read-only actors (resolver).
    pub private_key: Option<String>,
}

/// Confidential executor endpoint, reserved for a networked gateway. The
/// in-process executor ignores it; when given, both fields must be set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfidentialConfig {
    pub rpc_url: Option<String>,
    pub chain_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    pub max_attempts: u32,
    pub fee_bump_percent: u64,
    pub gas_limit: u64,
    #[serde(with = "humantime_serde")]
    pub poll_initial: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_max: Duration,
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        let policy = SubmissionPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            fee_bump_percent: policy.fee_bump_percent,
            gas_limit: policy.gas_limit,
            poll_initial: policy.poll.initial_interval,
            poll_max: policy.poll.max_interval,
            max_wait: policy.poll.max_wait,
        }
    }
}

impl SubmissionConfig {
    pub fn policy(&self) -> SubmissionPolicy {
        SubmissionPolicy {
            max_attempts: self.max_attempts,
            fee_bump_percent: self.fee_bump_percent,
            gas_limit: self.gas_limit,
            poll: PollPolicy {
                initial_interval: self.poll_initial,
                max_interval: self.poll_max,
                max_wait: self.max_wait,
            },
        }
    }
}

/// Parameters for a newly deployed auction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuctionSection {
    /// Bidding window (e.g. "3m", "1h"). Parsed via humantime.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// In minimal value units.
    pub minimal_bid: u64,
    pub nft_contract: Option<Address>,
    pub nft_token_id: u64,
}

impl Default for AuctionSection {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(180),
            minimal_bid: 1_000_000_000_000_000,
            nft_contract: None,
            nft_token_id: 1,
        }
    }
}

/// Resolver scheduling service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub listen: SocketAddr,
    /// Wait after the auction end time before the first run
    #[serde(with = "humantime_serde")]
    pub grace: Duration,
    #[serde(with = "humantime_serde")]
    pub rerun_delay: Duration,
    pub max_runs: u32,
    /// `registerWinner` rounds before a run counts as failed
    pub register_rounds: u32,
    pub tie_policy: TiePolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            grace: Duration::from_secs(10),
            rerun_delay: Duration::from_secs(10),
            max_runs: 5,
            register_rounds: 3,
            tie_policy: TiePolicy::FirstSeen,
        }
    }
}

/// Errors from config loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AuctionConfig {
    /// Load and validate a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Validation(msg.into()));

        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.retry.budget_seed == 0 {
            return invalid("retry.budget_seed must be positive");
        }
        if self.retry.budget_growth < 1 {
            return invalid("retry.budget_growth must be at least 1");
        }
        if self.submission.max_attempts == 0 {
            return invalid("submission.max_attempts must be at least 1");
        }
        if self.submission.gas_limit < TRANSFER_GAS {
            return invalid("submission.gas_limit is below the cost of a plain transfer");
        }
        if self.submission.poll_initial > self.submission.poll_max {
            return invalid("submission.poll_initial must not exceed submission.poll_max");
        }
        if self.submission.max_wait.is_zero() {
            return invalid("submission.max_wait must be positive");
        }
        if self.auction.duration.is_zero() {
            return invalid("auction.duration must be positive");
        }
        if self.resolver.max_runs == 0 {
            return invalid("resolver.max_runs must be at least 1");
        }
        if self.confidential.rpc_url.is_some() != self.confidential.chain_id.is_some() {
            return invalid("confidential.rpc_url and confidential.chain_id must be set together");
        }
        if self.resolver.register_rounds == 0 {
            return invalid("resolver.register_rounds must be at least 1");
        }
        Ok(())
    }
}

impl std::str::FromStr for AuctionConfig {
    type Err = ConfigError;

    /// Parse and validate TOML text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[settlement]
rpc_url = "http://localhost:8555"
chain_id = 1337
"#;

    #[test]
    fn test_parse_minimal_config_uses_defaults() {
        let config: AuctionConfig = MINIMAL.parse().unwrap();
        assert_eq!(config.settlement.chain_id, 1337);
        assert!(config.settlement.private_key.is_none());
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.submission.policy(), SubmissionPolicy::default());
        assert_eq!(config.resolver.tie_policy, TiePolicy::FirstSeen);
        assert_eq!(config.auction.duration, Duration::from_secs(180));
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[settlement]
rpc_url = "https://rpc.sepolia.org"
chain_id = 11155111
private_key = "0xdead000000000000000000000000000000000000000000000000000000000001"

[confidential]
rpc_url = "http://localhost:8545"
chain_id = 16813125

[retry]
max_attempts = 4
budget_seed = 1000000
budget_growth = 3
delay = "3s"

[submission]
max_attempts = 6
fee_bump_percent = 12
gas_limit = 30000
poll_initial = "100ms"
poll_max = "2s"
max_wait = "1m"

[auction]
duration = "10m"
minimal_bid = 4000000000000000
nft_contract = "0x00000000000000000000000000000000000000aa"
nft_token_id = 9

[resolver]
listen = "0.0.0.0:9000"
grace = "10s"
rerun_delay = "3s"
max_runs = 5
register_rounds = 2
tie_policy = "lowest_deposit_address"
"#;
        let config: AuctionConfig = toml.parse().unwrap();
        assert_eq!(config.retry.delay, Duration::from_secs(3));
        assert_eq!(config.retry.budget_growth, 3);
        assert_eq!(config.submission.policy().poll.max_wait, Duration::from_secs(60));
        assert_eq!(config.auction.duration, Duration::from_secs(600));
        assert_eq!(config.auction.nft_contract, Some(Address::with_last_byte(0xaa)));
        assert_eq!(config.resolver.listen.port(), 9000);
        assert_eq!(config.resolver.tie_policy, TiePolicy::LowestDepositAddress);
        assert_eq!(config.confidential.chain_id, Some(16813125));
    }

    #[test]
    fn test_missing_settlement_section_fails() {
        let err = "[retry]\nmax_attempts = 2\n".parse::<AuctionConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            "[retry]\nmax_attempts = 0",
            "[retry]\nbudget_seed = 0",
            "[retry]\nbudget_growth = 0",
            "[submission]\npoll_initial = \"10s\"\npoll_max = \"1s\"",
            "[submission]\nmax_wait = \"0s\"",
            "[submission]\ngas_limit = 100",
            "[auction]\nduration = \"0s\"",
            "[resolver]\nmax_runs = 0",
            "[confidential]\nrpc_url = \"http://localhost:8545\"",
        ];
        for case in cases {
            let toml = format!("{MINIMAL}\n{case}\n");
            let err = toml.parse::<AuctionConfig>().unwrap_err();
            assert!(
                matches!(err, ConfigError::Validation(_)),
                "accepted invalid config: {case}"
            );
        }
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = AuctionConfig::load(Path::new("/nonexistent/auction.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
