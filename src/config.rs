// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Typed bot configuration.
//!
//! Raw config structs deserialize from the JSON config file; `validate()`
//! parses and checks every field once, at startup, producing the typed
//! values the components consume. Configuration errors are fatal.

use crate::balance_alarm::BalanceAlarmConfig;
use crate::error::{ClientError, ClientResult};
use crate::metrics_push::MetricsPushConfig;
use crate::price_feed::{decimal_to_fixed, PriceSource};
use ethers::types::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::path::Path;
use url::Url;

fn parse_address(raw: &str, field: &str) -> ClientResult<Address> {
    raw.parse::<Address>()
        .map_err(|e| ClientError::Configuration(format!("invalid {} '{}': {}", field, raw, e)))
}

fn parse_provider_urls(raw: &[String]) -> ClientResult<Vec<Url>> {
    if raw.is_empty() {
        return Err(ClientError::Configuration(
            "at least one provider url is required".to_string(),
        ));
    }
    raw.iter()
        .map(|u| {
            Url::parse(u).map_err(|e| {
                ClientError::Configuration(format!("invalid provider url '{}': {}", u, e))
            })
        })
        .collect()
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BotConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oracle: Option<OracleClientConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<BridgeClientConfig>,
    #[serde(default)]
    pub price_feeds: Vec<PriceFeedConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_alarm: Option<BalanceAlarmSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsPushConfig>,
}

impl BotConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {:?}: {}", path, e))?;
        let config: BotConfig = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse config {:?}: {}", path, e))?;
        Ok(config)
    }
}

fn default_polling_delay_secs() -> u64 {
    60
}

fn default_max_block_range() -> u64 {
    3_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OracleClientConfig {
    /// Redundant JSON-RPC endpoints; the first is canonical.
    pub provider_urls: Vec<String>,
    /// The optimistic oracle contract.
    pub oracle_address: String,
    /// The voting oracle consulted for resolved dispute prices.
    pub voting_oracle_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_chain_id: Option<u64>,
    #[serde(default)]
    pub start_block: u64,
    #[serde(default = "default_polling_delay_secs")]
    pub polling_delay_secs: u64,
    #[serde(default)]
    pub min_time_between_updates_secs: u64,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
}

#[derive(Debug, Clone)]
pub struct ParsedOracleConfig {
    pub provider_urls: Vec<Url>,
    pub oracle_address: Address,
    pub voting_oracle_address: Address,
    pub expected_chain_id: Option<u64>,
    pub start_block: u64,
    pub polling_delay_secs: u64,
    pub min_time_between_updates_secs: u64,
    pub max_block_range: u64,
}

impl OracleClientConfig {
    pub fn validate(&self) -> ClientResult<ParsedOracleConfig> {
        Ok(ParsedOracleConfig {
            provider_urls: parse_provider_urls(&self.provider_urls)?,
            oracle_address: parse_address(&self.oracle_address, "oracle-address")?,
            voting_oracle_address: parse_address(
                &self.voting_oracle_address,
                "voting-oracle-address",
            )?,
            expected_chain_id: self.expected_chain_id,
            start_block: self.start_block,
            polling_delay_secs: self.polling_delay_secs,
            min_time_between_updates_secs: self.min_time_between_updates_secs,
            max_block_range: self.max_block_range,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgeClientConfig {
    pub provider_urls: Vec<String>,
    /// The bridge deposit box contract.
    pub deposit_box_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_chain_id: Option<u64>,
    #[serde(default)]
    pub start_block: u64,
    #[serde(default = "default_polling_delay_secs")]
    pub polling_delay_secs: u64,
    #[serde(default)]
    pub min_time_between_updates_secs: u64,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
}

#[derive(Debug, Clone)]
pub struct ParsedBridgeConfig {
    pub provider_urls: Vec<Url>,
    pub deposit_box_address: Address,
    pub expected_chain_id: Option<u64>,
    pub start_block: u64,
    pub polling_delay_secs: u64,
    pub min_time_between_updates_secs: u64,
    pub max_block_range: u64,
}

impl BridgeClientConfig {
    pub fn validate(&self) -> ClientResult<ParsedBridgeConfig> {
        Ok(ParsedBridgeConfig {
            provider_urls: parse_provider_urls(&self.provider_urls)?,
            deposit_box_address: parse_address(&self.deposit_box_address, "deposit-box-address")?,
            expected_chain_id: self.expected_chain_id,
            start_block: self.start_block,
            polling_delay_secs: self.polling_delay_secs,
            min_time_between_updates_secs: self.min_time_between_updates_secs,
            max_block_range: self.max_block_range,
        })
    }
}

fn default_feed_lookback_secs() -> u64 {
    30 * 86_400
}

fn default_feed_interval_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PriceFeedConfig {
    pub source: PriceSourceConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_feed_lookback_secs")]
    pub lookback_secs: u64,
    #[serde(default = "default_feed_interval_secs")]
    pub min_time_between_updates_secs: u64,
    #[serde(default = "default_feed_interval_secs")]
    pub polling_delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum PriceSourceConfig {
    Commodity { database: String, dataset: String },
    HousingIndex { series_id: String },
    Equity { symbol: String },
    ConsumerPriceIndex { series_id: String },
}

impl From<&PriceSourceConfig> for PriceSource {
    fn from(config: &PriceSourceConfig) -> Self {
        match config {
            PriceSourceConfig::Commodity { database, dataset } => PriceSource::Commodity {
                database: database.clone(),
                dataset: dataset.clone(),
            },
            PriceSourceConfig::HousingIndex { series_id } => PriceSource::HousingIndex {
                series_id: series_id.clone(),
            },
            PriceSourceConfig::Equity { symbol } => PriceSource::Equity {
                symbol: symbol.clone(),
            },
            PriceSourceConfig::ConsumerPriceIndex { series_id } => {
                PriceSource::ConsumerPriceIndex {
                    series_id: series_id.clone(),
                }
            }
        }
    }
}

fn default_healthy_log_interval_secs() -> u64 {
    86_400
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BalanceAlarmSettings {
    pub provider_url: String,
    /// Financial contract whose collateral/positions drive the target.
    pub contract_address: String,
    /// Wallet whose balance is observed.
    pub account: String,
    /// Fraction of total collateral reserved for dispute bonds, e.g. "0.1".
    #[serde_as(as = "DisplayFromStr")]
    pub dispute_bond_pct: Decimal,
    /// Reward reserve per open position in whole tokens, e.g. "0.05".
    #[serde_as(as = "DisplayFromStr")]
    pub per_position_reward: Decimal,
    /// Multiplier on the reward component, e.g. "1.2".
    #[serde_as(as = "DisplayFromStr")]
    pub buffer_factor: Decimal,
    #[serde(default = "default_healthy_log_interval_secs")]
    pub healthy_log_interval_secs: u64,
    #[serde(default = "default_polling_delay_secs")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ParsedBalanceAlarmSettings {
    pub provider_url: Url,
    pub contract_address: Address,
    pub alarm: BalanceAlarmConfig,
    pub poll_interval_secs: u64,
}

impl BalanceAlarmSettings {
    pub fn validate(&self) -> ClientResult<ParsedBalanceAlarmSettings> {
        let provider_url = Url::parse(&self.provider_url).map_err(|e| {
            ClientError::Configuration(format!(
                "invalid provider url '{}': {}",
                self.provider_url, e
            ))
        })?;
        Ok(ParsedBalanceAlarmSettings {
            provider_url,
            contract_address: parse_address(&self.contract_address, "contract-address")?,
            alarm: BalanceAlarmConfig {
                account: parse_address(&self.account, "account")?,
                dispute_bond_pct: decimal_to_fixed(self.dispute_bond_pct, 18)?,
                per_position_reward: decimal_to_fixed(self.per_position_reward, 18)?,
                buffer_factor_pct: decimal_to_fixed(self.buffer_factor, 18)?,
                healthy_log_interval_secs: self.healthy_log_interval_secs,
            },
            poll_interval_secs: self.poll_interval_secs,
        })
    }
}
