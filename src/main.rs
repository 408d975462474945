// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use oracle_bots::balance_alarm::{
    BotWatchdog, CollateralBalanceAlarm, EthCollateralSource, Observable,
};
use oracle_bots::bridge_client::BridgeDepositClient;
use oracle_bots::chain_reader::{
    BridgeEventSource, EthEventReader, EthPriceResolver, OracleEventSource,
};
use oracle_bots::config::BotConfig;
use oracle_bots::metered_provider::new_metered_eth_provider;
use oracle_bots::metrics::BotMetrics;
use oracle_bots::metrics_push::start_metrics_push_task;
use oracle_bots::oracle_client::OptimisticOracleClient;
use oracle_bots::poller::PollingController;
use oracle_bots::price_feed::{
    JsonApiPriceFeed, PriceSource, ReqwestJsonFetcher, SystemClock,
};
use oracle_bots::runner::spawn_update_loop;
use prometheus::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
struct Args {
    #[clap(long)]
    pub config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = BotConfig::load(&args.config_path)?;

    let registry = Registry::new();
    let metrics = Arc::new(BotMetrics::new(&registry));
    let cancel = CancellationToken::new();
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    if let Some(oracle_config) = &config.oracle {
        let parsed = oracle_config.validate()?;
        let mut sources: Vec<Arc<dyn OracleEventSource>> = Vec::new();
        for (index, url) in parsed.provider_urls.iter().enumerate() {
            let reader = EthEventReader::connect(
                url.as_str(),
                parsed.oracle_address,
                metrics.clone(),
                parsed.expected_chain_id,
                &format!("oracle-provider-{}", index),
            )
            .await?;
            sources.push(Arc::new(reader));
        }
        let resolver_provider =
            new_metered_eth_provider(parsed.provider_urls[0].as_str(), metrics.clone())?;
        let resolver = Arc::new(EthPriceResolver::new(
            resolver_provider,
            parsed.voting_oracle_address,
            parsed.oracle_address,
            "price-resolver",
        ));
        let client = OptimisticOracleClient::new(
            sources,
            resolver,
            PollingController::new(
                parsed.start_block,
                parsed.min_time_between_updates_secs,
                parsed.max_block_range,
            )?,
            metrics.clone(),
        )?;
        handles.push(spawn_update_loop(
            client,
            Duration::from_secs(parsed.polling_delay_secs),
            cancel.clone(),
        ));
    }

    if let Some(bridge_config) = &config.bridge {
        let parsed = bridge_config.validate()?;
        let mut sources: Vec<Arc<dyn BridgeEventSource>> = Vec::new();
        for (index, url) in parsed.provider_urls.iter().enumerate() {
            let reader = EthEventReader::connect(
                url.as_str(),
                parsed.deposit_box_address,
                metrics.clone(),
                parsed.expected_chain_id,
                &format!("bridge-provider-{}", index),
            )
            .await?;
            sources.push(Arc::new(reader));
        }
        let client = BridgeDepositClient::new(
            sources,
            PollingController::new(
                parsed.start_block,
                parsed.min_time_between_updates_secs,
                parsed.max_block_range,
            )?,
            metrics.clone(),
        )?;
        handles.push(spawn_update_loop(
            client,
            Duration::from_secs(parsed.polling_delay_secs),
            cancel.clone(),
        ));
    }

    if !config.price_feeds.is_empty() {
        let fetcher = Arc::new(ReqwestJsonFetcher::new(Duration::from_secs(30))?);
        let clock = Arc::new(SystemClock);
        for feed_config in &config.price_feeds {
            let feed = JsonApiPriceFeed::new(
                PriceSource::from(&feed_config.source),
                fetcher.clone(),
                clock.clone(),
                feed_config.api_key.clone(),
                feed_config.lookback_secs,
                feed_config.min_time_between_updates_secs,
                metrics.clone(),
            )?;
            handles.push(spawn_update_loop(
                feed,
                Duration::from_secs(feed_config.polling_delay_secs),
                cancel.clone(),
            ));
        }
    }

    if let Some(alarm_settings) = &config.balance_alarm {
        let parsed = alarm_settings.validate()?;
        let provider = new_metered_eth_provider(parsed.provider_url.as_str(), metrics.clone())?;
        let source = Arc::new(EthCollateralSource::new(provider, parsed.contract_address));
        let alarm = CollateralBalanceAlarm::new(
            source,
            parsed.alarm,
            Duration::from_secs(parsed.poll_interval_secs),
            metrics.clone(),
        )?;
        let observables: Vec<Arc<dyn Observable>> = vec![Arc::new(alarm)];
        handles.extend(BotWatchdog::new(observables).run(cancel.clone()));
    }

    if let Some(push_config) = &config.metrics {
        if let Some(handle) =
            start_metrics_push_task(push_config.clone(), registry.clone(), cancel.clone())
        {
            handles.push(handle);
        }
    }

    if handles.is_empty() {
        anyhow::bail!("config enables no bots; nothing to run");
    }
    info!("Started {} bot tasks", handles.len());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    cancel.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
