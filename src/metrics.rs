// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_gauge_vec_with_registry, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_vec_with_registry, register_int_gauge_with_registry, GaugeVec, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Registry,
};

const RPC_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10., 20., 40., 60., 120.,
];

#[derive(Clone, Debug)]
pub struct BotMetrics {
    pub(crate) eth_rpc_queries: IntCounterVec,
    pub(crate) eth_rpc_queries_latency: HistogramVec,
    pub(crate) eth_node_connected: IntGauge,

    pub(crate) update_cycles: IntCounterVec,
    pub(crate) update_cycle_errors: IntCounterVec,
    pub(crate) last_polled_block: IntGaugeVec,
    pub(crate) provider_divergence_total: IntCounter,

    pub(crate) unproposed_requests: IntGauge,
    pub(crate) undisputed_proposals: IntGauge,
    pub(crate) expired_proposals: IntGauge,
    pub(crate) settleable_disputes: IntGauge,

    pub(crate) tracked_deposits: IntGauge,
    pub(crate) whitelisted_tokens: IntGauge,

    pub(crate) price_feed_updates: IntCounterVec,
    pub(crate) price_feed_last_price: GaugeVec,

    pub(crate) balance_alarm_target: GaugeVec,
    pub(crate) balance_alarm_observed: GaugeVec,
    pub(crate) balance_alarm_warnings: IntCounterVec,

    pub(crate) tx_submitted: IntCounter,
    pub(crate) tx_submission_errors: IntCounterVec,
}

impl BotMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            eth_rpc_queries: register_int_counter_vec_with_registry!(
                "bot_eth_rpc_queries",
                "Total number of JSON-RPC queries issued, by method",
                &["method"],
                registry,
            )
            .unwrap(),
            eth_rpc_queries_latency: register_histogram_vec_with_registry!(
                "bot_eth_rpc_queries_latency",
                "Latency of JSON-RPC queries, by method",
                &["method"],
                RPC_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            eth_node_connected: register_int_gauge_with_registry!(
                "bot_eth_node_connected",
                "Whether the last JSON-RPC request succeeded (1) or failed (0)",
                registry,
            )
            .unwrap(),
            update_cycles: register_int_counter_vec_with_registry!(
                "bot_update_cycles",
                "Total number of completed update cycles, by client",
                &["client"],
                registry,
            )
            .unwrap(),
            update_cycle_errors: register_int_counter_vec_with_registry!(
                "bot_update_cycle_errors",
                "Total number of failed update cycles, by client and error type",
                &["client", "error_type"],
                registry,
            )
            .unwrap(),
            last_polled_block: register_int_gauge_vec_with_registry!(
                "bot_last_polled_block",
                "Highest block successfully incorporated into cached state, by client",
                &["client"],
                registry,
            )
            .unwrap(),
            provider_divergence_total: register_int_counter_with_registry!(
                "bot_provider_divergence_total",
                "Total number of redundant-provider divergence failures",
                registry,
            )
            .unwrap(),
            unproposed_requests: register_int_gauge_with_registry!(
                "bot_unproposed_requests",
                "Price requests with no proposal",
                registry,
            )
            .unwrap(),
            undisputed_proposals: register_int_gauge_with_registry!(
                "bot_undisputed_proposals",
                "Undisputed proposals still inside their liveness window",
                registry,
            )
            .unwrap(),
            expired_proposals: register_int_gauge_with_registry!(
                "bot_expired_proposals",
                "Undisputed proposals past their liveness window",
                registry,
            )
            .unwrap(),
            settleable_disputes: register_int_gauge_with_registry!(
                "bot_settleable_disputes",
                "Disputes with a resolved price that are not yet settled",
                registry,
            )
            .unwrap(),
            tracked_deposits: register_int_gauge_with_registry!(
                "bot_tracked_deposits",
                "Deposits currently held in the bridge cache",
                registry,
            )
            .unwrap(),
            whitelisted_tokens: register_int_gauge_with_registry!(
                "bot_whitelisted_tokens",
                "Token mappings currently held in the bridge whitelist",
                registry,
            )
            .unwrap(),
            price_feed_updates: register_int_counter_vec_with_registry!(
                "bot_price_feed_updates",
                "Total number of completed price feed updates, by feed",
                &["feed"],
                registry,
            )
            .unwrap(),
            price_feed_last_price: register_gauge_vec_with_registry!(
                "bot_price_feed_last_price",
                "Most recent price observed by a feed",
                &["feed"],
                registry,
            )
            .unwrap(),
            balance_alarm_target: register_gauge_vec_with_registry!(
                "bot_balance_alarm_target",
                "Computed target balance, by account",
                &["account"],
                registry,
            )
            .unwrap(),
            balance_alarm_observed: register_gauge_vec_with_registry!(
                "bot_balance_alarm_observed",
                "Observed wallet balance, by account",
                &["account"],
                registry,
            )
            .unwrap(),
            balance_alarm_warnings: register_int_counter_vec_with_registry!(
                "bot_balance_alarm_warnings",
                "Total number of balance warnings emitted, by account",
                &["account"],
                registry,
            )
            .unwrap(),
            tx_submitted: register_int_counter_with_registry!(
                "bot_tx_submitted",
                "Total number of transactions broadcast",
                registry,
            )
            .unwrap(),
            tx_submission_errors: register_int_counter_vec_with_registry!(
                "bot_tx_submission_errors",
                "Total number of signing-path failures, by phase",
                &["phase"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}
