// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wallet-balance watchdog.
//!
//! `BalanceAlarm` compares an observed wallet balance against a target
//! derived from live contract state (dispute-bond share of total collateral
//! plus a buffered per-position reward reserve). Warnings fire on every
//! breach; the healthy signal is throttled so a quiet bot logs at most once
//! per configured interval.

use crate::error::{ClientError, ClientResult};
use crate::metrics::BotMetrics;
use async_trait::async_trait;
use ethers::types::{Address, U256};
use ethers::utils::to_checksum;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A periodically polled reporter driven by the watchdog runner.
#[async_trait]
pub trait Observable: Send + Sync {
    fn name(&self) -> &str;

    /// One observation pass. Implementations log and meter their own
    /// results; failures must not panic the runner.
    async fn observe_and_report(&self);

    fn interval(&self) -> Duration;
}

/// Drives a set of observables, each on its own cadence.
pub struct BotWatchdog {
    observables: Vec<Arc<dyn Observable>>,
}

impl BotWatchdog {
    pub fn new(observables: Vec<Arc<dyn Observable>>) -> Self {
        Self { observables }
    }

    pub fn run(self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.observables.len());
        for observable in self.observables {
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                info!("[BotWatchdog] Starting observable {}", observable.name());
                let mut interval = time::interval(observable.interval());
                interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("[BotWatchdog] Observable {} cancelled", observable.name());
                            break;
                        }
                        _ = interval.tick() => {
                            observable.observe_and_report().await;
                        }
                    }
                }
            }));
        }
        handles
    }
}

/// Live contract reads the target-balance computation depends on.
#[async_trait]
pub trait CollateralSource: Send + Sync {
    async fn total_collateral(&self) -> ClientResult<U256>;

    async fn open_position_count(&self) -> ClientResult<u64>;

    async fn wallet_balance(&self, account: Address) -> ClientResult<U256>;
}

/// 1e18, the fixed-point scale used by the fraction parameters.
fn fixed_point_scale() -> U256 {
    U256::exp10(18)
}

#[derive(Debug, Clone)]
pub struct BalanceAlarmConfig {
    /// Wallet whose balance is observed.
    pub account: Address,
    /// 1e18-scaled fraction of total collateral reserved for dispute bonds.
    pub dispute_bond_pct: U256,
    /// Reward reserve per open position, in the balance's smallest unit.
    pub per_position_reward: U256,
    /// 1e18-scaled multiplier applied to the reward component.
    pub buffer_factor_pct: U256,
    /// Accumulated polling delay before a healthy signal is logged.
    pub healthy_log_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmStatus {
    Warn,
    Healthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmCheck {
    pub status: AlarmStatus,
    pub target_balance: U256,
    /// Whether this check emitted the throttled healthy log.
    pub logged_healthy: bool,
}

pub struct BalanceAlarm {
    config: BalanceAlarmConfig,
    /// Refreshed on every check.
    num_open_positions: u64,
    time_since_last_info_log: u64,
}

impl BalanceAlarm {
    pub fn new(config: BalanceAlarmConfig) -> ClientResult<Self> {
        if config.healthy_log_interval_secs == 0 {
            return Err(ClientError::Configuration(
                "healthy-log-interval must be positive".to_string(),
            ));
        }
        Ok(Self {
            config,
            num_open_positions: 0,
            time_since_last_info_log: 0,
        })
    }

    pub fn num_open_positions(&self) -> u64 {
        self.num_open_positions
    }

    /// Compare `observed_balance` against the freshly computed target.
    /// `elapsed_secs` is the polling delay since the previous check and
    /// feeds the healthy-log throttle. Target-computation failures are
    /// logged and re-raised; they fail this check cycle.
    pub async fn check(
        &mut self,
        source: &dyn CollateralSource,
        observed_balance: U256,
        elapsed_secs: u64,
    ) -> ClientResult<AlarmCheck> {
        self.time_since_last_info_log = self
            .time_since_last_info_log
            .saturating_add(elapsed_secs);

        let (total_collateral, open_positions) = match tokio::join!(
            source.total_collateral(),
            source.open_position_count()
        ) {
            (Ok(collateral), Ok(positions)) => (collateral, positions),
            (Err(e), _) | (_, Err(e)) => {
                error!(
                    "[BalanceAlarm] Failed to compute target balance for {}: {:?}",
                    to_checksum(&self.config.account, None),
                    e
                );
                return Err(e);
            }
        };
        self.num_open_positions = open_positions;

        let scale = fixed_point_scale();
        let bond_component = total_collateral * self.config.dispute_bond_pct / scale;
        let reward_component = U256::from(open_positions)
            * self.config.per_position_reward
            * self.config.buffer_factor_pct
            / scale;
        let target_balance = bond_component + reward_component;

        if observed_balance < target_balance {
            warn!(
                "[BalanceAlarm] Balance below target for {}: observed {}, target {} ({} open positions)",
                to_checksum(&self.config.account, None),
                observed_balance,
                target_balance,
                open_positions
            );
            return Ok(AlarmCheck {
                status: AlarmStatus::Warn,
                target_balance,
                logged_healthy: false,
            });
        }

        let mut logged_healthy = false;
        if self.time_since_last_info_log >= self.config.healthy_log_interval_secs {
            info!(
                "[BalanceAlarm] Balance healthy for {}: observed {}, target {}",
                to_checksum(&self.config.account, None),
                observed_balance,
                target_balance
            );
            self.time_since_last_info_log = 0;
            logged_healthy = true;
        }

        Ok(AlarmCheck {
            status: AlarmStatus::Healthy,
            target_balance,
            logged_healthy,
        })
    }
}

/// Observable wrapper wiring the alarm to a live source and the metrics.
pub struct CollateralBalanceAlarm {
    source: Arc<dyn CollateralSource>,
    alarm: tokio::sync::Mutex<BalanceAlarm>,
    account: Address,
    account_label: String,
    poll_interval: Duration,
    metrics: Arc<BotMetrics>,
}

impl CollateralBalanceAlarm {
    pub fn new(
        source: Arc<dyn CollateralSource>,
        config: BalanceAlarmConfig,
        poll_interval: Duration,
        metrics: Arc<BotMetrics>,
    ) -> ClientResult<Self> {
        let account = config.account;
        let account_label = to_checksum(&account, None);
        Ok(Self {
            source,
            alarm: tokio::sync::Mutex::new(BalanceAlarm::new(config)?),
            account,
            account_label,
            poll_interval,
            metrics,
        })
    }
}

#[async_trait]
impl Observable for CollateralBalanceAlarm {
    fn name(&self) -> &str {
        "CollateralBalanceAlarm"
    }

    async fn observe_and_report(&self) {
        // The wallet read is retried briefly; target computation is not (its
        // failure is re-raised by check and surfaces in the error metrics).
        let observed = match crate::retry_with_max_elapsed_time!(
            self.source.wallet_balance(self.account),
            Duration::from_secs(30)
        ) {
            Ok(Ok(balance)) => balance,
            _ => {
                error!(
                    "[CollateralBalanceAlarm] Failed to read wallet balance for {} after retry",
                    self.account_label
                );
                return;
            }
        };

        let mut alarm = self.alarm.lock().await;
        match alarm
            .check(
                self.source.as_ref(),
                observed,
                self.poll_interval.as_secs(),
            )
            .await
        {
            Ok(check) => {
                self.metrics
                    .balance_alarm_observed
                    .with_label_values(&[&self.account_label])
                    .set(u256_to_f64(observed));
                self.metrics
                    .balance_alarm_target
                    .with_label_values(&[&self.account_label])
                    .set(u256_to_f64(check.target_balance));
                if check.status == AlarmStatus::Warn {
                    self.metrics
                        .balance_alarm_warnings
                        .with_label_values(&[&self.account_label])
                        .inc();
                }
            }
            Err(e) => {
                // Already logged at error level inside check; the next tick
                // retries with fresh contract reads.
                self.metrics
                    .update_cycle_errors
                    .with_label_values(&["balance_alarm", e.error_type()])
                    .inc();
            }
        }
    }

    fn interval(&self) -> Duration {
        self.poll_interval
    }
}

fn u256_to_f64(value: U256) -> f64 {
    value.to_string().parse::<f64>().unwrap_or(f64::MAX)
}

/// Collateral source over an ethers provider and a financial contract.
pub struct EthCollateralSource<P> {
    provider: ethers::providers::Provider<P>,
    contract_address: Address,
}

impl<P> EthCollateralSource<P>
where
    P: ethers::providers::JsonRpcClient + 'static,
{
    pub fn new(provider: ethers::providers::Provider<P>, contract_address: Address) -> Self {
        Self {
            provider,
            contract_address,
        }
    }

    async fn call_uint(&self, signature: &str) -> ClientResult<U256> {
        use ethers::providers::Middleware;
        use ethers::types::transaction::eip2718::TypedTransaction;
        use ethers::utils::keccak256;

        let selector = &keccak256(signature.as_bytes())[..4];
        let request = ethers::types::TransactionRequest::new()
            .to(self.contract_address)
            .data(ethers::types::Bytes::from(selector.to_vec()));
        let typed: TypedTransaction = request.into();
        let out = self.provider.call(&typed, None).await.map_err(|e| {
            ClientError::TransientProviderError(format!("{} call failed: {}", signature, e))
        })?;
        if out.len() < 32 {
            return Err(ClientError::ProviderError(format!(
                "{} returned {} bytes",
                signature,
                out.len()
            )));
        }
        Ok(U256::from_big_endian(&out[..32]))
    }
}

#[async_trait]
impl<P> CollateralSource for EthCollateralSource<P>
where
    P: ethers::providers::JsonRpcClient + 'static,
{
    async fn total_collateral(&self) -> ClientResult<U256> {
        self.call_uint("totalPositionCollateral()").await
    }

    async fn open_position_count(&self) -> ClientResult<u64> {
        Ok(self.call_uint("totalSponsors()").await?.as_u64())
    }

    async fn wallet_balance(&self, account: Address) -> ClientResult<U256> {
        use ethers::providers::Middleware;
        self.provider
            .get_balance(account, None)
            .await
            .map_err(|e| ClientError::TransientProviderError(format!("balance read: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use tokio::sync::mpsc;

    /// Channel-backed observable used to observe watchdog scheduling.
    struct TickProbe {
        tx: mpsc::UnboundedSender<()>,
        every: Duration,
    }

    #[async_trait]
    impl Observable for TickProbe {
        fn name(&self) -> &str {
            "TickProbe"
        }

        async fn observe_and_report(&self) {
            let _ = self.tx.send(());
        }

        fn interval(&self) -> Duration {
            self.every
        }
    }

    struct FakeCollateralSource {
        total_collateral: AtomicU64,
        open_positions: AtomicU64,
        wallet: AtomicU64,
        fail_reads: AtomicBool,
    }

    impl FakeCollateralSource {
        fn new(total_collateral: u64, open_positions: u64, wallet: u64) -> Self {
            Self {
                total_collateral: AtomicU64::new(total_collateral),
                open_positions: AtomicU64::new(open_positions),
                wallet: AtomicU64::new(wallet),
                fail_reads: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl CollateralSource for FakeCollateralSource {
        async fn total_collateral(&self) -> ClientResult<U256> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(ClientError::TransientProviderError(
                    "collateral read failed".to_string(),
                ));
            }
            Ok(U256::from(self.total_collateral.load(Ordering::SeqCst)))
        }

        async fn open_position_count(&self) -> ClientResult<u64> {
            Ok(self.open_positions.load(Ordering::SeqCst))
        }

        async fn wallet_balance(&self, _account: Address) -> ClientResult<U256> {
            Ok(U256::from(self.wallet.load(Ordering::SeqCst)))
        }
    }

    fn config() -> BalanceAlarmConfig {
        BalanceAlarmConfig {
            account: Address::repeat_byte(1),
            // 10% of total collateral
            dispute_bond_pct: U256::exp10(17),
            per_position_reward: U256::from(5),
            // 1.2x buffer
            buffer_factor_pct: U256::from(12) * U256::exp10(17),
            healthy_log_interval_secs: 86_400,
        }
    }

    #[tokio::test]
    async fn test_target_balance_formula() {
        // bond: 1000 * 10% = 100; rewards: 4 * 5 * 1.2 = 24; target 124
        let source = FakeCollateralSource::new(1000, 4, 500);
        let mut alarm = BalanceAlarm::new(config()).unwrap();
        let check = alarm.check(&source, U256::from(500), 60).await.unwrap();
        assert_eq!(check.target_balance, U256::from(124));
        assert_eq!(check.status, AlarmStatus::Healthy);
        assert_eq!(alarm.num_open_positions(), 4);
    }

    #[tokio::test]
    async fn test_warns_every_time_below_target() {
        let source = FakeCollateralSource::new(1000, 4, 0);
        let mut alarm = BalanceAlarm::new(config()).unwrap();
        for _ in 0..3 {
            let check = alarm.check(&source, U256::from(100), 60).await.unwrap();
            assert_eq!(check.status, AlarmStatus::Warn);
            assert!(!check.logged_healthy);
        }
    }

    #[tokio::test]
    async fn test_healthy_log_is_throttled_and_resets() {
        let source = FakeCollateralSource::new(1000, 0, 500);
        let mut alarm = BalanceAlarm::new(config()).unwrap();

        // Accumulate 12h of ticks: healthy but quiet.
        let check = alarm
            .check(&source, U256::from(500), 43_200)
            .await
            .unwrap();
        assert_eq!(check.status, AlarmStatus::Healthy);
        assert!(!check.logged_healthy);

        // Another 12h reaches the 24h interval: logs and resets.
        let check = alarm
            .check(&source, U256::from(500), 43_200)
            .await
            .unwrap();
        assert!(check.logged_healthy);

        // Counter was reset; the next check is quiet again.
        let check = alarm.check(&source, U256::from(500), 60).await.unwrap();
        assert!(!check.logged_healthy);
    }

    #[tokio::test]
    async fn test_warning_does_not_consume_healthy_throttle() {
        let source = FakeCollateralSource::new(1000, 0, 0);
        let mut alarm = BalanceAlarm::new(config()).unwrap();

        // A full day of warnings accumulates throttle but never logs healthy.
        let check = alarm.check(&source, U256::from(0), 86_400).await.unwrap();
        assert_eq!(check.status, AlarmStatus::Warn);

        // As soon as the balance recovers, the pending healthy log fires.
        let check = alarm.check(&source, U256::from(500), 60).await.unwrap();
        assert_eq!(check.status, AlarmStatus::Healthy);
        assert!(check.logged_healthy);
    }

    #[tokio::test]
    async fn test_target_computation_error_is_reraised() {
        let source = FakeCollateralSource::new(1000, 4, 500);
        source.fail_reads.store(true, Ordering::SeqCst);
        let mut alarm = BalanceAlarm::new(config()).unwrap();
        let err = alarm.check(&source, U256::from(500), 60).await.unwrap_err();
        assert_eq!(err.error_type(), "transient_provider_error");
    }

    #[tokio::test]
    async fn test_watchdog_drives_observables() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let probe = Arc::new(TickProbe {
            tx,
            every: Duration::from_millis(10),
        });
        let cancel = CancellationToken::new();
        let observables: Vec<Arc<dyn Observable>> = vec![probe];
        let handles = BotWatchdog::new(observables).run(cancel.clone());

        // First tick fires immediately, then on the interval.
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
