use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::commands::{CommandRunner, NetControl};
use crate::config::WatchdogConfig;
use crate::models::{RecoveryLevel, TickReport, WatchdogState};
use crate::probe::Prober;

/// Settle time after asking the supplicant to reassociate.
const REASSOCIATE_SETTLE: Duration = Duration::from_secs(5);
/// Link held down before it is brought back up.
const LINK_DOWN_HOLD: Duration = Duration::from_secs(2);
/// Wait after link up before the supplicant reloads its config.
const LINK_UP_SETTLE: Duration = Duration::from_secs(3);
const RECONFIGURE_SETTLE: Duration = Duration::from_secs(10);
const SERVICE_RESTART_GAP: Duration = Duration::from_secs(5);
/// Time for the DHCP client to get a lease after its restart.
const DHCP_SETTLE: Duration = Duration::from_secs(10);

pub struct Watchdog<R, P> {
    net: NetControl<R>,
    prober: P,
    fallback_target: String,
    supplicant_service: String,
    dhcp_service: String,
    state: WatchdogState,
}

impl<R: CommandRunner, P: Prober> Watchdog<R, P> {
    pub fn new(config: &WatchdogConfig, runner: R, prober: P) -> Self {
        Self {
            net: NetControl::new(runner, config.interface.clone()),
            prober,
            fallback_target: config.fallback_target.clone(),
            supplicant_service: config.supplicant_service.clone(),
            dhcp_service: config.dhcp_service.clone(),
            state: WatchdogState::new(config.interface.clone(), config.probe_interval()),
        }
    }

    /// Runs the loop until `shutdown` resolves. Shutdown is honoured at any
    /// await point, including mid-sleep and mid-recovery.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!(
            "Watchdog active on {} (interval {}s, fallback {})",
            self.state.interface,
            self.state.probe_interval.as_secs(),
            self.fallback_target
        );

        tokio::select! {
            _ = &mut shutdown => return,
            _ = self.startup() => {}
        }

        loop {
            let interval = self.state.probe_interval;
            tokio::select! {
                _ = &mut shutdown => return,
                _ = async {
                    let report = self.tick().await;
                    debug!(
                        "tick: target={} reachable={} failures={} action={:?}",
                        report.target, report.reachable, report.failures, report.action
                    );
                    tokio::time::sleep(interval).await;
                } => {}
            }
        }
    }

    /// Baseline applied once before the first tick.
    pub async fn startup(&mut self) {
        self.reassert_baseline().await;
    }

    /// One probe-decide-act step. Never fails; every sub-step logs its own
    /// trouble.
    pub async fn tick(&mut self) -> TickReport {
        let target = self.resolve_target().await;
        let reachable = self.prober.probe(&target).await;

        if reachable {
            let had_failures = self.state.consecutive_failures > 0;
            if let Some(outage) = self.state.record_success(Utc::now()) {
                info!(
                    "Connectivity restored via {} after {}s outage",
                    target,
                    outage.num_seconds()
                );
            }
            if had_failures {
                self.reassert_baseline().await;
            }
            return TickReport { target, reachable, failures: 0, action: None };
        }

        let failures = self.state.record_failure(Utc::now());
        warn!("Probe to {} failed ({} consecutive)", target, failures);

        let action = RecoveryLevel::for_failures(failures);
        if let Some(level) = action {
            self.recover(level).await;
            if level.resets_counter() {
                self.state.consecutive_failures = 0;
                info!("Failure counter reset after level {}", level.rung());
                self.reassert_baseline().await;
            }
        }

        TickReport {
            target,
            reachable,
            failures: self.state.consecutive_failures,
            action,
        }
    }

    /// Gateway when one is routed right now, otherwise the fixed fallback.
    pub async fn resolve_target(&self) -> String {
        self.net
            .default_gateway()
            .await
            .unwrap_or_else(|| self.fallback_target.clone())
    }

    async fn recover(&self, level: RecoveryLevel) {
        info!("Escalation level {}: {}", level.rung(), level);
        match level {
            RecoveryLevel::Reassociate => {
                self.net.reassociate().await;
                tokio::time::sleep(REASSOCIATE_SETTLE).await;
            }
            RecoveryLevel::LinkReset => {
                self.net.link_down().await;
                tokio::time::sleep(LINK_DOWN_HOLD).await;
                self.net.link_up().await;
                tokio::time::sleep(LINK_UP_SETTLE).await;
                self.net.reconfigure().await;
                tokio::time::sleep(RECONFIGURE_SETTLE).await;
            }
            RecoveryLevel::FullRestart => {
                self.net.restart_service(&self.supplicant_service).await;
                tokio::time::sleep(SERVICE_RESTART_GAP).await;
                self.net.restart_service(&self.dhcp_service).await;
                tokio::time::sleep(DHCP_SETTLE).await;
            }
        }
    }

    async fn reassert_baseline(&self) {
        if self.net.disable_power_save().await {
            info!("Power management disabled on {}", self.net.interface());
        }
    }

    #[cfg(test)]
    pub(crate) fn net(&self) -> &NetControl<R> {
        &self.net
    }
}
