use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Upper bound on any single external command.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Boundary to the OS tools the watchdog drives.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// `Err` means the command could not be run at all; a non-zero exit is
    /// reported through `CommandOutput::success`.
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

#[async_trait]
impl<T: CommandRunner + ?Sized> CommandRunner for Arc<T> {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        (**self).run(program, args).await
    }
}

pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self { timeout: COMMAND_TIMEOUT }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!("exec: {} {}", program, args.join(" "));
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .with_context(|| format!("{} timed out after {}s", program, self.timeout.as_secs()))?
            .with_context(|| format!("Failed to spawn {}", program))?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Named network operations for one interface, each reduced to a logged
/// pass/fail.
pub struct NetControl<R> {
    runner: R,
    interface: String,
}

impl<R: CommandRunner> NetControl<R> {
    pub fn new(runner: R, interface: impl Into<String>) -> Self {
        Self { runner, interface: interface.into() }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    #[cfg(test)]
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Current default gateway, preferring a route through the watched
    /// interface. `None` when no default route exists or the query fails.
    pub async fn default_gateway(&self) -> Option<String> {
        match self.runner.run("ip", &["route", "show", "default"]).await {
            Ok(out) if out.success => parse_default_gateway(&out.stdout, &self.interface),
            Ok(out) => {
                debug!("gateway query exited with {:?}: {}", out.code, out.stderr.trim());
                None
            }
            Err(e) => {
                debug!("gateway query failed: {:#}", e);
                None
            }
        }
    }

    pub async fn disable_power_save(&self) -> bool {
        self.step("power_save off", "iw", &["dev", self.interface.as_str(), "set", "power_save", "off"]).await
    }

    pub async fn reassociate(&self) -> bool {
        self.step("reassociate", "wpa_cli", &["-i", self.interface.as_str(), "reassociate"]).await
    }

    pub async fn reconfigure(&self) -> bool {
        self.step("reconfigure", "wpa_cli", &["-i", self.interface.as_str(), "reconfigure"]).await
    }

    pub async fn link_down(&self) -> bool {
        self.step("link down", "ip", &["link", "set", self.interface.as_str(), "down"]).await
    }

    pub async fn link_up(&self) -> bool {
        self.step("link up", "ip", &["link", "set", self.interface.as_str(), "up"]).await
    }

    pub async fn restart_service(&self, service: &str) -> bool {
        self.step(&format!("restart {}", service), "systemctl", &["restart", service]).await
    }

    async fn step(&self, label: &str, program: &str, args: &[&str]) -> bool {
        match self.runner.run(program, args).await {
            Ok(out) if out.success => true,
            Ok(out) => {
                let detail = out.stderr.trim();
                let code = out.code.map_or("signal".to_string(), |c| c.to_string());
                if detail.is_empty() {
                    warn!("[{}] {} failed (exit {})", self.interface, label, code);
                } else {
                    warn!("[{}] {} failed (exit {}): {}", self.interface, label, code, detail);
                }
                false
            }
            Err(e) => {
                warn!("[{}] {} could not run: {:#}", self.interface, label, e);
                false
            }
        }
    }
}

/// Picks the `via` address from `ip route show default` output. A route
/// bound to `interface` wins over the first listed one.
pub fn parse_default_gateway(output: &str, interface: &str) -> Option<String> {
    let mut first = None;
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.first() != Some(&"default") {
            continue;
        }
        let Some(gateway) = field_after(&fields, "via") else {
            continue;
        };
        if field_after(&fields, "dev") == Some(interface) {
            return Some(gateway.to_string());
        }
        first.get_or_insert_with(|| gateway.to_string());
    }
    first
}

fn field_after<'a>(fields: &[&'a str], key: &str) -> Option<&'a str> {
    fields.iter().position(|f| *f == key).and_then(|i| fields.get(i + 1)).copied()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records every invocation; programs listed in `failing` exit non-zero,
    /// programs in `missing` fail to spawn.
    #[derive(Default)]
    pub(crate) struct ScriptedRunner {
        pub calls: Mutex<Vec<String>>,
        pub failing: Vec<String>,
        pub missing: Vec<String>,
        pub stdout: Mutex<HashMap<String, String>>,
    }

    impl ScriptedRunner {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn set_stdout(&self, command: &str, stdout: &str) {
            self.stdout.lock().unwrap().insert(command.to_string(), stdout.to_string());
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
            let line = format!("{} {}", program, args.join(" "));
            self.calls.lock().unwrap().push(line.clone());
            if self.missing.iter().any(|m| line.starts_with(m.as_str())) {
                anyhow::bail!("No such file or directory");
            }
            let failed = self.failing.iter().any(|f| line.starts_with(f.as_str()));
            Ok(CommandOutput {
                success: !failed,
                code: Some(if failed { 1 } else { 0 }),
                stdout: self.stdout.lock().unwrap().get(&line).cloned().unwrap_or_default(),
                stderr: if failed { "operation not permitted".into() } else { String::new() },
            })
        }
    }

    #[test]
    fn parses_single_default_route() {
        let out = "default via 192.168.1.1 dev wlan0 proto dhcp src 192.168.1.23 metric 303\n";
        assert_eq!(parse_default_gateway(out, "wlan0").as_deref(), Some("192.168.1.1"));
    }

    #[test]
    fn prefers_route_on_watched_interface() {
        let out = "default via 10.0.0.1 dev eth0 metric 100\n\
                   default via 192.168.1.1 dev wlan0 metric 600\n";
        assert_eq!(parse_default_gateway(out, "wlan0").as_deref(), Some("192.168.1.1"));
        assert_eq!(parse_default_gateway(out, "wlan1").as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn no_gateway_without_via() {
        assert_eq!(parse_default_gateway("", "wlan0"), None);
        assert_eq!(parse_default_gateway("default dev ppp0 scope link\n", "wlan0"), None);
        assert_eq!(parse_default_gateway("10.0.0.0/24 dev eth0 proto kernel\n", "eth0"), None);
    }

    #[tokio::test]
    async fn gateway_query_failure_yields_none() {
        let runner = ScriptedRunner { failing: vec!["ip route".into()], ..Default::default() };
        let net = NetControl::new(runner, "wlan0");
        assert_eq!(net.default_gateway().await, None);
    }

    #[tokio::test]
    async fn step_failures_are_reported_not_raised() {
        let runner = ScriptedRunner {
            failing: vec!["iw".into()],
            missing: vec!["wpa_cli".into()],
            ..Default::default()
        };
        let net = NetControl::new(runner, "wlan0");

        assert!(!net.disable_power_save().await);
        assert!(!net.reassociate().await);
        assert!(net.link_up().await);
        assert_eq!(
            net.runner().calls(),
            vec![
                "iw dev wlan0 set power_save off",
                "wpa_cli -i wlan0 reassociate",
                "ip link set wlan0 up",
            ]
        );
    }

    #[tokio::test]
    async fn system_runner_reports_exit_status() {
        let runner = SystemRunner::new();
        let ok = runner.run("sh", &["-c", "echo hi"]).await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.stdout.trim(), "hi");

        let bad = runner.run("sh", &["-c", "exit 3"]).await.unwrap();
        assert!(!bad.success);
        assert_eq!(bad.code, Some(3));

        assert!(runner.run("netpulse-no-such-binary", &[]).await.is_err());
    }
}
