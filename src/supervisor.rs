/// The liveness supervisor: polls the worker's log tail on a fixed interval,
/// classifies the worker as progressing, stalled, or absent, and drives
/// kill+respawn cycles when it stops making forward progress.
use crate::config::WatchConfig;
use crate::health::{Health, StallPolicy};
use crate::process::ProcessControl;
use crate::tail;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

/// The worker under supervision. Immutable for the lifetime of a run: the
/// name locates running instances in the process table, the command respawns
/// them, and the log path is where the worker's output is redirected.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub log_path: PathBuf,
}

impl WatchTarget {
    /// Conventional layout: worker binary `./<name>`, log `<name>.log`.
    pub fn from_name(name: &str) -> Self {
        Self {
            name: name.to_string(),
            command: format!("./{name}"),
            args: Vec::new(),
            log_path: PathBuf::from(format!("{name}.log")),
        }
    }
}

pub struct Supervisor<P: ProcessControl> {
    target: WatchTarget,
    policy: StallPolicy,
    control: P,
    poll_interval: Duration,
    post_kill_delay: Duration,
    /// PID of the instance we spawned last, killed directly on restart.
    /// Name-substring matching remains as the sweep for instances we did
    /// not spawn ourselves.
    child_pid: Option<u32>,
}

impl<P: ProcessControl> Supervisor<P> {
    pub fn new(target: WatchTarget, config: &WatchConfig, control: P) -> Self {
        Self {
            target,
            policy: StallPolicy::new(config.stall_threshold, &config.error_marker),
            control,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            post_kill_delay: Duration::from_secs(config.post_kill_delay_secs),
            child_pid: None,
        }
    }

    /// Run the polling loop until `shutdown` flips. This is the only exit:
    /// every observation or kill failure is folded into the restart policy,
    /// never propagated.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            target = %self.target.name,
            log = %self.target.log_path.display(),
            interval_secs = self.poll_interval.as_secs(),
            "supervisor started"
        );
        loop {
            self.poll().await;
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {
                    tracing::info!("shutdown requested, supervisor stopping");
                    return;
                }
            }
        }
    }

    /// One poll cycle: sample the log tail, classify, restart if due.
    async fn poll(&mut self) {
        match tail::last_line(&self.target.log_path) {
            Err(err) => {
                tracing::warn!(
                    log = %self.target.log_path.display(),
                    %err,
                    "log unreadable, worker presumed absent"
                );
                self.restart().await;
            }
            Ok(None) => {
                tracing::warn!(
                    log = %self.target.log_path.display(),
                    "log has no output yet, worker presumed absent"
                );
                self.restart().await;
            }
            Ok(Some(sample)) => match self.policy.observe(&sample) {
                Health::Progressing => {
                    tracing::debug!(%sample, "worker progressing");
                }
                Health::Stalled { streak } => {
                    tracing::info!(streak, %sample, "worker output stalled");
                }
                Health::RestartDue => {
                    tracing::warn!(%sample, "worker stalled past threshold, restarting");
                    self.restart().await;
                }
            },
        }
    }

    /// Kill-then-respawn cycle. Kills the tracked child first, sweeps the
    /// process table by name, waits out the post-kill delay, then spawns a
    /// fresh instance. Always resets the stall counter; a failed spawn is
    /// retried on the next poll via the absent path.
    async fn restart(&mut self) {
        if let Some(pid) = self.child_pid.take() {
            self.control.kill_pid(pid);
        }
        let killed = self.control.kill_matching(&self.target.name);
        tracing::info!(killed, target = %self.target.name, "terminated worker instances");

        tokio::time::sleep(self.post_kill_delay).await;

        match self
            .control
            .spawn_redirected(&self.target.command, &self.target.args, &self.target.log_path)
        {
            Ok(pid) => {
                self.child_pid = Some(pid);
                tracing::info!(pid, command = %self.target.command, "worker respawned");
            }
            Err(err) => {
                tracing::warn!(%err, "respawn failed, will retry next poll");
            }
        }
        self.policy.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessError;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Calls {
        pid_kills: Vec<u32>,
        name_kills: Vec<String>,
        spawns: Vec<String>,
    }

    #[derive(Clone, Default)]
    struct MockControl {
        calls: Arc<Mutex<Calls>>,
        fail_spawn: bool,
    }

    impl MockControl {
        fn spawn_count(&self) -> usize {
            self.calls.lock().unwrap().spawns.len()
        }
        fn name_kill_count(&self) -> usize {
            self.calls.lock().unwrap().name_kills.len()
        }
    }

    impl ProcessControl for MockControl {
        fn kill_matching(&self, pattern: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .name_kills
                .push(pattern.to_string());
            0
        }

        fn kill_pid(&self, pid: u32) {
            self.calls.lock().unwrap().pid_kills.push(pid);
        }

        fn spawn_redirected(
            &self,
            program: &str,
            _args: &[String],
            _log_path: &Path,
        ) -> Result<u32, ProcessError> {
            self.calls.lock().unwrap().spawns.push(program.to_string());
            if self.fail_spawn {
                Err(ProcessError::Spawn {
                    command: program.to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                })
            } else {
                Ok(4242)
            }
        }
    }

    fn fast_config(threshold: u32) -> WatchConfig {
        WatchConfig {
            poll_interval_secs: 0,
            post_kill_delay_secs: 0,
            stall_threshold: threshold,
            error_marker: "Client Error".to_string(),
        }
    }

    fn target_in(dir: &TempDir) -> WatchTarget {
        WatchTarget {
            name: "alice".to_string(),
            command: "./alice".to_string(),
            args: Vec::new(),
            log_path: dir.path().join("alice.log"),
        }
    }

    #[tokio::test]
    async fn frozen_log_restarts_once_at_threshold() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("alice.log"), "block 1\n").unwrap();

        let control = MockControl::default();
        let mut supervisor = Supervisor::new(target_in(&dir), &fast_config(5), control.clone());

        // Poll 1 observes the line as progress; polls 2-5 are stalls.
        for _ in 0..5 {
            supervisor.poll().await;
        }
        assert_eq!(control.spawn_count(), 0);

        // Fifth consecutive stall: restart fires exactly once.
        supervisor.poll().await;
        assert_eq!(control.spawn_count(), 1);
        assert_eq!(control.name_kill_count(), 1);
        assert_eq!(supervisor.policy.stall_count(), 0);
    }

    #[tokio::test]
    async fn progressing_log_never_restarts() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("alice.log");

        let control = MockControl::default();
        let mut supervisor = Supervisor::new(target_in(&dir), &fast_config(5), control.clone());

        for i in 0..10 {
            std::fs::write(&log, format!("block {i}\n")).unwrap();
            supervisor.poll().await;
            assert_eq!(supervisor.policy.stall_count(), 0);
        }
        assert_eq!(control.spawn_count(), 0);
    }

    #[tokio::test]
    async fn missing_log_restarts_every_poll() {
        let dir = TempDir::new().unwrap();
        let control = MockControl::default();
        let mut supervisor = Supervisor::new(target_in(&dir), &fast_config(5), control.clone());

        for _ in 0..3 {
            supervisor.poll().await;
        }
        assert_eq!(control.name_kill_count(), 3);
        assert_eq!(control.spawn_count(), 3);
    }

    #[tokio::test]
    async fn absence_resets_stall_counter() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("alice.log");
        std::fs::write(&log, "block 1\n").unwrap();

        let control = MockControl::default();
        let mut supervisor = Supervisor::new(target_in(&dir), &fast_config(5), control.clone());

        supervisor.poll().await; // progress
        supervisor.poll().await; // stall 1
        supervisor.poll().await; // stall 2
        assert_eq!(supervisor.policy.stall_count(), 2);

        std::fs::remove_file(&log).unwrap();
        supervisor.poll().await; // absent: unconditional restart
        assert_eq!(control.spawn_count(), 1);
        assert_eq!(supervisor.policy.stall_count(), 0);
    }

    #[tokio::test]
    async fn empty_log_counts_as_absent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("alice.log"), "").unwrap();

        let control = MockControl::default();
        let mut supervisor = Supervisor::new(target_in(&dir), &fast_config(5), control.clone());

        supervisor.poll().await;
        assert_eq!(control.spawn_count(), 1);
    }

    #[tokio::test]
    async fn restart_kills_tracked_pid_before_sweeping() {
        let dir = TempDir::new().unwrap();
        let control = MockControl::default();
        let mut supervisor = Supervisor::new(target_in(&dir), &fast_config(5), control.clone());

        supervisor.poll().await; // absent, spawns pid 4242
        supervisor.poll().await; // still absent, kills tracked pid then sweeps

        let calls = control.calls.lock().unwrap();
        assert_eq!(calls.pid_kills, vec![4242]);
        assert_eq!(calls.name_kills.len(), 2);
    }

    #[tokio::test]
    async fn failed_spawn_is_swallowed_and_retried() {
        let dir = TempDir::new().unwrap();
        let control = MockControl {
            fail_spawn: true,
            ..Default::default()
        };
        let mut supervisor = Supervisor::new(target_in(&dir), &fast_config(5), control.clone());

        supervisor.poll().await;
        supervisor.poll().await;
        // Both polls attempted a spawn; neither error escaped.
        assert_eq!(control.spawn_count(), 2);
        // No PID was tracked from the failed spawns.
        assert!(control.calls.lock().unwrap().pid_kills.is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("alice.log"), "block 1\n").unwrap();

        let control = MockControl::default();
        let supervisor = Supervisor::new(target_in(&dir), &fast_config(5), control);

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), supervisor.run(rx))
            .await
            .expect("supervisor did not honor shutdown");
    }
}
