use std::{fmt, io::Write, time::Duration};

use anyhow::Context;
use tracing::info;
use vdc_client::{ServerTable, Session};

use crate::targets::TargetList;

/// The backend drops power changes that follow each other too closely
pub const DEFAULT_DELAY: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerLevel {
    On,
    Off,
}

impl PowerLevel {
    pub fn is_on(self) -> bool {
        self == PowerLevel::On
    }
}

impl fmt::Display for PowerLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerLevel::On => f.write_str("on"),
            PowerLevel::Off => f.write_str("off"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PowerError {
    #[error("Invalid VM: {0}")]
    UnknownVm(String),
}

#[async_trait::async_trait]
pub trait PowerControl: Send + Sync {
    async fn servers(&self) -> anyhow::Result<ServerTable>;
    async fn set_power(&self, server_id: &str, on: bool) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
impl PowerControl for Session {
    async fn servers(&self) -> anyhow::Result<ServerTable> {
        Ok(self.list_servers().await?)
    }

    async fn set_power(&self, server_id: &str, on: bool) -> anyhow::Result<()> {
        Ok(Session::set_power(self, server_id, on).await?)
    }
}

/// Switch every VM in `vms` to `level`, one after the other, pausing `delay`
/// between two changes.
///
/// Stops at the first VM that is unknown or fails to switch; changes made
/// before that stay in effect.
pub async fn toggle<C, W>(
    control: &C,
    level: PowerLevel,
    vms: &TargetList,
    delay: Duration,
    out: &mut W,
) -> anyhow::Result<()>
where
    C: PowerControl + ?Sized,
    W: Write,
{
    let servers = control.servers().await.context("Failed to list servers")?;

    for (i, vm) in vms.iter().enumerate() {
        let id = servers
            .lookup(vm)
            .ok_or_else(|| PowerError::UnknownVm(vm.to_string()))?;

        if i > 0 {
            info!("Waiting {:?} before the next power change", delay);
            tokio::time::sleep(delay).await;
        }

        info!("Powering {} {} ({})", level, vm, id);
        control
            .set_power(id, level.is_on())
            .await
            .with_context(|| format!("Failed to power {level} {vm}"))?;
        writeln!(out, "{vm}: powered {level}")?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use tokio::time::Instant;

    use super::*;

    // The paused clock jumps straight to timer deadlines, up to its millisecond resolution
    fn assert_waited(waited: Duration, expected: Duration) {
        assert!(
            waited >= expected && waited < expected + Duration::from_millis(5),
            "waited {waited:?}, expected {expected:?}"
        );
    }

    struct Recorder {
        servers: ServerTable,
        calls: Mutex<Vec<(String, bool, Instant)>>,
        fail_on: Option<&'static str>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                servers: [("web1", "srv-1"), ("web2", "srv-2"), ("db1", "srv-3")]
                    .into_iter()
                    .collect(),
                calls: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }

        fn ids(&self) -> Vec<(String, bool)> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(id, on, _)| (id.clone(), *on))
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl PowerControl for Recorder {
        async fn servers(&self) -> anyhow::Result<ServerTable> {
            Ok(self.servers.clone())
        }

        async fn set_power(&self, server_id: &str, on: bool) -> anyhow::Result<()> {
            if self.fail_on == Some(server_id) {
                anyhow::bail!("500 Internal Server Error");
            }
            self.calls
                .lock()
                .unwrap()
                .push((server_id.to_string(), on, Instant::now()));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_vms_one_pause() {
        let recorder = Recorder::new();
        let vms = "web1,web2".parse().unwrap();
        let mut out = Vec::new();

        let start = Instant::now();
        toggle(&recorder, PowerLevel::On, &vms, DEFAULT_DELAY, &mut out)
            .await
            .unwrap();

        assert_eq!(
            recorder.ids(),
            [("srv-1".to_string(), true), ("srv-2".to_string(), true)]
        );
        let calls = recorder.calls.lock().unwrap();
        assert_waited(calls[1].2 - calls[0].2, DEFAULT_DELAY);
        assert_waited(start.elapsed(), DEFAULT_DELAY);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "web1: powered on\nweb2: powered on\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_follows_list_order() {
        let recorder = Recorder::new();
        let vms = "db1,web2,web1".parse().unwrap();
        let delay = Duration::from_secs(3);

        let start = Instant::now();
        toggle(&recorder, PowerLevel::Off, &vms, delay, &mut std::io::sink())
            .await
            .unwrap();

        assert_eq!(
            recorder.ids(),
            [
                ("srv-3".to_string(), false),
                ("srv-2".to_string(), false),
                ("srv-1".to_string(), false)
            ]
        );
        assert_waited(start.elapsed(), delay * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn single_vm_does_not_wait() {
        let recorder = Recorder::new();
        let vms = "web2".parse().unwrap();

        let start = Instant::now();
        toggle(&recorder, PowerLevel::Off, &vms, DEFAULT_DELAY, &mut std::io::sink())
            .await
            .unwrap();

        assert_eq!(recorder.ids(), [("srv-2".to_string(), false)]);
        assert_waited(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_vm_stops_without_rollback() {
        let recorder = Recorder::new();
        let vms = "web1,ghost,web2".parse().unwrap();
        let mut out = Vec::new();

        let start = Instant::now();
        let err = toggle(&recorder, PowerLevel::On, &vms, DEFAULT_DELAY, &mut out)
            .await
            .unwrap_err();

        match err.downcast_ref::<PowerError>() {
            Some(PowerError::UnknownVm(vm)) => assert_eq!(vm, "ghost"),
            None => panic!("unexpected error: {err:?}"),
        }
        // No pause is spent on a VM that does not exist
        assert_waited(start.elapsed(), Duration::ZERO);
        assert_eq!(recorder.ids(), [("srv-1".to_string(), true)]);
        assert_eq!(String::from_utf8(out).unwrap(), "web1: powered on\n");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_power_call_stops() {
        let mut recorder = Recorder::new();
        recorder.fail_on = Some("srv-2");
        let vms = "web1,web2,db1".parse().unwrap();

        let err = toggle(&recorder, PowerLevel::On, &vms, DEFAULT_DELAY, &mut std::io::sink())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Failed to power on web2");
        assert_eq!(recorder.ids(), [("srv-1".to_string(), true)]);
    }
}
