use crate::defaults::DEAD_PROCESS_STATUS;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatusError {
    #[error("process {0} is not listed by the OS")]
    ProcessNotFound(u32),
}

/// Point-in-time view of a supervised worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StatusSnapshot {
    Running(RunningStatus),
    Stopped(StoppedStatus),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunningStatus {
    pub pid: u32,
    /// Bytes.
    pub resident_memory: u64,
    /// Bytes.
    pub virtual_memory: u64,
    pub cpu_percent: f32,
    pub start_time: DateTime<Utc>,
    pub os_status: String,
    pub total_logs: u64,
    pub restarts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoppedStatus {
    pub os_status: String,
    pub total_logs: u64,
    pub restarts: usize,
    pub exit_code: i32,
}

impl StatusSnapshot {
    pub fn is_running(&self) -> bool {
        matches!(self, StatusSnapshot::Running(_))
    }

    pub fn total_logs(&self) -> u64 {
        match self {
            StatusSnapshot::Running(status) => status.total_logs,
            StatusSnapshot::Stopped(status) => status.total_logs,
        }
    }

    pub fn restarts(&self) -> usize {
        match self {
            StatusSnapshot::Running(status) => status.restarts,
            StatusSnapshot::Stopped(status) => status.restarts,
        }
    }
}

/// Supervisor counters reported along every snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub total_logs: u64,
    pub restarts: usize,
}

/// Fields read from the OS process table for a single pid.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSample {
    pub resident_memory: u64,
    pub virtual_memory: u64,
    pub cpu_percent: f32,
    pub start_time: DateTime<Utc>,
    pub os_status: String,
}

#[cfg_attr(test, mockall::automock)]
pub trait ProcessProbe: Send {
    /// Reads the process table once for `pid`. `None` when the OS does not list it.
    fn sample(&mut self, pid: u32) -> Option<ProcessSample>;
}

/// [`ProcessProbe`] backed by `sysinfo`.
///
/// CPU usage is computed by `sysinfo` between two refreshes of the same pid, so the first sample
/// of a process usually reports `0.0` and later ones the usage since the previous call.
#[derive(Default)]
pub struct SysinfoProbe {
    system: System,
}

impl ProcessProbe for SysinfoProbe {
    fn sample(&mut self, pid: u32) -> Option<ProcessSample> {
        let pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );

        let process = self.system.process(pid)?;
        Some(ProcessSample {
            resident_memory: process.memory(),
            virtual_memory: process.virtual_memory(),
            cpu_percent: process.cpu_usage(),
            start_time: DateTime::from_timestamp(process.start_time() as i64, 0)
                .unwrap_or_default(),
            os_status: process.status().to_string(),
        })
    }
}

/// Builds [`StatusSnapshot`]s out of a [`ProcessProbe`].
pub struct StatusProber {
    probe: Box<dyn ProcessProbe>,
}

impl Default for StatusProber {
    fn default() -> Self {
        Self::new(SysinfoProbe::default())
    }
}

impl StatusProber {
    pub fn new<P>(probe: P) -> Self
    where
        P: ProcessProbe + 'static,
    {
        Self {
            probe: Box::new(probe),
        }
    }

    /// Snapshot of a worker that has not exited yet.
    pub fn running(&mut self, pid: u32, totals: Totals) -> Result<StatusSnapshot, StatusError> {
        let sample = self
            .probe
            .sample(pid)
            .ok_or(StatusError::ProcessNotFound(pid))?;

        Ok(StatusSnapshot::Running(RunningStatus {
            pid,
            resident_memory: sample.resident_memory,
            virtual_memory: sample.virtual_memory,
            cpu_percent: sample.cpu_percent,
            start_time: sample.start_time,
            os_status: sample.os_status,
            total_logs: totals.total_logs,
            restarts: totals.restarts,
        }))
    }

    /// Snapshot of a worker that exited with `exit_code`. The OS status is whatever the table
    /// still reports for `pid`, or `dead` once it is gone.
    pub fn stopped(&mut self, pid: u32, exit_code: i32, totals: Totals) -> StatusSnapshot {
        let os_status = self
            .probe
            .sample(pid)
            .map(|sample| sample.os_status)
            .unwrap_or_else(|| DEAD_PROCESS_STATUS.to_string());

        StatusSnapshot::Stopped(StoppedStatus {
            os_status,
            total_logs: totals.total_logs,
            restarts: totals.restarts,
            exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use mockall::predicate;

    fn sample() -> ProcessSample {
        ProcessSample {
            resident_memory: 2048,
            virtual_memory: 8192,
            cpu_percent: 12.5,
            start_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            os_status: "Sleeping".to_string(),
        }
    }

    const TOTALS: Totals = Totals {
        total_logs: 7,
        restarts: 2,
    };

    #[test]
    fn running_snapshot_from_probe() {
        let mut probe = MockProcessProbe::new();
        probe
            .expect_sample()
            .with(predicate::eq(42))
            .once()
            .returning(|_| Some(sample()));

        let snapshot = StatusProber::new(probe).running(42, TOTALS).unwrap();

        assert_eq!(
            snapshot,
            StatusSnapshot::Running(RunningStatus {
                pid: 42,
                resident_memory: 2048,
                virtual_memory: 8192,
                cpu_percent: 12.5,
                start_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
                os_status: "Sleeping".to_string(),
                total_logs: 7,
                restarts: 2,
            })
        );
        assert!(snapshot.is_running());
    }

    #[test]
    fn running_snapshot_for_unlisted_process() {
        let mut probe = MockProcessProbe::new();
        probe.expect_sample().once().returning(|_| None);

        assert_eq!(
            StatusProber::new(probe).running(42, TOTALS),
            Err(StatusError::ProcessNotFound(42))
        );
    }

    #[test]
    fn stopped_snapshot_os_status() {
        let mut probe = MockProcessProbe::new();
        probe.expect_sample().once().returning(|_| None);
        let snapshot = StatusProber::new(probe).stopped(42, -15, TOTALS);
        assert_matches!(
            snapshot,
            StatusSnapshot::Stopped(StoppedStatus { ref os_status, exit_code: -15, .. })
                if os_status == "dead"
        );

        let mut probe = MockProcessProbe::new();
        probe.expect_sample().once().returning(|_| {
            Some(ProcessSample {
                os_status: "Zombie".to_string(),
                ..sample()
            })
        });
        let snapshot = StatusProber::new(probe).stopped(42, 0, TOTALS);
        assert_eq!(
            snapshot,
            StatusSnapshot::Stopped(StoppedStatus {
                os_status: "Zombie".to_string(),
                total_logs: 7,
                restarts: 2,
                exit_code: 0,
            })
        );
        assert!(!snapshot.is_running());
        assert_eq!(snapshot.total_logs(), 7);
        assert_eq!(snapshot.restarts(), 2);
    }

    #[test]
    fn sysinfo_probe_reads_own_process() {
        let mut probe = SysinfoProbe::default();
        let sample = probe.sample(std::process::id()).unwrap();

        assert!(sample.resident_memory > 0);
        assert!(sample.start_time <= Utc::now());
    }

    #[test]
    fn snapshot_serializes_with_state_tag() {
        let snapshot = StatusSnapshot::Stopped(StoppedStatus {
            os_status: "dead".to_string(),
            total_logs: 1,
            restarts: 0,
            exit_code: 0,
        });

        let value = serde_json::to_value(snapshot).unwrap();
        assert_eq!(value["state"], "stopped");
        assert_eq!(value["exit_code"], 0);
    }
}
