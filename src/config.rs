use std::time::Duration;

/// How the master hands out tasks.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// A running task older than this is handed to the next requester.
    pub task_timeout: Duration,
    /// Withhold reduce tasks until every map task has completed.
    pub phase_barrier: bool,
    /// How long the monitoring endpoint stays up after the job finished.
    pub linger: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(10),
            phase_barrier: false,
            linger: Duration::from_secs(30),
        }
    }
}

/// Simulated unreliability of a worker.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    pub crash_probability: f64,
    pub delay_probability: f64,
    pub delay: Duration,
    /// Crash when taking the task after this many.
    pub crash_after: Option<usize>,
}

impl FaultConfig {
    pub fn disabled() -> Self {
        Self {
            crash_probability: 0.0,
            delay_probability: 0.0,
            delay: Duration::ZERO,
            crash_after: None,
        }
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            crash_probability: 0.05,
            delay_probability: 0.1,
            delay: Duration::from_secs(5),
            crash_after: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Wait after a failed connection or call before trying again.
    pub retry_delay: Duration,
    /// Wait after the master had nothing to hand out.
    pub idle_delay: Duration,
    /// Rest between finishing a task and reporting it.
    pub pacing: Duration,
    pub faults: FaultConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
            idle_delay: Duration::from_secs(1),
            pacing: Duration::from_secs(3),
            faults: FaultConfig::default(),
        }
    }
}
