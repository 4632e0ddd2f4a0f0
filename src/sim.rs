//! In-process simulation of slot users.
//!
//! [`SimulatedUser`] is a slot user with a fixed transfer rate that counts the
//! callbacks it receives.  [`Scenario`] replays a scripted sequence of
//! scheduler operations from TOML and reports what happened at each step.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::scheduler::{SchedulerSnapshot, UploadSlotScheduler};
use crate::slot::{SlotError, SlotListener, SlotUser};

// ---------------------------------------------------------------------------
// SimulatedUser
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RateState {
    rate: f32,
    measured: Option<f32>,
    total: f32,
    samples: u32,
}

/// A slot user transferring at a fixed rate (KB/s).
///
/// The rate only becomes measurable after the first `measure_bandwidth` call.
#[derive(Debug)]
pub struct SimulatedUser {
    name: String,
    host: String,
    releasable: bool,
    state: Mutex<RateState>,
    releases: AtomicUsize,
    notifications: AtomicUsize,
}

impl SimulatedUser {
    pub fn new(name: impl Into<String>, host: impl Into<String>, rate: f32) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            releasable: true,
            state: Mutex::new(RateState {
                rate,
                ..RateState::default()
            }),
            releases: AtomicUsize::new(0),
            notifications: AtomicUsize::new(0),
        }
    }

    /// Refuse forced release, like a transfer that cannot be interrupted.
    pub fn unreleasable(mut self) -> Self {
        self.releasable = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_rate(&self, rate: f32) {
        self.state.lock().rate = rate;
    }

    /// Times this user was preempted.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Times this user was told a slot became available.
    pub fn notifications(&self) -> usize {
        self.notifications.load(Ordering::SeqCst)
    }
}

impl SlotUser for SimulatedUser {
    fn host(&self) -> &str {
        &self.host
    }

    fn measure_bandwidth(&self) {
        let mut state = self.state.lock();
        let rate = state.rate;
        state.measured = Some(rate);
        state.total += rate;
        state.samples += 1;
    }

    fn measured_bandwidth(&self) -> Result<f32, SlotError> {
        self.state.lock().measured.ok_or(SlotError::InsufficientData)
    }

    fn average_bandwidth(&self) -> f32 {
        let state = self.state.lock();
        if state.samples == 0 {
            0.0
        } else {
            state.total / state.samples as f32
        }
    }

    fn release_slot(&self) -> Result<(), SlotError> {
        if !self.releasable {
            return Err(SlotError::UnsupportedRelease {
                host: self.host.clone(),
            });
        }
        self.releases.fetch_add(1, Ordering::SeqCst);
        debug!(user = self.name.as_str(), "simulated user released");
        Ok(())
    }
}

impl SlotListener for SimulatedUser {
    fn slot_available(&self) {
        self.notifications.fetch_add(1, Ordering::SeqCst);
        debug!(user = self.name.as_str(), "simulated user notified");
    }
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

/// A simulated user declared by a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSpec {
    pub name: String,
    /// Defaults to `<name>.sim`.
    #[serde(default)]
    pub host: Option<String>,
    /// Transfer rate in KB/s.
    #[serde(default)]
    pub bandwidth: f32,
    #[serde(default = "default_true")]
    pub releasable: bool,
}

fn default_true() -> bool {
    true
}

fn default_times() -> u32 {
    1
}

/// One scripted scheduler operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// `poll_for_slot`.
    Poll {
        user: String,
        #[serde(default)]
        queue: bool,
        #[serde(default)]
        high: bool,
    },
    /// `request_slot`.
    Request {
        user: String,
        #[serde(default)]
        high: bool,
    },
    Done {
        user: String,
    },
    Cancel {
        user: String,
    },
    /// `measure_bandwidth`, repeated `times` times.
    Measure {
        #[serde(default = "default_times")]
        times: u32,
    },
    Position {
        user: String,
    },
}

impl Step {
    fn user(&self) -> Option<&str> {
        match self {
            Step::Poll { user, .. }
            | Step::Request { user, .. }
            | Step::Done { user }
            | Step::Cancel { user }
            | Step::Position { user } => Some(user.as_str()),
            Step::Measure { .. } => None,
        }
    }

    fn op(&self) -> &'static str {
        match self {
            Step::Poll { .. } => "poll",
            Step::Request { .. } => "request",
            Step::Done { .. } => "done",
            Step::Cancel { .. } => "cancel",
            Step::Measure { .. } => "measure",
            Step::Position { .. } => "position",
        }
    }
}

/// A scripted run against a fresh scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Overrides the limits passed to [`Scenario::run`].
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,
    #[serde(default)]
    pub users: Vec<UserSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// What one step produced.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Admission code for poll/request, 0-based queue index (-1 if not
    /// queued) for position; absent otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    pub active: usize,
    pub queued: usize,
    pub queued_resumable: usize,
}

/// Callback counts per user at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct UserReport {
    pub name: String,
    pub releases: usize,
    pub notifications: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub steps: Vec<StepOutcome>,
    pub users: Vec<UserReport>,
    pub final_state: SchedulerSnapshot,
}

impl Scenario {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse scenario")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("invalid scenario file: {}", path.display()))
    }

    /// Replay every step against a new scheduler.
    pub fn run(&self, defaults: &SchedulerConfig) -> Result<ScenarioReport> {
        let config = self.scheduler.clone().unwrap_or_else(|| defaults.clone());
        config.validate()?;
        let scheduler = UploadSlotScheduler::new(config);

        let mut users: HashMap<&str, Arc<SimulatedUser>> = HashMap::new();
        for spec in &self.users {
            let host = spec
                .host
                .clone()
                .unwrap_or_else(|| format!("{}.sim", spec.name));
            let mut user = SimulatedUser::new(spec.name.clone(), host, spec.bandwidth);
            if !spec.releasable {
                user = user.unreleasable();
            }
            if users.insert(spec.name.as_str(), Arc::new(user)).is_some() {
                return Err(anyhow!("duplicate user '{}' in scenario", spec.name));
            }
        }

        let lookup = |name: &str| -> Result<Arc<SimulatedUser>> {
            users
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow!("step references unknown user '{}'", name))
        };

        // Seeding requests are preemptible, so their users must be releasable.
        for (index, step) in self.steps.iter().enumerate() {
            if let Step::Request { user, high: false } = step {
                let releasable = self
                    .users
                    .iter()
                    .find(|spec| spec.name == *user)
                    .map_or(true, |spec| spec.releasable);
                if !releasable {
                    bail!(
                        "step {index}: user '{user}' is not releasable and cannot make a seeding request"
                    );
                }
            }
        }

        info!(users = users.len(), steps = self.steps.len(), "running scenario");
        let mut outcomes = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            let code = match step {
                Step::Poll { user, queue, high } => {
                    Some(scheduler.poll_for_slot(lookup(user)?, *queue, *high).code())
                }
                Step::Request { user, high } => {
                    Some(scheduler.request_slot(lookup(user)?, *high).code())
                }
                Step::Done { user } => {
                    scheduler.request_done(lookup(user)?.as_ref());
                    None
                }
                Step::Cancel { user } => {
                    scheduler.cancel_request(lookup(user)?.as_ref());
                    None
                }
                Step::Measure { times } => {
                    for _ in 0..*times {
                        scheduler.measure_bandwidth();
                    }
                    None
                }
                Step::Position { user } => Some(
                    scheduler
                        .position_in_queue(lookup(user)?.as_ref())
                        .map_or(-1, |p| i32::try_from(p).unwrap_or(i32::MAX)),
                ),
            };
            outcomes.push(StepOutcome {
                index,
                op: step.op().to_string(),
                user: step.user().map(str::to_string),
                code,
                active: scheduler.num_active(),
                queued: scheduler.num_queued(),
                queued_resumable: scheduler.num_queued_resumable(),
            });
        }

        let user_reports = self
            .users
            .iter()
            .filter_map(|spec| users.get(spec.name.as_str()))
            .map(|u| UserReport {
                name: u.name().to_string(),
                releases: u.releases(),
                notifications: u.notifications(),
            })
            .collect();

        Ok(ScenarioReport {
            steps: outcomes,
            users: user_reports,
            final_state: scheduler.snapshot(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
