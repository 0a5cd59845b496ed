use regex::Regex;
use std::sync::LazyLock;

static PROGRESS_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Progress: (\d{1,3})%").expect("valid progress regex"));

/// Highest value a running job may report. 100 is reserved for completion.
pub const RUNNING_CEILING: u8 = 99;

/// Fallback ticking used when the worker never prints progress markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickPolicy {
    pub step: u8,
    /// Ticks never push the percentage above this value
    pub cap: u8,
}

impl Default for TickPolicy {
    fn default() -> Self {
        Self { step: 10, cap: 90 }
    }
}

/// Best-effort completion percentage of the current job.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    percent: u8,
    marker_seen: bool,
    policy: TickPolicy,
}

impl ProgressTracker {
    pub fn new(policy: TickPolicy) -> Self {
        Self {
            percent: 0,
            marker_seen: false,
            policy: TickPolicy {
                step: policy.step,
                cap: policy.cap.min(RUNNING_CEILING),
            },
        }
    }

    pub fn current(&self) -> u8 {
        self.percent
    }

    pub fn reset(&mut self) {
        self.percent = 0;
        self.marker_seen = false;
    }

    pub fn finalize(&mut self) {
        self.percent = 100;
    }

    /// Returns true if the line carried a progress marker.
    pub fn on_output_line(&mut self, line: &str) -> bool {
        let Some(value) = parse_marker(line) else {
            return false;
        };
        self.marker_seen = true;
        self.percent = self.percent.max(value.min(RUNNING_CEILING));
        true
    }

    /// Advances by one fallback step. Returns false once ticking is over
    /// for this job, either because a marker arrived or the cap is reached.
    pub fn tick(&mut self) -> bool {
        if self.marker_seen || self.percent >= self.policy.cap {
            return false;
        }
        self.percent = self
            .percent
            .saturating_add(self.policy.step)
            .min(self.policy.cap);
        true
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(TickPolicy::default())
    }
}

fn parse_marker(line: &str) -> Option<u8> {
    let caps = PROGRESS_MARKER.captures(line)?;
    let value: u16 = caps.get(1)?.as_str().parse().ok()?;
    (value <= 100).then_some(value as u8)
}
