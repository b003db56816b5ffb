//! Alarm state machine.
//! Three states, driven by one period statistic at a time. Entering the
//! alarm state fires the bound topics once per transition, never per
//! period spent in it.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::metrics::{period_start_ms, MetricId, MetricStore, Statistic};
use crate::notify::TopicModel;
use crate::types::LogicalId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmState {
    InsufficientData,
    Ok,
    Alarm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    GreaterOrEqual,
    Greater,
    LessOrEqual,
    Less,
}

impl Comparison {
    pub fn breaches(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterOrEqual => value >= threshold,
            Comparison::Greater => value > threshold,
            Comparison::LessOrEqual => value <= threshold,
            Comparison::Less => value < threshold,
        }
    }
}

pub const DEFAULT_PERIOD_SECS: u32 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmSpec {
    pub name: String,
    pub metric: MetricId,
    pub statistic: Statistic,
    pub period_secs: u32,
    pub evaluation_periods: u32,
    pub threshold: f64,
    pub comparison: Comparison,
    /// Topics fired on the transition into the alarm state.
    pub actions: Vec<LogicalId>,
}

impl AlarmSpec {
    pub fn new(name: impl Into<String>, metric: MetricId, threshold: f64) -> Self {
        AlarmSpec {
            name: name.into(),
            metric,
            statistic: Statistic::Sum,
            period_secs: DEFAULT_PERIOD_SECS,
            evaluation_periods: 1,
            threshold,
            comparison: Comparison::GreaterOrEqual,
            actions: Vec::new(),
        }
    }

    pub fn with_statistic(mut self, stat: Statistic) -> Self {
        self.statistic = stat;
        self
    }

    pub fn with_evaluation_periods(mut self, periods: u32) -> Self {
        self.evaluation_periods = periods;
        self
    }

    pub fn with_action(mut self, topic: LogicalId) -> Self {
        self.actions.push(topic);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("alarm needs a name");
        }
        if self.period_secs == 0 {
            anyhow::bail!("alarm {:?} has a zero-length period", self.name);
        }
        if self.evaluation_periods == 0 {
            anyhow::bail!("alarm {:?} needs at least one evaluation period", self.name);
        }
        Ok(())
    }

    pub fn references(&self) -> Vec<LogicalId> {
        self.actions.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: AlarmState,
    pub to: AlarmState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub at_ms: i64,
    pub from: AlarmState,
    pub to: AlarmState,
}

/// Live alarm. Feed it one period at a time, oldest first.
#[derive(Debug)]
pub struct AlarmModel {
    spec: AlarmSpec,
    state: AlarmState,
    breach_streak: u32,
    actions: Vec<TopicModel>,
    history: Vec<StateChange>,
}

impl AlarmModel {
    pub fn new(spec: AlarmSpec, actions: Vec<TopicModel>) -> Self {
        AlarmModel {
            spec,
            state: AlarmState::InsufficientData,
            breach_streak: 0,
            actions,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn spec(&self) -> &AlarmSpec {
        &self.spec
    }

    pub fn history(&self) -> &[StateChange] {
        &self.history
    }

    /// Evaluates the period starting at the aligned boundary at or before
    /// `period_start` against the store, then applies the outcome.
    pub fn evaluate_window(
        &mut self,
        store: &MetricStore,
        period_start: i64,
    ) -> Option<Transition> {
        let start = period_start_ms(self.spec.period_secs, period_start);
        let end = start + i64::from(self.spec.period_secs) * 1000;
        let stat = store.statistic(&self.spec.metric, self.spec.statistic, start, end);
        self.observe_period(stat, end)
    }

    /// Core transition rule. `stat` of None means the period held no data.
    pub fn observe_period(&mut self, stat: Option<f64>, period_end_ms: i64) -> Option<Transition> {
        let next = match stat {
            None => {
                self.breach_streak = 0;
                AlarmState::InsufficientData
            }
            Some(value) => {
                if self.spec.comparison.breaches(value, self.spec.threshold) {
                    self.breach_streak += 1;
                    if self.breach_streak >= self.spec.evaluation_periods {
                        AlarmState::Alarm
                    } else {
                        // Partial streak: hold the current state.
                        self.state
                    }
                } else {
                    self.breach_streak = 0;
                    AlarmState::Ok
                }
            }
        };

        if next == self.state {
            return None;
        }
        let transition = Transition {
            from: self.state,
            to: next,
        };
        self.state = next;
        self.history.push(StateChange {
            at_ms: period_end_ms,
            from: transition.from,
            to: transition.to,
        });
        info!(
            alarm = %self.spec.name,
            from = ?transition.from,
            to = ?transition.to,
            "alarm state change"
        );
        if next == AlarmState::Alarm {
            self.fire(period_end_ms, stat);
        }
        Some(transition)
    }

    fn fire(&self, at_ms: i64, stat: Option<f64>) {
        let subject = format!("ALARM: {}", self.spec.name);
        let body = format!(
            "{} is in ALARM: {} {} over {} period(s), threshold {}",
            self.spec.name,
            self.spec.metric.name,
            stat.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            self.spec.evaluation_periods,
            self.spec.threshold
        );
        for topic in &self.actions {
            topic.publish(&subject, &body, at_ms);
        }
    }
}
