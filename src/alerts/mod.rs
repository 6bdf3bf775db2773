//! Alert evaluator
//!
//! Turns metric samples into de-duplicated alerts. Each (service, rule) pair
//! is a small state machine (quiet or firing); emission is additionally
//! rate-limited by a cool-down anchored to the last emitted alert.

mod sink;

pub use sink::{AlertDispatcher, AlertLog, AlertSink, WebhookSink};

use crate::config::AlertsConfig;
use crate::health::HealthStatus;
use crate::metrics::MetricSample;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertRule {
    Cpu,
    Memory,
    ResponseTime,
    /// Service reported down or crashed
    Liveness,
}

impl AlertRule {
    pub const ALL: [AlertRule; 4] = [
        AlertRule::Cpu,
        AlertRule::Memory,
        AlertRule::ResponseTime,
        AlertRule::Liveness,
    ];

    pub fn severity(&self) -> Severity {
        match self {
            AlertRule::Liveness => Severity::Critical,
            _ => Severity::Warning,
        }
    }
}

impl std::fmt::Display for AlertRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertRule::Cpu => write!(f, "cpu"),
            AlertRule::Memory => write!(f, "memory"),
            AlertRule::ResponseTime => write!(f, "response_time"),
            AlertRule::Liveness => write!(f, "liveness"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub service: String,
    pub rule: AlertRule,
    pub threshold: f64,
    pub observed: f64,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default)]
struct RuleState {
    firing: bool,
    last_emitted: Option<DateTime<Utc>>,
}

/// Applies the threshold rules to samples and decides what to emit
pub struct AlertEvaluator {
    cpu_threshold: f64,
    memory_threshold: f64,
    response_time_threshold_ms: u64,
    cooldown: Duration,
    states: HashMap<(String, AlertRule), RuleState>,
}

impl AlertEvaluator {
    pub fn new(config: &AlertsConfig) -> Self {
        Self {
            cpu_threshold: config.cpu_threshold,
            memory_threshold: config.memory_threshold,
            response_time_threshold_ms: config.response_time_threshold_ms,
            cooldown: Duration::seconds(config.cooldown_secs.min(i64::MAX as u64) as i64),
            states: HashMap::new(),
        }
    }

    pub fn evaluate(&mut self, service: &str, sample: &MetricSample) -> Vec<Alert> {
        self.evaluate_at(service, sample, Utc::now())
    }

    /// Evaluate every rule against one sample.
    ///
    /// A true condition moves the pair to firing; a false one moves it back
    /// to quiet. An alert is emitted when the condition holds and nothing was
    /// emitted for the pair within the cool-down, whichever state it was in.
    pub fn evaluate_at(
        &mut self,
        service: &str,
        sample: &MetricSample,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        AlertRule::ALL
            .into_iter()
            .filter_map(|rule| {
                let (holds, threshold, observed) = self.check(rule, sample);
                self.apply(service, rule, holds, threshold, observed, now)
            })
            .collect()
    }

    /// A crash counts as a liveness failure; other rules are left alone
    pub fn crashed(&mut self, service: &str) -> Option<Alert> {
        self.apply(service, AlertRule::Liveness, true, 1.0, 1.0, Utc::now())
    }

    fn apply(
        &mut self,
        service: &str,
        rule: AlertRule,
        holds: bool,
        threshold: f64,
        observed: f64,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let state = self
            .states
            .entry((service.to_string(), rule))
            .or_default();

        if !holds {
            if state.firing {
                tracing::info!("{} alert for {} cleared", rule, service);
            }
            state.firing = false;
            return None;
        }

        state.firing = true;
        let cooled = state
            .last_emitted
            .map_or(true, |last| now - last >= self.cooldown);
        if !cooled {
            return None;
        }

        state.last_emitted = Some(now);
        Some(Alert {
            service: service.to_string(),
            rule,
            threshold,
            observed,
            timestamp: now,
            severity: rule.severity(),
            message: describe(service, rule, threshold, observed),
        })
    }

    /// Whether the pair is currently firing
    pub fn is_firing(&self, service: &str, rule: AlertRule) -> bool {
        self.states
            .get(&(service.to_string(), rule))
            .is_some_and(|s| s.firing)
    }

    fn check(&self, rule: AlertRule, sample: &MetricSample) -> (bool, f64, f64) {
        match rule {
            AlertRule::Cpu => {
                let observed = f64::from(sample.cpu_percent);
                (observed > self.cpu_threshold, self.cpu_threshold, observed)
            }
            AlertRule::Memory => {
                let observed = f64::from(sample.memory_percent);
                (observed > self.memory_threshold, self.memory_threshold, observed)
            }
            AlertRule::ResponseTime => {
                let threshold = self.response_time_threshold_ms as f64;
                match sample.response_time_ms {
                    Some(ms) => (ms > self.response_time_threshold_ms, threshold, ms as f64),
                    None => (false, threshold, 0.0),
                }
            }
            AlertRule::Liveness => {
                let down = sample.health == HealthStatus::Down;
                (down, 1.0, if down { 1.0 } else { 0.0 })
            }
        }
    }
}

fn describe(service: &str, rule: AlertRule, threshold: f64, observed: f64) -> String {
    match rule {
        AlertRule::Cpu => format!(
            "{} CPU usage {:.1}% exceeds {:.1}%",
            service, observed, threshold
        ),
        AlertRule::Memory => format!(
            "{} memory usage {:.1}% exceeds {:.1}%",
            service, observed, threshold
        ),
        AlertRule::ResponseTime => format!(
            "{} responded in {:.0}ms, above {:.0}ms",
            service, observed, threshold
        ),
        AlertRule::Liveness => format!("{} is down", service),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator(cooldown_secs: u64) -> AlertEvaluator {
        AlertEvaluator::new(&AlertsConfig {
            cpu_threshold: 80.0,
            memory_threshold: 85.0,
            response_time_threshold_ms: 500,
            cooldown_secs,
            ..AlertsConfig::default()
        })
    }

    fn cpu_sample(cpu: f32) -> MetricSample {
        MetricSample::new(cpu, 10.0)
    }

    #[test]
    fn test_sustained_breach_alerts_once() {
        let mut evaluator = evaluator(300);
        let start = Utc::now();

        let mut alerts = Vec::new();
        for i in 0..10 {
            let now = start + Duration::seconds(i * 10);
            alerts.extend(evaluator.evaluate_at("web", &cpu_sample(85.0), now));
        }

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule, AlertRule::Cpu);
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(alerts[0].threshold, 80.0);
        assert_eq!(alerts[0].observed, 85.0);
        assert!(evaluator.is_firing("web", AlertRule::Cpu));
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut evaluator = evaluator(300);
        assert!(evaluator.evaluate("web", &cpu_sample(80.0)).is_empty());
        assert!(!evaluator.is_firing("web", AlertRule::Cpu));
    }

    #[test]
    fn test_flapping_within_cooldown_alerts_once() {
        let mut evaluator = evaluator(300);
        let start = Utc::now();

        let mut alerts = Vec::new();
        for i in 0..10 {
            let cpu = if i % 2 == 0 { 90.0 } else { 50.0 };
            let now = start + Duration::seconds(i * 10);
            alerts.extend(evaluator.evaluate_at("web", &cpu_sample(cpu), now));
        }

        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn test_one_quiet_sample_clears() {
        let mut evaluator = evaluator(300);
        evaluator.evaluate("web", &cpu_sample(90.0));
        assert!(evaluator.is_firing("web", AlertRule::Cpu));

        evaluator.evaluate("web", &cpu_sample(10.0));
        assert!(!evaluator.is_firing("web", AlertRule::Cpu));
    }

    #[test]
    fn test_firing_reemits_after_cooldown() {
        let mut evaluator = evaluator(60);
        let start = Utc::now();

        let first = evaluator.evaluate_at("web", &cpu_sample(95.0), start);
        let early = evaluator.evaluate_at("web", &cpu_sample(95.0), start + Duration::seconds(30));
        let late = evaluator.evaluate_at("web", &cpu_sample(95.0), start + Duration::seconds(60));

        assert_eq!(first.len(), 1);
        assert!(early.is_empty());
        assert_eq!(late.len(), 1);
    }

    #[test]
    fn test_rules_are_independent_per_service() {
        let mut evaluator = evaluator(300);
        let sample = MetricSample::new(90.0, 90.0);

        let web = evaluator.evaluate("web", &sample);
        let api = evaluator.evaluate("api", &sample);

        assert_eq!(web.len(), 2);
        assert_eq!(api.len(), 2);
    }

    #[test]
    fn test_response_time_rule() {
        let mut evaluator = evaluator(300);
        let mut sample = cpu_sample(1.0);
        sample.response_time_ms = Some(750);

        let alerts = evaluator.evaluate("web", &sample);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule, AlertRule::ResponseTime);
        assert_eq!(alerts[0].observed, 750.0);
    }

    #[test]
    fn test_down_and_crash_are_critical() {
        let mut evaluator = evaluator(300);
        let mut sample = cpu_sample(1.0);
        sample.health = HealthStatus::Down;

        let alerts = evaluator.evaluate("web", &sample);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule, AlertRule::Liveness);
        assert_eq!(alerts[0].severity, Severity::Critical);

        let crash = evaluator.crashed("api").unwrap();
        assert_eq!(crash.message, "api is down");

        // Still firing and within the cool-down
        assert!(evaluator.crashed("api").is_none());
    }
}
