//! Status condition machinery shared by every kind that reports readiness.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status mirrors `corev1.ConditionStatus`.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single observation of an object's state.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// CamelCased condition type, e.g. `Ready` or `Processing`.
    pub r#type: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// An ordered set of conditions, at most one per type.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct Conditions(pub Vec<Condition>);

impl Conditions {
    /// Adds or updates the condition with the same type. The transition time
    /// is only refreshed when the status actually changes. Returns whether
    /// anything observable changed.
    pub fn set_condition(&mut self, mut cond: Condition) -> bool {
        cond.last_transition_time = Some(Time(Utc::now()));
        for existing in self.0.iter_mut() {
            if existing.r#type == cond.r#type {
                if existing.status == cond.status {
                    cond.last_transition_time = existing.last_transition_time.clone();
                }
                let changed = existing.status != cond.status
                    || existing.reason != cond.reason
                    || existing.message != cond.message;
                *existing = cond;
                return changed;
            }
        }
        self.0.push(cond);
        true
    }

    pub fn get_condition(&self, r#type: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.r#type == r#type)
    }

    pub fn remove_condition(&mut self, r#type: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|c| c.r#type != r#type);
        self.0.len() != before
    }

    pub fn is_true_for(&self, r#type: &str) -> bool {
        self.get_condition(r#type).is_some_and(Condition::is_true)
    }

    pub fn set_pending(&mut self, what: &str) {
        self.set_condition(Condition {
            r#type: "Ready".into(),
            status: ConditionStatus::False,
            reason: Some("Pending".into()),
            message: Some(format!("The compliance {what} is waiting to be processed")),
            last_transition_time: None,
        });
        self.remove_condition("Processing");
    }

    pub fn set_invalid(&mut self, message: &str) {
        self.set_condition(Condition {
            r#type: "Ready".into(),
            status: ConditionStatus::False,
            reason: Some("Invalid".into()),
            message: Some(message.to_string()),
            last_transition_time: None,
        });
        self.remove_condition("Processing");
    }

    pub fn set_processing(&mut self, what: &str) {
        self.set_condition(Condition {
            r#type: "Ready".into(),
            status: ConditionStatus::False,
            reason: Some("Processing".into()),
            message: Some(format!("Compliance {what} doesn't have results yet")),
            last_transition_time: None,
        });
        self.set_condition(Condition {
            r#type: "Processing".into(),
            status: ConditionStatus::True,
            reason: Some("Running".into()),
            message: Some(format!("Compliance {what} run is running the scans")),
            last_transition_time: None,
        });
    }

    pub fn set_ready(&mut self, what: &str) {
        self.set_condition(Condition {
            r#type: "Ready".into(),
            status: ConditionStatus::True,
            reason: Some("Done".into()),
            message: Some(format!("Compliance {what} run is done and has results")),
            last_transition_time: None,
        });
        self.set_condition(Condition {
            r#type: "Processing".into(),
            status: ConditionStatus::False,
            reason: Some("NotRunning".into()),
            message: Some(format!("Compliance {what} run is done running the scans")),
            last_transition_time: None,
        });
    }

    pub fn set_timeout(&mut self, what: &str) {
        self.set_condition(Condition {
            r#type: "Ready".into(),
            status: ConditionStatus::False,
            reason: Some("Timeout".into()),
            message: Some(format!("{what} timed out")),
            last_transition_time: None,
        });
        self.remove_condition("Processing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_condition_updates_in_place() {
        let mut conds = Conditions::default();
        conds.set_pending("scan");
        assert!(!conds.is_true_for("Ready"));

        conds.set_ready("scan");
        assert!(conds.is_true_for("Ready"));
        // Still a single Ready condition.
        assert_eq!(conds.0.iter().filter(|c| c.r#type == "Ready").count(), 1);
    }

    #[test]
    fn unchanged_status_keeps_transition_time() {
        let mut conds = Conditions::default();
        conds.set_processing("suite");
        let first = conds
            .get_condition("Processing")
            .and_then(|c| c.last_transition_time.clone());
        conds.set_processing("suite");
        let second = conds
            .get_condition("Processing")
            .and_then(|c| c.last_transition_time.clone());
        assert_eq!(first, second);
    }

    #[test]
    fn timeout_clears_processing() {
        let mut conds = Conditions::default();
        conds.set_processing("scan");
        conds.set_timeout("scan");
        assert!(conds.get_condition("Processing").is_none());
        let ready = conds.get_condition("Ready").unwrap();
        assert_eq!(ready.reason.as_deref(), Some("Timeout"));
    }
}
