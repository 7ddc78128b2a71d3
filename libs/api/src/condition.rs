//! Typed status conditions and the derived `Ready` summary.
//!
//! Conditions follow a latest-write-wins-per-type discipline: a resource
//! carries at most one entry per condition type, and `set_condition`
//! replaces the existing entry in place.

use serde::{Deserialize, Serialize};

/// Condition types reported on a Host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    RegistrationReady,
    InstallationReady,
    BootstrapReady,
    OsVersionReady,
    ResetReady,
    /// Derived summary over all other conditions.
    Ready,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConditionType::RegistrationReady => "RegistrationReady",
            ConditionType::InstallationReady => "InstallationReady",
            ConditionType::BootstrapReady => "BootstrapReady",
            ConditionType::OsVersionReady => "OsVersionReady",
            ConditionType::ResetReady => "ResetReady",
            ConditionType::Ready => "Ready",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// How bad a non-True condition is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub severity: Severity,
    pub reason: String,
    pub message: String,
}

impl Condition {
    /// A succeeded (`status=True`) condition.
    pub fn ready(condition_type: ConditionType) -> Self {
        Self {
            condition_type,
            status: ConditionStatus::True,
            severity: Severity::Info,
            reason: reason::SUCCEEDED.to_string(),
            message: String::new(),
        }
    }

    /// A `status=False` condition with the given severity and reason.
    pub fn not_ready(
        condition_type: ConditionType,
        severity: Severity,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type,
            status: ConditionStatus::False,
            severity,
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// An `Error`-severity failure condition.
    pub fn error(condition_type: ConditionType, message: impl Into<String>) -> Self {
        Self::not_ready(condition_type, Severity::Error, reason::ERROR, message)
    }
}

/// Machine-readable condition reasons.
pub mod reason {
    pub const SUCCEEDED: &str = "Succeeded";
    pub const ERROR: &str = "Error";
    pub const WAITING_FOR_INSTALLATION: &str = "WaitingForInstallation";
    pub const WAITING_FOR_BOOTSTRAP: &str = "WaitingForBootstrap";
    pub const WAITING_FOR_RESET: &str = "WaitingForReset";
    pub const WAITING_FOR_OS_RECONCILE: &str = "WaitingForOsVersionReconcile";
    pub const UNSUPPORTED_FORMAT: &str = "UnsupportedBootstrapFormat";
    pub const MISSING_BOOTSTRAP_SECRET: &str = "MissingBootstrapSecret";
}

/// Upsert a condition: replaces the entry of the same type, appends otherwise.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

pub fn get_condition(conditions: &[Condition], condition_type: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}

/// Derive the `Ready` summary condition from all other conditions.
///
/// The worst non-True condition wins: any `False` beats `Unknown`, higher
/// severity beats lower, and its reason/message carry over. An empty set
/// summarizes to `Unknown`.
pub fn summarize_ready(conditions: &[Condition]) -> Condition {
    let others: Vec<&Condition> = conditions
        .iter()
        .filter(|c| c.condition_type != ConditionType::Ready)
        .collect();

    if others.is_empty() {
        return Condition {
            condition_type: ConditionType::Ready,
            status: ConditionStatus::Unknown,
            severity: Severity::Info,
            reason: "NoConditions".to_string(),
            message: String::new(),
        };
    }

    let worst_false = others
        .iter()
        .filter(|c| c.status == ConditionStatus::False)
        .max_by_key(|c| c.severity);

    if let Some(worst) = worst_false {
        return Condition {
            condition_type: ConditionType::Ready,
            status: ConditionStatus::False,
            severity: worst.severity,
            reason: worst.reason.clone(),
            message: worst.message.clone(),
        };
    }

    if others.iter().any(|c| c.status == ConditionStatus::Unknown) {
        return Condition {
            condition_type: ConditionType::Ready,
            status: ConditionStatus::Unknown,
            severity: Severity::Info,
            reason: "ConditionUnknown".to_string(),
            message: String::new(),
        };
    }

    Condition::ready(ConditionType::Ready)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_latest_write_wins_per_type() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            Condition::error(ConditionType::BootstrapReady, "boom"),
        );
        set_condition(&mut conditions, Condition::ready(ConditionType::BootstrapReady));

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::True);
    }

    #[test]
    fn test_summarize_all_true() {
        let conditions = vec![
            Condition::ready(ConditionType::RegistrationReady),
            Condition::ready(ConditionType::InstallationReady),
        ];
        let ready = summarize_ready(&conditions);
        assert_eq!(ready.status, ConditionStatus::True);
    }

    #[test]
    fn test_summarize_worst_severity_wins() {
        let conditions = vec![
            Condition::ready(ConditionType::RegistrationReady),
            Condition::not_ready(
                ConditionType::BootstrapReady,
                Severity::Info,
                reason::WAITING_FOR_BOOTSTRAP,
                "",
            ),
            Condition::error(ConditionType::ResetReady, "reset failed"),
        ];
        let ready = summarize_ready(&conditions);
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.severity, Severity::Error);
        assert_eq!(ready.reason, reason::ERROR);
    }

    #[test]
    fn test_summarize_ignores_previous_ready_entry() {
        let conditions = vec![
            Condition::ready(ConditionType::Ready),
            Condition::error(ConditionType::InstallationReady, "disk missing"),
        ];
        let ready = summarize_ready(&conditions);
        assert_eq!(ready.status, ConditionStatus::False);
    }

    #[test]
    fn test_summarize_empty_is_unknown() {
        let ready = summarize_ready(&[]);
        assert_eq!(ready.status, ConditionStatus::Unknown);
    }

    #[test]
    fn test_condition_serialization_uses_type_key() {
        let condition = Condition::ready(ConditionType::RegistrationReady);
        let json = serde_json::to_string(&condition).unwrap();
        assert!(json.contains("\"type\":\"RegistrationReady\""));
        assert!(json.contains("\"status\":\"True\""));
    }
}
