//! Calculation audit models.
//!
//! Every step of a gross-to-net calculation records an [`AuditStep`] so a
//! reviewer can see which rule produced each statutory figure and from which
//! inputs.

use serde::{Deserialize, Serialize};

/// A single step in the calculation audit trail of a line.
///
/// # Example
///
/// ```
/// use payrun_engine::models::AuditStep;
///
/// let step = AuditStep {
///     step_number: 1,
///     rule_id: "uif".to_string(),
///     rule_name: "Unemployment Insurance".to_string(),
///     input: serde_json::json!({"uif_remuneration": "35000.00"}),
///     output: serde_json::json!({"uif_employee": "177.12"}),
///     reasoning: "min(35000.00, 17712.00) x 0.01 = 177.12".to_string(),
/// };
/// assert_eq!(step.rule_id, "uif");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditStep {
    /// The sequential step number.
    pub step_number: u32,
    /// The identifier of the rule that was applied.
    pub rule_id: String,
    /// A human-readable name for the rule.
    pub rule_name: String,
    /// The inputs the rule consumed.
    pub input: serde_json::Value,
    /// The values the rule produced.
    pub output: serde_json::Value,
    /// The arithmetic that was performed.
    pub reasoning: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_step_serializes_json_values() {
        let step = AuditStep {
            step_number: 3,
            rule_id: "paye".to_string(),
            rule_name: "Pay As You Earn".to_string(),
            input: serde_json::json!({"taxable_income": "35000.00"}),
            output: serde_json::json!({"paye": "6289.33"}),
            reasoning: "annual 420000.00".to_string(),
        };

        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["step_number"], 3);
        assert_eq!(json["output"]["paye"], "6289.33");

        let back: AuditStep = serde_json::from_value(json).unwrap();
        assert_eq!(back, step);
    }
}
