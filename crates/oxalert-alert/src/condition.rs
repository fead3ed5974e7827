use oxalert_common::types::Condition;

/// Tolerance for `equals` / `not-equals`.
pub const EPSILON: f64 = 0.01;

/// Whether `value` breaches `threshold` under `condition`.
///
/// Total over all inputs: a NaN or infinite value or threshold never satisfies
/// any condition, `not-equals` included.
///
/// ```
/// use oxalert_alert::condition::satisfied;
/// use oxalert_common::types::Condition;
///
/// assert!(satisfied(85.0, Condition::Above, 80.0));
/// assert!(satisfied(80.005, Condition::Equals, 80.0));
/// assert!(!satisfied(f64::NAN, Condition::NotEquals, 80.0));
/// ```
pub fn satisfied(value: f64, condition: Condition, threshold: f64) -> bool {
    if !value.is_finite() || !threshold.is_finite() {
        return false;
    }
    match condition {
        Condition::Above => value > threshold,
        Condition::Below => value < threshold,
        Condition::Equals => (value - threshold).abs() < EPSILON,
        Condition::NotEquals => (value - threshold).abs() >= EPSILON,
    }
}
