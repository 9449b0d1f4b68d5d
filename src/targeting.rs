use crate::model::{Goal, Viewer};

/// True when the goal's kid list is empty, names `all`, or names `kid_id`.
pub fn goal_targets_kid(goal: &Goal, kid_id: &str) -> bool {
    if goal.kid_ids.is_empty() {
        return true;
    }
    if goal.kid_ids.iter().any(|i| i.eq_ignore_ascii_case("all")) {
        return true;
    }
    goal.kid_ids.iter().any(|i| i == kid_id)
}

/// Goals a kid should see: active, visible to `viewer`, and targeting the kid.
/// Store order is preserved.
pub fn goals_for_kid(goals: &[Goal], kid_id: &str, viewer: Viewer) -> Vec<Goal> {
    goals
        .iter()
        .filter(|g| g.active)
        .filter(|g| g.audience.allows(viewer))
        .filter(|g| goal_targets_kid(g, kid_id))
        .cloned()
        .collect()
}
