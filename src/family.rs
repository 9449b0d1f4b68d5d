use crate::clock::Clock;
use crate::model::{Audience, CheckIn, CheckinFilter, CheckinUpsert, Goal, Kid, Viewer};
use crate::sheet::CHECKINS_H;
use crate::store::{PointsStore, StoreError, StoreResult};
use crate::targeting::{goal_targets_kid, goals_for_kid};
use serde::Serialize;
use std::collections::HashSet;

pub const MAX_GOAL_POINTS: i64 = 100;

/// Next `<prefix><n>` id after the largest numeric suffix already used.
pub fn next_id<'a>(prefix: &str, existing: impl IntoIterator<Item = &'a str>) -> String {
    let existing: Vec<&str> = existing.into_iter().collect();
    // Workspaces carried over from the integer-keyed database number rows
    // without a prefix; keep counting the same way there.
    if !existing.is_empty() && existing.iter().all(|id| id.parse::<u64>().is_ok()) {
        let max = existing.iter().filter_map(|id| id.parse::<u64>().ok()).max().unwrap_or(0);
        return (max + 1).to_string();
    }
    let max = existing
        .iter()
        .filter_map(|id| id.strip_prefix(prefix))
        .filter_map(|n| n.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    format!("{}{}", prefix, max + 1)
}

fn validate_id(id: &str) -> StoreResult<()> {
    if id.is_empty() {
        return Err(StoreError::Invalid("id must not be empty".into()));
    }
    // Ids are listed in comma-separated goal targets.
    if id.contains(',') || id.contains('，') {
        return Err(StoreError::Invalid("id must not contain commas".into()));
    }
    if id.eq_ignore_ascii_case("all") {
        return Err(StoreError::Invalid("id 'all' is reserved".into()));
    }
    Ok(())
}

pub fn seed_if_empty(store: &mut dyn PointsStore) -> StoreResult<bool> {
    let mut seeded = false;
    if store.list_kids()?.is_empty() {
        for (id, name, grade) in [("k1", "そうた", "年中"), ("k2", "みお", "小1")] {
            store.insert_kid(&Kid {
                id: id.into(),
                name: name.into(),
                grade: grade.into(),
                active: true,
            })?;
        }
        seeded = true;
    }
    if store.list_goals()?.is_empty() {
        for (id, title, points) in [
            ("g1", "ランニング10分", 3),
            ("g2", "宿題をする", 5),
            ("g3", "歯みがき", 2),
        ] {
            store.insert_goal(&Goal {
                id: id.into(),
                title: title.into(),
                points,
                active: true,
                kid_ids: Vec::new(),
                audience: Audience::Both,
                category: None,
            })?;
        }
        seeded = true;
    }
    if seeded {
        tracing::info!(backend = store.backend().as_str(), "seeded empty workspace");
    }
    Ok(seeded)
}

pub fn list_kids(store: &mut dyn PointsStore, include_inactive: bool) -> StoreResult<Vec<Kid>> {
    Ok(store
        .list_kids()?
        .into_iter()
        .filter(|k| include_inactive || k.active)
        .collect())
}

pub fn list_goals(store: &mut dyn PointsStore, include_inactive: bool) -> StoreResult<Vec<Goal>> {
    Ok(store
        .list_goals()?
        .into_iter()
        .filter(|g| include_inactive || g.active)
        .collect())
}

pub fn find_kid(store: &mut dyn PointsStore, kid_id: &str) -> StoreResult<Kid> {
    store
        .list_kids()?
        .into_iter()
        .find(|k| k.id == kid_id)
        .ok_or_else(|| StoreError::NotFound(format!("kid {}", kid_id)))
}

pub fn find_goal(store: &mut dyn PointsStore, goal_id: &str) -> StoreResult<Goal> {
    store
        .list_goals()?
        .into_iter()
        .find(|g| g.id == goal_id)
        .ok_or_else(|| StoreError::NotFound(format!("goal {}", goal_id)))
}

pub struct NewKid {
    pub id: Option<String>,
    pub name: String,
    pub grade: String,
}

pub fn create_kid(store: &mut dyn PointsStore, new: NewKid) -> StoreResult<Kid> {
    let name = new.name.trim().to_string();
    if name.is_empty() {
        return Err(StoreError::Invalid("name must not be empty".into()));
    }
    let kids = store.list_kids()?;
    if kids.iter().any(|k| k.name == name) {
        return Err(StoreError::Conflict(format!("kid name already exists: {}", name)));
    }
    let id = match new.id.map(|s| s.trim().to_string()) {
        Some(id) => id,
        None => next_id("k", kids.iter().map(|k| k.id.as_str())),
    };
    validate_id(&id)?;
    if kids.iter().any(|k| k.id == id) {
        return Err(StoreError::Conflict(format!("kid id already exists: {}", id)));
    }
    let kid = Kid {
        id,
        name,
        grade: new.grade.trim().to_string(),
        active: true,
    };
    store.insert_kid(&kid)?;
    tracing::info!(kid_id = %kid.id, "kid created");
    Ok(kid)
}

pub fn set_kid_active(store: &mut dyn PointsStore, kid_id: &str, active: bool) -> StoreResult<Kid> {
    store.set_kid_active(kid_id, active)?;
    find_kid(store, kid_id)
}

fn validate_points(points: i64) -> StoreResult<()> {
    if !(0..=MAX_GOAL_POINTS).contains(&points) {
        return Err(StoreError::Invalid(format!(
            "points must be in 0..={}",
            MAX_GOAL_POINTS
        )));
    }
    Ok(())
}

pub struct NewGoal {
    pub id: Option<String>,
    pub title: String,
    pub points: i64,
    pub kid_ids: Vec<String>,
    pub audience: Audience,
    pub category: Option<String>,
}

pub fn create_goal(store: &mut dyn PointsStore, new: NewGoal) -> StoreResult<Goal> {
    let title = new.title.trim().to_string();
    if title.is_empty() {
        return Err(StoreError::Invalid("title must not be empty".into()));
    }
    validate_points(new.points)?;
    let goals = store.list_goals()?;
    let id = match new.id.map(|s| s.trim().to_string()) {
        Some(id) => id,
        None => next_id("g", goals.iter().map(|g| g.id.as_str())),
    };
    validate_id(&id)?;
    if goals.iter().any(|g| g.id == id) {
        return Err(StoreError::Conflict(format!("goal id already exists: {}", id)));
    }
    let goal = Goal {
        id,
        title,
        points: new.points,
        active: true,
        kid_ids: new.kid_ids,
        audience: new.audience,
        category: new.category.filter(|c| !c.trim().is_empty()),
    };
    store.insert_goal(&goal)?;
    tracing::info!(goal_id = %goal.id, "goal created");
    Ok(goal)
}

#[derive(Debug, Default)]
pub struct GoalPatch {
    pub title: Option<String>,
    pub points: Option<i64>,
    pub kid_ids: Option<Vec<String>>,
    pub audience: Option<Audience>,
    /// `Some(None)` clears the category.
    pub category: Option<Option<String>>,
    pub active: Option<bool>,
}

pub fn update_goal(store: &mut dyn PointsStore, goal_id: &str, patch: GoalPatch) -> StoreResult<Goal> {
    let mut goal = find_goal(store, goal_id)?;
    if let Some(title) = patch.title {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(StoreError::Invalid("title must not be empty".into()));
        }
        goal.title = title;
    }
    if let Some(points) = patch.points {
        validate_points(points)?;
        goal.points = points;
    }
    if let Some(kid_ids) = patch.kid_ids {
        goal.kid_ids = kid_ids;
    }
    if let Some(audience) = patch.audience {
        goal.audience = audience;
    }
    if let Some(category) = patch.category {
        goal.category = category.filter(|c| !c.trim().is_empty());
    }
    if let Some(active) = patch.active {
        goal.active = active;
    }
    store.update_goal(&goal)?;
    Ok(goal)
}

pub fn set_goal_active(store: &mut dyn PointsStore, goal_id: &str, active: bool) -> StoreResult<Goal> {
    update_goal(
        store,
        goal_id,
        GoalPatch {
            active: Some(active),
            ..Default::default()
        },
    )
}

pub fn goals_for(store: &mut dyn PointsStore, kid_id: &str, viewer: Viewer) -> StoreResult<Vec<Goal>> {
    find_kid(store, kid_id)?;
    let goals = store.list_goals()?;
    Ok(goals_for_kid(&goals, kid_id, viewer))
}

/// Keeps the first row per `(date, kid, goal)`. The sheet backend has no
/// unique key, so hand edits can leave duplicates behind.
pub fn dedupe(rows: Vec<CheckIn>) -> Vec<CheckIn> {
    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    rows.into_iter()
        .filter(|c| seen.insert((c.date.clone(), c.kid_id.clone(), c.goal_id.clone())))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardItem {
    pub goal: Goal,
    pub child_checked: bool,
    pub parent_approved: bool,
    pub updated_at: Option<String>,
}

/// One kid's goals for one day, with that day's check state.
pub fn day_board(
    store: &mut dyn PointsStore,
    kid_id: &str,
    date: &str,
    viewer: Viewer,
) -> StoreResult<Vec<BoardItem>> {
    let goals = goals_for(store, kid_id, viewer)?;
    let rows = dedupe(store.list_checkins(&CheckinFilter {
        kid_id: Some(kid_id.to_string()),
        date: Some(date.to_string()),
        ..Default::default()
    })?);
    Ok(goals
        .into_iter()
        .map(|goal| {
            let hit = rows.iter().find(|c| c.goal_id == goal.id);
            BoardItem {
                child_checked: hit.map(|c| c.child_checked).unwrap_or(false),
                parent_approved: hit.map(|c| c.parent_approved).unwrap_or(false),
                updated_at: hit.map(|c| c.updated_at.clone()),
                goal,
            }
        })
        .collect())
}

fn upsert_for(
    store: &mut dyn PointsStore,
    clock: &Clock,
    kid: &Kid,
    goal: &Goal,
    date: &str,
    set_child: Option<bool>,
    set_parent: Option<bool>,
) -> StoreResult<CheckIn> {
    let up = CheckinUpsert {
        date: date.to_string(),
        kid_id: kid.id.clone(),
        kid_name: kid.name.clone(),
        goal_id: goal.id.clone(),
        goal_title: goal.title.clone(),
        points: goal.points,
        set_child,
        set_parent,
        now: clock.now_stamp(),
    };
    let row = store.upsert_checkin(&up)?;
    tracing::debug!(
        date,
        kid_id = %kid.id,
        goal_id = %goal.id,
        child_checked = row.child_checked,
        parent_approved = row.parent_approved,
        "checkin upserted"
    );
    Ok(row)
}

fn kid_and_goal(
    store: &mut dyn PointsStore,
    kid_id: &str,
    goal_id: &str,
) -> StoreResult<(Kid, Goal)> {
    let kid = find_kid(store, kid_id)?;
    let goal = find_goal(store, goal_id)?;
    if !goal_targets_kid(&goal, &kid.id) {
        return Err(StoreError::Invalid(format!(
            "goal {} does not apply to kid {}",
            goal.id, kid.id
        )));
    }
    Ok((kid, goal))
}

pub fn set_self_check(
    store: &mut dyn PointsStore,
    clock: &Clock,
    kid_id: &str,
    goal_id: &str,
    date: &str,
    checked: bool,
) -> StoreResult<CheckIn> {
    let (kid, goal) = kid_and_goal(store, kid_id, goal_id)?;
    if !kid.active {
        return Err(StoreError::Inactive(format!("kid {}", kid.id)));
    }
    if !goal.active {
        return Err(StoreError::Inactive(format!("goal {}", goal.id)));
    }
    if !goal.audience.allows(Viewer::Child) {
        return Err(StoreError::Invalid(format!(
            "goal {} is not shown to children",
            goal.id
        )));
    }
    upsert_for(store, clock, &kid, &goal, date, Some(checked), None)
}

pub fn set_approval(
    store: &mut dyn PointsStore,
    clock: &Clock,
    kid_id: &str,
    goal_id: &str,
    date: &str,
    approved: bool,
) -> StoreResult<CheckIn> {
    let (kid, goal) = kid_and_goal(store, kid_id, goal_id)?;
    upsert_for(store, clock, &kid, &goal, date, None, Some(approved))
}

pub fn toggle_approval(
    store: &mut dyn PointsStore,
    clock: &Clock,
    kid_id: &str,
    goal_id: &str,
    date: &str,
) -> StoreResult<CheckIn> {
    let (kid, goal) = kid_and_goal(store, kid_id, goal_id)?;
    let current = dedupe(store.list_checkins(&CheckinFilter {
        kid_id: Some(kid.id.clone()),
        date: Some(date.to_string()),
        ..Default::default()
    })?)
    .into_iter()
    .find(|c| c.goal_id == goal.id)
    .map(|c| c.parent_approved)
    .unwrap_or(false);
    upsert_for(store, clock, &kid, &goal, date, None, Some(!current))
}

/// Checked but not yet approved, newest day first.
pub fn pending_approvals(
    store: &mut dyn PointsStore,
    kid_id: Option<&str>,
) -> StoreResult<Vec<CheckIn>> {
    let mut rows: Vec<CheckIn> = dedupe(store.list_checkins(&CheckinFilter {
        kid_id: kid_id.map(|s| s.to_string()),
        ..Default::default()
    })?)
    .into_iter()
    .filter(|c| c.child_checked && !c.parent_approved)
    .collect();
    rows.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| a.kid_name.cmp(&b.kid_name))
            .then_with(|| a.goal_title.cmp(&b.goal_title))
    });
    Ok(rows)
}

/// Creates blank rows for every active kid and every active goal targeting
/// them. Returns how many rows were created.
pub fn ensure_day(store: &mut dyn PointsStore, clock: &Clock, date: &str) -> StoreResult<usize> {
    let kids = list_kids(store, false)?;
    let goals = list_goals(store, false)?;
    let existing: HashSet<(String, String)> = store
        .list_checkins(&CheckinFilter {
            date: Some(date.to_string()),
            ..Default::default()
        })?
        .into_iter()
        .map(|c| (c.kid_id, c.goal_id))
        .collect();

    let mut created = 0usize;
    for kid in &kids {
        for goal in goals.iter().filter(|g| goal_targets_kid(g, &kid.id)) {
            if existing.contains(&(kid.id.clone(), goal.id.clone())) {
                continue;
            }
            upsert_for(store, clock, kid, goal, date, None, None)?;
            created += 1;
        }
    }
    tracing::info!(date, created, "day rows ensured");
    Ok(created)
}

fn approved_sum(rows: Vec<CheckIn>) -> i64 {
    dedupe(rows)
        .iter()
        .filter(|c| c.counts())
        .map(|c| c.points)
        .sum()
}

/// `month` is `YYYY-MM`.
pub fn monthly_total(store: &mut dyn PointsStore, kid_id: &str, month: &str) -> StoreResult<i64> {
    let rows = store.list_checkins(&CheckinFilter {
        kid_id: Some(kid_id.to_string()),
        month: Some(month.to_string()),
        ..Default::default()
    })?;
    Ok(approved_sum(rows))
}

pub fn lifetime_total(store: &mut dyn PointsStore, kid_id: &str) -> StoreResult<i64> {
    let rows = store.list_checkins(&CheckinFilter {
        kid_id: Some(kid_id.to_string()),
        ..Default::default()
    })?;
    Ok(approved_sum(rows))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingRow {
    pub kid: Kid,
    pub monthly: i64,
    pub lifetime: i64,
}

pub fn ranking(store: &mut dyn PointsStore, month: &str) -> StoreResult<Vec<RankingRow>> {
    let kids = list_kids(store, false)?;
    let all = store.list_checkins(&CheckinFilter::default())?;
    let mut out: Vec<RankingRow> = kids
        .into_iter()
        .map(|kid| {
            let mine: Vec<CheckIn> = all.iter().filter(|c| c.kid_id == kid.id).cloned().collect();
            let monthly = approved_sum(
                mine.iter()
                    .filter(|c| c.date.starts_with(month))
                    .cloned()
                    .collect(),
            );
            let lifetime = approved_sum(mine);
            RankingRow {
                kid,
                monthly,
                lifetime,
            }
        })
        .collect();
    out.sort_by(|a, b| {
        b.monthly
            .cmp(&a.monthly)
            .then_with(|| a.kid.name.cmp(&b.kid.name))
    });
    Ok(out)
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn checkins_csv(rows: &[CheckIn]) -> String {
    let mut csv = CHECKINS_H.join(",");
    csv.push('\n');
    for c in rows {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{},{}\n",
            csv_quote(&c.date),
            csv_quote(&c.kid_id),
            csv_quote(&c.kid_name),
            csv_quote(&c.goal_id),
            csv_quote(&c.goal_title),
            c.points,
            c.child_checked,
            c.parent_approved,
            csv_quote(&c.updated_at)
        ));
    }
    csv
}

/// Matching rows (deduplicated) and their CSV text.
pub fn export_checkins_csv(
    store: &mut dyn PointsStore,
    filter: &CheckinFilter,
) -> StoreResult<(usize, String)> {
    let rows = dedupe(store.list_checkins(filter)?);
    Ok((rows.len(), checkins_csv(&rows)))
}
