//! Spreadsheet-style backend.
//!
//! A workbook is a directory of tabs. Each tab is a grid of string cells
//! persisted as one JSON file; row 1 is the header. Cells are addressed the
//! way a spreadsheet addresses them (1-based row and column), and there is no
//! upsert primitive: callers scan, then append or patch cells.

use crate::model::{
    bool_cell, parse_kid_ids, parse_points, parse_truthy, Audience, CheckIn, CheckinFilter,
    CheckinUpsert, Goal, Kid,
};
use crate::retry::{with_backoff, RetryPolicy};
use crate::store::{Backend, PointsStore, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const SHEETS_DIR: &str = "sheets";

pub const KIDS_TAB: &str = "kids";
pub const GOALS_TAB: &str = "goals";
pub const CHECKINS_TAB: &str = "checkins";
pub const SETTINGS_TAB: &str = "settings";

pub const KIDS_H: [&str; 4] = ["id", "name", "grade", "active"];
pub const GOALS_H: [&str; 7] = [
    "id", "title", "points", "active", "kid_id", "audience", "category",
];
pub const CHECKINS_H: [&str; 9] = [
    "date",
    "kid_id",
    "kid_name",
    "goal_id",
    "goal_title",
    "points",
    "child_checked",
    "parent_approved",
    "updated_at",
];
pub const SETTINGS_H: [&str; 2] = ["key", "value"];

#[derive(Debug, Default, Serialize, Deserialize)]
struct GridFile {
    rows: Vec<Vec<String>>,
}

/// A data row, read through its tab's header row. `row` is the 1-based
/// sheet row.
#[derive(Debug, Clone)]
pub struct Record {
    pub row: usize,
    header: Arc<Vec<String>>,
    cells: Vec<String>,
}

impl Record {
    /// Cell under the header `name`; empty when the column or cell is missing.
    pub fn get(&self, name: &str) -> &str {
        self.header
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
            .and_then(|i| self.cells.get(i))
            .map(|s| s.as_str())
            .unwrap_or("")
    }
}

struct CachedTab {
    records: Vec<Record>,
    loaded: Instant,
}

pub struct Workbook {
    dir: PathBuf,
    policy: RetryPolicy,
    cache_ttl: Duration,
    cache: HashMap<String, CachedTab>,
}

impl Workbook {
    pub fn open(dir: &Path, policy: RetryPolicy, cache_ttl: Duration) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            policy,
            cache_ttl,
            cache: HashMap::new(),
        })
    }

    pub fn set_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    pub fn set_cache_ttl(&mut self, ttl: Duration) {
        self.cache_ttl = ttl;
        self.cache.clear();
    }

    fn tab_path(&self, tab: &str) -> PathBuf {
        self.dir.join(format!("{}.json", tab))
    }

    fn read_grid(&self, tab: &str) -> StoreResult<Vec<Vec<String>>> {
        let path = self.tab_path(tab);
        let raw = with_backoff(self.policy, "sheet.read", || {
            match std::fs::read_to_string(&path) {
                Ok(s) => Ok(Some(s)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e),
            }
        })?;
        let Some(raw) = raw else {
            return Ok(Vec::new());
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let grid: GridFile = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Corrupt(format!("tab {}: {}", tab, e)))?;
        Ok(grid.rows)
    }

    fn write_grid(&mut self, tab: &str, rows: Vec<Vec<String>>) -> StoreResult<()> {
        let path = self.tab_path(tab);
        let tmp = self.dir.join(format!("{}.json.tmp", tab));
        let text = serde_json::to_string_pretty(&GridFile { rows })?;
        with_backoff(self.policy, "sheet.write", || {
            std::fs::write(&tmp, text.as_bytes())?;
            std::fs::rename(&tmp, &path)
        })?;
        self.cache.remove(tab);
        Ok(())
    }

    /// Creates the tab with `headers` if it is missing or empty, and rewrites
    /// row 1 when it does not match. Data rows are never touched.
    pub fn ensure_tab(&mut self, tab: &str, headers: &[&str]) -> StoreResult<()> {
        let mut grid = self.read_grid(tab)?;
        let wanted: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
        if grid.is_empty() {
            tracing::info!(tab, "creating worksheet");
            grid.push(wanted);
            return self.write_grid(tab, grid);
        }
        if grid[0] != wanted {
            tracing::warn!(tab, found = ?grid[0], "repairing worksheet header row");
            grid[0] = wanted;
            return self.write_grid(tab, grid);
        }
        Ok(())
    }

    fn load_records(&self, tab: &str) -> StoreResult<Vec<Record>> {
        let mut rows = self.read_grid(tab)?.into_iter();
        let header = Arc::new(rows.next().unwrap_or_default());
        Ok(rows
            .enumerate()
            .filter(|(_, cells)| cells.iter().any(|c| !c.trim().is_empty()))
            .map(|(i, cells)| Record {
                row: i + 2,
                header: Arc::clone(&header),
                cells,
            })
            .collect())
    }

    /// Data rows, served from the cache while it is younger than the TTL.
    pub fn records(&mut self, tab: &str) -> StoreResult<Vec<Record>> {
        if let Some(c) = self.cache.get(tab) {
            if c.loaded.elapsed() < self.cache_ttl {
                return Ok(c.records.clone());
            }
        }
        let records = self.load_records(tab)?;
        self.cache.insert(
            tab.to_string(),
            CachedTab {
                records: records.clone(),
                loaded: Instant::now(),
            },
        );
        Ok(records)
    }

    /// Data rows read straight from the file, bypassing the cache.
    pub fn records_fresh(&mut self, tab: &str) -> StoreResult<Vec<Record>> {
        self.cache.remove(tab);
        self.records(tab)
    }

    pub fn append_row(&mut self, tab: &str, cells: Vec<String>) -> StoreResult<usize> {
        let mut grid = self.read_grid(tab)?;
        grid.push(cells);
        let row = grid.len();
        self.write_grid(tab, grid)?;
        Ok(row)
    }

    /// Sets `(column, value)` pairs on one row. Columns are 1-based.
    pub fn update_cells(
        &mut self,
        tab: &str,
        row: usize,
        updates: &[(usize, String)],
    ) -> StoreResult<()> {
        let mut grid = self.read_grid(tab)?;
        if row == 0 || row > grid.len() {
            return Err(StoreError::NotFound(format!("{} row {}", tab, row)));
        }
        let cells = &mut grid[row - 1];
        for (col, value) in updates {
            if *col == 0 {
                return Err(StoreError::Invalid("column numbers start at 1".into()));
            }
            if cells.len() < *col {
                cells.resize(*col, String::new());
            }
            cells[*col - 1] = value.clone();
        }
        self.write_grid(tab, grid)
    }

    pub fn update_cell(&mut self, tab: &str, row: usize, col: usize, value: &str) -> StoreResult<()> {
        self.update_cells(tab, row, &[(col, value.to_string())])
    }
}

fn col(headers: &[&str], name: &str) -> usize {
    headers.iter().position(|h| *h == name).map(|i| i + 1).unwrap_or(0)
}

fn kid_from_record(r: &Record) -> Kid {
    Kid {
        id: r.get("id").trim().to_string(),
        name: r.get("name").trim().to_string(),
        grade: r.get("grade").trim().to_string(),
        active: parse_truthy(r.get("active")),
    }
}

fn goal_from_record(r: &Record) -> Goal {
    let category = r.get("category").trim();
    Goal {
        id: r.get("id").trim().to_string(),
        title: r.get("title").trim().to_string(),
        points: parse_points(r.get("points")),
        active: parse_truthy(r.get("active")),
        kid_ids: parse_kid_ids(r.get("kid_id")),
        audience: Audience::parse(r.get("audience")),
        category: if category.is_empty() {
            None
        } else {
            Some(category.to_string())
        },
    }
}

fn goal_cells(g: &Goal) -> Vec<String> {
    vec![
        g.id.clone(),
        g.title.clone(),
        g.points.to_string(),
        bool_cell(g.active).to_string(),
        g.kid_ids_text(),
        g.audience.as_str().to_string(),
        g.category.clone().unwrap_or_default(),
    ]
}

fn checkin_from_record(r: &Record) -> CheckIn {
    CheckIn {
        date: r.get("date").trim().to_string(),
        kid_id: r.get("kid_id").trim().to_string(),
        kid_name: r.get("kid_name").to_string(),
        goal_id: r.get("goal_id").trim().to_string(),
        goal_title: r.get("goal_title").to_string(),
        points: parse_points(r.get("points")),
        child_checked: parse_truthy(r.get("child_checked")),
        parent_approved: parse_truthy(r.get("parent_approved")),
        updated_at: r.get("updated_at").to_string(),
    }
}

fn checkin_cells(c: &CheckIn) -> Vec<String> {
    vec![
        c.date.clone(),
        c.kid_id.clone(),
        c.kid_name.clone(),
        c.goal_id.clone(),
        c.goal_title.clone(),
        c.points.to_string(),
        bool_cell(c.child_checked).to_string(),
        bool_cell(c.parent_approved).to_string(),
        c.updated_at.clone(),
    ]
}

pub struct SheetStore {
    book: Workbook,
}

impl SheetStore {
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        Self::open_with(workspace, RetryPolicy::default(), Duration::from_secs(30))
    }

    pub fn open_with(
        workspace: &Path,
        policy: RetryPolicy,
        cache_ttl: Duration,
    ) -> anyhow::Result<Self> {
        let mut book = Workbook::open(&workspace.join(SHEETS_DIR), policy, cache_ttl)?;
        book.ensure_tab(KIDS_TAB, &KIDS_H)?;
        book.ensure_tab(GOALS_TAB, &GOALS_H)?;
        book.ensure_tab(CHECKINS_TAB, &CHECKINS_H)?;
        book.ensure_tab(SETTINGS_TAB, &SETTINGS_H)?;
        Ok(Self { book })
    }

    #[cfg(test)]
    pub fn workbook(&mut self) -> &mut Workbook {
        &mut self.book
    }

    fn find_kid_row(&mut self, kid_id: &str) -> StoreResult<Option<Record>> {
        Ok(self
            .book
            .records_fresh(KIDS_TAB)?
            .into_iter()
            .find(|r| r.get("id").trim() == kid_id))
    }
}

impl PointsStore for SheetStore {
    fn backend(&self) -> Backend {
        Backend::Sheet
    }

    fn tune(&mut self, policy: RetryPolicy, cache_ttl: Duration) {
        self.book.set_policy(policy);
        self.book.set_cache_ttl(cache_ttl);
    }

    fn list_kids(&mut self) -> StoreResult<Vec<Kid>> {
        Ok(self
            .book
            .records(KIDS_TAB)?
            .iter()
            .map(kid_from_record)
            .filter(|k| !k.id.is_empty())
            .collect())
    }

    fn insert_kid(&mut self, kid: &Kid) -> StoreResult<()> {
        let existing: Vec<Kid> = self
            .book
            .records_fresh(KIDS_TAB)?
            .iter()
            .map(kid_from_record)
            .collect();
        if existing.iter().any(|k| k.id == kid.id || k.name == kid.name) {
            return Err(StoreError::Conflict(format!(
                "kid id or name already exists: {}",
                kid.name
            )));
        }
        self.book.append_row(
            KIDS_TAB,
            vec![
                kid.id.clone(),
                kid.name.clone(),
                kid.grade.clone(),
                bool_cell(kid.active).to_string(),
            ],
        )?;
        Ok(())
    }

    fn set_kid_active(&mut self, kid_id: &str, active: bool) -> StoreResult<()> {
        let Some(rec) = self.find_kid_row(kid_id)? else {
            return Err(StoreError::NotFound(format!("kid {}", kid_id)));
        };
        self.book
            .update_cell(KIDS_TAB, rec.row, col(&KIDS_H, "active"), bool_cell(active))
    }

    fn list_goals(&mut self) -> StoreResult<Vec<Goal>> {
        Ok(self
            .book
            .records(GOALS_TAB)?
            .iter()
            .map(goal_from_record)
            .filter(|g| !g.id.is_empty())
            .collect())
    }

    fn insert_goal(&mut self, goal: &Goal) -> StoreResult<()> {
        let taken = self
            .book
            .records_fresh(GOALS_TAB)?
            .iter()
            .any(|r| r.get("id").trim() == goal.id);
        if taken {
            return Err(StoreError::Conflict(format!(
                "goal id already exists: {}",
                goal.id
            )));
        }
        self.book.append_row(GOALS_TAB, goal_cells(goal))?;
        Ok(())
    }

    fn update_goal(&mut self, goal: &Goal) -> StoreResult<()> {
        let rec = self
            .book
            .records_fresh(GOALS_TAB)?
            .into_iter()
            .find(|r| r.get("id").trim() == goal.id);
        let Some(rec) = rec else {
            return Err(StoreError::NotFound(format!("goal {}", goal.id)));
        };
        let updates: Vec<(usize, String)> = goal_cells(goal)
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i + 1, v))
            .collect();
        self.book.update_cells(GOALS_TAB, rec.row, &updates)
    }

    fn list_checkins(&mut self, filter: &CheckinFilter) -> StoreResult<Vec<CheckIn>> {
        Ok(self
            .book
            .records(CHECKINS_TAB)?
            .iter()
            .map(checkin_from_record)
            .filter(|c| filter.matches(c))
            .collect())
    }

    fn upsert_checkin(&mut self, up: &CheckinUpsert) -> StoreResult<CheckIn> {
        let hit = self
            .book
            .records_fresh(CHECKINS_TAB)?
            .into_iter()
            .find(|r| {
                r.get("date").trim() == up.date
                    && r.get("kid_id").trim() == up.kid_id
                    && r.get("goal_id").trim() == up.goal_id
            });

        let Some(rec) = hit else {
            let row = up.new_row();
            self.book.append_row(CHECKINS_TAB, checkin_cells(&row))?;
            return Ok(row);
        };

        let mut current = checkin_from_record(&rec);
        let mut updates: Vec<(usize, String)> = Vec::new();
        if let Some(v) = up.set_child {
            current.child_checked = v;
            updates.push((col(&CHECKINS_H, "child_checked"), bool_cell(v).to_string()));
        }
        if let Some(v) = up.set_parent {
            current.parent_approved = v;
            updates.push((col(&CHECKINS_H, "parent_approved"), bool_cell(v).to_string()));
        }
        current.updated_at = up.now.clone();
        updates.push((col(&CHECKINS_H, "updated_at"), up.now.clone()));
        self.book.update_cells(CHECKINS_TAB, rec.row, &updates)?;
        Ok(current)
    }

    fn setting_get(&mut self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        let rec = self
            .book
            .records(SETTINGS_TAB)?
            .into_iter()
            .find(|r| r.get("key").trim() == key);
        let Some(rec) = rec else {
            return Ok(None);
        };
        let raw = rec.get("value").trim();
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(raw)?))
    }

    fn setting_set(&mut self, key: &str, value: &serde_json::Value) -> StoreResult<()> {
        let text = serde_json::to_string(value)?;
        let rec = self
            .book
            .records_fresh(SETTINGS_TAB)?
            .into_iter()
            .find(|r| r.get("key").trim() == key);
        match rec {
            Some(rec) => self
                .book
                .update_cell(SETTINGS_TAB, rec.row, col(&SETTINGS_H, "value"), &text),
            None => self
                .book
                .append_row(SETTINGS_TAB, vec![key.to_string(), text])
                .map(|_| ()),
        }
    }
}
