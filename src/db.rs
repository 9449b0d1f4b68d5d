use crate::model::{parse_kid_ids, Audience, CheckIn, CheckinFilter, CheckinUpsert, Goal, Kid};
use crate::store::{Backend, PointsStore, StoreError, StoreResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "points.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS kids(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            grade TEXT NOT NULL DEFAULT '',
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS goals(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            base_points INTEGER NOT NULL DEFAULT 1,
            category TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            kid_ids TEXT NOT NULL DEFAULT '',
            audience TEXT NOT NULL DEFAULT 'both'
        )",
        [],
    )?;
    // Goals predating per-kid targeting were shared by everyone.
    ensure_goals_targeting_columns(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS checkins(
            d TEXT NOT NULL,
            kid_id TEXT NOT NULL,
            goal_id TEXT NOT NULL,
            kid_name TEXT,
            goal_title TEXT,
            points INTEGER,
            self_checked INTEGER NOT NULL DEFAULT 0,
            parent_approved INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            PRIMARY KEY(d, kid_id, goal_id),
            FOREIGN KEY(kid_id) REFERENCES kids(id),
            FOREIGN KEY(goal_id) REFERENCES goals(id)
        )",
        [],
    )?;
    ensure_checkins_snapshot_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_checkins_kid ON checkins(kid_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_checkins_kid_d ON checkins(kid_id, d)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_goals_targeting_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "goals", "kid_ids")? {
        conn.execute(
            "ALTER TABLE goals ADD COLUMN kid_ids TEXT NOT NULL DEFAULT ''",
            [],
        )?;
    }
    if !table_has_column(conn, "goals", "audience")? {
        conn.execute(
            "ALTER TABLE goals ADD COLUMN audience TEXT NOT NULL DEFAULT 'both'",
            [],
        )?;
    }
    if !table_has_column(conn, "goals", "category")? {
        conn.execute("ALTER TABLE goals ADD COLUMN category TEXT", [])?;
    }
    Ok(())
}

fn ensure_checkins_snapshot_columns(conn: &Connection) -> anyhow::Result<()> {
    // Older rows were scored from the live goal table. Freeze what they would
    // have shown at the time of the migration.
    if !table_has_column(conn, "checkins", "points")? {
        conn.execute("ALTER TABLE checkins ADD COLUMN points INTEGER", [])?;
        conn.execute(
            "UPDATE checkins
             SET points = (SELECT g.base_points FROM goals g WHERE g.id = checkins.goal_id)
             WHERE points IS NULL",
            [],
        )?;
    }
    if !table_has_column(conn, "checkins", "kid_name")? {
        conn.execute("ALTER TABLE checkins ADD COLUMN kid_name TEXT", [])?;
        conn.execute(
            "UPDATE checkins
             SET kid_name = (SELECT k.name FROM kids k WHERE k.id = checkins.kid_id)
             WHERE kid_name IS NULL",
            [],
        )?;
    }
    if !table_has_column(conn, "checkins", "goal_title")? {
        conn.execute("ALTER TABLE checkins ADD COLUMN goal_title TEXT", [])?;
        conn.execute(
            "UPDATE checkins
             SET goal_title = (SELECT g.title FROM goals g WHERE g.id = checkins.goal_id)
             WHERE goal_title IS NULL",
            [],
        )?;
    }
    if !table_has_column(conn, "checkins", "updated_at")? {
        conn.execute("ALTER TABLE checkins ADD COLUMN updated_at TEXT", [])?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> StoreResult<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> StoreResult<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, &text),
    )?;
    Ok(())
}

fn is_constraint(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
    )
}

/// A text id written into an `INTEGER PRIMARY KEY` column.
fn is_id_mismatch(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::TypeMismatch
    )
}

// Integer-keyed databases store ids as INTEGER and leave the flags nullable.
const CHECKIN_COLUMNS: &str = "d, CAST(kid_id AS TEXT), COALESCE(kid_name, ''),
     CAST(goal_id AS TEXT), COALESCE(goal_title, ''), COALESCE(points, 0),
     COALESCE(self_checked, 0), COALESCE(parent_approved, 0), COALESCE(updated_at, '')";

fn checkin_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<CheckIn> {
    Ok(CheckIn {
        date: r.get(0)?,
        kid_id: r.get(1)?,
        kid_name: r.get(2)?,
        goal_id: r.get(3)?,
        goal_title: r.get(4)?,
        points: r.get(5)?,
        child_checked: r.get::<_, i64>(6)? != 0,
        parent_approved: r.get::<_, i64>(7)? != 0,
        updated_at: r.get(8)?,
    })
}

/// Relational backend. The primary key on `(d, kid_id, goal_id)` gives the
/// check-in table a real upsert.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            conn: open_db(workspace)?,
        })
    }

    #[cfg(test)]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl PointsStore for SqliteStore {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn list_kids(&mut self) -> StoreResult<Vec<Kid>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT CAST(id AS TEXT), name, COALESCE(grade, ''), COALESCE(active, 1)
                 FROM kids
                 ORDER BY rowid",
            )?;
        let kids = stmt
            .query_map([], |r| {
                Ok(Kid {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    grade: r.get(2)?,
                    active: r.get::<_, i64>(3)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(kids)
    }

    fn insert_kid(&mut self, kid: &Kid) -> StoreResult<()> {
        match self.conn.execute(
            "INSERT INTO kids(id, name, grade, active) VALUES(?, ?, ?, ?)",
            (&kid.id, &kid.name, &kid.grade, kid.active as i64),
        ) {
            Ok(_) => Ok(()),
            Err(e) if is_constraint(&e) => Err(StoreError::Conflict(format!(
                "kid id or name already exists: {}",
                kid.name
            ))),
            Err(e) if is_id_mismatch(&e) => Err(StoreError::Invalid(format!(
                "kid ids in this workspace are numeric: {}",
                kid.id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn set_kid_active(&mut self, kid_id: &str, active: bool) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE kids SET active = ? WHERE id = ?",
            (active as i64, kid_id),
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("kid {}", kid_id)));
        }
        Ok(())
    }

    fn list_goals(&mut self) -> StoreResult<Vec<Goal>> {
        let mut stmt = self.conn.prepare(
            "SELECT CAST(id AS TEXT), title, base_points, COALESCE(active, 1),
                    COALESCE(kid_ids, ''), COALESCE(audience, 'both'), category
             FROM goals
             ORDER BY rowid",
        )?;
        let goals = stmt
            .query_map([], |r| {
                let kid_ids: String = r.get(4)?;
                let audience: String = r.get(5)?;
                Ok(Goal {
                    id: r.get(0)?,
                    title: r.get(1)?,
                    points: r.get(2)?,
                    active: r.get::<_, i64>(3)? != 0,
                    kid_ids: parse_kid_ids(&kid_ids),
                    audience: Audience::parse(&audience),
                    category: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(goals)
    }

    fn insert_goal(&mut self, goal: &Goal) -> StoreResult<()> {
        match self.conn.execute(
            "INSERT INTO goals(id, title, base_points, active, kid_ids, audience, category)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            params![
                goal.id,
                goal.title,
                goal.points,
                goal.active as i64,
                goal.kid_ids_text(),
                goal.audience.as_str(),
                goal.category,
            ],
        ) {
            Ok(_) => Ok(()),
            Err(e) if is_constraint(&e) => Err(StoreError::Conflict(format!(
                "goal id already exists: {}",
                goal.id
            ))),
            Err(e) if is_id_mismatch(&e) => Err(StoreError::Invalid(format!(
                "goal ids in this workspace are numeric: {}",
                goal.id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn update_goal(&mut self, goal: &Goal) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE goals
             SET title = ?, base_points = ?, active = ?, kid_ids = ?, audience = ?, category = ?
             WHERE id = ?",
            params![
                goal.title,
                goal.points,
                goal.active as i64,
                goal.kid_ids_text(),
                goal.audience.as_str(),
                goal.category,
                goal.id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("goal {}", goal.id)));
        }
        Ok(())
    }

    fn list_checkins(&mut self, filter: &CheckinFilter) -> StoreResult<Vec<CheckIn>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut bind: Vec<Value> = Vec::new();
        if let Some(k) = &filter.kid_id {
            clauses.push("kid_id = ?");
            bind.push(Value::Text(k.clone()));
        }
        if let Some(d) = &filter.date {
            clauses.push("d = ?");
            bind.push(Value::Text(d.clone()));
        }
        if let Some(f) = &filter.from {
            clauses.push("d >= ?");
            bind.push(Value::Text(f.clone()));
        }
        if let Some(t) = &filter.to {
            clauses.push("d <= ?");
            bind.push(Value::Text(t.clone()));
        }
        if let Some(m) = &filter.month {
            clauses.push("substr(d, 1, 7) = ?");
            bind.push(Value::Text(m.clone()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM checkins {} ORDER BY rowid",
            CHECKIN_COLUMNS, where_sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bind), checkin_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn upsert_checkin(&mut self, up: &CheckinUpsert) -> StoreResult<CheckIn> {
        let tx = self.conn.unchecked_transaction()?;
        let fresh = up.new_row();
        tx.execute(
            "INSERT INTO checkins(
               d, kid_id, goal_id, kid_name, goal_title, points,
               self_checked, parent_approved, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(d, kid_id, goal_id) DO UPDATE SET
               self_checked = COALESCE(?10, self_checked),
               parent_approved = COALESCE(?11, parent_approved),
               updated_at = excluded.updated_at",
            params![
                fresh.date,
                fresh.kid_id,
                fresh.goal_id,
                fresh.kid_name,
                fresh.goal_title,
                fresh.points,
                fresh.child_checked as i64,
                fresh.parent_approved as i64,
                fresh.updated_at,
                up.set_child.map(|v| v as i64),
                up.set_parent.map(|v| v as i64),
            ],
        )?;
        let sql = format!(
            "SELECT {} FROM checkins WHERE d = ? AND kid_id = ? AND goal_id = ?",
            CHECKIN_COLUMNS
        );
        let row = tx.query_row(&sql, (&up.date, &up.kid_id, &up.goal_id), checkin_from_row)?;
        tx.commit()?;
        Ok(row)
    }

    fn setting_get(&mut self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        settings_get_json(&self.conn, key)
    }

    fn setting_set(&mut self, key: &str, value: &serde_json::Value) -> StoreResult<()> {
        settings_set_json(&self.conn, key, value)
    }
}
