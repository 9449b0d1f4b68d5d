use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Kid {
    pub id: String,
    pub name: String,
    pub grade: String,
    pub active: bool,
}

/// Who is looking at a goal list. Goals carry an audience that may restrict
/// them to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Child,
    Parent,
}

impl Viewer {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "child" => Some(Self::Child),
            "parent" => Some(Self::Parent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Child => "child",
            Self::Parent => "parent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Both,
    Child,
    Parent,
    /// Unrecognized text from a hand-edited row. Visible to nobody.
    Other(String),
}

impl Audience {
    pub fn parse(s: &str) -> Self {
        let t = s.trim().to_ascii_lowercase();
        match t.as_str() {
            "" | "both" => Self::Both,
            "child" => Self::Child,
            "parent" => Self::Parent,
            _ => Self::Other(t),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Both => "both",
            Self::Child => "child",
            Self::Parent => "parent",
            Self::Other(s) => s.as_str(),
        }
    }

    pub fn allows(&self, viewer: Viewer) -> bool {
        match self {
            Self::Both => true,
            Self::Child => viewer == Viewer::Child,
            Self::Parent => viewer == Viewer::Parent,
            Self::Other(_) => false,
        }
    }
}

impl Serialize for Audience {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub title: String,
    pub points: i64,
    pub active: bool,
    /// Empty means every kid.
    pub kid_ids: Vec<String>,
    pub audience: Audience,
    pub category: Option<String>,
}

impl Goal {
    /// Cell/column form of `kid_ids`.
    pub fn kid_ids_text(&self) -> String {
        self.kid_ids.join(",")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckIn {
    pub date: String,
    pub kid_id: String,
    pub kid_name: String,
    pub goal_id: String,
    pub goal_title: String,
    pub points: i64,
    pub child_checked: bool,
    pub parent_approved: bool,
    pub updated_at: String,
}

impl CheckIn {
    pub fn counts(&self) -> bool {
        self.child_checked && self.parent_approved
    }
}

/// One request to create-or-update the row keyed by `(date, kid_id, goal_id)`.
/// `None` flags leave the stored value alone.
#[derive(Debug, Clone)]
pub struct CheckinUpsert {
    pub date: String,
    pub kid_id: String,
    pub kid_name: String,
    pub goal_id: String,
    pub goal_title: String,
    pub points: i64,
    pub set_child: Option<bool>,
    pub set_parent: Option<bool>,
    pub now: String,
}

impl CheckinUpsert {
    pub fn new_row(&self) -> CheckIn {
        CheckIn {
            date: self.date.clone(),
            kid_id: self.kid_id.clone(),
            kid_name: self.kid_name.clone(),
            goal_id: self.goal_id.clone(),
            goal_title: self.goal_title.clone(),
            points: self.points,
            child_checked: self.set_child.unwrap_or(false),
            parent_approved: self.set_parent.unwrap_or(false),
            updated_at: self.now.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckinFilter {
    pub kid_id: Option<String>,
    pub date: Option<String>,
    /// Inclusive `YYYY-MM-DD` bounds.
    pub from: Option<String>,
    pub to: Option<String>,
    /// `YYYY-MM` prefix.
    pub month: Option<String>,
}

impl CheckinFilter {
    pub fn matches(&self, c: &CheckIn) -> bool {
        if let Some(k) = &self.kid_id {
            if &c.kid_id != k {
                return false;
            }
        }
        if let Some(d) = &self.date {
            if &c.date != d {
                return false;
            }
        }
        if let Some(f) = &self.from {
            if c.date.as_str() < f.as_str() {
                return false;
            }
        }
        if let Some(t) = &self.to {
            if c.date.as_str() > t.as_str() {
                return false;
            }
        }
        if let Some(m) = &self.month {
            if !c.date.starts_with(m.as_str()) {
                return false;
            }
        }
        true
    }
}

pub fn parse_truthy(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

pub fn bool_cell(v: bool) -> &'static str {
    if v {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// Splits a kid-id cell such as `k1, k2` or `k1，k2` (full-width comma).
pub fn parse_kid_ids(s: &str) -> Vec<String> {
    s.replace('，', ",")
        .split(',')
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| p.to_string())
        .collect()
}

pub fn parse_points(s: &str) -> i64 {
    let t = s.trim();
    if let Ok(n) = t.parse::<i64>() {
        return n;
    }
    match t.parse::<f64>() {
        Ok(f) if f.is_finite() => f.trunc() as i64,
        _ => 0,
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Validates `YYYY-MM` and returns it normalized (zero-padded).
pub fn parse_month(s: &str) -> Option<String> {
    let (y, m) = s.trim().split_once('-')?;
    if y.len() != 4 {
        return None;
    }
    let year = y.parse::<i32>().ok()?;
    let month = m.parse::<u32>().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some(format!("{:04}-{:02}", year, month))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_accepts_sheet_spellings() {
        for s in ["TRUE", "true", " True ", "1", "yes", "YES"] {
            assert!(parse_truthy(s), "{s}");
        }
        for s in ["", "FALSE", "0", "no", "y", "on"] {
            assert!(!parse_truthy(s), "{s}");
        }
    }

    #[test]
    fn kid_ids_split_on_ascii_and_fullwidth_commas() {
        assert_eq!(parse_kid_ids("k1，k2, k3 ,,"), vec!["k1", "k2", "k3"]);
        assert!(parse_kid_ids("  ").is_empty());
    }

    #[test]
    fn points_coerce_like_a_spreadsheet() {
        assert_eq!(parse_points("5"), 5);
        assert_eq!(parse_points("3.0"), 3);
        assert_eq!(parse_points("2.9"), 2);
        assert_eq!(parse_points("abc"), 0);
        assert_eq!(parse_points(""), 0);
    }

    #[test]
    fn audience_blank_means_both_and_unknown_hides() {
        assert_eq!(Audience::parse(" "), Audience::Both);
        assert!(Audience::parse("Parent").allows(Viewer::Parent));
        assert!(!Audience::parse("parent").allows(Viewer::Child));
        assert!(!Audience::parse("grandma").allows(Viewer::Child));
        assert!(!Audience::parse("grandma").allows(Viewer::Parent));
    }

    #[test]
    fn month_is_validated_and_padded() {
        assert_eq!(parse_month("2024-3").as_deref(), Some("2024-03"));
        assert_eq!(parse_month("2024-13"), None);
        assert_eq!(parse_month("24-01"), None);
        assert_eq!(parse_month("2024"), None);
    }
}
