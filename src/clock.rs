use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};

/// UTC+9 (Japan).
pub const DEFAULT_UTC_OFFSET_MINUTES: i64 = 540;

/// Family-local clock. "Today" follows the configured UTC offset, not the
/// host's zone, so a server in UTC still rolls the day over at local midnight.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    offset: FixedOffset,
    fixed_now: Option<DateTime<Utc>>,
}

impl Clock {
    pub fn new(utc_offset_minutes: i64) -> Self {
        let secs = utc_offset_minutes.saturating_mul(60).clamp(-86_399, 86_399) as i32;
        let offset = FixedOffset::east_opt(secs).unwrap_or_else(|| Utc.fix());
        Self {
            offset,
            fixed_now: None,
        }
    }

    #[cfg(test)]
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.fixed_now = Some(now);
        self
    }

    fn now_local(&self) -> DateTime<FixedOffset> {
        self.fixed_now
            .unwrap_or_else(Utc::now)
            .with_timezone(&self.offset)
    }

    pub fn today(&self) -> NaiveDate {
        self.now_local().date_naive()
    }

    pub fn today_iso(&self) -> String {
        self.today().format("%Y-%m-%d").to_string()
    }

    pub fn this_month(&self) -> String {
        self.today().format("%Y-%m").to_string()
    }

    /// Seconds-resolution timestamp with offset, e.g. `2024-05-01T07:30:00+09:00`.
    pub fn now_stamp(&self) -> String {
        self.now_local().format("%Y-%m-%dT%H:%M:%S%:z").to_string()
    }
}
