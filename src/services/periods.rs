use chrono::{Datelike, NaiveDate};
use serde_json::Value;

/// Canonical month-name table. Stored period names are matched against
/// this list case-insensitively; everything internal works on the
/// (year, month index) pair and only formats back at the boundary.
pub const MONTH_NAMES: [&str; 12] = [
    "Enero",
    "Febrero",
    "Marzo",
    "Abril",
    "Mayo",
    "Junio",
    "Julio",
    "Agosto",
    "Septiembre",
    "Octubre",
    "Noviembre",
    "Diciembre",
];

/// A billing period: one calendar month. Ordering is chronological by
/// (year, month), never lexicographic on the display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    pub year: i32,
    /// 1-based month index.
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn from_name_year(month_name: &str, year: i32) -> Option<Self> {
        month_index(month_name).map(|month| Self { year, month })
    }

    pub fn month_name(&self) -> &'static str {
        MONTH_NAMES[(self.month - 1) as usize]
    }

    /// Display label, e.g. "Enero 2024".
    pub fn label(&self) -> String {
        format!("{} {}", self.month_name(), self.year)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Due date inside this period for a billing anchor day, clamped to
    /// the month's length (anchor 31 falls due on Feb 28/29).
    pub fn due_date(&self, anchor_day: u32) -> NaiveDate {
        let day = anchor_day.clamp(1, days_in_month(self.year, self.month));
        NaiveDate::from_ymd_opt(self.year, self.month, day)
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(self.year, self.month, 1).expect("valid month"))
    }
}

pub fn month_index(name: &str) -> Option<u32> {
    let normalized = name.trim();
    MONTH_NAMES
        .iter()
        .position(|candidate| candidate.eq_ignore_ascii_case(normalized))
        .map(|index| (index + 1) as u32)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next.and_then(|date| date.pred_opt())
        .map(|date| date.day())
        .unwrap_or(28)
}

/// The ordered billing periods owed between an occupancy start date and an
/// end date (today or a vacate date), inclusive. The occupancy date's
/// day-of-month is the billing anchor: the final month is only included
/// once its anchor day has arrived, and months before the occupancy month
/// are never generated.
pub fn billing_periods(occupancy_start: NaiveDate, end: NaiveDate) -> Vec<Period> {
    if end < occupancy_start.with_day(1).unwrap_or(occupancy_start) {
        return Vec::new();
    }

    let anchor_day = occupancy_start.day();
    let first = Period::from_date(occupancy_start);
    let last = Period::from_date(end);

    let mut periods = Vec::new();
    let mut current = first;
    while current <= last {
        periods.push(current);
        current = current.next();
    }

    // Rent for the final month is not due until its anchor day arrives.
    if let Some(tail) = periods.last() {
        let effective_anchor = anchor_day.min(days_in_month(tail.year, tail.month));
        if *tail == last && end.day() < effective_anchor {
            periods.pop();
        }
    }

    periods
}

/// Billing period stored on a payment record, from its
/// (period_month, period_year) pair.
pub fn record_period(record: &Value) -> Option<Period> {
    let month_name = record
        .as_object()
        .and_then(|obj| obj.get("period_month"))
        .and_then(Value::as_str)?;
    let year = record
        .as_object()
        .and_then(|obj| obj.get("period_year"))
        .and_then(Value::as_i64)?;
    Period::from_name_year(month_name, year as i32)
}

/// The calendar month a record was paid in. Prefers the explicit
/// `paid_at` timestamp; falls back to the stored (month-name, year) pair.
pub fn payment_month(record: &Value) -> Option<Period> {
    let paid_at = record
        .as_object()
        .and_then(|obj| obj.get("paid_at"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty());

    if let Some(raw) = paid_at {
        if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(raw) {
            return Some(Period::from_date(parsed.date_naive()));
        }
        if let Ok(parsed) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Some(Period::from_date(parsed));
        }
    }

    record_period(record)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::{billing_periods, month_index, payment_month, record_period, Period};

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn month_lookup_is_case_insensitive_and_never_lexicographic() {
        assert_eq!(month_index("Enero"), Some(1));
        assert_eq!(month_index("enero"), Some(1));
        assert_eq!(month_index("  DICIEMBRE "), Some(12));
        assert_eq!(month_index("January"), None);

        // Abril < Agosto alphabetically but not chronologically.
        let abril = Period::from_name_year("Abril", 2024).unwrap();
        let agosto = Period::from_name_year("Agosto", 2024).unwrap();
        assert!(abril < agosto);
        assert!(Period::new(2023, 12).unwrap() < Period::new(2024, 1).unwrap());
    }

    #[test]
    fn generates_months_from_occupancy_through_end() {
        // Occupancy 2024-01-15, today 2024-04-10: April's anchor (15) has
        // not arrived, so only Jan..Mar are owed.
        let periods = billing_periods(date(2024, 1, 15), date(2024, 4, 10));
        assert_eq!(
            periods,
            vec![
                Period::new(2024, 1).unwrap(),
                Period::new(2024, 2).unwrap(),
                Period::new(2024, 3).unwrap(),
            ]
        );

        // Once the anchor day arrives the month is included.
        let periods = billing_periods(date(2024, 1, 15), date(2024, 4, 15));
        assert_eq!(periods.len(), 4);
        assert_eq!(*periods.last().unwrap(), Period::new(2024, 4).unwrap());
    }

    #[test]
    fn generation_is_deterministic_and_order_preserving() {
        let first = billing_periods(date(2023, 11, 3), date(2024, 2, 20));
        let second = billing_periods(date(2023, 11, 3), date(2024, 2, 20));
        assert_eq!(first, second);
        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(first, sorted);
        assert_eq!(first.first().copied(), Period::new(2023, 11));
    }

    #[test]
    fn never_generates_periods_before_occupancy() {
        let periods = billing_periods(date(2024, 3, 1), date(2024, 3, 20));
        assert_eq!(periods, vec![Period::new(2024, 3).unwrap()]);

        // End before the occupancy month: nothing owed.
        assert!(billing_periods(date(2024, 3, 1), date(2024, 2, 28)).is_empty());

        // Same month, anchor not reached yet: nothing owed.
        assert!(billing_periods(date(2024, 3, 15), date(2024, 3, 10)).is_empty());
    }

    #[test]
    fn anchor_day_clamps_to_short_months() {
        // Anchor 31: February's rent falls due on the 28th/29th.
        let periods = billing_periods(date(2024, 1, 31), date(2024, 2, 29));
        assert_eq!(periods.len(), 2);
        assert_eq!(
            Period::new(2024, 2).unwrap().due_date(31),
            date(2024, 2, 29)
        );
    }

    #[test]
    fn payment_month_prefers_explicit_date_over_period_fields() {
        let record = json!({
            "period_month": "Febrero",
            "period_year": 2024,
            "paid_at": "2024-03-02T10:30:00+00:00",
        });
        assert_eq!(payment_month(&record), Period::new(2024, 3));

        let record = json!({ "period_month": "Febrero", "period_year": 2024 });
        assert_eq!(payment_month(&record), Period::new(2024, 2));

        let record = json!({ "period_month": "Brumaire", "period_year": 2024 });
        assert_eq!(payment_month(&record), None);
    }

    #[test]
    fn record_period_parses_stored_names() {
        let record = json!({ "period_month": "  octubre ", "period_year": 2023 });
        assert_eq!(record_period(&record), Period::new(2023, 10));
        assert_eq!(record_period(&json!({ "period_year": 2023 })), None);
    }
}
