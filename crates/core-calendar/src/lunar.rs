//! Lunar calendar capability.
//!
//! The calendar system never computes lunisolar arithmetic itself; it asks an
//! injected backend. A missing backend degrades the calendar (lunar festivals
//! and solar terms go silent) without failing anything else. Backends that
//! cannot distinguish leap months report `supports_leap_months() == false`
//! and the registry then ignores the leap flag when matching.

use chrono::NaiveDate;

/// A date in the lunisolar calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LunarDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub leap_month: bool,
}

pub trait LunarCalendar {
    /// Lunar date for a solar date, if the backend covers it.
    fn solar_to_lunar(&self, date: NaiveDate) -> Option<LunarDate>;

    /// Solar date of a lunar (year, month, day), if representable.
    fn lunar_to_solar(
        &self,
        year: i32,
        month: u32,
        day: u32,
        leap_month: bool,
    ) -> Option<NaiveDate>;

    /// Name of the solar term falling on `date`, if any.
    fn solar_term_on(&self, date: NaiveDate) -> Option<String>;

    /// Whether leap-month flags in query results are meaningful.
    fn supports_leap_months(&self) -> bool {
        false
    }
}

/// Deterministic fixture backend used across the workspace's tests. Not an
/// astronomical model: lunar months are flat 30-day spans from each year's
/// new-year anchor, which is exactly enough structure for registry and
/// adapter tests.
pub mod tests_support {
    use super::*;
    use chrono::Days;

    pub struct StubLunar {
        /// (lunar year, solar date of that year's lunar 1/1)
        anchors: Vec<(i32, NaiveDate)>,
        /// (solar date, term name)
        terms: Vec<(NaiveDate, &'static str)>,
    }

    impl StubLunar {
        pub fn new(anchors: Vec<(i32, NaiveDate)>, terms: Vec<(NaiveDate, &'static str)>) -> Self {
            Self { anchors, terms }
        }

        /// Anchored on the real 2025/2026 lunar new years, with lichun dates.
        pub fn year_2025() -> Self {
            let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
            Self::new(
                vec![(2025, d(2025, 1, 29)), (2026, d(2026, 2, 17))],
                vec![(d(2025, 2, 3), "lichun"), (d(2026, 2, 4), "lichun")],
            )
        }
    }

    impl LunarCalendar for StubLunar {
        fn solar_to_lunar(&self, date: NaiveDate) -> Option<LunarDate> {
            // Latest anchor at or before the date, within its 12 flat months.
            let (year, anchor) = self
                .anchors
                .iter()
                .filter(|(_, anchor)| *anchor <= date)
                .max_by_key(|(_, anchor)| *anchor)?;
            let offset = (date - *anchor).num_days();
            if offset >= 12 * 30 {
                return None;
            }
            Some(LunarDate {
                year: *year,
                month: (offset / 30) as u32 + 1,
                day: (offset % 30) as u32 + 1,
                leap_month: false,
            })
        }

        fn lunar_to_solar(
            &self,
            year: i32,
            month: u32,
            day: u32,
            _leap_month: bool,
        ) -> Option<NaiveDate> {
            if !(1..=12).contains(&month) || !(1..=30).contains(&day) {
                return None;
            }
            let (_, anchor) = self.anchors.iter().find(|(y, _)| *y == year)?;
            anchor.checked_add_days(Days::new(((month - 1) * 30 + (day - 1)) as u64))
        }

        fn solar_term_on(&self, date: NaiveDate) -> Option<String> {
            self.terms
                .iter()
                .find(|(d, _)| *d == date)
                .map(|(_, name)| name.to_string())
        }
    }
}
