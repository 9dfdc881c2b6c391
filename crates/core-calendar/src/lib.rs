//! Time & calendar subsystem: period-of-day detection and the special-date
//! registry with lookahead and once-per-year deduplication.
//!
//! The lunar calendar is an injected capability ([`LunarCalendar`]). Without
//! a backend, lunar festivals and solar terms are skipped silently while
//! solar festivals keep firing. All clock inputs are explicit
//! (`NaiveDateTime` / `NaiveDate` parameters); the runtime feeds `Local::now`.

use std::collections::HashSet;
use std::rc::Rc;
use std::time::SystemTime;

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, Timelike};

use core_events::bus::{BusPayload, EventBus};
use core_events::{PeriodChange, SpecialDateFired};

pub mod lunar;

pub use lunar::{LunarCalendar, LunarDate};

/// Period of the day, derived from the local hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimePeriod {
    /// [05:00, 12:00)
    Morning,
    /// [12:00, 14:00)
    Noon,
    /// [14:00, 18:00)
    Afternoon,
    /// [18:00, 23:00)
    Evening,
    /// [23:00, 05:00)
    Night,
}

impl TimePeriod {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => TimePeriod::Morning,
            12..=13 => TimePeriod::Noon,
            14..=17 => TimePeriod::Afternoon,
            18..=22 => TimePeriod::Evening,
            _ => TimePeriod::Night,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TimePeriod::Morning => "morning",
            TimePeriod::Noon => "noon",
            TimePeriod::Afternoon => "afternoon",
            TimePeriod::Evening => "evening",
            TimePeriod::Night => "night",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            TimePeriod::Morning,
            TimePeriod::Noon,
            TimePeriod::Afternoon,
            TimePeriod::Evening,
            TimePeriod::Night,
        ]
        .into_iter()
        .find(|p| p.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialDateKind {
    SolarFestival,
    LunarFestival,
    SolarTerm,
    Custom,
}

/// A registered special date. `month`/`day` are in the solar or lunar
/// calendar according to `is_lunar`; solar terms are matched by name against
/// the backend instead of by fixed date. `lead_days` lets a date fire up to
/// that many days early.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecialDateSpec {
    pub name: String,
    pub month: u32,
    pub day: u32,
    pub description: String,
    pub kind: SpecialDateKind,
    pub is_lunar: bool,
    pub is_leap_month: bool,
    pub lead_days: u32,
}

impl SpecialDateSpec {
    pub fn solar_festival(
        name: impl Into<String>,
        month: u32,
        day: u32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            month,
            day,
            description: description.into(),
            kind: SpecialDateKind::SolarFestival,
            is_lunar: false,
            is_leap_month: false,
            lead_days: 0,
        }
    }

    pub fn lunar_festival(
        name: impl Into<String>,
        month: u32,
        day: u32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            month,
            day,
            description: description.into(),
            kind: SpecialDateKind::LunarFestival,
            is_lunar: true,
            is_leap_month: false,
            lead_days: 0,
        }
    }

    pub fn solar_term(
        name: impl Into<String>,
        month: u32,
        day: u32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            month,
            day,
            description: description.into(),
            kind: SpecialDateKind::SolarTerm,
            is_lunar: false,
            is_leap_month: false,
            lead_days: 0,
        }
    }

    pub fn custom(
        name: impl Into<String>,
        month: u32,
        day: u32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            month,
            day,
            description: description.into(),
            kind: SpecialDateKind::Custom,
            is_lunar: false,
            is_leap_month: false,
            lead_days: 0,
        }
    }

    pub fn with_lead_days(mut self, lead_days: u32) -> Self {
        self.lead_days = lead_days;
        self
    }
}

/// A fired entry together with the day it actually occurs; the slot stays
/// special through the end of that day.
#[derive(Debug, Clone, PartialEq)]
struct ActiveSpecial {
    name: String,
    occurs_on: NaiveDate,
}

/// Calendar system: period transitions + special-date scanning, publishing
/// `TimePeriodChanged` and `SpecialDate` on the bus.
pub struct CalendarSystem {
    bus: Rc<EventBus>,
    dates: Vec<SpecialDateSpec>,
    lunar: Option<Box<dyn LunarCalendar>>,
    current_period: Option<TimePeriod>,
    triggered: HashSet<(String, i32)>,
    active: Vec<ActiveSpecial>,
    last_seen_year: Option<i32>,
}

impl CalendarSystem {
    /// Calendar with the preloaded festival/term registry.
    pub fn new(bus: Rc<EventBus>, lunar: Option<Box<dyn LunarCalendar>>) -> Self {
        Self::with_dates(bus, lunar, Self::preloaded_dates())
    }

    /// Calendar over an explicit registry, for embedders that bring their own.
    pub fn with_dates(
        bus: Rc<EventBus>,
        lunar: Option<Box<dyn LunarCalendar>>,
        dates: Vec<SpecialDateSpec>,
    ) -> Self {
        if lunar.is_none() {
            tracing::warn!(
                target: "calendar",
                "no lunar backend; lunar festivals and solar terms are disabled"
            );
        }
        tracing::info!(
            target: "calendar",
            dates = dates.len(),
            lunar = lunar.is_some(),
            "calendar system initialized"
        );
        Self {
            bus,
            dates,
            lunar,
            current_period: None,
            triggered: HashSet::new(),
            active: Vec::new(),
            last_seen_year: None,
        }
    }

    fn preloaded_dates() -> Vec<SpecialDateSpec> {
        let solar = [
            SpecialDateSpec::solar_festival("new_year", 1, 1, "A new year begins")
                .with_lead_days(1),
            SpecialDateSpec::solar_festival("valentine", 2, 14, "Valentine's day"),
            SpecialDateSpec::solar_festival("april_fools", 4, 1, "April fools"),
            SpecialDateSpec::solar_festival("labor_day", 5, 1, "Labor day"),
            SpecialDateSpec::solar_festival("birthday", 5, 19, "Wisp's birthday")
                .with_lead_days(1),
            SpecialDateSpec::solar_festival("children_day", 6, 1, "Children's day"),
            SpecialDateSpec::solar_festival("national_day", 10, 1, "National day")
                .with_lead_days(1),
            SpecialDateSpec::solar_festival("programmers_day", 10, 24, "1024 programmers' day"),
            SpecialDateSpec::solar_festival("halloween", 10, 31, "Trick or treat"),
            SpecialDateSpec::solar_festival("christmas_eve", 12, 24, "Christmas eve"),
            SpecialDateSpec::solar_festival("christmas", 12, 25, "Merry Christmas"),
        ];
        let lunar = [
            SpecialDateSpec::lunar_festival("spring_festival", 1, 1, "Lunar new year")
                .with_lead_days(1),
            SpecialDateSpec::lunar_festival("lantern_festival", 1, 15, "Lantern festival"),
            SpecialDateSpec::lunar_festival("dragon_boat", 5, 5, "Dragon boat festival"),
            SpecialDateSpec::lunar_festival("qixi", 7, 7, "Qixi festival"),
            SpecialDateSpec::lunar_festival("mid_autumn", 8, 15, "Mid-autumn festival"),
            SpecialDateSpec::lunar_festival("double_ninth", 9, 9, "Double ninth festival"),
            SpecialDateSpec::lunar_festival("laba", 12, 8, "Laba festival"),
            SpecialDateSpec::lunar_festival("lunar_new_year_eve", 12, 30, "Lunar new year's eve")
                .with_lead_days(1),
        ];
        let terms = [SpecialDateSpec::solar_term(
            "lichun",
            2,
            4,
            "Beginning of spring",
        )];
        solar
            .into_iter()
            .chain(lunar)
            .chain(terms)
            .collect()
    }

    pub fn add_special_date(&mut self, spec: SpecialDateSpec) {
        tracing::debug!(
            target: "calendar",
            name = spec.name.as_str(),
            month = spec.month,
            day = spec.day,
            lunar = spec.is_lunar,
            "special date added"
        );
        self.dates.push(spec);
    }

    pub fn special_dates(&self) -> &[SpecialDateSpec] {
        &self.dates
    }

    pub fn current_period(&self) -> Option<TimePeriod> {
        self.current_period
    }

    pub fn lunar_available(&self) -> bool {
        self.lunar.is_some()
    }

    /// Forget every `(name, year)` firing so dates can trigger again.
    pub fn reset_triggered(&mut self) {
        self.triggered.clear();
        tracing::debug!(target: "calendar", "triggered set reset");
    }

    /// One calendar tick: detect period transitions (emitting only on
    /// change) and scan the registry for special dates.
    pub fn tick(&mut self, now: NaiveDateTime) {
        let today = now.date();

        // The triggered set only dedups within a year; prune on rollover.
        let year = today.year();
        if self.last_seen_year.is_some_and(|seen| seen != year) {
            self.triggered.retain(|(_, y)| *y == year);
        }
        self.last_seen_year = Some(year);

        let new_period = TimePeriod::from_hour(now.hour());
        if self.current_period != Some(new_period) {
            let old = self.current_period;
            self.current_period = Some(new_period);
            tracing::info!(
                target: "calendar",
                old = old.map(TimePeriod::name),
                new = new_period.name(),
                "time period changed"
            );
            self.bus.publish(BusPayload::PeriodChanged(PeriodChange {
                old: old.map(TimePeriod::name),
                new: new_period.name(),
                at: SystemTime::now(),
            }));
        }

        self.check_special_dates(today);
        self.active.retain(|a| a.occurs_on >= today);
    }

    fn check_special_dates(&mut self, today: NaiveDate) {
        let year = today.year();
        // Collect first: firing borrows the bus and mutates the sets.
        let mut fired: Vec<(SpecialDateSpec, u32, NaiveDate)> = Vec::new();
        for spec in &self.dates {
            if self.triggered.contains(&(spec.name.clone(), year)) {
                continue;
            }
            for offset in 0..=spec.lead_days {
                let Some(check) = today.checked_add_days(Days::new(offset as u64)) else {
                    continue;
                };
                if self.matches_on(spec, check) {
                    fired.push((spec.clone(), offset, check));
                    break;
                }
            }
        }

        for (spec, offset, occurs_on) in fired {
            self.triggered.insert((spec.name.clone(), year));
            self.active.push(ActiveSpecial {
                name: spec.name.clone(),
                occurs_on,
            });
            tracing::info!(
                target: "calendar",
                name = spec.name.as_str(),
                lead_offset = offset,
                lunar = spec.is_lunar,
                "special date triggered"
            );
            self.bus.publish(BusPayload::SpecialDate(SpecialDateFired {
                name: spec.name.clone(),
                description: spec.description.clone(),
                lead_offset: offset,
                is_lunar: spec.is_lunar,
                at: SystemTime::now(),
            }));
        }
    }

    /// Whether `spec` occurs on `date`, in the appropriate calendar. Lunar
    /// and solar-term entries silently fail the match without a backend.
    fn matches_on(&self, spec: &SpecialDateSpec, date: NaiveDate) -> bool {
        if spec.kind == SpecialDateKind::SolarTerm {
            let Some(lunar) = self.lunar.as_deref() else {
                return false;
            };
            return lunar.solar_term_on(date).as_deref() == Some(spec.name.as_str());
        }
        if spec.is_lunar {
            let Some(lunar) = self.lunar.as_deref() else {
                return false;
            };
            let Some(on) = lunar.solar_to_lunar(date) else {
                return false;
            };
            let leap_matches =
                !lunar.supports_leap_months() || on.leap_month == spec.is_leap_month;
            return on.month == spec.month && on.day == spec.day && leap_matches;
        }
        date.month() == spec.month && date.day() == spec.day
    }

    /// Entries whose occurrence day is today or later (a fired lead-day entry
    /// stays current through the end of its actual day).
    pub fn active_special_dates(&self, today: NaiveDate) -> Vec<&str> {
        self.active
            .iter()
            .filter(|a| a.occurs_on >= today)
            .map(|a| a.name.as_str())
            .collect()
    }

    /// Registry entries matching `today` exactly, regardless of the triggered
    /// set. Used for the startup one-shot sync.
    pub fn special_dates_on(&self, today: NaiveDate) -> Vec<&SpecialDateSpec> {
        self.dates
            .iter()
            .filter(|spec| self.matches_on(spec, today))
            .collect()
    }

    /// Special dates within the next `days` days, each with its resolved
    /// solar date, ascending. Lunar entries resolve against this year, or
    /// next year when this year's occurrence already passed.
    pub fn upcoming_special_dates(
        &self,
        days: u32,
        today: NaiveDate,
    ) -> Vec<(&SpecialDateSpec, NaiveDate)> {
        let Some(end) = today.checked_add_days(Days::new(days as u64)) else {
            return Vec::new();
        };
        let mut result: Vec<(&SpecialDateSpec, NaiveDate)> = Vec::new();

        for spec in &self.dates {
            let resolved = match spec.kind {
                SpecialDateKind::SolarTerm => self.resolve_solar_term(spec, today, end),
                _ if spec.is_lunar => self.resolve_lunar(spec, today),
                _ => self.resolve_solar(spec, today),
            };
            if let Some(date) = resolved
                && date >= today
                && date <= end
            {
                result.push((spec, date));
            }
        }

        result.sort_by_key(|(_, date)| *date);
        result
    }

    fn resolve_solar(&self, spec: &SpecialDateSpec, today: NaiveDate) -> Option<NaiveDate> {
        let this_year = NaiveDate::from_ymd_opt(today.year(), spec.month, spec.day);
        match this_year {
            Some(date) if date >= today => Some(date),
            _ => {
                let next = NaiveDate::from_ymd_opt(today.year() + 1, spec.month, spec.day);
                if this_year.is_none() && next.is_none() {
                    tracing::warn!(
                        target: "calendar",
                        name = spec.name.as_str(),
                        month = spec.month,
                        day = spec.day,
                        "special date has an invalid solar date"
                    );
                }
                next
            }
        }
    }

    fn resolve_lunar(&self, spec: &SpecialDateSpec, today: NaiveDate) -> Option<NaiveDate> {
        let lunar = self.lunar.as_deref()?;
        let this_year =
            lunar.lunar_to_solar(today.year(), spec.month, spec.day, spec.is_leap_month);
        match this_year {
            Some(date) if date >= today => Some(date),
            _ => lunar.lunar_to_solar(today.year() + 1, spec.month, spec.day, spec.is_leap_month),
        }
    }

    fn resolve_solar_term(
        &self,
        spec: &SpecialDateSpec,
        today: NaiveDate,
        end: NaiveDate,
    ) -> Option<NaiveDate> {
        let lunar = self.lunar.as_deref()?;
        let mut date = today;
        while date <= end {
            if lunar.solar_term_on(date).as_deref() == Some(spec.name.as_str()) {
                return Some(date);
            }
            date = date.checked_add_days(Days::new(1))?;
        }
        None
    }
}
