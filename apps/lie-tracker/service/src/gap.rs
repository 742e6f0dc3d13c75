use chrono::{Duration, FixedOffset, Local, NaiveDate, Offset, TimeZone};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Daily work window, in minutes after local midnight. `end` may be 1440 (24:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkWindow {
    start_minute: u32,
    end_minute: u32,
}

impl WorkWindow {
    pub fn new(start_minute: u32, end_minute: u32) -> Option<Self> {
        if start_minute >= end_minute || end_minute > MINUTES_PER_DAY {
            return None;
        }
        Some(Self {
            start_minute,
            end_minute,
        })
    }

    pub fn start_minute(&self) -> u32 {
        self.start_minute
    }

    pub fn end_minute(&self) -> u32 {
        self.end_minute
    }
}

impl Default for WorkWindow {
    fn default() -> Self {
        Self {
            start_minute: 8 * 60,
            end_minute: 17 * 60,
        }
    }
}

/// Zone whose calendar days and wall-clock window the workday policy follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkdayZone {
    Local,
    Fixed(FixedOffset),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapPolicy {
    /// Plain wall-clock delta.
    Raw,
    /// Only time inside each calendar day's work window counts. Weekends are not skipped.
    Workday {
        window: WorkWindow,
        zone: WorkdayZone,
    },
}

impl GapPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Workday { .. } => "workday",
        }
    }
}

/// Elapsed metric between two event timestamps (epoch milliseconds).
///
/// Returns 0 when there is no previous event or when `current` does not come after it.
pub fn compute_gap_ms(previous: Option<i64>, current: i64, policy: &GapPolicy) -> u64 {
    let Some(previous) = previous else {
        return 0;
    };
    if current <= previous {
        return 0;
    }

    match policy {
        GapPolicy::Raw => current.abs_diff(previous),
        GapPolicy::Workday { window, zone } => match zone {
            WorkdayZone::Local => workday_gap_ms(&Local, previous, current, *window),
            WorkdayZone::Fixed(offset) => workday_gap_ms(offset, previous, current, *window),
        },
    }
}

fn workday_gap_ms<Tz: TimeZone>(zone: &Tz, start_ms: i64, end_ms: i64, window: WorkWindow) -> u64 {
    let (Some(start), Some(end)) = (
        zone.timestamp_millis_opt(start_ms).single(),
        zone.timestamp_millis_opt(end_ms).single(),
    ) else {
        return 0;
    };

    let mut day = start.date_naive();
    let last_day = end.date_naive();
    let mut total: u64 = 0;

    while day <= last_day {
        let open = local_instant_ms(zone, day, window.start_minute);
        let close = local_instant_ms(zone, day, window.end_minute);
        if let (Some(open), Some(close)) = (open, close) {
            let from = start_ms.max(open);
            let to = end_ms.min(close);
            if to > from {
                total = total.saturating_add(to.abs_diff(from));
            }
        }

        let Some(next) = day.succ_opt() else {
            break;
        };
        day = next;
    }

    total
}

/// Epoch milliseconds of `minute` minutes past local midnight on `day`.
///
/// Ambiguous wall-clock times resolve to the earliest instant. Times skipped by a
/// forward DST jump are read with the offset in force before the jump, which lands
/// them past the gap by its length (00:30 in a 00:00-01:00 gap becomes 01:30).
fn local_instant_ms<Tz: TimeZone>(zone: &Tz, day: NaiveDate, minute: u32) -> Option<i64> {
    let midnight = day.and_hms_opt(0, 0, 0)?;
    let wall_clock = midnight.checked_add_signed(Duration::minutes(i64::from(minute)))?;
    if let Some(instant) = zone.from_local_datetime(&wall_clock).earliest() {
        return Some(instant.timestamp_millis());
    }

    let before_gap = wall_clock.checked_sub_signed(Duration::days(1))?;
    let offset = zone.offset_from_local_datetime(&before_gap).earliest()?.fix();
    let offset_ms = i64::from(offset.local_minus_utc()) * 1000;
    Some(wall_clock.and_utc().timestamp_millis() - offset_ms)
}
