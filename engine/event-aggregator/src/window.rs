//! Today/tomorrow window resolution in the fixed civil timezone

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Serialize, Serializer};

use crate::error::WindowError;

/// Format accepted for reference-date overrides
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Which half of the window an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Today,
    Tomorrow,
}

/// Immutable (today, tomorrow) pair of calendar dates in one timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FetchWindow {
    today: NaiveDate,
    tomorrow: NaiveDate,
    #[serde(serialize_with = "serialize_tz")]
    timezone: Tz,
}

impl FetchWindow {
    /// Resolve the window from an optional `YYYY-MM-DD` override, or from the current instant
    pub fn resolve(reference: Option<&str>, tz: Tz) -> Result<Self, WindowError> {
        match reference {
            Some(input) => {
                let today = NaiveDate::parse_from_str(input.trim(), DATE_FORMAT).map_err(|_| {
                    WindowError::InvalidDateFormat { input: input.to_string() }
                })?;
                Self::for_date(today, tz)
            }
            None => Self::resolve_at(Utc::now(), tz),
        }
    }

    /// Resolve the window containing `now` as observed in `tz`
    pub fn resolve_at(now: DateTime<Utc>, tz: Tz) -> Result<Self, WindowError> {
        Self::for_date(now.with_timezone(&tz).date_naive(), tz)
    }

    pub fn for_date(today: NaiveDate, tz: Tz) -> Result<Self, WindowError> {
        // Calendar arithmetic on the naive date; DST shifts never move the date
        let tomorrow = today.succ_opt().ok_or(WindowError::OutOfRange { date: today })?;
        Ok(Self { today, tomorrow, timezone: tz })
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn tomorrow(&self) -> NaiveDate {
        self.tomorrow
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Classify an instant by its calendar date in the window's timezone
    pub fn classify<Z: TimeZone>(&self, instant: &DateTime<Z>) -> Option<Bucket> {
        let date = instant.with_timezone(&self.timezone).date_naive();
        if date == self.today {
            Some(Bucket::Today)
        } else if date == self.tomorrow {
            Some(Bucket::Tomorrow)
        } else {
            None
        }
    }

    /// Half-open UTC range `[start of today, start of the day after tomorrow)`
    pub fn utc_bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let end_date = self.tomorrow.succ_opt().unwrap_or(self.tomorrow);
        (start_of_day(self.today, self.timezone), start_of_day(end_date, self.timezone))
    }
}

/// First valid instant of `date` in `tz`.
///
/// Local midnight can fall in a DST gap in some zones; the earliest existing
/// local time on that date is used instead.
pub fn start_of_day(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    (0..=4)
        .map(|step| midnight + Duration::minutes(30 * step))
        .find_map(|local| tz.from_local_datetime(&local).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

fn serialize_tz<S: Serializer>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(tz.name())
}
