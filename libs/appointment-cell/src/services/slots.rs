use std::sync::Arc;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Appointment, Slot, WorkingHours, MAX_DURATION_MINUTES};
use crate::services::conflict::find_conflicts;
use crate::services::interval::Interval;
use crate::store::{AppointmentStore, StoreError};

/// Free start times for one practitioner on one day, computed against a
/// snapshot of that day's appointments. Iterating twice yields the same
/// sequence.
#[derive(Debug, Clone)]
pub struct SlotGenerator {
    date: NaiveDate,
    timezone: Tz,
    hours: WorkingHours,
    duration_minutes: i32,
    step_minutes: i32,
    existing: Vec<Appointment>,
    exclude_appointment_id: Option<Uuid>,
}

impl SlotGenerator {
    pub fn new(
        date: NaiveDate,
        timezone: Tz,
        hours: WorkingHours,
        duration_minutes: i32,
        step_minutes: i32,
        existing: Vec<Appointment>,
    ) -> Self {
        Self {
            date,
            timezone,
            hours,
            duration_minutes,
            step_minutes: step_minutes.max(1),
            existing,
            exclude_appointment_id: None,
        }
    }

    /// Treat `appointment_id` as free time, e.g. the appointment being moved.
    pub fn excluding(mut self, appointment_id: Option<Uuid>) -> Self {
        self.exclude_appointment_id = appointment_id;
        self
    }

    pub fn slots(&self) -> Slots<'_> {
        Slots { generator: self, offset_minutes: 0 }
    }

    /// `scheduled_start` range that has to be loaded to evaluate every
    /// candidate of the day.
    pub fn lookup_window(date: NaiveDate, timezone: Tz, hours: WorkingHours) -> (DateTime<Utc>, DateTime<Utc>) {
        let from = resolve_lenient(timezone, date.and_time(hours.start))
            - Duration::minutes(MAX_DURATION_MINUTES as i64);
        let to = resolve_lenient(timezone, date.and_time(hours.end));
        (from, to)
    }
}

pub struct Slots<'a> {
    generator: &'a SlotGenerator,
    offset_minutes: i64,
}

impl Iterator for Slots<'_> {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        let generator = self.generator;
        let day_start = generator.date.and_time(generator.hours.start);
        let day_end = generator.date.and_time(generator.hours.end);
        let duration = Duration::minutes(generator.duration_minutes as i64);

        loop {
            let local_start = day_start + Duration::minutes(self.offset_minutes);
            if local_start + duration > day_end {
                return None;
            }
            self.offset_minutes += generator.step_minutes as i64;

            // Only wall-clock times that name exactly one instant are offered,
            // matching what booking accepts. DST gaps and repeated hours are skipped.
            let LocalResult::Single(start) = generator.timezone.from_local_datetime(&local_start) else {
                continue;
            };
            let start = start.with_timezone(&Utc);

            let candidate = Interval::new(start, generator.duration_minutes);
            if find_conflicts(&candidate, &generator.existing, generator.exclude_appointment_id).is_empty() {
                return Some(Slot {
                    time: local_start.format("%H:%M").to_string(),
                    duration_minutes: generator.duration_minutes,
                    available: true,
                    start,
                });
            }
        }
    }
}

/// Local wall-clock time to UTC; times inside a DST gap move forward to
/// the first valid instant. Only used for day boundaries and lookup
/// windows, never for a booked start.
pub fn resolve_lenient(timezone: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    let mut candidate = local;
    for _ in 0..4 {
        if let Some(resolved) = timezone.from_local_datetime(&candidate).earliest() {
            return resolved.with_timezone(&Utc);
        }
        candidate += Duration::minutes(30);
    }

    // No zone has a gap this long; shift by the offset in force around that
    // time rather than reading the wall clock as UTC.
    let offset = timezone.offset_from_utc_datetime(&local).fix().local_minus_utc();
    warn!("Local time {} does not exist in {}, using offset {}s", local, timezone, offset);
    Utc.from_utc_datetime(&(local - Duration::seconds(offset as i64)))
}

pub struct AvailabilityService {
    store: Arc<dyn AppointmentStore>,
    timezone: Tz,
    step_minutes: i32,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn AppointmentStore>, timezone: Tz, step_minutes: i32) -> Self {
        Self { store, timezone, step_minutes }
    }

    /// Loads the practitioner's day once and returns a generator over it.
    pub async fn generator_for(
        &self,
        clinic_id: Uuid,
        practitioner_id: Uuid,
        date: NaiveDate,
        duration_minutes: i32,
        hours: WorkingHours,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<SlotGenerator, StoreError> {
        debug!(
            "Computing slots for practitioner {} on {} ({}-{}, {} min)",
            practitioner_id,
            date,
            hours.start.format("%H:%M"),
            hours.end.format("%H:%M"),
            duration_minutes
        );

        let (from, to) = SlotGenerator::lookup_window(date, self.timezone, hours);
        let existing = self.store
            .active_appointments_between(clinic_id, practitioner_id, from, to)
            .await?;

        Ok(SlotGenerator::new(date, self.timezone, hours, duration_minutes, self.step_minutes, existing)
            .excluding(exclude_appointment_id))
    }
}
