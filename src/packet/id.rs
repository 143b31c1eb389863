//! # Packet Collection IDs
//!
//! `UniqueIdGenerator` never repeats within a process and, thanks to its random
//! instance token, practically never across restarts.
//!
//! `HourWindowIdGenerator` keeps ids short and bounded: an id is
//! `{instance}-{hour}-{slot}` with `slot < unique_in_hour`. The first
//! `unique_in_hour` ids of an hour never collide. Once every slot of the hour is
//! taken, further ids reuse their time slot and **do** collide with an earlier id
//! of the same hour. Deployments must set `unique_in_hour` at or above the real
//! number of cycles per hour if they cannot tolerate that. Combined with a sink
//! that overwrites by id, a collision replaces the older collection.

use chrono::{DateTime, Utc};
use log::warn;
use std::collections::HashSet;

const MILLIS_PER_HOUR: i64 = 3_600_000;

pub trait IdGenerator: Send {
    fn generate(&mut self, now: DateTime<Utc>) -> String;
}

/// Globally unique ids: instance token, timestamp and a counter.
#[derive(Debug)]
pub struct UniqueIdGenerator {
    instance: u32,
    counter: u64,
}

impl UniqueIdGenerator {
    pub fn new() -> Self {
        Self::with_instance(rand::random())
    }

    pub fn with_instance(instance: u32) -> Self {
        UniqueIdGenerator {
            instance,
            counter: 0,
        }
    }
}

impl Default for UniqueIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for UniqueIdGenerator {
    fn generate(&mut self, now: DateTime<Utc>) -> String {
        let id = format!(
            "{:08x}-{}-{}",
            self.instance,
            now.timestamp_millis(),
            self.counter
        );
        self.counter += 1;
        id
    }
}

/// Bounded ids, unique for the first `unique_in_hour` generations of each hour.
#[derive(Debug)]
pub struct HourWindowIdGenerator {
    unique_in_hour: u32,
    instance: u32,
    hour: Option<i64>,
    used: HashSet<u32>,
    exhausted_logged: bool,
}

impl HourWindowIdGenerator {
    /// `unique_in_hour` must be at least 1; config validation enforces it.
    pub fn new(unique_in_hour: u32) -> Self {
        Self::with_instance(unique_in_hour, rand::random())
    }

    pub fn with_instance(unique_in_hour: u32, instance: u32) -> Self {
        HourWindowIdGenerator {
            unique_in_hour: unique_in_hour.max(1),
            instance,
            hour: None,
            used: HashSet::new(),
            exhausted_logged: false,
        }
    }

    pub fn unique_in_hour(&self) -> u32 {
        self.unique_in_hour
    }

    fn time_slot(&self, millis_in_hour: i64) -> u32 {
        let slot_len = (MILLIS_PER_HOUR / self.unique_in_hour as i64).max(1);
        let slot = (millis_in_hour / slot_len).min(self.unique_in_hour as i64 - 1);
        slot as u32
    }
}

impl IdGenerator for HourWindowIdGenerator {
    fn generate(&mut self, now: DateTime<Utc>) -> String {
        let millis = now.timestamp_millis();
        let hour = millis.div_euclid(MILLIS_PER_HOUR);
        if self.hour != Some(hour) {
            self.hour = Some(hour);
            self.used.clear();
            self.exhausted_logged = false;
        }

        let time_slot = self.time_slot(millis.rem_euclid(MILLIS_PER_HOUR));
        let n = self.unique_in_hour;
        let slot = (0..n)
            .map(|offset| (time_slot + offset) % n)
            .find(|slot| !self.used.contains(slot))
            .unwrap_or_else(|| {
                if !self.exhausted_logged {
                    warn!("All {n} collection ids for this hour are used, ids will repeat until the hour ends");
                    self.exhausted_logged = true;
                }
                time_slot
            });
        self.used.insert(slot);

        format!("{:08x}-{hour}-{slot}", self.instance)
    }
}
