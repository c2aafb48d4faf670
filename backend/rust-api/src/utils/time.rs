use chrono::{DateTime, Utc};
use mongodb::bson::DateTime as BsonDateTime;

pub fn chrono_to_bson(dt: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(dt.timestamp_millis())
}

/// Calendar day in UTC as a whole number of days since the Unix epoch.
/// Streak arithmetic compares these instead of raw timestamps so that
/// two solves inside the same UTC day count once.
pub fn utc_day_number(dt: DateTime<Utc>) -> i64 {
    dt.timestamp().div_euclid(86_400)
}
