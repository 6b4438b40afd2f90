use chrono::{DateTime, NaiveDate, Utc};
use mongodb::bson::{self, Bson};

/// Serialize an instant the same way the model structs do, for use
/// inside `doc!` update documents. Keeping the two paths identical
/// matters: sorts and range filters compare against stored values.
pub fn chrono_to_bson(dt: DateTime<Utc>) -> Bson {
    bson::to_bson(&dt).unwrap_or_else(|_| Bson::String(dt.to_rfc3339()))
}

/// Calendar day (UTC) an instant falls on. Streaks count days, not 24h windows.
pub fn utc_day(dt: DateTime<Utc>) -> NaiveDate {
    dt.date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn update_documents_match_struct_serialization() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap();
        let via_helper = chrono_to_bson(dt);
        let via_serde = bson::to_bson(&dt).unwrap();
        assert_eq!(via_helper, via_serde);
    }

    #[test]
    fn utc_day_ignores_time_of_day() {
        let morning = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 1).unwrap();
        let night = Utc.with_ymd_and_hms(2024, 3, 15, 23, 59, 59).unwrap();
        assert_eq!(utc_day(morning), utc_day(night));
    }
}
