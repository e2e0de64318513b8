use time::OffsetDateTime;
use uuid::Uuid;

pub fn new_id() -> String {
    Uuid::now_v7().simple().to_string()
}

pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
