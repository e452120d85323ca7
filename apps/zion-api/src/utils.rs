use chrono::{Local, NaiveDateTime, TimeZone};
use rand::Rng;

const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Builds a panel account name: `{base}_{device-or-trial}_{3 random chars}`.
/// The random suffix only guards against name collisions; it is not a
/// security boundary.
pub fn generate_marzban_username(base_name: &str, device_name: &str, is_trial: bool) -> String {
    let mut rng = rand::rng();

    let clean_base: String = base_name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    let base = if clean_base.is_empty() || base_name.starts_with("user_") || base_name.contains('@')
    {
        let tail: u32 = rng.random();
        format!("id{tail:08x}")
    } else {
        clean_base
    };

    let clean_device: String = device_name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(16)
        .collect();
    let prefix = if is_trial {
        "trial".to_string()
    } else if clean_device.is_empty() {
        "key".to_string()
    } else {
        clean_device
    };

    let suffix: String = (0..3)
        .map(|_| SUFFIX_CHARSET[rng.random_range(0..SUFFIX_CHARSET.len())] as char)
        .collect();

    format!("{base}_{prefix}_{suffix}")
}

/// Short numeric payment code the payer puts into the transfer comment.
pub fn generate_payment_code() -> String {
    let n: u32 = rand::rng().random_range(0..100_000_000);
    format!("{n:08}")
}

/// Naive local timestamp -> unix seconds. Falls back to interpreting
/// the value as UTC for the ambiguous DST hour.
pub fn local_ts(naive: NaiveDateTime) -> i64 {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| naive.and_utc().timestamp())
}

/// The format every date leaves the API in.
pub fn format_date(naive: NaiveDateTime) -> String {
    naive.format("%Y-%m-%d %H:%M:%S").to_string()
}
