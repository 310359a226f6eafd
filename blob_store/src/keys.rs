//! Date-partitioned destination keys.
//!
//! Keys are deterministic per client and UTC calendar day, so a restart on
//! the same day targets the same object.

use chrono::{NaiveDate, Utc};
use data_model::ClientId;

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn date_partition(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// `{prefix}/{YYYY-MM-DD}/{client_id}`, used by the S3 and local backends.
pub fn prefixed_key(prefix: &str, date: NaiveDate, client_id: ClientId) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}/{}", date_partition(date), client_id)
    } else {
        format!("{}/{}/{}", prefix, date_partition(date), client_id)
    }
}

/// Azure containers are named after the day they hold.
pub fn azure_container(date: NaiveDate) -> String {
    date_partition(date)
}

pub fn azure_blob_name(date: NaiveDate, client_id: ClientId) -> String {
    format!("content-logs-{}-{}", date_partition(date), client_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    #[test]
    fn test_prefixed_key() {
        assert_eq!(
            prefixed_key("chat", date(), ClientId::new(17)),
            "chat/2024-03-09/17"
        );
        assert_eq!(
            prefixed_key("/chat/logs/", date(), ClientId::new(17)),
            "chat/logs/2024-03-09/17"
        );
        assert_eq!(prefixed_key("", date(), ClientId::new(3)), "2024-03-09/3");
    }

    #[test]
    fn test_azure_names() {
        assert_eq!(azure_container(date()), "2024-03-09");
        assert_eq!(
            azure_blob_name(date(), ClientId::new(42)),
            "content-logs-2024-03-09-42"
        );
    }
}
