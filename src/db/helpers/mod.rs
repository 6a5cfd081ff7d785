use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::models::{DiscoveryType, JourneyStatus};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_status(value: &str) -> Result<JourneyStatus> {
    match value {
        "Active" => Ok(JourneyStatus::Active),
        "Paused" => Ok(JourneyStatus::Paused),
        "Completed" => Ok(JourneyStatus::Completed),
        "Cancelled" => Ok(JourneyStatus::Cancelled),
        other => Err(anyhow!("unknown journey status {other}")),
    }
}

pub fn parse_discovery_type(value: &str) -> Result<DiscoveryType> {
    DiscoveryType::parse(value).ok_or_else(|| anyhow!("unknown discovery type {value}"))
}

pub fn to_json<T: Serialize + ?Sized>(value: &T, field: &str) -> Result<String> {
    serde_json::to_string(value).with_context(|| format!("failed to serialize {field}"))
}

pub fn from_json<T: DeserializeOwned>(value: &str, field: &str) -> Result<T> {
    serde_json::from_str(value).with_context(|| format!("failed to parse {field}"))
}

pub fn from_optional_json<T: DeserializeOwned>(value: Option<String>, field: &str) -> Result<Option<T>> {
    match value {
        Some(raw) => from_json(&raw, field).map(Some),
        None => Ok(None),
    }
}
