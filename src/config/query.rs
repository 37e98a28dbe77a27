use anyhow::{anyhow, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::usage;

/// Inclusive date range for the daily usage query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn start_str(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

/// How the daily usage window is chosen
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Number of days ending yesterday (QUERY_DAYS)
    pub days: Option<u32>,
    /// Explicit first day (QUERY_START_DATE)
    pub start_date: Option<NaiveDate>,
    /// Explicit last day (QUERY_END_DATE), defaults to yesterday
    pub end_date: Option<NaiveDate>,
}

impl QueryConfig {
    pub fn from_lookup<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("QUERY_DAYS").filter(|v| !v.trim().is_empty()) {
            match val.trim().parse::<u32>() {
                Ok(days) if days >= 1 => config.days = Some(days),
                Ok(_) => warn!("Invalid QUERY_DAYS: {}, must be >= 1, using default", val),
                Err(_) => warn!("Failed to parse QUERY_DAYS: {}, using default", val),
            }
        }

        config.start_date = parse_date(lookup, "QUERY_START_DATE")?;
        config.end_date = parse_date(lookup, "QUERY_END_DATE")?;

        if let (Some(start), Some(end)) = (config.start_date, config.end_date) {
            if end < start {
                return Err(anyhow!(
                    "QUERY_END_DATE {} is before QUERY_START_DATE {}",
                    end,
                    start
                ));
            }
        }

        if config.start_date.is_none() && config.end_date.is_some() {
            warn!("QUERY_END_DATE is ignored without QUERY_START_DATE");
        }

        Ok(config)
    }

    /// Resolve the window relative to `today`
    ///
    /// Explicit start (with optional end) wins over a day count, which wins
    /// over the default window. Day-count windows end yesterday.
    pub fn window(&self, today: NaiveDate) -> DateWindow {
        let yesterday = today - Duration::days(1);

        if let Some(start) = self.start_date {
            return DateWindow {
                start,
                end: self.end_date.unwrap_or(yesterday),
            };
        }

        let days = self.days.unwrap_or(usage::DEFAULT_QUERY_DAYS);
        DateWindow {
            start: today - Duration::days(i64::from(days) + 1),
            end: yesterday,
        }
    }
}

fn parse_date<F>(lookup: &F, key: &str) -> Result<Option<NaiveDate>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_string()) {
        Some(val) if !val.is_empty() => NaiveDate::parse_from_str(&val, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| anyhow!("{} must be YYYY-MM-DD, got {}: {}", key, val, e)),
        _ => Ok(None),
    }
}
