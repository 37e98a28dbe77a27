use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::usage;
use crate::models::de::{opt_string_or_number, provider_day, string_or_number};

/// One physical meter linked to the account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeterBinding {
    #[serde(rename = "consNo", deserialize_with = "string_or_number")]
    pub cons_no: String,
    /// Public account number, also used in requests and filters
    #[serde(rename = "consNo_dst", default)]
    pub cons_no_dst: String,
    #[serde(rename = "consName_dst", default, skip_serializing_if = "Option::is_none")]
    pub cons_name_dst: Option<String>,
    #[serde(rename = "proNo", default, skip_serializing_if = "Option::is_none")]
    pub pro_no: Option<String>,
    #[serde(rename = "provinceId", default, skip_serializing_if = "Option::is_none")]
    pub province_id: Option<String>,
    #[serde(rename = "orgNo", default)]
    pub org_no: String,
    #[serde(rename = "orgName", default, skip_serializing_if = "Option::is_none")]
    pub org_name: Option<String>,
    #[serde(rename = "constType", default)]
    pub meter_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MeterBinding {
    /// Province code, falling back to the province id
    pub fn province_code(&self) -> &str {
        self.pro_no
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.province_id.as_deref())
            .unwrap_or_default()
    }

    /// Usage queries only distinguish type "02" from everything else
    pub fn usage_cons_type(&self) -> &'static str {
        if self.meter_type == "02" {
            "02"
        } else {
            "01"
        }
    }

    pub fn matches(&self, identifier: &str) -> bool {
        self.cons_no == identifier || self.cons_no_dst == identifier
    }
}

/// Balance as reported by the account endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub cons_no: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub sum_money: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub total_pq: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A daily reading exactly as the provider returns it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyReading {
    #[serde(deserialize_with = "string_or_number")]
    pub day: String,
    #[serde(rename = "dayElePq", default, deserialize_with = "string_or_number")]
    pub value: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DailyReading {
    pub fn is_no_reading(&self) -> bool {
        self.value.trim() == usage::NO_READING
    }

    /// Archive / publish form; `None` for sentinel or undated readings
    pub fn into_sample(self) -> Option<DailySample> {
        if self.is_no_reading() {
            return None;
        }
        let day = parse_provider_day(&self.day)?;
        Some(DailySample {
            day,
            value: self.value,
            extra: self.extra,
        })
    }
}

/// Daily usage response
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    #[serde(default)]
    pub seven_ele_list: Vec<DailyReading>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub total_pq: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DailyUsage {
    /// Readings with the "no reading" sentinel dropped
    pub fn samples(&self) -> Vec<DailySample> {
        self.seven_ele_list
            .iter()
            .cloned()
            .filter_map(DailyReading::into_sample)
            .collect()
    }
}

/// A dated daily consumption value, unique per day inside the archive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailySample {
    #[serde(deserialize_with = "provider_day")]
    pub day: NaiveDate,
    #[serde(rename = "dayElePq")]
    pub value: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DailySample {
    pub fn new(day: NaiveDate, value: impl Into<String>) -> Self {
        Self {
            day,
            value: value.into(),
            extra: Map::new(),
        }
    }

    pub fn is_no_reading(&self) -> bool {
        self.value.trim() == usage::NO_READING
    }
}

/// A monthly consumption entry; `month` is normalized to `YYYY-MM`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonthlySample {
    #[serde(deserialize_with = "string_or_number")]
    pub month: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MonthlySample {
    pub fn new(month: impl Into<String>) -> Self {
        Self {
            month: month.into(),
            extra: Map::new(),
        }
    }

    pub fn normalized(mut self) -> Self {
        self.month = format_provider_date(&self.month);
        self
    }
}

/// Year-to-date totals attached to the monthly series
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct YearTotals {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub total_ele_num: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub total_ele_cost: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Monthly usage response
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyUsage {
    #[serde(default)]
    pub moth_ele_list: Vec<MonthlySample>,
    #[serde(default)]
    pub data_info: Option<YearTotals>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MonthlyUsage {
    pub fn is_short_year(&self) -> bool {
        self.moth_ele_list.len() < usage::MONTHS_PER_YEAR
    }

    /// Monthly entries with normalized month labels
    pub fn samples(&self) -> Vec<MonthlySample> {
        self.moth_ele_list
            .iter()
            .cloned()
            .map(MonthlySample::normalized)
            .collect()
    }
}

/// `YYYYMMDD` → `YYYY-MM-DD`, `YYYYMM` → `YYYY-MM`, anything else unchanged
pub fn format_provider_date(raw: &str) -> String {
    let raw = raw.trim();
    if !raw.chars().all(|c| c.is_ascii_digit()) {
        return raw.to_string();
    }
    match raw.len() {
        8 => format!("{}-{}-{}", &raw[0..4], &raw[4..6], &raw[6..8]),
        6 => format!("{}-{}", &raw[0..4], &raw[4..6]),
        _ => raw.to_string(),
    }
}

/// Parses a provider day in either compact or dashed form
pub fn parse_provider_day(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&format_provider_date(raw), "%Y-%m-%d").ok()
}
