// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Provider-specific request/response shapes for the price-feed family.
//!
//! Each variant knows how to build its query URL for a date window and how
//! to parse its response body into `(timestamp, price)` points; everything
//! else about a feed is shared.

use crate::error::{ClientError, ClientResult};
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// One upstream data source, tagged by provider family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceSource {
    /// Commodity settlement prices (daily series, e.g. crude futures).
    Commodity { database: String, dataset: String },
    /// Monthly housing index observations (FRED-style series).
    HousingIndex { series_id: String },
    /// Equity daily closes.
    Equity { symbol: String },
    /// Monthly consumer-price-index values (BLS-style series).
    ConsumerPriceIndex { series_id: String },
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceSource::Commodity { database, dataset } => {
                write!(f, "commodity:{}/{}", database, dataset)
            }
            PriceSource::HousingIndex { series_id } => write!(f, "housing:{}", series_id),
            PriceSource::Equity { symbol } => write!(f, "equity:{}", symbol),
            PriceSource::ConsumerPriceIndex { series_id } => write!(f, "cpi:{}", series_id),
        }
    }
}

impl PriceSource {
    /// Build the query URL covering `[from, to]` (unix seconds).
    pub fn request_url(&self, api_key: Option<&str>, from: u64, to: u64) -> String {
        let start = format_date(from);
        let end = format_date(to);
        match self {
            PriceSource::Commodity { database, dataset } => {
                let mut url = format!(
                    "https://data.nasdaq.com/api/v3/datasets/{}/{}/data.json?start_date={}&end_date={}&order=asc",
                    database, dataset, start, end
                );
                if let Some(key) = api_key {
                    url.push_str(&format!("&api_key={}", key));
                }
                url
            }
            PriceSource::HousingIndex { series_id } => {
                let mut url = format!(
                    "https://api.stlouisfed.org/fred/series/observations?series_id={}&observation_start={}&observation_end={}&file_type=json",
                    series_id, start, end
                );
                if let Some(key) = api_key {
                    url.push_str(&format!("&api_key={}", key));
                }
                url
            }
            PriceSource::Equity { symbol } => {
                let mut url = format!(
                    "https://www.alphavantage.co/query?function=TIME_SERIES_DAILY&symbol={}&outputsize=full",
                    symbol
                );
                if let Some(key) = api_key {
                    url.push_str(&format!("&apikey={}", key));
                }
                url
            }
            PriceSource::ConsumerPriceIndex { series_id } => {
                let start_year = year_of(from);
                let end_year = year_of(to);
                let mut url = format!(
                    "https://api.bls.gov/publicAPI/v2/timeseries/data/{}?startyear={}&endyear={}",
                    series_id, start_year, end_year
                );
                if let Some(key) = api_key {
                    url.push_str(&format!("&registrationkey={}", key));
                }
                url
            }
        }
    }

    /// Parse the response body into ascending `(timestamp, price)` points.
    /// A structurally wrong body is a malformed-response error; an empty but
    /// well-formed body parses to an empty vec (the feed decides whether
    /// that is acceptable).
    pub fn parse(&self, body: &Value) -> ClientResult<Vec<(u64, Decimal)>> {
        let mut points = match self {
            PriceSource::Commodity { .. } => parse_commodity(body),
            PriceSource::HousingIndex { .. } => parse_housing(body),
            PriceSource::Equity { .. } => parse_equity(body),
            PriceSource::ConsumerPriceIndex { .. } => parse_cpi(body),
        }?;
        points.sort_by_key(|&(t, _)| t);
        Ok(points)
    }
}

// Daily series close at end of day UTC.
fn end_of_day(date: NaiveDate) -> u64 {
    let midnight = date.and_hms_opt(0, 0, 0).expect("midnight is valid");
    midnight.and_utc().timestamp() as u64 + 86_399
}

// Monthly series are stamped at the first second of their month.
fn start_of_day(date: NaiveDate) -> u64 {
    let midnight = date.and_hms_opt(0, 0, 0).expect("midnight is valid");
    midnight.and_utc().timestamp() as u64
}

fn format_date(timestamp: u64) -> String {
    let date = chrono::DateTime::from_timestamp(timestamp as i64, 0)
        .map(|dt| dt.date_naive())
        .unwrap_or_default();
    date.format("%Y-%m-%d").to_string()
}

fn year_of(timestamp: u64) -> i32 {
    chrono::DateTime::from_timestamp(timestamp as i64, 0)
        .map(|dt| dt.date_naive().year())
        .unwrap_or(1970)
}

fn parse_date(raw: &str) -> ClientResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| ClientError::MalformedResponse(format!("bad date '{}': {}", raw, e)))
}

fn parse_price(raw: &Value, context: &str) -> ClientResult<Decimal> {
    match raw {
        Value::Number(n) => Decimal::from_str(&n.to_string()).map_err(|e| {
            ClientError::MalformedResponse(format!("bad {} price '{}': {}", context, n, e))
        }),
        Value::String(s) => Decimal::from_str(s).map_err(|e| {
            ClientError::MalformedResponse(format!("bad {} price '{}': {}", context, s, e))
        }),
        other => Err(ClientError::MalformedResponse(format!(
            "{} price is neither number nor string: {}",
            context, other
        ))),
    }
}

// {"dataset_data": {"column_names": [...], "data": [["2021-01-04", ..., 52.1], ...]}}
// The settle value is the last column.
fn parse_commodity(body: &Value) -> ClientResult<Vec<(u64, Decimal)>> {
    let rows = body
        .get("dataset_data")
        .and_then(|d| d.get("data"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ClientError::MalformedResponse("commodity body missing dataset_data.data".to_string())
        })?;
    let mut points = Vec::with_capacity(rows.len());
    for row in rows {
        let cells = row.as_array().ok_or_else(|| {
            ClientError::MalformedResponse("commodity row is not an array".to_string())
        })?;
        let (date_cell, price_cell) = match (cells.first(), cells.last()) {
            (Some(d), Some(p)) if cells.len() >= 2 => (d, p),
            _ => {
                return Err(ClientError::MalformedResponse(
                    "commodity row has fewer than two columns".to_string(),
                ))
            }
        };
        let date_str = date_cell.as_str().ok_or_else(|| {
            ClientError::MalformedResponse("commodity date is not a string".to_string())
        })?;
        // Null settle values appear on holidays; skip the row.
        if price_cell.is_null() {
            continue;
        }
        points.push((
            end_of_day(parse_date(date_str)?),
            parse_price(price_cell, "commodity")?,
        ));
    }
    Ok(points)
}

// {"observations": [{"date": "2021-01-01", "value": "235.2"}, ...]}
// Missing observations carry value "." and are skipped.
fn parse_housing(body: &Value) -> ClientResult<Vec<(u64, Decimal)>> {
    let rows = body
        .get("observations")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ClientError::MalformedResponse("housing body missing observations".to_string())
        })?;
    let mut points = Vec::with_capacity(rows.len());
    for row in rows {
        let date_str = row.get("date").and_then(Value::as_str).ok_or_else(|| {
            ClientError::MalformedResponse("housing observation missing date".to_string())
        })?;
        let value = row.get("value").ok_or_else(|| {
            ClientError::MalformedResponse("housing observation missing value".to_string())
        })?;
        if value.as_str() == Some(".") {
            continue;
        }
        points.push((
            start_of_day(parse_date(date_str)?),
            parse_price(value, "housing")?,
        ));
    }
    Ok(points)
}

// {"Time Series (Daily)": {"2021-01-04": {"4. close": "129.41"}, ...}}
fn parse_equity(body: &Value) -> ClientResult<Vec<(u64, Decimal)>> {
    let series = body
        .get("Time Series (Daily)")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            ClientError::MalformedResponse("equity body missing daily time series".to_string())
        })?;
    let mut points = Vec::with_capacity(series.len());
    for (date_str, fields) in series {
        let close = fields.get("4. close").ok_or_else(|| {
            ClientError::MalformedResponse(format!("equity day {} missing close", date_str))
        })?;
        points.push((
            end_of_day(parse_date(date_str)?),
            parse_price(close, "equity")?,
        ));
    }
    Ok(points)
}

// {"Results": {"series": [{"data": [{"year": "2021", "period": "M05", "value": "269.195"}, ...]}]}}
fn parse_cpi(body: &Value) -> ClientResult<Vec<(u64, Decimal)>> {
    let rows = body
        .get("Results")
        .and_then(|r| r.get("series"))
        .and_then(Value::as_array)
        .and_then(|s| s.first())
        .and_then(|s| s.get("data"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ClientError::MalformedResponse("cpi body missing Results.series[0].data".to_string())
        })?;
    let mut points = Vec::with_capacity(rows.len());
    for row in rows {
        let year: i32 = row
            .get("year")
            .and_then(Value::as_str)
            .and_then(|y| y.parse().ok())
            .ok_or_else(|| ClientError::MalformedResponse("cpi row missing year".to_string()))?;
        let period = row
            .get("period")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::MalformedResponse("cpi row missing period".to_string()))?;
        // Periods M01..M12 are months; M13 is the annual average, skipped.
        let month: u32 = match period.strip_prefix('M').and_then(|m| m.parse().ok()) {
            Some(m) if (1..=12).contains(&m) => m,
            Some(13) => continue,
            _ => {
                return Err(ClientError::MalformedResponse(format!(
                    "cpi row has unrecognized period '{}'",
                    period
                )))
            }
        };
        let value = row
            .get("value")
            .ok_or_else(|| ClientError::MalformedResponse("cpi row missing value".to_string()))?;
        let date = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            ClientError::MalformedResponse(format!("cpi row has invalid date {}-{}", year, month))
        })?;
        points.push((start_of_day(date), parse_price(value, "cpi")?));
    }
    Ok(points)
}
