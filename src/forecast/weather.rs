//! Historical weather integration (Open-Meteo archive API)
//!
//! Hourly observations are fetched for the meter's location and resampled onto
//! the forecasting grid. Weather is an optional input: every failure degrades
//! to an empty series and the models fall back to zero-valued features.
//! Instants past the archive's coverage reuse the latest covered day (see
//! [`WeatherSeries::filled_at`]).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use itertools::Itertools;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const OPEN_METEO_ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

const HOURLY_VARIABLES: &str =
    "temperature_2m,relative_humidity_2m,dew_point_2m,precipitation,cloud_cover";

/// Weather observation at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherPoint {
    pub timestamp: DateTime<Utc>,
    pub temperature_c: Option<f64>,
    pub humidity_percent: Option<f64>,
    pub dew_point_c: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub cloud_cover_percent: Option<f64>,
}

impl WeatherPoint {
    fn lerp(&self, other: &WeatherPoint, timestamp: DateTime<Utc>) -> WeatherPoint {
        let span = (other.timestamp - self.timestamp).num_seconds() as f64;
        let frac = if span > 0.0 {
            (timestamp - self.timestamp).num_seconds() as f64 / span
        } else {
            0.0
        };
        let mix = |a: Option<f64>, b: Option<f64>| match (a, b) {
            (Some(a), Some(b)) => Some(a + (b - a) * frac),
            (a, _) => a,
        };

        WeatherPoint {
            timestamp,
            temperature_c: mix(self.temperature_c, other.temperature_c),
            humidity_percent: mix(self.humidity_percent, other.humidity_percent),
            dew_point_c: mix(self.dew_point_c, other.dew_point_c),
            precipitation_mm: mix(self.precipitation_mm, other.precipitation_mm),
            cloud_cover_percent: mix(self.cloud_cover_percent, other.cloud_cover_percent),
        }
    }
}

/// Time-ordered weather observations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherSeries {
    points: Vec<WeatherPoint>,
}

impl WeatherSeries {
    pub fn new(mut points: Vec<WeatherPoint>) -> Self {
        points.sort_by_key(|p| p.timestamp);
        points.dedup_by_key(|p| p.timestamp);
        Self { points }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[WeatherPoint] {
        &self.points
    }

    /// Observation at `timestamp`, linearly interpolated between neighbours.
    /// `None` outside the covered span.
    pub fn at(&self, timestamp: DateTime<Utc>) -> Option<WeatherPoint> {
        match self.points.binary_search_by_key(&timestamp, |p| p.timestamp) {
            Ok(i) => Some(self.points[i]),
            Err(0) => None,
            Err(i) if i >= self.points.len() => None,
            Err(i) => Some(self.points[i - 1].lerp(&self.points[i], timestamp)),
        }
    }

    /// Observation at `timestamp` with gaps outside the covered span filled.
    ///
    /// Past the newest observation the same time of day on the latest
    /// covered day is used (or the newest point when less than a day is
    /// covered). Before the first observation the first point is held.
    /// `None` only for an empty series.
    pub fn filled_at(&self, timestamp: DateTime<Utc>) -> Option<WeatherPoint> {
        let (first, last) = (self.points.first()?, self.points.last()?);
        let restamp = |p: WeatherPoint| WeatherPoint { timestamp, ..p };

        if timestamp < first.timestamp {
            return Some(restamp(*first));
        }
        if timestamp <= last.timestamp {
            return self.at(timestamp);
        }

        const DAY_SECONDS: i64 = 86_400;
        let past = (timestamp - last.timestamp).num_seconds();
        let days = (past + DAY_SECONDS - 1) / DAY_SECONDS;
        let same_time = timestamp - Duration::days(days);
        match self.at(same_time) {
            Some(p) => Some(restamp(p)),
            None => Some(restamp(*last)),
        }
    }

    /// Resample onto a regular grid starting at the first observation.
    pub fn resample(&self, step: Duration) -> WeatherSeries {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return WeatherSeries::empty();
        };
        if step <= Duration::zero() {
            return self.clone();
        }

        let mut out = Vec::new();
        let mut t = first.timestamp;
        for (a, b) in self.points.iter().tuple_windows() {
            while t < b.timestamp {
                out.push(a.lerp(b, t));
                t += step;
            }
        }
        if t == last.timestamp {
            out.push(*last);
        }

        WeatherSeries { points: out }
    }
}

/// Geographic location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
}

/// Source of historical weather. Implementations never fail: problems are
/// logged and an empty series is returned.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn historical(
        &self,
        location: &GeoLocation,
        start: NaiveDate,
        end: NaiveDate,
    ) -> WeatherSeries;
}

/// Provider used when no location is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWeather;

#[async_trait]
impl WeatherProvider for NoWeather {
    async fn historical(&self, _: &GeoLocation, _: NaiveDate, _: NaiveDate) -> WeatherSeries {
        WeatherSeries::empty()
    }
}

/// Open-Meteo archive API client
pub struct OpenMeteoClient {
    client: Client,
    base_url: String,
    resample_step: Duration,
}

impl OpenMeteoClient {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration, resample_step: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            resample_step,
        }
    }

    /// Fetch hourly observations for `[start, end]` (whole days, UTC).
    pub async fn fetch(
        &self,
        location: &GeoLocation,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<WeatherSeries> {
        debug!(
            url = %self.base_url,
            latitude = location.latitude,
            longitude = location.longitude,
            %start,
            %end,
            "Fetching historical weather from Open-Meteo"
        );

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", location.latitude.to_string()),
                ("longitude", location.longitude.to_string()),
                ("start_date", start.format("%Y-%m-%d").to_string()),
                ("end_date", end.format("%Y-%m-%d").to_string()),
                ("hourly", HOURLY_VARIABLES.to_string()),
                ("timezone", "GMT".to_string()),
            ])
            .send()
            .await
            .context("Failed to send request to Open-Meteo API")?;

        if !response.status().is_success() {
            anyhow::bail!("Open-Meteo API error: {}", response.status());
        }

        let body: OpenMeteoResponse = response
            .json()
            .await
            .context("Failed to parse Open-Meteo response")?;

        let series = body.hourly.into_series()?;
        info!(
            points = series.len(),
            latitude = location.latitude,
            longitude = location.longitude,
            "Fetched historical weather"
        );

        Ok(series.resample(self.resample_step))
    }
}

impl Default for OpenMeteoClient {
    fn default() -> Self {
        Self::new(
            OPEN_METEO_ARCHIVE_URL,
            std::time::Duration::from_secs(30),
            Duration::minutes(30),
        )
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoClient {
    async fn historical(
        &self,
        location: &GeoLocation,
        start: NaiveDate,
        end: NaiveDate,
    ) -> WeatherSeries {
        match self.fetch(location, start, end).await {
            Ok(series) => series,
            Err(e) => {
                warn!(error = %e, "Weather unavailable, continuing without it");
                WeatherSeries::empty()
            }
        }
    }
}

// Open-Meteo API response structures
#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    hourly: OpenMeteoHourly,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoHourly {
    time: Vec<String>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m: Vec<Option<f64>>,
    #[serde(default)]
    dew_point_2m: Vec<Option<f64>>,
    #[serde(default)]
    precipitation: Vec<Option<f64>>,
    #[serde(default)]
    cloud_cover: Vec<Option<f64>>,
}

impl OpenMeteoHourly {
    fn into_series(self) -> Result<WeatherSeries> {
        let pick = |column: &[Option<f64>], i: usize| column.get(i).copied().flatten();

        let points = self
            .time
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
                    .with_context(|| format!("Invalid Open-Meteo timestamp '{}'", raw))?;
                Ok(WeatherPoint {
                    timestamp: naive.and_utc(),
                    temperature_c: pick(&self.temperature_2m, i),
                    humidity_percent: pick(&self.relative_humidity_2m, i),
                    dew_point_c: pick(&self.dew_point_2m, i),
                    precipitation_mm: pick(&self.precipitation, i),
                    cloud_cover_percent: pick(&self.cloud_cover, i),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(WeatherSeries::new(points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn point(hour: u32, temperature: f64) -> WeatherPoint {
        WeatherPoint {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap(),
            temperature_c: Some(temperature),
            humidity_percent: Some(50.0),
            dew_point_c: None,
            precipitation_mm: Some(0.0),
            cloud_cover_percent: Some(10.0),
        }
    }

    #[test]
    fn test_at_interpolates_between_points() {
        let series = WeatherSeries::new(vec![point(1, 20.0), point(0, 10.0)]);
        let mid = Utc.with_ymd_and_hms(2024, 3, 1, 0, 30, 0).unwrap();

        let p = series.at(mid).unwrap();
        assert_eq!(p.temperature_c, Some(15.0));
        assert_eq!(p.dew_point_c, None);
        assert!(series.at(mid - Duration::hours(1)).is_none());
        assert!(series.at(mid + Duration::hours(1)).is_none());
    }

    #[test]
    fn test_filled_at_repeats_latest_day_past_coverage() {
        let start = point(0, 0.0);
        let series = WeatherSeries::new(
            (0..48)
                .map(|h| WeatherPoint {
                    timestamp: start.timestamp + Duration::hours(h),
                    temperature_c: Some(h as f64),
                    ..start
                })
                .collect(),
        );
        let last = series.points()[47].timestamp;

        // Two hours past the end maps to the same time one day earlier.
        let p = series.filled_at(last + Duration::hours(2)).unwrap();
        assert_eq!(p.timestamp, last + Duration::hours(2));
        assert_eq!(p.temperature_c, Some(25.0));
        // Exactly one day past the end maps back onto the last point.
        assert_eq!(series.filled_at(last + Duration::days(1)).unwrap().temperature_c, Some(47.0));
        // Three days out still lands inside the latest covered day.
        assert_eq!(
            series.filled_at(last + Duration::days(2) + Duration::hours(6)).unwrap().temperature_c,
            Some(29.0)
        );
        // Inside coverage it matches `at`.
        assert_eq!(series.filled_at(last), series.at(last));
    }

    #[test]
    fn test_filled_at_short_series_holds_endpoints() {
        let series = WeatherSeries::new(vec![point(3, 12.0), point(4, 14.0)]);
        let before = Utc.with_ymd_and_hms(2024, 2, 28, 0, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

        assert_eq!(series.filled_at(before).unwrap().temperature_c, Some(12.0));
        assert_eq!(series.filled_at(after).unwrap().temperature_c, Some(14.0));
        assert!(WeatherSeries::empty().filled_at(after).is_none());
    }

    #[test]
    fn test_resample_to_half_hours() {
        let series = WeatherSeries::new(vec![point(0, 10.0), point(1, 20.0), point(2, 30.0)]);
        let resampled = series.resample(Duration::minutes(30));

        assert_eq!(resampled.len(), 5);
        assert_eq!(resampled.points()[1].temperature_c, Some(15.0));
        assert_eq!(resampled.points()[4].temperature_c, Some(30.0));
    }

    #[test]
    fn test_resample_empty() {
        assert!(WeatherSeries::empty().resample(Duration::minutes(30)).is_empty());
    }

    #[test]
    fn test_parse_hourly_payload() {
        let json = r#"{
            "hourly": {
                "time": ["2024-03-01T00:00", "2024-03-01T01:00"],
                "temperature_2m": [21.5, null],
                "relative_humidity_2m": [40, 42],
                "dew_point_2m": [7.1, 7.3],
                "precipitation": [0.0, 0.2],
                "cloud_cover": [12, 80]
            }
        }"#;
        let response: OpenMeteoResponse = serde_json::from_str(json).unwrap();
        let series = response.hourly.into_series().unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series.points()[0].temperature_c, Some(21.5));
        assert_eq!(series.points()[1].temperature_c, None);
        assert_eq!(series.points()[1].cloud_cover_percent, Some(80.0));
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_fetch_archive() {
        let client = OpenMeteoClient::default();
        let location = GeoLocation {
            latitude: 26.9124,
            longitude: 75.7873,
            name: Some("Jaipur".to_string()),
        };
        let day = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();

        let series = client.fetch(&location, day, day).await.unwrap();
        assert!(!series.is_empty());
    }
}
