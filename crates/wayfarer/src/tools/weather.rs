use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{http_client, string_arg};
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{ParameterType, Tool, ToolParameter};
use crate::registry::ToolHandler;

/// Destinations whose coordinates are known without a geocoding call
const KNOWN_PLACES: &[(&str, f64, f64)] = &[
    ("grand canyon", 36.1069, -112.1129),
    ("philadelphia", 39.9526, -75.1652),
    ("niagara falls", 43.0962, -79.0377),
    ("goa", 15.2993, 74.1240),
];

pub fn known_coordinates(destination: &str) -> Option<(f64, f64)> {
    let key = destination.trim().to_lowercase();
    KNOWN_PLACES
        .iter()
        .find(|(name, _, _)| *name == key)
        .map(|&(_, lat, lon)| (lat, lon))
}

#[derive(Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

pub struct WeatherTool {
    client: Client,
    forecast_url: String,
    geocode_url: String,
}

impl WeatherTool {
    pub fn new<F: Into<String>, G: Into<String>>(
        forecast_url: F,
        geocode_url: G,
    ) -> AgentResult<Self> {
        Ok(Self {
            client: http_client()?,
            forecast_url: forecast_url.into().trim_end_matches('/').to_string(),
            geocode_url: geocode_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn tool() -> Tool {
        Tool::new(
            "get_weather_info",
            "Fetch the daily weather forecast (maximum temperature and precipitation) for a destination on a date",
            vec![
                ToolParameter::required(
                    "destination",
                    ParameterType::String,
                    "The travel destination, e.g. Goa",
                ),
                ToolParameter::required(
                    "date",
                    ParameterType::String,
                    "The day of the forecast in YYYY-MM-DD format",
                ),
            ],
        )
    }

    /// Coordinates for a destination, from the known table first and the geocoder otherwise
    pub async fn coordinates(&self, destination: &str) -> AgentResult<(f64, f64)> {
        if let Some(coordinates) = known_coordinates(destination) {
            debug!(destination, "using known coordinates");
            return Ok(coordinates);
        }
        self.geocode(destination).await
    }

    async fn geocode(&self, destination: &str) -> AgentResult<(f64, f64)> {
        let url = format!("{}/search", self.geocode_url);
        let response = self
            .client
            .get(url)
            .query(&[("q", destination), ("format", "json"), ("limit", "1")])
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(destination, status = %response.status(), "geocoding failed");
            return Err(AgentError::ExecutionError(format!(
                "Geocoding request failed with status {}",
                response.status()
            )));
        }

        let places: Vec<Place> = response.json().await?;
        let place = places
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::GeocodeNotFound(destination.to_string()))?;

        let parse = |value: &str| {
            value.parse::<f64>().map_err(|_| {
                AgentError::ExecutionError(format!("Invalid coordinate from geocoder: {}", value))
            })
        };
        Ok((parse(&place.lat)?, parse(&place.lon)?))
    }

    /// The raw forecast payload for one day at a destination
    pub async fn forecast(&self, destination: &str, date: NaiveDate) -> AgentResult<String> {
        let (latitude, longitude) = self.coordinates(destination).await?;
        let day = date.format("%Y-%m-%d").to_string();
        info!(destination, latitude, longitude, date = %day, "fetching forecast");

        let url = format!("{}/v1/forecast", self.forecast_url);
        let response = self
            .client
            .get(url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("daily", "temperature_2m_max,precipitation_sum".to_string()),
                ("timezone", "auto".to_string()),
                ("start_date", day.clone()),
                ("end_date", day),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(destination, status = %status, "forecast request failed");
            return Err(AgentError::ExecutionError(format!(
                "Forecast request failed with status {}: {}",
                status, body
            )));
        }
        Ok(body)
    }
}

#[async_trait]
impl ToolHandler for WeatherTool {
    async fn call(&self, arguments: Value) -> AgentResult<Vec<Content>> {
        let destination = string_arg(&arguments, "destination")?;
        let date = string_arg(&arguments, "date")?;
        let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|_| {
            AgentError::InvalidParameters(format!(
                "The date '{}' must be in YYYY-MM-DD format",
                date
            ))
        })?;

        let forecast = self.forecast(destination, date).await?;
        Ok(vec![Content::text(forecast)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_known_coordinates_ignore_case() {
        assert_eq!(known_coordinates(" goa "), Some((15.2993, 74.1240)));
        assert_eq!(
            known_coordinates("Grand Canyon"),
            Some((36.1069, -112.1129))
        );
        assert_eq!(known_coordinates("Lisbon"), None);
    }

    #[tokio::test]
    async fn test_unknown_destination_is_geocoded() -> AgentResult<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "Lisbon"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"lat": "38.7077507", "lon": "-9.1365919"}])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("latitude", "38.7077507"))
            .and(query_param("longitude", "-9.1365919"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"daily\":{}}"))
            .expect(1)
            .mount(&server)
            .await;

        let tool = WeatherTool::new(server.uri(), server.uri())?;
        let result = tool
            .call(json!({"destination": "Lisbon", "date": "2024-12-20"}))
            .await?;
        assert_eq!(result, vec![Content::text("{\"daily\":{}}")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_geocode_miss_is_reported() -> AgentResult<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let tool = WeatherTool::new(server.uri(), server.uri())?;
        let err = tool
            .call(json!({"destination": "Atlantis", "date": "2024-12-20"}))
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::GeocodeNotFound("Atlantis".into()));
        Ok(())
    }

    #[tokio::test]
    async fn test_bad_date_is_rejected() -> AgentResult<()> {
        let tool = WeatherTool::new("http://127.0.0.1:9", "http://127.0.0.1:9")?;
        let err = tool
            .call(json!({"destination": "Goa", "date": "next friday"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidParameters(_)));
        Ok(())
    }
}
