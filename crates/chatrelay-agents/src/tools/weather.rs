use async_trait::async_trait;
use chatrelay_common::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{Tool, ToolContext, ToolOutput, parse_args};

/// Current conditions from an Open-Meteo compatible forecast endpoint.
pub struct GetWeather {
    client: Client,
    endpoint: String,
}

impl GetWeather {
    pub fn new(client: Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

#[derive(Debug, Deserialize)]
struct WeatherArgs {
    latitude: f64,
    longitude: f64,
}

impl WeatherArgs {
    fn validate(self) -> Result<Self> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(Error::Tool("latitude must be between -90 and 90".to_string()));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(Error::Tool(
                "longitude must be between -180 and 180".to_string(),
            ));
        }
        Ok(self)
    }
}

#[async_trait]
impl Tool for GetWeather {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the current weather (temperature, wind, weather code) at a coordinate."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "latitude": { "type": "number", "minimum": -90, "maximum": 90 },
                "longitude": { "type": "number", "minimum": -180, "maximum": 180 }
            },
            "required": ["latitude", "longitude"]
        })
    }

    async fn execute(&self, _context: &ToolContext, args: serde_json::Value) -> Result<ToolOutput> {
        let args = parse_args::<WeatherArgs>(self.name(), args)?.validate()?;

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("latitude", args.latitude.to_string()),
                ("longitude", args.longitude.to_string()),
                (
                    "current",
                    "temperature_2m,wind_speed_10m,weather_code".to_string(),
                ),
            ])
            .send()
            .await
            .map_err(|e| Error::Tool(format!("weather request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Tool(format!(
                "weather API returned status {}",
                response.status().as_u16()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Tool(format!("invalid weather response: {e}")))?;

        Ok(ToolOutput::json(&json!({
            "latitude": args.latitude,
            "longitude": args.longitude,
            "current": body.get("current").cloned().unwrap_or_default(),
            "units": body.get("current_units").cloned().unwrap_or_default(),
        })))
    }
}
