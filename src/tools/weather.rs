use super::context::ToolContext;
use super::error::ToolError;
use rig::{completion::ToolDefinition, tool::Tool};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

#[derive(Debug, Deserialize, Serialize)]
pub struct WeatherArgs {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Clone)]
pub struct Weather {
    pub ctx: ToolContext,
}

#[derive(Deserialize)]
struct GeocodingResponse {
    results: Option<Vec<GeocodingResult>>,
}

#[derive(Debug, Deserialize)]
struct GeocodingResult {
    name: String,
    latitude: f64,
    longitude: f64,
    country: Option<String>,
    admin1: Option<String>,
}

impl GeocodingResult {
    fn label(&self) -> String {
        match self.admin1.as_ref().or(self.country.as_ref()) {
            Some(region) => format!("{}, {}", self.name, region),
            None => self.name.clone(),
        }
    }
}

impl Weather {
    async fn geocode(&self, location: &str) -> Result<GeocodingResult, ToolError> {
        let response = self
            .ctx
            .http
            .get(GEOCODING_URL)
            .query(&[
                ("name", location),
                ("count", "1"),
                ("language", "en"),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| ToolError::WeatherFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ToolError::WeatherFailed(format!(
                "Geocoding API error: HTTP {}",
                response.status()
            )));
        }

        let data: GeocodingResponse = response
            .json()
            .await
            .map_err(|e| ToolError::WeatherFailed(format!("Failed to parse geocoding: {}", e)))?;

        data.results
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| ToolError::WeatherFailed(format!("Location '{}' not found", location)))
    }

    async fn forecast(&self, latitude: f64, longitude: f64) -> Result<Value, ToolError> {
        let response = self
            .ctx
            .http
            .get(FORECAST_URL)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current", "temperature_2m,weather_code".to_string()),
                ("hourly", "temperature_2m".to_string()),
                ("daily", "sunrise,sunset".to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await
            .map_err(|e| ToolError::WeatherFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ToolError::WeatherFailed(format!(
                "Weather API error: HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ToolError::WeatherFailed(format!("Failed to parse weather: {}", e)))
    }

    async fn lookup(&self, args: &WeatherArgs) -> Result<Value, ToolError> {
        let (latitude, longitude, place) = match (args.latitude, args.longitude, &args.location) {
            (Some(lat), Some(lon), _) => (lat, lon, None),
            (_, _, Some(location)) if !location.trim().is_empty() => {
                let place = self.geocode(location.trim()).await?;
                (place.latitude, place.longitude, Some(place.label()))
            }
            _ => {
                return Err(ToolError::InvalidArgs(
                    "either latitude and longitude or a location is required".into(),
                ));
            }
        };

        let forecast = self.forecast(latitude, longitude).await?;
        Ok(summarize(forecast, place))
    }
}

/// Keeps the fields the model needs: current temperature, hourly
/// temperatures and sunrise/sunset.
fn summarize(forecast: Value, place: Option<String>) -> Value {
    let mut out = json!({
        "latitude": forecast["latitude"],
        "longitude": forecast["longitude"],
        "timezone": forecast["timezone"],
        "current": forecast["current"],
        "current_units": forecast["current_units"],
        "hourly": forecast["hourly"],
        "daily": forecast["daily"],
    });

    if let Some(code) = forecast["current"]["weather_code"].as_i64() {
        out["current"]["conditions"] = json!(weather_code_to_string(code));
    }
    if let Some(place) = place {
        out["location"] = json!(place);
    }
    out
}

impl Tool for Weather {
    const NAME: &'static str = "getWeather";

    type Error = ToolError;
    type Args = WeatherArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Get the current weather, hourly temperatures and sunrise/sunset at a location"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "latitude": {
                        "type": "number",
                        "description": "Latitude of the location"
                    },
                    "longitude": {
                        "type": "number",
                        "description": "Longitude of the location"
                    },
                    "location": {
                        "type": "string",
                        "description": "Place name (city, region, or country), used when coordinates are not given"
                    }
                }
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        self.ctx
            .traced(Self::NAME, &args, self.lookup(&args))
            .await
    }
}

fn weather_code_to_string(code: i64) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 | 48 => "Foggy",
        51 | 53 | 55 => "Drizzle",
        56 | 57 => "Freezing drizzle",
        61 | 63 | 65 => "Rain",
        66 | 67 => "Freezing rain",
        71 | 73 | 75 => "Snow",
        77 => "Snow grains",
        80..=82 => "Rain showers",
        85 | 86 => "Snow showers",
        95 => "Thunderstorm",
        96 | 99 => "Thunderstorm with hail",
        _ => "Unknown",
    }
}
