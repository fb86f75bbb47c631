use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::StatusCode;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rollcall", version, about = "Rollcall attendance CLI")]
struct Cli {
    /// Base URL of the rollcalld service
    #[arg(long, env = "ROLLCALL_URL", default_value = "http://127.0.0.1:8000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit an image for recognition, as the kiosk camera would
    Recognize {
        /// JPEG or PNG file
        image: PathBuf,
    },
    /// Show daemon status
    Status,
    /// List today's attendees
    Today,
    /// List every day with attendance, newest first
    Dates,
    /// Every day since the first attendance, flagged by whether anyone attended
    Calendar,
    /// List attendees for one day
    Day {
        /// Date as YYYY-MM-DD
        date: String,
    },
    /// Monthly totals and per-day attendees
    Month { year: i32, month: u32 },
}

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{path}", self.base);
        tracing::debug!(%url, "GET");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("rollcalld not reachable at {}", self.base))?;
        let status = response.status();
        let text = response.text().await.context("reading response")?;
        if !status.is_success() {
            bail!("{status}: {}", error_message(&text));
        }
        serde_json::from_str(&text).with_context(|| format!("decoding response from {path}"))
    }

    /// Recognition answers carry a body for every status, so it is returned as is.
    async fn recognize(&self, image: Vec<u8>) -> Result<(StatusCode, Value)> {
        let url = format!("{}/recognize", self.base);
        tracing::debug!(%url, bytes = image.len(), "POST");
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image)
            .send()
            .await
            .with_context(|| format!("rollcalld not reachable at {}", self.base))?;
        let status = response.status();
        let text = response.text().await.context("reading response")?;
        match serde_json::from_str(&text) {
            Ok(body) => Ok((status, body)),
            Err(_) => bail!("{status}: {}", error_message(&text)),
        }
    }
}

/// Message of an error response: the JSON `error` field when there is one,
/// otherwise the raw body (axum's own rejections are plain text).
fn error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(json) => json["error"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| json.to_string()),
        Err(_) if body.trim().is_empty() => "request failed".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.url)?;

    match cli.command {
        Commands::Recognize { image } => {
            let bytes = std::fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
            let (status, body) = client.recognize(bytes).await?;
            let message = body["message"].as_str().unwrap_or_default();
            let cue = body["audio_track"].as_str().unwrap_or("-");
            println!("{} {message} (cue {cue})", status.as_u16());
            if let Some(url) = body["image_url"].as_str() {
                println!("capture: {}{url}", client.base);
            }
        }
        Commands::Status => print_json(&client.get("/api/status").await?)?,
        Commands::Today => {
            let body = client.get("/api/today-attendance").await?;
            let attendees = body["active_interns"].as_array().cloned().unwrap_or_default();
            println!("{} attended on {}", attendees.len(), body["date"].as_str().unwrap_or("today"));
            for a in &attendees {
                println!(
                    "  {}  {:<24} {}",
                    a["recognition_time"].as_str().unwrap_or_default(),
                    a["name"].as_str().unwrap_or_default(),
                    a["jobdesk"].as_str().unwrap_or_default()
                );
            }
        }
        Commands::Dates => {
            let body = client.get("/api/attendance-dates").await?;
            for date in body["dates"].as_array().into_iter().flatten() {
                println!("{}", date.as_str().unwrap_or_default());
            }
        }
        Commands::Calendar => print_json(&client.get("/api/attendance-dates-with-range").await?)?,
        Commands::Day { date } => print_json(&client.get(&format!("/api/attendance-by-date/{date}")).await?)?,
        Commands::Month { year, month } => {
            print_json(&client.get(&format!("/api/monthly-attendance/{year}/{month}")).await?)?
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_json_field() {
        assert_eq!(error_message(r#"{"error": "invalid month \"x\""}"#), r#"invalid month "x""#);
    }

    #[test]
    fn test_error_message_falls_back_to_text() {
        assert_eq!(
            error_message("Invalid URL: Cannot parse `x` to a `u32`\n"),
            "Invalid URL: Cannot parse `x` to a `u32`"
        );
        assert_eq!(error_message("  "), "request failed");
        assert_eq!(error_message(r#"{"detail": 1}"#), r#"{"detail":1}"#);
    }
}
