//! Agrotel CLI
//!
//! Command-line client for an Agrotel server:
//! - Register devices and submit readings
//! - Inspect devices, history and statistics
//! - Simulate a field sensor for testing

use anyhow::{bail, Context};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use rand::Rng;
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "agrotel-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Client for the Agrotel telemetry server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// API server URL
    #[arg(long, default_value = "http://localhost:8000", global = true, env = "AGROTEL_URL")]
    pub api_url: String,

    /// Admin token for device management commands
    #[arg(long, global = true, env = "AGROTEL_ADMIN_TOKEN")]
    pub admin_token: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register a device (prints the API key when it is new)
    Register {
        device_id: String,
        device_name: String,
        /// soil, temperature, humidity or multi
        #[arg(short = 't', long)]
        device_type: Option<String>,
        #[arg(short, long)]
        location: Option<String>,
    },

    /// Submit one reading
    Submit {
        device_id: String,
        #[arg(short = 'k', long, env = "AGROTEL_API_KEY")]
        api_key: String,
        #[arg(long)]
        temperature: Option<f64>,
        #[arg(long)]
        humidity: Option<f64>,
        #[arg(long)]
        soil_moisture: Option<f64>,
        #[arg(long)]
        soil_raw: Option<i64>,
        #[arg(long)]
        battery_level: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        signal_strength: Option<i64>,
    },

    /// List devices
    Devices {
        /// Free-text search over id, name, location, type and status
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show reading history for a device
    Readings {
        device_id: String,
        /// Time range (e.g., 6h, 7d, 4w)
        #[arg(short = 'L', long)]
        last: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show statistics for a device
    Stats {
        device_id: String,
        /// Restrict to the last N hours
        #[arg(long)]
        hours: Option<u32>,
    },

    /// Issue a new API key for a device (admin)
    RotateKey { device_id: String },

    /// Show server health
    Status,

    /// Send randomized readings on an interval, like a field unit would
    Simulate {
        #[arg(default_value = "ESP32-001")]
        device_id: String,
        #[arg(long, default_value = "Soil Sensor 1")]
        device_name: String,
        #[arg(long, default_value = "Garden A")]
        location: String,
        /// Key of an already registered device
        #[arg(short = 'k', long, env = "AGROTEL_API_KEY")]
        api_key: Option<String>,
        /// Seconds between readings
        #[arg(short, long, default_value = "5")]
        interval: u64,
        /// Stop after this many readings (default: run until Ctrl+C)
        #[arg(short, long)]
        count: Option<u64>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let api = |path: &str| format!("{}/api/v1{}", cli.api_url.trim_end_matches('/'), path);

    match &cli.command {
        Commands::Register {
            device_id,
            device_name,
            device_type,
            location,
        } => {
            let body = json!({
                "device_id": device_id,
                "device_name": device_name,
                "device_type": device_type,
                "location": location,
            });

            let response = client.post(api("/register")).json(&body).send().await?;
            let data = expect_success(response).await?;

            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else if data["created"].as_bool().unwrap_or(false) {
                println!("Registered {}", device_id);
                println!("API key: {}", data["api_key"].as_str().unwrap_or("-"));
                println!("Store this key on the device; it is not shown again.");
            } else {
                println!("Updated {} (existing device, key unchanged)", device_id);
            }
        }

        Commands::Submit {
            device_id,
            api_key,
            temperature,
            humidity,
            soil_moisture,
            soil_raw,
            battery_level,
            signal_strength,
        } => {
            let body = json!({
                "device_id": device_id,
                "api_key": api_key,
                "temperature": temperature,
                "humidity": humidity,
                "soil_moisture": soil_moisture,
                "soil_raw": soil_raw,
                "battery_level": battery_level,
                "signal_strength": signal_strength,
            });

            let response = client.post(api("/submit")).json(&body).send().await?;
            let data = expect_success(response).await?;

            println!(
                "Reading {} stored at {}",
                data["reading_id"],
                data["timestamp"].as_str().unwrap_or("-")
            );
        }

        Commands::Devices {
            search,
            status,
            limit,
        } => {
            let mut request = client
                .get(api("/devices"))
                .query(&[("limit", limit.to_string())]);
            if let Some(search) = search {
                request = request.query(&[("search", search)]);
            }
            if let Some(status) = status {
                request = request.query(&[("status", status)]);
            }

            let data = expect_success(request.send().await?).await?;

            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&data)?);
                return Ok(());
            }

            let devices = data["devices"].as_array().cloned().unwrap_or_default();
            if devices.is_empty() {
                println!("No devices registered yet.");
                println!();
                println!("Register one with:");
                println!("  agrotel-cli register ESP32-001 \"Soil Sensor 1\"");
                return Ok(());
            }

            println!(
                "{:<16} {:<22} {:<12} {:<12} {:<16} {}",
                "ID", "Name", "Type", "Status", "Location", "Last seen"
            );
            println!("{}", "-".repeat(96));
            for device in &devices {
                println!(
                    "{:<16} {:<22} {:<12} {:<12} {:<16} {}",
                    device["device_id"].as_str().unwrap_or("-"),
                    device["device_name"].as_str().unwrap_or("-"),
                    device["device_type"].as_str().unwrap_or("-"),
                    device["status"].as_str().unwrap_or("-"),
                    device["location"].as_str().unwrap_or("-"),
                    device["last_seen"].as_str().unwrap_or("never"),
                );
            }
            println!();
            println!("{} of {} devices", devices.len(), data["total"]);
        }

        Commands::Readings {
            device_id,
            last,
            limit,
        } => {
            let mut request = client
                .get(api(&format!("/devices/{}/readings", device_id)))
                .query(&[("limit", limit.to_string())]);
            if let Some(last) = last {
                let since = Utc::now() - parse_duration(last)?;
                request = request.query(&[("since", since.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))]);
            }

            let data = expect_success(request.send().await?).await?;

            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&data)?);
                return Ok(());
            }

            print_readings(&data);
        }

        Commands::Stats { device_id, hours } => {
            let mut request = client.get(api(&format!("/devices/{}/stats", device_id)));
            if let Some(hours) = hours {
                request = request.query(&[("hours", hours.to_string())]);
            }

            let data = expect_success(request.send().await?).await?;

            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&data)?);
                return Ok(());
            }

            println!("Device: {}", device_id);
            println!("Readings: {}", data["reading_count"]);
            println!("First: {}", data["first_reading"].as_str().unwrap_or("-"));
            println!("Last:  {}", data["last_reading"].as_str().unwrap_or("-"));

            if let Some(fields) = data["fields"].as_object() {
                println!();
                println!("{:<16} {:>8} {:>10} {:>10} {:>10}", "Channel", "Count", "Min", "Max", "Avg");
                println!("{}", "-".repeat(58));
                for (name, summary) in fields {
                    println!(
                        "{:<16} {:>8} {:>10.2} {:>10.2} {:>10.2}",
                        name,
                        summary["count"].as_u64().unwrap_or(0),
                        summary["min"].as_f64().unwrap_or(f64::NAN),
                        summary["max"].as_f64().unwrap_or(f64::NAN),
                        summary["avg"].as_f64().unwrap_or(f64::NAN),
                    );
                }
            }
        }

        Commands::RotateKey { device_id } => {
            let mut request = client.post(api(&format!("/devices/{}/rotate-key", device_id)));
            if let Some(token) = &cli.admin_token {
                request = request.bearer_auth(token);
            }

            let data = expect_success(request.send().await?).await?;
            println!("New API key for {}: {}", device_id, data["api_key"].as_str().unwrap_or("-"));
            println!("The previous key no longer works.");
        }

        Commands::Status => {
            let url = format!("{}/health", cli.api_url.trim_end_matches('/'));
            let response = client.get(&url).send().await;

            match response {
                Ok(resp) => {
                    let ok = resp.status().is_success();
                    let health: Value = resp.json().await.unwrap_or(Value::Null);

                    println!("Agrotel v{}", env!("CARGO_PKG_VERSION"));
                    println!();
                    println!("API Status: {}", health["status"].as_str().unwrap_or("unknown"));
                    println!("Devices:    {}", health["devices"]);
                    println!("Readings:   {}", health["readings"]);
                    println!("Live subscriptions: {}", health["hub"]["subscriptions"]);

                    if let Some(uptime) = health["uptime_seconds"].as_u64() {
                        println!("Uptime:     {}", format_duration(uptime));
                    }
                    if !ok {
                        std::process::exit(1);
                    }
                }
                Err(e) => {
                    eprintln!("Cannot connect to Agrotel API at {}", cli.api_url);
                    eprintln!("Error: {}", e);
                    eprintln!();
                    eprintln!("Make sure the server is running:");
                    eprintln!("  cargo run --bin agrotel");
                    std::process::exit(1);
                }
            }
        }

        Commands::Simulate {
            device_id,
            device_name,
            location,
            api_key,
            interval,
            count,
        } => {
            let api_key = match api_key {
                Some(key) => key.clone(),
                None => {
                    let body = json!({
                        "device_id": device_id,
                        "device_name": device_name,
                        "device_type": "multi",
                        "location": location,
                    });
                    let response = client.post(api("/register")).json(&body).send().await?;
                    let data = expect_success(response).await?;
                    match data["api_key"].as_str() {
                        Some(key) => {
                            println!("Registered {} (API key: {})", device_id, key);
                            key.to_string()
                        }
                        None => bail!(
                            "{} is already registered; pass its key with --api-key",
                            device_id
                        ),
                    }
                }
            };

            println!(
                "Sending readings for {} every {}s (Ctrl+C to stop)",
                device_id, interval
            );

            let mut ticker = tokio::time::interval(std::time::Duration::from_secs((*interval).max(1)));
            let mut sent = 0u64;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tokio::signal::ctrl_c() => {
                        println!();
                        break;
                    }
                }

                let mut body = simulated_reading(&mut rand::thread_rng());
                body["device_id"] = json!(device_id);
                body["api_key"] = json!(api_key);

                match client.post(api("/submit")).json(&body).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        let data: Value = resp.json().await.unwrap_or(Value::Null);
                        println!(
                            "[{}] reading {} temp={} hum={} soil={}% raw={}",
                            Utc::now().format("%H:%M:%S"),
                            data["reading_id"],
                            body["temperature"],
                            body["humidity"],
                            body["soil_moisture"],
                            body["soil_raw"],
                        );
                    }
                    Ok(resp) => {
                        let status = resp.status();
                        let text = resp.text().await.unwrap_or_default();
                        eprintln!("Rejected ({}): {}", status, text);
                    }
                    Err(e) => eprintln!("Send failed: {}", e),
                }

                sent += 1;
                if count.is_some_and(|c| sent >= c) {
                    break;
                }
            }

            println!("Sent {} readings", sent);
        }

        Commands::Config { output } => {
            let config = agrotel::config::generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(path, &config)
                        .with_context(|| format!("writing {:?}", path))?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

/// Return the JSON body, or fail with the server's error message
async fn expect_success(response: reqwest::Response) -> anyhow::Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    if !status.is_success() {
        let message = body["message"].as_str().unwrap_or("no details");
        bail!("request failed ({}): {}", status, message);
    }
    Ok(body)
}

/// Channel values in the ranges a healthy field unit reports
fn simulated_reading(rng: &mut impl Rng) -> Value {
    let temperature: f64 = ((20.0 + rng.gen_range(-5.0..15.0)) * 10.0_f64).round() / 10.0;
    let humidity: f64 = ((40.0 + rng.gen_range(0.0..40.0)) * 10.0_f64).round() / 10.0;
    let soil_percent: i64 = rng.gen_range(30..=80);
    // Capacitive probe: 4095 dry, about 1500 in saturated soil
    let soil_raw = 4095 - soil_percent * 2595 / 100;

    json!({
        "temperature": temperature,
        "humidity": humidity,
        "soil_moisture": soil_percent as f64,
        "soil_raw": soil_raw,
        "battery_level": 100.0,
        "signal_strength": rng.gen_range(15..=31),
    })
}

fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim().to_lowercase();

    if let Some(hours) = s.strip_suffix('h') {
        Ok(Duration::hours(hours.parse()?))
    } else if let Some(days) = s.strip_suffix('d') {
        Ok(Duration::days(days.parse()?))
    } else if let Some(weeks) = s.strip_suffix('w') {
        Ok(Duration::weeks(weeks.parse()?))
    } else {
        bail!("Invalid duration format: {}. Use: 6h, 7d, 4w", s)
    }
}

fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else if seconds < 86400 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else {
        format!("{}d {}h", seconds / 86400, (seconds % 86400) / 3600)
    }
}

const CHANNELS: [&str; 6] = [
    "temperature",
    "humidity",
    "soil_moisture",
    "soil_raw",
    "battery_level",
    "signal_strength",
];

fn print_readings(data: &Value) {
    let readings = match data["readings"].as_array() {
        Some(r) if !r.is_empty() => r,
        _ => {
            println!("No readings for the selected range");
            return;
        }
    };

    println!(
        "{} ({})",
        data["device_name"].as_str().unwrap_or("-"),
        data["device_id"].as_str().unwrap_or("-")
    );
    println!();

    print!("{:<21}", "Timestamp");
    for channel in CHANNELS {
        print!(" | {:<15}", channel);
    }
    println!();
    println!("{}", "-".repeat(21 + CHANNELS.len() * 18));

    for reading in readings {
        let ts = reading["timestamp"]
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());

        print!("{:<21}", ts);
        for channel in CHANNELS {
            let val = reading[channel]
                .as_f64()
                .map(|v| format!("{:.1}", v))
                .unwrap_or_else(|| "-".to_string());
            print!(" | {:<15}", val);
        }
        println!();
    }
}
