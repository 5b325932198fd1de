use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Simulated,
    Mqtt,
}

/// One replayed appliance: where its dataset lives and how it is addressed
/// on the topic tree.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub name: String,
    pub device_id: String,
    pub data_file: PathBuf,
    pub topic_prefix: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub transport_mode: TransportMode,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_keepalive: Duration,
    pub qos: u8,
    pub connect_timeout: Duration,

    pub devices: Vec<DeviceConfig>,

    pub sample_size: Option<usize>,
    pub publish_rate: f64,
    pub report_every: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let transport_mode = match env_string("TRACKER_TRANSPORT", Some("simulated".to_string()))?
            .to_ascii_lowercase()
            .as_str()
        {
            "simulated" | "sim" => TransportMode::Simulated,
            "mqtt" | "networked" => TransportMode::Mqtt,
            other => bail!("invalid TRACKER_TRANSPORT {other:?} (expected simulated or mqtt)"),
        };

        let mqtt_url = env_string("TRACKER_MQTT_URL", Some("mqtt://127.0.0.1:1883".to_string()))?;
        let url = Url::parse(&mqtt_url).context("invalid TRACKER_MQTT_URL")?;
        let mqtt_host = url
            .host_str()
            .ok_or_else(|| anyhow!("TRACKER_MQTT_URL missing host"))?
            .to_string();
        let mqtt_port = url.port().unwrap_or(1883);
        let mqtt_username = env_optional("TRACKER_MQTT_USERNAME");
        let mqtt_password = env_optional("TRACKER_MQTT_PASSWORD");
        let mqtt_client_id = env_string(
            "TRACKER_MQTT_CLIENT_ID",
            Some(format!("appliance-tracker-{}", std::process::id())),
        )?;
        let mqtt_keepalive =
            Duration::from_secs(env_u64("TRACKER_MQTT_KEEPALIVE_SECS", Some(60))?);
        let qos = parse_qos_level(env_u64("TRACKER_MQTT_QOS", Some(0))?)?;
        let connect_timeout =
            Duration::from_secs(env_u64("TRACKER_CONNECT_TIMEOUT_SECS", Some(5))?);

        let topic_prefix =
            env_string("TRACKER_TOPIC_PREFIX", Some("home/appliance".to_string()))?;
        let data_dir = PathBuf::from(env_string("TRACKER_DATA_DIR", Some("data".to_string()))?);

        let device_ids = env_string(
            "TRACKER_DEVICES",
            Some("fridge_207,vacuum_254".to_string()),
        )?;
        let devices = parse_devices(&device_ids, &data_dir, &topic_prefix)?;

        let sample_size = match env_optional("TRACKER_SAMPLE_SIZE") {
            Some(raw) => Some(
                raw.parse::<usize>()
                    .context("invalid TRACKER_SAMPLE_SIZE")?,
            ),
            None => None,
        };

        let publish_rate = env_f64("TRACKER_PUBLISH_RATE", Some(10_000.0))?;
        if !(publish_rate > 0.0) {
            bail!("TRACKER_PUBLISH_RATE must be > 0 (got {publish_rate})");
        }

        let report_every = env_u64("TRACKER_REPORT_EVERY", Some(100))?.max(1) as usize;

        Ok(Self {
            transport_mode,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            mqtt_keepalive,
            qos,
            connect_timeout,
            devices,
            sample_size,
            publish_rate,
            report_every,
        })
    }
}

fn parse_devices(raw: &str, data_dir: &std::path::Path, topic_prefix: &str) -> Result<Vec<DeviceConfig>> {
    let devices: Vec<DeviceConfig> = raw
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| DeviceConfig {
            name: id.to_string(),
            device_id: id.to_string(),
            data_file: data_dir.join(format!("{id}.csv")),
            topic_prefix: topic_prefix.to_string(),
        })
        .collect();
    if devices.is_empty() {
        bail!("TRACKER_DEVICES lists no devices");
    }
    Ok(devices)
}

pub fn parse_qos_level(level: u64) -> Result<u8> {
    match level {
        0 | 1 | 2 => Ok(level as u8),
        other => bail!("invalid QoS level {other} (expected 0, 1 or 2)"),
    }
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_f64(key: &str, default: Option<f64>) -> Result<f64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<f64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
