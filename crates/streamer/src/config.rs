//! Streamer configuration management
//!
//! Configuration is read only from an explicitly given TOML file; without one
//! the built-in defaults describe the lighting controller this tool was made
//! for. Nothing is ever written back.

use crate::frame::{Frame, FrameBuilder};
use crate::session::SessionPlan;
use anyhow::{Context, Result, anyhow};
use common::{DeviceMatchCriteria, parse_usb_id};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamerConfig {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub frame: FrameSettings,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// trace, debug, info, warn or error; `RUST_LOG` takes precedence
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

/// Which device to acquire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Vendor id as a hex string, e.g. "0x15e4"
    #[serde(default = "DeviceSettings::default_vendor_id")]
    pub vendor_id: String,
    /// Product id as a hex string, e.g. "0x0053"
    #[serde(default = "DeviceSettings::default_product_id")]
    pub product_id: String,
    /// Configuration index passed to SetConfiguration
    #[serde(default = "DeviceSettings::default_configuration")]
    pub configuration: u8,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            product_id: Self::default_product_id(),
            configuration: Self::default_configuration(),
        }
    }
}

impl DeviceSettings {
    fn default_vendor_id() -> String {
        "0x15e4".to_string()
    }

    fn default_product_id() -> String {
        "0x0053".to_string()
    }

    fn default_configuration() -> u8 {
        1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// 1-based pipe index frames are written to
    #[serde(default = "StreamSettings::default_pipe")]
    pub pipe: u8,
    #[serde(default = "StreamSettings::default_frame_count")]
    pub frame_count: u32,
    /// Pause after each frame, e.g. "25ms"
    #[serde(default = "StreamSettings::default_interval", with = "duration_serde")]
    pub interval: Duration,
    /// Acquire and list pipes, then stop
    #[serde(default)]
    pub probe_only: bool,
    /// Pipes that get one diagnostic write before streaming
    #[serde(default)]
    pub probe_pipes: Vec<u8>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            pipe: Self::default_pipe(),
            frame_count: Self::default_frame_count(),
            interval: Self::default_interval(),
            probe_only: false,
            probe_pipes: Vec::new(),
        }
    }
}

impl StreamSettings {
    fn default_pipe() -> u8 {
        1
    }

    fn default_frame_count() -> u32 {
        200
    }

    fn default_interval() -> Duration {
        Duration::from_millis(25)
    }
}

/// Frame contents
///
/// # Example Configuration
/// ```toml
/// [frame]
/// length = 514
/// fill = 0
///
/// [[frame.set]]
/// offset = 0
/// value = 255
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSettings {
    #[serde(default = "FrameSettings::default_length")]
    pub length: usize,
    #[serde(default)]
    pub fill: u8,
    /// Bytes patched over the fill value
    #[serde(default = "FrameSettings::default_set")]
    pub set: Vec<ByteSetting>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteSetting {
    pub offset: usize,
    pub value: u8,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            length: Self::default_length(),
            fill: 0,
            set: Self::default_set(),
        }
    }
}

impl FrameSettings {
    fn default_length() -> usize {
        514
    }

    /// Lighting test pattern
    fn default_set() -> Vec<ByteSetting> {
        [(0, 255), (1, 225), (4, 255), (512, 255), (513, 255)]
            .into_iter()
            .map(|(offset, value)| ByteSetting { offset, value })
            .collect()
    }

    pub fn build(&self) -> Frame {
        let mut builder = FrameBuilder::new(self.length, self.fill);
        for byte in &self.set {
            builder.set(byte.offset, byte.value);
        }
        builder.build()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Timeout for a single pipe write
    #[serde(default = "UsbSettings::default_write_timeout", with = "duration_serde")]
    pub write_timeout: Duration,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            write_timeout: Self::default_write_timeout(),
        }
    }
}

impl UsbSettings {
    fn default_write_timeout() -> Duration {
        Duration::from_secs(1)
    }
}

/// Serde support for durations written as "25ms", "1s" or "1m30s"
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Parse a duration string like "25ms", "1s", "2m" or "1m30s"
    ///
    /// A trailing bare number is taken as milliseconds.
    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim().to_lowercase();
        if s.is_empty() {
            return Err("Empty duration".to_string());
        }

        let mut total = Duration::ZERO;
        let mut rest = s.as_str();
        while !rest.is_empty() {
            let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
            if digits == 0 {
                return Err(format!("Invalid duration format: {}", s));
            }
            let num: u64 = rest[..digits]
                .parse()
                .map_err(|_| format!("Invalid number in duration: {}", &rest[..digits]))?;
            rest = &rest[digits..];

            let unit_len = rest.len()
                - rest
                    .trim_start_matches(|c: char| c.is_ascii_alphabetic())
                    .len();
            let unit = &rest[..unit_len];
            rest = &rest[unit_len..];

            let millis_per_unit: u64 = match unit {
                "h" => 3_600_000,
                "m" => 60_000,
                "s" => 1_000,
                "ms" | "" => 1,
                other => return Err(format!("Invalid duration unit: {}", other)),
            };
            let part = num
                .checked_mul(millis_per_unit)
                .map(Duration::from_millis)
                .ok_or_else(|| format!("Duration too large: {}", s))?;
            total = total
                .checked_add(part)
                .ok_or_else(|| format!("Duration too large: {}", s))?;
        }

        Ok(total)
    }

    pub fn format_duration(d: Duration) -> String {
        let millis = d.as_millis();
        if millis % 1000 != 0 || millis == 0 {
            format!("{}ms", millis)
        } else {
            format!("{}s", millis / 1000)
        }
    }
}

impl StreamerConfig {
    /// Load configuration from the specified path
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: StreamerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Load from a user-supplied path, expanding a leading `~`
    pub fn load_from_arg(path: &str) -> Result<Self> {
        let expanded = PathBuf::from(shellexpand::tilde(path).as_ref());
        Self::load(&expanded)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        self.criteria()?;

        if self.stream.pipe == 0 {
            return Err(anyhow!("Pipe index 0 is the default control pipe, use 1 or higher"));
        }
        if self.stream.probe_pipes.contains(&0) {
            return Err(anyhow!("probe_pipes must not contain pipe 0"));
        }
        if self.stream.interval.is_zero() {
            return Err(anyhow!("Stream interval must be greater than 0"));
        }
        if self.usb.write_timeout.is_zero() {
            return Err(anyhow!("USB write timeout must be greater than 0"));
        }

        if self.frame.length == 0 {
            return Err(anyhow!("Frame length must be greater than 0"));
        }
        for byte in &self.frame.set {
            if byte.offset >= self.frame.length {
                return Err(anyhow!(
                    "Frame byte offset {} is outside a {}-byte frame",
                    byte.offset,
                    self.frame.length
                ));
            }
        }

        Ok(())
    }

    /// Device ids parsed from their hex strings
    pub fn criteria(&self) -> Result<DeviceMatchCriteria> {
        let vendor_id = parse_usb_id(&self.device.vendor_id).context("Invalid vendor_id")?;
        let product_id = parse_usb_id(&self.device.product_id).context("Invalid product_id")?;
        Ok(DeviceMatchCriteria::new(vendor_id, product_id))
    }

    /// Everything the session needs, checked first
    pub fn to_plan(&self) -> Result<SessionPlan> {
        self.validate()?;

        Ok(SessionPlan {
            criteria: self.criteria()?,
            configuration: self.device.configuration,
            pipe: self.stream.pipe,
            frame: self.frame.build(),
            frame_count: self.stream.frame_count,
            interval: self.stream.interval,
            probe_pipes: self.stream.probe_pipes.clone(),
            probe_only: self.stream.probe_only,
        })
    }
}
