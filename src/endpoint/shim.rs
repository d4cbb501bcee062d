//! Shim Control
//!
//! Turns `!shim`/`!start`/`!stop` commands into per-channel setpoints and
//! hands them to a device driver.
//!
//! A `!shim` tile shorter than the channel count is repeated across all
//! channels: `!shim 100 -200` on 4 channels gives `[0.1, -0.2, 0.1, -0.2]`.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{HubError, Result};
use crate::protocol::is_local;

use super::local::LocalCommand;

/// Largest current magnitude (amps) a driver may put on a channel
pub const MAX_CURRENT_AMPS: f64 = 2.0;

/// Current-application device
pub trait ShimDriver {
    /// Deliver one setpoint per channel (amps). The controller passes
    /// in-range values only, and all zeros with `enable = false`.
    fn apply(&mut self, setpoints: &[f64], enable: bool) -> Result<()>;

    /// Drive every channel to zero output
    fn reset(&mut self) -> Result<()>;

    /// Release the device
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Replace any out-of-range current with zero
pub fn clamp_to_safe_limit(setpoints: &[f64]) -> Vec<f64> {
    setpoints
        .iter()
        .enumerate()
        .map(|(channel, &current)| {
            if current.abs() > MAX_CURRENT_AMPS {
                tracing::warn!(
                    "Channel {}: {:.4} A exceeds +/-{} A, setting to 0",
                    channel,
                    current,
                    MAX_CURRENT_AMPS
                );
                0.0
            } else {
                current
            }
        })
        .collect()
}

// =============================================================================
// Drivers
// =============================================================================

/// Writes one line of space-separated currents per apply, for a plugin that
/// polls the file
pub struct FileShimDriver {
    writer: BufWriter<File>,
    /// Channel count of the last line written
    width: usize,
}

impl FileShimDriver {
    /// Create (truncating) the shim file
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| HubError::Device(format!("Cannot open {}: {}", path.display(), e)))?;
        Ok(Self {
            writer: BufWriter::new(file),
            width: 0,
        })
    }

    fn write_line(&mut self, currents: &[f64]) -> Result<()> {
        let line: Vec<String> = currents.iter().map(|c| format!("{:.4}", c)).collect();
        writeln!(self.writer, "{}", line.join(" "))?;
        self.writer.flush()?;
        self.width = currents.len();
        Ok(())
    }
}

impl ShimDriver for FileShimDriver {
    fn apply(&mut self, setpoints: &[f64], _enable: bool) -> Result<()> {
        self.write_line(setpoints)
    }

    fn reset(&mut self) -> Result<()> {
        if self.width == 0 {
            return Ok(());
        }
        let zeros = vec![0.0; self.width];
        self.write_line(&zeros)
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps every delivery in memory; for dry runs and tests
#[derive(Debug, Default)]
pub struct RecordingShimDriver {
    pub deliveries: Vec<(Vec<f64>, bool)>,
    pub resets: usize,
}

impl ShimDriver for RecordingShimDriver {
    fn apply(&mut self, setpoints: &[f64], enable: bool) -> Result<()> {
        self.deliveries.push((setpoints.to_vec(), enable));
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.resets += 1;
        Ok(())
    }
}

// =============================================================================
// Controller
// =============================================================================

/// What handling an incoming text did
#[derive(Debug, Clone, PartialEq)]
pub enum ShimEvent {
    /// New setpoints stored (amps, tiled); delivered as zeros while disabled
    Applied(Vec<f64>),
    Enabled,
    Disabled,
    /// The hub is shutting down
    Disconnect,
    /// Not a local command; plain result text for display
    Result(String),
}

pub struct ShimController<D> {
    driver: D,
    channel_count: usize,
    enabled: bool,
    currents: Vec<f64>,
}

impl<D: ShimDriver> ShimController<D> {
    /// Shimming starts disabled with all channels at zero
    pub fn new(driver: D, channel_count: usize) -> Self {
        Self {
            driver,
            channel_count,
            enabled: false,
            currents: vec![0.0; channel_count],
        }
    }

    /// Handle the text of an incoming relay or reply
    pub fn handle_text(&mut self, text: &str) -> Result<ShimEvent> {
        if !is_local(text) {
            return Ok(ShimEvent::Result(text.to_string()));
        }
        let command = LocalCommand::parse(text)?;
        self.execute(&command)
    }

    pub fn execute(&mut self, command: &LocalCommand) -> Result<ShimEvent> {
        match command {
            LocalCommand::Shim(milliamps) => {
                self.currents = tile(milliamps, self.channel_count);
                self.apply()?;
                Ok(ShimEvent::Applied(self.currents.clone()))
            }
            LocalCommand::Start => {
                self.enabled = true;
                self.apply()?;
                Ok(ShimEvent::Enabled)
            }
            LocalCommand::Stop => {
                self.enabled = false;
                self.driver.reset()?;
                Ok(ShimEvent::Disabled)
            }
            LocalCommand::ServerDisconnect => Ok(ShimEvent::Disconnect),
        }
    }

    /// Deliver the stored setpoints: clamped while enabled, zeros otherwise
    fn apply(&mut self) -> Result<()> {
        tracing::debug!(
            "Applying {} channel(s), shimming {}",
            self.currents.len(),
            if self.enabled { "enabled" } else { "disabled" }
        );
        let delivered = if self.enabled {
            clamp_to_safe_limit(&self.currents)
        } else {
            vec![0.0; self.currents.len()]
        };
        self.driver.apply(&delivered, self.enabled)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn currents(&self) -> &[f64] {
        &self.currents
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Close the driver and hand it back
    pub fn into_driver(mut self) -> Result<D> {
        self.driver.close()?;
        Ok(self.driver)
    }
}

/// Repeat a milliamp tile across `channels`, converting to amps
fn tile(milliamps: &[i64], channels: usize) -> Vec<f64> {
    if milliamps.is_empty() {
        return vec![0.0; channels];
    }
    (0..channels)
        .map(|idx| milliamps[idx % milliamps.len()] as f64 / 1000.0)
        .collect()
}
