//! Driver configuration.

use serde::{Deserialize, Serialize};

use crate::batch::HUNK_LEN;
use crate::board::{AdcChip, BoardVariant, DacChip};
use crate::error::{GertError, Result};

/// GPIO setup expected by the host before the driver touches the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinSafetyMode {
    /// Pins already configured by a wiringPi style host setup
    #[default]
    WiringPi,
    /// Driver assumes raw pins and configures chip selects itself
    Raw,
}

/// Top-level driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Board personality (channel counts, timing floors, chip selects)
    pub board_variant: BoardVariant,
    pub adc_chip: AdcChip,
    pub dac_chip: DacChip,
    /// Allow multi-conversion batched transfers for input streaming
    pub batching: bool,
    /// Upper bound on conversions per batched transfer
    pub batch_max_len: usize,
    /// Streaming buffer capacity in samples, per direction
    pub buffer_capacity: usize,
    pub pin_safety_mode: PinSafetyMode,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            board_variant: BoardVariant::Gertboard,
            adc_chip: AdcChip::Mcp3202,
            dac_chip: DacChip::Mcp4822,
            batching: true,
            batch_max_len: HUNK_LEN,
            buffer_capacity: 16384,
            pin_safety_mode: PinSafetyMode::WiringPi,
        }
    }
}

impl DriverConfig {
    pub fn builder() -> DriverConfigBuilder {
        DriverConfigBuilder::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse a TOML fragment, falling back to defaults for absent keys.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| GertError::InvalidConfig {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_max_len == 0 || self.batch_max_len > HUNK_LEN {
            return Err(GertError::InvalidConfig {
                message: format!(
                    "batch_max_len {} out of range 1..={HUNK_LEN}",
                    self.batch_max_len
                ),
            });
        }
        if self.buffer_capacity == 0 {
            return Err(GertError::InvalidConfig {
                message: "buffer_capacity must be greater than 0".to_string(),
            });
        }
        let info = self.board_variant.info();
        if self.adc_chip == AdcChip::Ads1220 && info.ai_channels < 4 {
            // the ADS1220 mux exposes more inputs than the two-channel boards wire up
            tracing::debug!(board = info.name, "ads1220 selected on a two-channel board");
        }
        Ok(())
    }
}

/// Builder for [`DriverConfig`].
#[derive(Debug, Default)]
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    pub fn board_variant(mut self, variant: BoardVariant) -> Self {
        self.config.board_variant = variant;
        self
    }

    pub fn adc_chip(mut self, chip: AdcChip) -> Self {
        self.config.adc_chip = chip;
        self
    }

    pub fn dac_chip(mut self, chip: DacChip) -> Self {
        self.config.dac_chip = chip;
        self
    }

    pub fn batching(mut self, enable: bool) -> Self {
        self.config.batching = enable;
        self
    }

    pub fn batch_max_len(mut self, len: usize) -> Self {
        self.config.batch_max_len = len;
        self
    }

    pub fn buffer_capacity(mut self, samples: usize) -> Self {
        self.config.buffer_capacity = samples;
        self
    }

    pub fn pin_safety_mode(mut self, mode: PinSafetyMode) -> Self {
        self.config.pin_safety_mode = mode;
        self
    }

    pub fn build(self) -> Result<DriverConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(DriverConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_zero_batch_len() {
        let err = DriverConfig::builder().batch_max_len(0).build().unwrap_err();
        assert!(matches!(err, GertError::InvalidConfig { .. }));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = DriverConfig::from_toml_str(
            r#"
            board_variant = "fredboard"
            adc_chip = "ads1220"
            batching = false
            "#,
        )
        .unwrap();
        assert_eq!(config.board_variant, BoardVariant::Fredboard);
        assert_eq!(config.adc_chip, AdcChip::Ads1220);
        assert!(!config.batching);
        // untouched keys keep their defaults
        assert_eq!(config.batch_max_len, HUNK_LEN);
    }

    #[test]
    fn test_from_toml_rejects_unknown_chip() {
        assert!(DriverConfig::from_toml_str("adc_chip = \"mcp9999\"").is_err());
    }

    #[test]
    fn test_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "batching = false\nbuffer_capacity = 256").unwrap();
        let config = DriverConfig::from_file(file.path()).unwrap();
        assert!(!config.batching);
        assert_eq!(config.buffer_capacity, 256);
    }
}
