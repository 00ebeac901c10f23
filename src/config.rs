use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use crate::core::ledger::LedgerMode;
use crate::error::ConfigError;
use crate::inference::classifier::CnnClassifier;
use crate::inference::yolo::{YoloDetector, YoloParams};
use crate::inference::{PipelineSettings, build_standard_pipeline};
use crate::kiosk::LoopTimings;
use crate::pipeline::InferencePipeline;

/// Files, models and thresholds shared by every command.
#[derive(Debug, Clone, Args)]
pub struct KioskConfig {
    /// Menu document with dish names and prices
    #[arg(long, value_name = "FILE", default_value = "MENU/MENU.json")]
    pub menu: PathBuf,

    /// Transaction ledger (CSV)
    #[arg(long, value_name = "FILE", default_value = "MENU/history.csv")]
    pub ledger: PathBuf,

    /// Start a new ledger instead of continuing the existing one
    #[arg(long)]
    pub fresh_ledger: bool,

    /// Tray detector model (.rten)
    #[arg(long, value_name = "FILE", default_value = "MODEL/detector.rten")]
    pub detector: PathBuf,

    /// Dish classifier model (.rten)
    #[arg(long, value_name = "FILE", default_value = "MODEL/classifier.rten")]
    pub classifier: PathBuf,

    /// Detector score threshold
    #[arg(long, default_value_t = 0.25)]
    pub detector_confidence: f32,

    /// Drop classifications scoring below this (off by default)
    #[arg(long)]
    pub min_confidence: Option<f32>,

    /// Square input size of the classifier
    #[arg(long, default_value_t = 224)]
    pub classifier_size: u32,

    /// Save per-capture debug images to directory (must be empty)
    #[arg(long, value_name = "DIR")]
    pub debug_out: Option<PathBuf>,
}

impl KioskConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("detector-confidence", self.detector_confidence)?;
        if let Some(floor) = self.min_confidence {
            check_unit("min-confidence", floor)?;
        }
        if self.classifier_size == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "classifier-size",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn ledger_mode(&self) -> LedgerMode {
        if self.fresh_ledger {
            LedgerMode::Fresh
        } else {
            LedgerMode::Resume
        }
    }

    pub fn yolo_params(&self) -> YoloParams {
        YoloParams {
            conf_threshold: self.detector_confidence,
            ..YoloParams::default()
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            classifier_input: (self.classifier_size, self.classifier_size),
            min_confidence: self.min_confidence,
            ..PipelineSettings::default()
        }
    }

    /// Load both models and assemble the standard pipeline.
    pub fn load_pipeline(&self) -> Result<InferencePipeline> {
        let detector = YoloDetector::load(&self.detector, self.yolo_params())?;
        let settings = self.pipeline_settings();
        let classifier = CnnClassifier::load(&self.classifier, settings.classifier_input)?;

        let pipeline = build_standard_pipeline(Arc::new(detector), Arc::new(classifier), settings);
        match &self.debug_out {
            Some(dir) => pipeline.with_debug(dir.clone()),
            None => Ok(pipeline),
        }
    }
}

/// Camera and trigger link settings for `run`.
#[derive(Debug, Clone, Args)]
pub struct DeviceConfig {
    /// Serial port of the button controller
    #[arg(long, value_name = "PORT", required_unless_present = "simulate")]
    pub port: Option<String>,

    /// Read trigger lines from stdin instead of a serial port
    #[arg(long, conflicts_with = "port")]
    pub simulate: bool,

    #[arg(long, default_value_t = 9600)]
    pub baud: u32,

    /// Camera device index
    #[arg(long, default_value_t = 1)]
    pub camera_index: u32,

    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// Replay this image instead of opening a camera
    #[arg(long, value_name = "IMAGE")]
    pub still_frame: Option<PathBuf>,

    /// Centered zoom applied to every camera frame
    #[arg(long, default_value_t = 1.5)]
    pub zoom: f32,

    #[arg(long, value_name = "MS", default_value_t = 10)]
    pub camera_interval_ms: u64,

    #[arg(long, value_name = "MS", default_value_t = 50)]
    pub serial_interval_ms: u64,

    /// Write each annotated capture here
    #[arg(long, value_name = "DIR")]
    pub snapshot_dir: Option<PathBuf>,
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.zoom.is_finite() && self.zoom >= 1.0) {
            return Err(ConfigError::InvalidSetting {
                name: "zoom",
                reason: format!("{} is below 1.0", self.zoom),
            });
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "width/height",
                reason: "camera resolution must be positive".into(),
            });
        }
        if self.camera_interval_ms == 0 || self.serial_interval_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "interval",
                reason: "poll intervals must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn timings(&self) -> LoopTimings {
        LoopTimings {
            camera: Duration::from_millis(self.camera_interval_ms),
            trigger: Duration::from_millis(self.serial_interval_ms),
        }
    }
}

fn check_unit(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidSetting {
            name,
            reason: format!("{value} is outside 0..=1"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        kiosk: KioskConfig,
        #[command(flatten)]
        device: DeviceConfig,
    }

    #[test]
    fn defaults_match_the_kiosk_layout() {
        let cli = TestCli::parse_from(["traybill", "--simulate"]);
        assert_eq!(cli.kiosk.menu, PathBuf::from("MENU/MENU.json"));
        assert_eq!(cli.kiosk.ledger, PathBuf::from("MENU/history.csv"));
        assert_eq!(cli.kiosk.ledger_mode(), LedgerMode::Resume);
        assert_eq!(cli.kiosk.min_confidence, None);
        assert_eq!(cli.device.baud, 9600);
        assert_eq!(cli.device.camera_index, 1);
        assert_eq!(cli.device.timings(), LoopTimings::default());
        cli.kiosk.validate().unwrap();
        cli.device.validate().unwrap();
    }

    #[test]
    fn port_is_required_without_simulate() {
        assert!(TestCli::try_parse_from(["traybill"]).is_err());
        assert!(TestCli::try_parse_from(["traybill", "--port", "/dev/ttyACM0"]).is_ok());
    }

    #[test]
    fn rejects_out_of_range_settings() {
        let cli = TestCli::parse_from(["traybill", "--simulate", "--min-confidence", "1.5", "--zoom", "0.5"]);
        assert!(matches!(
            cli.kiosk.validate(),
            Err(ConfigError::InvalidSetting { name: "min-confidence", .. })
        ));
        assert!(matches!(
            cli.device.validate(),
            Err(ConfigError::InvalidSetting { name: "zoom", .. })
        ));
    }

    #[test]
    fn fresh_flag_truncates() {
        let cli = TestCli::parse_from(["traybill", "--simulate", "--fresh-ledger"]);
        assert_eq!(cli.kiosk.ledger_mode(), LedgerMode::Fresh);
    }
}
