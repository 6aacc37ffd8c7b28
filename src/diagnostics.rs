//! Per-frame coding reports for offline inspection
//!
//! A [`FrameReport`] gathers the outputs of every channel element of one
//! frame together with the rate control state and renders them as JSON.
//!
//! This module is only available when the "diagnostics" feature is enabled.

use std::fs::File;
use std::io::Write;

use serde::Serialize;

use crate::config::CoderVariant;
use crate::encoder::{ChannelOutput, PairOutput, SpectralEncoder};

/// One coded channel element
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "element", rename_all = "snake_case")]
pub enum ElementReport {
    Single(ChannelOutput),
    Pair(PairOutput),
}

impl ElementReport {
    pub fn bits(&self) -> u32 {
        match self {
            ElementReport::Single(out) => out.total_bits(),
            ElementReport::Pair(out) => out.total_bits(),
        }
    }
}

/// Everything decided in one frame
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    /// RFC 3339 creation time
    pub created_at: String,
    /// Frames closed before this one
    pub frame: u64,
    pub variant: CoderVariant,
    pub lambda: f32,
    pub elements: Vec<ElementReport>,
}

impl FrameReport {
    /// Start a report for the frame `encoder` is about to close
    pub fn new(encoder: &SpectralEncoder) -> Self {
        Self {
            created_at: chrono::Utc::now().to_rfc3339(),
            frame: encoder.frames(),
            variant: encoder.config().variant,
            lambda: encoder.lambda(),
            elements: Vec::new(),
        }
    }

    pub fn push_single(&mut self, output: &ChannelOutput) {
        self.elements.push(ElementReport::Single(output.clone()));
    }

    pub fn push_pair(&mut self, output: &PairOutput) {
        self.elements.push(ElementReport::Pair(output.clone()));
    }

    /// Bits over every element, as passed to `end_frame`
    pub fn bits(&self) -> u32 {
        self.elements.iter().map(ElementReport::bits).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Save the report as JSON
    pub fn save_to_file(&self, filename: &str) -> Result<(), Box<dyn std::error::Error>> {
        let json = self.to_json()?;
        let mut file = File::create(filename)?;
        file.write_all(json.as_bytes())?;
        log::info!("Frame report saved to: {}", filename);
        Ok(())
    }
}
