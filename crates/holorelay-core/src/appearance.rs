//! Part materials and the appearance rules applied to them
//!
//! Opacity and color commands, and the load-time presets for the skin and
//! mark models, all go through [`Material`] so the engine only has to expose
//! a mutable material per part.

use serde::{Deserialize, Serialize};

/// How a material is composited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    /// Fully opaque, depth-writing, no alpha blending
    Opaque,
    /// Alpha blended using the stored alpha channel
    AlphaBlend,
}

impl Default for BlendMode {
    fn default() -> Self {
        Self::Opaque
    }
}

/// Color, alpha and blend state of one part
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub color: [f32; 3],
    pub alpha: f32,
    pub blend: BlendMode,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: WHITE,
            alpha: 1.0,
            blend: BlendMode::Opaque,
        }
    }
}

impl Material {
    /// Apply an opacity command
    ///
    /// Anything at or above 1.0 resets to fully opaque with blending off.
    /// Below 1.0 enables blending and stores the value as alpha.
    pub fn apply_opacity(&mut self, opacity: f32) {
        if opacity >= 1.0 {
            self.alpha = 1.0;
            self.blend = BlendMode::Opaque;
        } else {
            self.alpha = opacity;
            self.blend = BlendMode::AlphaBlend;
        }
    }

    /// Set RGB, leaving alpha and blending untouched
    pub fn apply_color(&mut self, rgb: [f32; 3]) {
        self.color = rgb;
    }

    pub fn is_blended(&self) -> bool {
        self.blend == BlendMode::AlphaBlend
    }
}

pub const WHITE: [f32; 3] = [1.0, 1.0, 1.0];

/// Fallback color for renamed skin parts without a palette entry
pub const SKIN_DEFAULT: [f32; 3] = [0.5, 0.5, 0.5];

/// Named skin layers and their colors
const SKIN_PALETTE: &[(&str, [f32; 3])] = &[
    // skin
    ("皮肤", [1.0, 0.8, 0.6]),
    // hematoma
    ("血肿", [0.6, 0.0, 0.0]),
    // channel
    ("通道", [0.0, 0.6, 1.0]),
];

/// Color for a renamed skin part
pub fn skin_color(part_name: &str) -> [f32; 3] {
    SKIN_PALETTE
        .iter()
        .find(|(name, _)| *name == part_name)
        .map(|(_, color)| *color)
        .unwrap_or(SKIN_DEFAULT)
}

const MARK_START: [f32; 3] = [1.0, 0.92, 0.016];
const MARK_END: [f32; 3] = WHITE;

/// Yellow to white gradient color for mark part `index` of `total`
pub fn mark_gradient(index: usize, total: usize) -> [f32; 3] {
    let t = if total <= 1 {
        1.0
    } else {
        index as f32 / (total - 1) as f32
    };

    let mut color = [0.0; 3];
    for (channel, value) in color.iter_mut().enumerate() {
        *value = MARK_START[channel] * (1.0 - t) + MARK_END[channel] * t;
    }
    color
}
