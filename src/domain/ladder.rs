//! Quality ladder and source-relative renditions.

use serde::{Deserialize, Serialize};

/// Audio is identical on every rung.
pub const AUDIO_CHANNELS: u8 = 2;
pub const AUDIO_BITRATE: u32 = 128_000;

/// Segment length of the laddered package, in seconds.
pub const LADDER_SEGMENT_SECS: u32 = 2;
/// Segment length of the single-quality fallback package, in seconds.
pub const SINGLE_SEGMENT_SECS: u32 = 4;

/// Smallest width or height a 4:2:0 encode can carry.
pub const MIN_DIMENSION: u32 = 2;

/// One configured rung of the ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityVariant {
    pub name: String,
    /// Target height before clamping to the source
    pub height: u32,
    /// Video bitrate in bits per second
    pub bitrate: u32,
    /// x264 speed preset
    pub preset: String,
}

impl QualityVariant {
    pub fn new(name: &str, height: u32, bitrate: u32, preset: &str) -> Self {
        Self {
            name: name.to_string(),
            height,
            bitrate,
            preset: preset.to_string(),
        }
    }

    /// The one rung used by the single-quality path.
    pub fn single() -> Self {
        Self::new("single", 720, 1_500_000, "veryfast")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    pub fn is_encodable(&self) -> bool {
        self.width >= MIN_DIMENSION && self.height >= MIN_DIMENSION
    }

    /// Same resolution rounded down to even dimensions, as required by yuv420p.
    /// Never larger than `self`; only meaningful for encodable resolutions.
    pub fn even(&self) -> Self {
        Self {
            width: self.width & !1,
            height: self.height & !1,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A variant resolved against a probed source.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendition {
    pub variant: QualityVariant,
    pub resolution: Resolution,
}

impl Rendition {
    /// Clamp the variant to the source so it never upscales.
    pub fn resolve(variant: &QualityVariant, source: Resolution) -> Self {
        let height = variant.height.min(source.height);
        let width = ((height as f64 * source.aspect_ratio()).round() as u32)
            .max(MIN_DIMENSION)
            .min(source.width);
        Self {
            variant: variant.clone(),
            resolution: Resolution::new(width, height),
        }
    }

    pub fn bandwidth(&self) -> u32 {
        self.variant.bitrate
    }
}

/// Ordered set of variants applied to every attempt, lowest first.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityLadder {
    variants: Vec<QualityVariant>,
}

impl QualityLadder {
    pub fn new(mut variants: Vec<QualityVariant>) -> Self {
        variants.sort_by_key(|variant| (variant.height, variant.bitrate));
        Self { variants }
    }

    pub fn variants(&self) -> &[QualityVariant] {
        &self.variants
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// One rendition per rung, in ascending order, regardless of source size.
    pub fn resolve(&self, source: Resolution) -> Vec<Rendition> {
        self.variants
            .iter()
            .map(|variant| Rendition::resolve(variant, source))
            .collect()
    }
}

impl Default for QualityLadder {
    fn default() -> Self {
        Self::new(vec![
            QualityVariant::new("360p", 360, 800_000, "veryfast"),
            QualityVariant::new("480p", 480, 1_400_000, "veryfast"),
            QualityVariant::new("720p", 720, 2_800_000, "fast"),
        ])
    }
}
