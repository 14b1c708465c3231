use serde::{Deserialize, Serialize};
use std::fmt;

/// Percentage of stain-positive tissue in a tile, always within `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct Score(f32);

impl Score {
    pub const MIN: f32 = 0.0;
    pub const MAX: f32 = 100.0;

    pub fn new(value: f32) -> Option<Self> {
        (value.is_finite() && (Self::MIN..=Self::MAX).contains(&value)).then_some(Self(value))
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

impl TryFrom<f32> for Score {
    type Error = String;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Score::new(value).ok_or_else(|| format!("score {} outside [0, 100]", value))
    }
}

impl From<Score> for f32 {
    fn from(score: Score) -> Self {
        score.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One annotated tile after the annotation/score join, coordinates already
/// scaled out of pixel space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    #[serde(rename = "Tile")]
    pub tile: String,
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
    #[serde(rename = "Score")]
    pub score: Score,
}

/// A tile placed in the native voxel grid. `voxel_y` is the calibration's
/// fixed slice and is identical for every tile of a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedCoordinate {
    #[serde(rename = "Tile")]
    pub tile: String,
    #[serde(rename = "X")]
    pub voxel_x: f64,
    #[serde(rename = "Y")]
    pub voxel_y: i64,
    #[serde(rename = "Z")]
    pub voxel_z: f64,
    #[serde(rename = "Score")]
    pub score: Score,
}
