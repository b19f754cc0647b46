//! Percentage-of-screen capture region calculation
//!
//! A requested coverage percentage becomes a rectangle centered on the display.
//! Both dimensions are scaled by `sqrt(p / 100)`, so the rectangle keeps the
//! display's aspect ratio and its area is `p%` of the display area.

use crate::error::{ScreenlogError, ScreenlogResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MIN_PERCENTAGE: u32 = 1;
pub const MAX_PERCENTAGE: u32 = 100;

/// Size of the captured display in device pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayGeometry {
    pub width: u32,
    pub height: u32,
}

impl DisplayGeometry {
    pub fn new(width: u32, height: u32) -> ScreenlogResult<Self> {
        if width == 0 || height == 0 {
            return Err(ScreenlogError::InvalidConfiguration(format!(
                "display geometry must be non-empty, got {}x{}",
                width, height
            )));
        }
        Ok(Self { width, height })
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

impl fmt::Display for DisplayGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Parses `WIDTHxHEIGHT`, e.g. `2560x1440`
impl FromStr for DisplayGeometry {
    type Err = ScreenlogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ScreenlogError::InvalidConfiguration(format!(
                "display size must look like 1920x1080, got '{}'",
                s
            ))
        };

        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width = w.trim().parse::<u32>().map_err(|_| invalid())?;
        let height = h.trim().parse::<u32>().map_err(|_| invalid())?;
        Self::new(width, height)
    }
}

/// Absolute capture rectangle in device pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CaptureRegion {
    /// The whole display
    pub fn full(display: DisplayGeometry) -> Self {
        Self {
            x: 0,
            y: 0,
            width: display.width,
            height: display.height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True when the rectangle lies entirely inside the display
    pub fn contains_within(&self, display: DisplayGeometry) -> bool {
        self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= display.width as u64
            && self.y as u64 + self.height as u64 <= display.height as u64
    }

    pub fn is_full_display(&self, display: DisplayGeometry) -> bool {
        *self == Self::full(display)
    }
}

impl fmt::Display for CaptureRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{},{}", self.width, self.height, self.x, self.y)
    }
}

/// Reject percentages outside `[1, 100]`
pub fn validate_percentage(percentage: i64) -> ScreenlogResult<u32> {
    if percentage < MIN_PERCENTAGE as i64 || percentage > MAX_PERCENTAGE as i64 {
        return Err(ScreenlogError::InvalidConfiguration(format!(
            "percentage must be between {} and {}, got {}",
            MIN_PERCENTAGE, MAX_PERCENTAGE, percentage
        )));
    }
    Ok(percentage as u32)
}

/// Compute the centered capture rectangle covering `percentage`% of the display
pub fn compute(percentage: i64, display: DisplayGeometry) -> ScreenlogResult<CaptureRegion> {
    let percentage = validate_percentage(percentage)?;
    if percentage == MAX_PERCENTAGE {
        return Ok(CaptureRegion::full(display));
    }

    let scale = (percentage as f64 / 100.0).sqrt();
    let width = scale_dimension(display.width, scale);
    let height = scale_dimension(display.height, scale);

    Ok(CaptureRegion {
        x: (display.width - width) / 2,
        y: (display.height - height) / 2,
        width,
        height,
    })
}

fn scale_dimension(full: u32, scale: f64) -> u32 {
    let scaled = (full as f64 * scale).round() as u32;
    scaled.clamp(1, full)
}
