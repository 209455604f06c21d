//! Asymmetric apodization windows centred on the zero-path-difference sample.
//!
//! The interferogram peak is rarely in the middle of the record, so every tapered
//! window is assembled from two halves: the rising half of a symmetric window sized
//! for the left arm and the falling half of one sized for the right arm. The result
//! is exactly 1.0 at the ZPD sample and tapers towards both record ends.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Standard deviation, in samples, of the Gaussian window.
pub const GAUSSIAN_STD_SAMPLES: f64 = 7.0;

const BLACKMAN_HARRIS: [f64; 4] = [0.35875, 0.48829, 0.14128, 0.01168];

/// Supported window shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ApodizationWindow {
    /// No taper, constant 1.0.
    Boxcar,
    /// Linear fall from the ZPD to both edges.
    Triangular,
    /// Raised cosine.
    Hanning,
    /// Four-term Blackman-Harris.
    BlackmanHarris,
    /// Gaussian with sigma = 7 samples.
    Gauss,
    /// Tukey with 10% cosine taper.
    Tukey10,
    /// Tukey with 20% cosine taper.
    Tukey20,
    /// Tukey with 50% cosine taper.
    Tukey50,
}

impl ApodizationWindow {
    /// All supported windows, in display order.
    pub const ALL: [ApodizationWindow; 8] = [
        ApodizationWindow::Boxcar,
        ApodizationWindow::Triangular,
        ApodizationWindow::Hanning,
        ApodizationWindow::BlackmanHarris,
        ApodizationWindow::Gauss,
        ApodizationWindow::Tukey10,
        ApodizationWindow::Tukey20,
        ApodizationWindow::Tukey50,
    ];

    /// Canonical configuration name.
    pub fn name(&self) -> &'static str {
        match self {
            ApodizationWindow::Boxcar => "boxcar",
            ApodizationWindow::Triangular => "triangular",
            ApodizationWindow::Hanning => "hanning",
            ApodizationWindow::BlackmanHarris => "blackman-harris",
            ApodizationWindow::Gauss => "gauss",
            ApodizationWindow::Tukey10 => "tukey-0.1",
            ApodizationWindow::Tukey20 => "tukey-0.2",
            ApodizationWindow::Tukey50 => "tukey-0.5",
        }
    }

    /// Build the window for an interferogram of `len` samples peaking at `zpd_index`.
    ///
    /// `zpd_index` beyond the record is clamped to the last sample.
    pub fn build(&self, len: usize, zpd_index: usize) -> Vec<f64> {
        if len == 0 {
            return Vec::new();
        }
        if *self == ApodizationWindow::Boxcar {
            return vec![1.0; len];
        }

        let zpd = zpd_index.min(len - 1);
        let left_len = zpd + 1;
        let right_len = len - left_len;

        // Odd-length symmetric windows have their centre sample at exactly 1.0.
        let left = self.symmetric(2 * left_len - 1);
        let right = self.symmetric(2 * right_len + 1);

        let mut window: Vec<f64> = left[..left_len]
            .iter()
            .chain(right[right_len + 1..].iter())
            .map(|w| w.clamp(0.0, 1.0))
            .collect();
        window[zpd] = 1.0;
        window
    }

    /// Canonical symmetric window of `m` samples.
    fn symmetric(&self, m: usize) -> Vec<f64> {
        if m <= 1 {
            return vec![1.0; m];
        }
        let span = (m - 1) as f64;
        match self {
            ApodizationWindow::Boxcar => vec![1.0; m],
            ApodizationWindow::Triangular => triangular(m),
            ApodizationWindow::Hanning => (0..m)
                .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f64 / span).cos())
                .collect(),
            ApodizationWindow::BlackmanHarris => {
                let [a0, a1, a2, a3] = BLACKMAN_HARRIS;
                (0..m)
                    .map(|n| {
                        let x = 2.0 * PI * n as f64 / span;
                        a0 - a1 * x.cos() + a2 * (2.0 * x).cos() - a3 * (3.0 * x).cos()
                    })
                    .collect()
            }
            ApodizationWindow::Gauss => {
                let centre = span / 2.0;
                (0..m)
                    .map(|n| {
                        let d = (n as f64 - centre) / GAUSSIAN_STD_SAMPLES;
                        (-0.5 * d * d).exp()
                    })
                    .collect()
            }
            ApodizationWindow::Tukey10 => tukey(m, 0.1),
            ApodizationWindow::Tukey20 => tukey(m, 0.2),
            ApodizationWindow::Tukey50 => tukey(m, 0.5),
        }
    }
}

/// Triangular window without zero end points.
fn triangular(m: usize) -> Vec<f64> {
    let half: Vec<f64> = (1..=m.div_ceil(2))
        .map(|n| {
            if m % 2 == 1 {
                2.0 * n as f64 / (m as f64 + 1.0)
            } else {
                (2.0 * n as f64 - 1.0) / m as f64
            }
        })
        .collect();
    let mirrored = half.iter().rev().skip(m % 2);
    half.iter().chain(mirrored).copied().collect()
}

/// Tukey (tapered cosine) window; `alpha` is the tapered fraction of the record.
fn tukey(m: usize, alpha: f64) -> Vec<f64> {
    let span = (m - 1) as f64;
    let taper = alpha * span / 2.0;
    (0..m)
        .map(|n| {
            let n = n as f64;
            let from_edge = n.min(span - n);
            if from_edge < taper {
                0.5 * (1.0 + (PI * (from_edge / taper - 1.0)).cos())
            } else {
                1.0
            }
        })
        .collect()
}

impl fmt::Display for ApodizationWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ApodizationWindow {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| !matches!(c, ' ' | '(' | ')' | '-' | '_'))
            .collect();
        match key.as_str() {
            "boxcar" | "rectangular" => Ok(ApodizationWindow::Boxcar),
            "triangular" | "triang" => Ok(ApodizationWindow::Triangular),
            "hanning" | "hann" => Ok(ApodizationWindow::Hanning),
            "blackmanharris" => Ok(ApodizationWindow::BlackmanHarris),
            "gauss" | "gaussian" => Ok(ApodizationWindow::Gauss),
            "tukey0.1" => Ok(ApodizationWindow::Tukey10),
            "tukey0.2" => Ok(ApodizationWindow::Tukey20),
            "tukey0.5" => Ok(ApodizationWindow::Tukey50),
            _ => Err(ConfigError::UnknownWindow(s.to_string())),
        }
    }
}

impl TryFrom<String> for ApodizationWindow {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ApodizationWindow> for String {
    fn from(window: ApodizationWindow) -> Self {
        window.name().to_string()
    }
}
