//! Hashrate extraction from miner output.
//!
//! Miner binaries print their speed as free text after a fixed marker, e.g.
//! `Total Speed: 12.5 MH/s`. The parser finds the marker, takes the first
//! number after it and scales it by the unit found in the remaining text.

use crate::types::ParseResult;

/// Hash rate units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashRateUnit {
    /// Hashes per second.
    HashPerSec,
    /// Kilohashes per second.
    KiloHashPerSec,
    /// Megahashes per second.
    MegaHashPerSec,
    /// Gigahashes per second.
    GigaHashPerSec,
    /// Terahashes per second.
    TeraHashPerSec,
}

impl HashRateUnit {
    /// Number of H/s in one unit.
    #[must_use]
    pub fn multiplier(&self) -> f64 {
        match self {
            Self::HashPerSec => 1.0,
            Self::KiloHashPerSec => 1_000.0,
            Self::MegaHashPerSec => 1_000_000.0,
            Self::GigaHashPerSec => 1_000_000_000.0,
            Self::TeraHashPerSec => 1_000_000_000_000.0,
        }
    }

    /// Converts an H/s value to this unit.
    #[must_use]
    pub fn convert(&self, hash_rate: f64) -> f64 {
        hash_rate / self.multiplier()
    }

    /// Gets the unit suffix.
    #[must_use]
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::HashPerSec => "H/s",
            Self::KiloHashPerSec => "KH/s",
            Self::MegaHashPerSec => "MH/s",
            Self::GigaHashPerSec => "GH/s",
            Self::TeraHashPerSec => "TH/s",
        }
    }

    /// Auto-selects best unit for display.
    #[must_use]
    pub fn auto_select(hash_rate: f64) -> Self {
        if hash_rate >= 1_000_000_000_000.0 {
            Self::TeraHashPerSec
        } else if hash_rate >= 1_000_000_000.0 {
            Self::GigaHashPerSec
        } else if hash_rate >= 1_000_000.0 {
            Self::MegaHashPerSec
        } else if hash_rate >= 1_000.0 {
            Self::KiloHashPerSec
        } else {
            Self::HashPerSec
        }
    }

    /// Unit named in lower-cased miner output. `kh` wins over `mh`, which
    /// wins over `gh`; no token means plain H/s.
    fn detect(lowered: &str) -> Self {
        if lowered.contains("kh") {
            Self::KiloHashPerSec
        } else if lowered.contains("mh") {
            Self::MegaHashPerSec
        } else if lowered.contains("gh") {
            Self::GigaHashPerSec
        } else {
            Self::HashPerSec
        }
    }
}

/// Formats hash rate for display.
#[must_use]
pub fn format_hash_rate(hash_rate: f64) -> String {
    let unit = HashRateUnit::auto_select(hash_rate);
    format!("{:.2} {}", unit.convert(hash_rate), unit.suffix())
}

/// Text following the first occurrence of `marker`.
#[must_use]
pub fn string_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    text.find(marker).map(|index| &text[index + marker.len()..])
}

/// Extracts the hashrate printed after `marker`, scaled to H/s.
///
/// Returns `found = false` when the marker is missing or no number follows
/// it. The numeric token is parsed with `.` as the decimal separator
/// regardless of locale. Scanning stops at the first numeric character of
/// any script, but only ASCII digits and `.` make up the number, so a
/// non-ASCII digit there yields `found = false`.
#[must_use]
pub fn try_get_hashrate_after(text: &str, marker: &str) -> ParseResult {
    let Some(after) = string_after(text, marker) else {
        return ParseResult::default();
    };

    let lowered = after.to_lowercase();
    let number: String = lowered
        .chars()
        .skip_while(|c| !c.is_numeric())
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    match number.parse::<f64>() {
        Ok(value) => ParseResult {
            value: value * HashRateUnit::detect(&lowered).multiplier(),
            found: true,
        },
        Err(_) => ParseResult::default(),
    }
}
