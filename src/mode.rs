//! Travel modes and per-mode availability masks

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Travel mode. Each mode selects one precomputed cost column of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Walk = 0,
    Bike = 1,
    Car = 2,
    Transit = 3,
}

impl Mode {
    pub const COUNT: usize = 4;

    pub fn all() -> &'static [Mode] {
        &[Mode::Walk, Mode::Bike, Mode::Car, Mode::Transit]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mode::Walk => "walk",
            Mode::Bike => "bike",
            Mode::Car => "car",
            Mode::Transit => "transit",
        }
    }

    /// Column index into per-mode arrays
    #[inline(always)]
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_u8(v: u8) -> Option<Mode> {
        match v {
            0 => Some(Mode::Walk),
            1 => Some(Mode::Bike),
            2 => Some(Mode::Car),
            3 => Some(Mode::Transit),
            _ => None,
        }
    }

    /// Name of the edge-table cost column for this mode
    pub fn cost_column(&self) -> &'static str {
        match self {
            Mode::Walk => "cost_walk",
            Mode::Bike => "cost_bike",
            Mode::Car => "cost_car",
            Mode::Transit => "cost_transit",
        }
    }

    #[inline(always)]
    pub fn bit(&self) -> u8 {
        1 << (*self as u8)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "walk" | "walking" | "foot" => Ok(Mode::Walk),
            "bike" | "bicycle" | "cycling" => Ok(Mode::Bike),
            "car" | "driving" => Ok(Mode::Car),
            "transit" | "pt" => Ok(Mode::Transit),
            other => Err(format!("unknown mode '{other}' (expected walk, bike, car or transit)")),
        }
    }
}

/// Bitmask of modes: bit0=walk, bit1=bike, bit2=car, bit3=transit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ModeMask(pub u8);

impl ModeMask {
    pub const NONE: ModeMask = ModeMask(0);
    pub const ALL: ModeMask = ModeMask(0b1111);

    #[inline(always)]
    pub fn contains(&self, mode: Mode) -> bool {
        self.0 & mode.bit() != 0
    }

    pub fn with(self, mode: Mode) -> Self {
        ModeMask(self.0 | mode.bit())
    }

    pub fn without(self, mode: Mode) -> Self {
        ModeMask(self.0 & !mode.bit())
    }

    pub fn modes(&self) -> impl Iterator<Item = Mode> + '_ {
        Mode::all().iter().copied().filter(move |m| self.contains(*m))
    }
}

impl FromIterator<Mode> for ModeMask {
    fn from_iter<I: IntoIterator<Item = Mode>>(iter: I) -> Self {
        iter.into_iter().fold(ModeMask::NONE, |mask, m| mask.with(m))
    }
}
