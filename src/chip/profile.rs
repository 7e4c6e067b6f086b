/*
    This file is part of ZXCORE, a Rust library for building emulators.

    For the full copyright notice, see the lib.rs file.
*/
//! Static per-model constants.
//!
//! A [MachineProfile] is the single source of truth for every model-specific
//! constant used by the other components; nothing else branches on machine
//! tags directly.
use core::fmt;
use core::str::FromStr;
use core::time::Duration;

#[cfg(feature = "snapshot")]
use serde::{Serialize, Deserialize};

use crate::clock::{FTs, FrameTimings, CONTENTION_EARLY, CONTENTION_LATE};

/// An enumeration of the supported machine models.
#[cfg_attr(feature = "snapshot", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "snapshot", serde(rename_all = "camelCase"))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MachineModel {
    Spectrum48,
    Spectrum128,
    SpectrumPlus2,
    SpectrumPlus2A,
    SpectrumPlus3,
    Pentagon,
    Pentagon1024,
    Scorpion,
}

/// The shape of the per-scanline delay pattern imposed by the ULA.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentionPattern {
    /// The Ferranti ULA pattern 6,5,4,3,2,1,0,0.
    Early,
    /// The +2A/+3 gate array pattern 1,0,7,6,5,4,3,2.
    Late,
    /// No contention (Pentagon, Scorpion).
    None,
}

/// Selects which paging latch semantics the memory implements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PagingModel {
    /// Fixed mapping, no latches (16k/48k).
    None,
    /// Port 0x7FFD only (128k/+2, Pentagon).
    Standard128,
    /// Ports 0x7FFD (strict decode) and 0x1FFD (+2A/+3).
    Plus2A,
    /// Ports 0x7FFD and the Scorpion 0x1FFD extension.
    Scorpion,
    /// Port 0x7FFD and the extension port widening the RAM bank selection.
    Pentagon1024,
}

/// The granularity at which border color changes latch on screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BorderQuantization {
    None,
    FourTStates,
}

/// Immutable per-model constants.
#[derive(Clone, Copy, Debug)]
pub struct MachineProfile {
    /// A short lower-case tag identifying the model, used in messages.
    pub tag: &'static str,
    pub cpu_clock_hz: u32,
    pub ay_clock_hz: u32,
    pub tstates_per_line: FTs,
    pub tstates_per_frame: FTs,
    /// The scan line index on which the first paper line is drawn.
    pub first_screen_line: FTs,
    /// The T-state at which the delay pattern of the first paper line begins.
    pub contention_start_tstate: FTs,
    pub contention_pattern: ContentionPattern,
    /// The length of the INT pulse in T-states: 32 or 36.
    pub int_pulse_duration: FTs,
    /// INT rises 4 T-states before the frame boundary (48k with early ULA
    /// timings only).
    pub early_int_timing: bool,
    pub has_contention: bool,
    pub has_io_contention: bool,
    /// The undecoded-port floating bus is observable (48k only).
    pub has_floating_bus: bool,
    pub paging_model: PagingModel,
    pub rom_bank_count: u8,
    pub ram_bank_count: u8,
    /// The ROM bank holding 48k BASIC; the TR-DOS overlay arms only while
    /// this bank is paged in.
    pub basic_rom_bank: u8,
    pub has_fdc: bool,
    pub beta_disk_default: bool,
    pub border_quantization: BorderQuantization,
}

const SPECTRUM48: MachineProfile = MachineProfile {
    tag: "48k",
    cpu_clock_hz: 3_500_000,
    ay_clock_hz: 1_750_000,
    tstates_per_line: 224,
    tstates_per_frame: 69888,
    first_screen_line: 64,
    contention_start_tstate: 14335,
    contention_pattern: ContentionPattern::Early,
    int_pulse_duration: 32,
    early_int_timing: true,
    has_contention: true,
    has_io_contention: true,
    has_floating_bus: true,
    paging_model: PagingModel::None,
    rom_bank_count: 1,
    ram_bank_count: 3,
    basic_rom_bank: 0,
    has_fdc: false,
    beta_disk_default: false,
    border_quantization: BorderQuantization::None,
};

const SPECTRUM128: MachineProfile = MachineProfile {
    tag: "128k",
    cpu_clock_hz: 3_546_900,
    ay_clock_hz: 1_773_450,
    tstates_per_line: 228,
    tstates_per_frame: 70908,
    first_screen_line: 63,
    contention_start_tstate: 14361,
    contention_pattern: ContentionPattern::Early,
    int_pulse_duration: 36,
    early_int_timing: false,
    has_contention: true,
    has_io_contention: true,
    has_floating_bus: false,
    paging_model: PagingModel::Standard128,
    rom_bank_count: 2,
    ram_bank_count: 8,
    basic_rom_bank: 1,
    has_fdc: false,
    beta_disk_default: false,
    border_quantization: BorderQuantization::None,
};

const SPECTRUM_PLUS2: MachineProfile = MachineProfile {
    tag: "plus2",
    ..SPECTRUM128
};

const SPECTRUM_PLUS2A: MachineProfile = MachineProfile {
    tag: "plus2a",
    contention_pattern: ContentionPattern::Late,
    has_io_contention: false,
    paging_model: PagingModel::Plus2A,
    rom_bank_count: 4,
    basic_rom_bank: 3,
    ..SPECTRUM128
};

const SPECTRUM_PLUS3: MachineProfile = MachineProfile {
    tag: "plus3",
    has_fdc: true,
    ..SPECTRUM_PLUS2A
};

const PENTAGON: MachineProfile = MachineProfile {
    tag: "pentagon",
    cpu_clock_hz: 3_500_000,
    ay_clock_hz: 1_750_000,
    tstates_per_line: 224,
    tstates_per_frame: 71680,
    first_screen_line: 80,
    contention_start_tstate: 0,
    contention_pattern: ContentionPattern::None,
    int_pulse_duration: 36,
    early_int_timing: false,
    has_contention: false,
    has_io_contention: false,
    has_floating_bus: false,
    paging_model: PagingModel::Standard128,
    rom_bank_count: 2,
    ram_bank_count: 8,
    basic_rom_bank: 1,
    has_fdc: false,
    beta_disk_default: true,
    border_quantization: BorderQuantization::FourTStates,
};

const PENTAGON1024: MachineProfile = MachineProfile {
    tag: "pentagon1024",
    paging_model: PagingModel::Pentagon1024,
    ram_bank_count: 64,
    ..PENTAGON
};

const SCORPION: MachineProfile = MachineProfile {
    tag: "scorpion",
    paging_model: PagingModel::Scorpion,
    rom_bank_count: 4,
    ram_bank_count: 16,
    ..PENTAGON
};

/// An error returned when a machine tag is not recognized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseMachineModelError(pub String);

impl MachineModel {
    /// Returns the static profile record of this model.
    pub fn profile(self) -> &'static MachineProfile {
        use MachineModel::*;
        match self {
            Spectrum48     => &SPECTRUM48,
            Spectrum128    => &SPECTRUM128,
            SpectrumPlus2  => &SPECTRUM_PLUS2,
            SpectrumPlus2A => &SPECTRUM_PLUS2A,
            SpectrumPlus3  => &SPECTRUM_PLUS3,
            Pentagon       => &PENTAGON,
            Pentagon1024   => &PENTAGON1024,
            Scorpion       => &SCORPION,
        }
    }
}

impl MachineProfile {
    /// Builds the timing record consumed by [FrameClock][crate::clock::FrameClock].
    pub fn frame_timings(&self) -> FrameTimings {
        let contention_table = match self.contention_pattern {
            ContentionPattern::Early => Some(&CONTENTION_EARLY),
            ContentionPattern::Late => Some(&CONTENTION_LATE),
            ContentionPattern::None => None,
        };
        FrameTimings {
            line_tstates: self.tstates_per_line,
            frame_tstates: self.tstates_per_frame,
            contention_start: self.contention_start_tstate,
            contention_table,
            // the +2A/+3 gate array delays MREQ cycles only
            contend_internal: matches!(self.contention_pattern, ContentionPattern::Early),
            contend_io: self.has_io_contention,
        }
    }

    /// The duration of a single frame in nanoseconds.
    pub fn frame_duration_nanos(&self) -> u64 {
        const NANOS_PER_SEC: u64 = 1_000_000_000;
        self.tstates_per_frame as u64 * NANOS_PER_SEC / self.cpu_clock_hz as u64
    }

    /// The duration of a single frame.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_nanos(self.frame_duration_nanos())
    }
}

impl From<MachineModel> for &'static str {
    fn from(model: MachineModel) -> &'static str {
        model.profile().tag
    }
}

impl fmt::Display for MachineModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.profile().tag)
    }
}

impl std::error::Error for ParseMachineModelError {}

impl fmt::Display for ParseMachineModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown machine type: {}", self.0)
    }
}

impl FromStr for MachineModel {
    type Err = ParseMachineModelError;
    /// Parses a machine tag using case-insensitive matching.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        use MachineModel::*;
        if name.eq_ignore_ascii_case("48k") || name.eq_ignore_ascii_case("48") {
            Ok(Spectrum48)
        }
        else if name.eq_ignore_ascii_case("128k") || name.eq_ignore_ascii_case("128") {
            Ok(Spectrum128)
        }
        else if name.eq_ignore_ascii_case("plus2") || name.eq_ignore_ascii_case("+2") {
            Ok(SpectrumPlus2)
        }
        else if name.eq_ignore_ascii_case("plus2a") || name.eq_ignore_ascii_case("+2a") {
            Ok(SpectrumPlus2A)
        }
        else if name.eq_ignore_ascii_case("plus3") || name.eq_ignore_ascii_case("+3") {
            Ok(SpectrumPlus3)
        }
        else if name.eq_ignore_ascii_case("pentagon") {
            Ok(Pentagon)
        }
        else if name.eq_ignore_ascii_case("pentagon1024") || name.eq_ignore_ascii_case("pentagon-1024") {
            Ok(Pentagon1024)
        }
        else if name.eq_ignore_ascii_case("scorpion") {
            Ok(Scorpion)
        }
        else {
            Err(ParseMachineModelError(name.into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_match_the_timing_table() {
        let p = MachineModel::Spectrum48.profile();
        assert_eq!((p.tstates_per_line, p.tstates_per_frame), (224, 69888));
        assert_eq!((p.first_screen_line, p.contention_start_tstate), (64, 14335));
        assert_eq!((p.int_pulse_duration, p.early_int_timing), (32, true));
        let p = MachineModel::Spectrum128.profile();
        assert_eq!((p.tstates_per_line, p.tstates_per_frame), (228, 70908));
        assert_eq!((p.first_screen_line, p.contention_start_tstate), (63, 14361));
        assert_eq!((p.int_pulse_duration, p.early_int_timing), (36, false));
        let p = MachineModel::SpectrumPlus3.profile();
        assert_eq!(p.contention_pattern, ContentionPattern::Late);
        assert!(!p.has_io_contention && p.has_fdc);
        let p = MachineModel::Pentagon.profile();
        assert_eq!((p.tstates_per_line, p.tstates_per_frame), (224, 71680));
        assert_eq!(p.first_screen_line, 80);
        assert!(!p.has_contention);
    }

    #[test]
    fn model_tags_round_trip() {
        use MachineModel::*;
        for model in [Spectrum48, Spectrum128, SpectrumPlus2, SpectrumPlus2A,
                      SpectrumPlus3, Pentagon, Pentagon1024, Scorpion].iter().copied() {
            assert_eq!(model.profile().tag.parse::<MachineModel>().unwrap(), model);
        }
        assert!("quorum".parse::<MachineModel>().is_err());
    }
}
