//! CC line terminations and their decoding from the comparator and BC_LVL readings.
use crate::registers::{HostCurrent, Status0};

/// The termination seen on a CC line.
///
/// While sinking, the `Rd*` values denote the current level of the partner's Rp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CcTermination {
    /// Nothing attached.
    Open,
    /// Cable or accessory resistance.
    Ra,
    /// Sink termination, or default USB current while sinking.
    RdUsb,
    /// 1.5 A advertised.
    Rd1p5,
    /// 3.0 A advertised.
    Rd3p0,
}

impl CcTermination {
    /// Decode a reading on a line with our pull-down applied.
    pub fn decode_as_sink(status0: Status0) -> Self {
        match status0.bc_lvl() {
            0b00 => Self::Open,
            0b01 => Self::RdUsb,
            0b10 => Self::Rd1p5,
            _ => Self::Rd3p0,
        }
    }

    /// Decode a reading on a line with our pull-up applied.
    ///
    /// Above the MDAC threshold the line is open. Below 200 mV it is Ra, otherwise Rd.
    pub fn decode_as_source(status0: Status0) -> Self {
        if status0.comp() {
            Self::Open
        } else if status0.bc_lvl() == 0b00 {
            Self::Ra
        } else {
            Self::RdUsb
        }
    }

    /// Whether this is a sink termination, or a source termination when read as sink.
    pub fn is_rd(&self) -> bool {
        matches!(self, Self::RdUsb | Self::Rd1p5 | Self::Rd3p0)
    }

    /// The advertised source current, for terminations read as sink.
    pub fn source_current(&self) -> Option<SourceCurrent> {
        match self {
            Self::RdUsb => Some(SourceCurrent::Default),
            Self::Rd1p5 => Some(SourceCurrent::Current1A5),
            Self::Rd3p0 => Some(SourceCurrent::Current3A0),
            _ => None,
        }
    }
}

/// Current that a source advertises with its Rp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SourceCurrent {
    /// Default USB power.
    #[default]
    Default,
    /// 1.5 A.
    Current1A5,
    /// 3.0 A.
    Current3A0,
}

impl From<SourceCurrent> for HostCurrent {
    fn from(value: SourceCurrent) -> Self {
        match value {
            SourceCurrent::Default => HostCurrent::Default,
            SourceCurrent::Current1A5 => HostCurrent::Medium,
            SourceCurrent::Current3A0 => HostCurrent::High,
        }
    }
}

impl SourceCurrent {
    /// The MDAC setting that separates Rd from an open line for this pull-up current.
    pub fn rd_threshold(self) -> u8 {
        match self {
            // 1.6 V
            SourceCurrent::Default | SourceCurrent::Current1A5 => 0x26,
            // 2.6 V
            SourceCurrent::Current3A0 => 0x3E,
        }
    }
}
