//! Status word definitions for APDU responses

use std::fmt;

use tracing::Level;

/// Status Word (SW1-SW2) from an APDU response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

impl StatusWord {
    /// Normal processing (90 00)
    pub const SUCCESS: Self = Self::new(0x90, 0x00);
    /// Verification failed, no information given (63 00)
    pub const VERIFICATION_FAILED: Self = Self::new(0x63, 0x00);
    /// Wrong length (67 00)
    pub const WRONG_LENGTH: Self = Self::new(0x67, 0x00);
    /// Security status not satisfied (69 82)
    pub const SECURITY_STATUS_NOT_SATISFIED: Self = Self::new(0x69, 0x82);
    /// Conditions of use not satisfied (69 85)
    pub const CONDITIONS_NOT_SATISFIED: Self = Self::new(0x69, 0x85);
    /// Expected secure messaging data objects missing (69 87)
    pub const SM_DATA_OBJECTS_MISSING: Self = Self::new(0x69, 0x87);
    /// Secure messaging not established (69 88)
    pub const NO_SECURE_MESSAGING: Self = Self::new(0x69, 0x88);
    /// File or application not found (6A 82)
    pub const FILE_NOT_FOUND: Self = Self::new(0x6A, 0x82);
    /// Incorrect P1 or P2 (6A 86)
    pub const INCORRECT_P1P2: Self = Self::new(0x6A, 0x86);
    /// Instruction not supported (6D 00)
    pub const INS_NOT_SUPPORTED: Self = Self::new(0x6D, 0x00);

    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Create from a u16 value (SW1 | SW2)
    pub const fn from_u16(status: u16) -> Self {
        Self {
            sw1: (status >> 8) as u8,
            sw2: status as u8,
        }
    }

    /// Convert to a u16 value (SW1 | SW2)
    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Both status bytes in wire order
    pub const fn to_bytes(&self) -> [u8; 2] {
        [self.sw1, self.sw2]
    }

    /// Check if this status word indicates success (90 00)
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Check if this status word indicates a warning (62 XX or 63 XX)
    pub const fn is_warning(&self) -> bool {
        self.sw1 == 0x62 || self.sw1 == 0x63
    }

    /// Get the appropriate tracing level for this status word
    pub const fn tracing_level(&self) -> Level {
        if self.is_success() {
            Level::DEBUG
        } else if self.is_warning() {
            Level::INFO
        } else {
            Level::WARN
        }
    }

    /// Get a description of this status word
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "Success",
            (0x61, _) => "More data available",
            (0x62, 0x82) => "End of file reached before reading Le bytes",
            (0x63, 0x00) => "Verification failed",
            (0x67, 0x00) => "Wrong length",
            (0x69, 0x82) => "Security status not satisfied",
            (0x69, 0x85) => "Conditions of use not satisfied",
            (0x69, 0x87) => "Expected secure messaging data objects missing",
            (0x69, 0x88) => "Secure messaging data objects incorrect",
            (0x6A, 0x82) => "File or application not found",
            (0x6A, 0x86) => "Incorrect parameters P1-P2",
            (0x6B, 0x00) => "Wrong parameters P1-P2",
            (0x6D, 0x00) => "Instruction code not supported",
            (0x6E, 0x00) => "Class not supported",
            _ => "Unknown status",
        }
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from((sw1, sw2): (u8, u8)) -> Self {
        Self::new(sw1, sw2)
    }
}

impl From<u16> for StatusWord {
    fn from(status: u16) -> Self {
        Self::from_u16(status)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X} ({})", self.sw1, self.sw2, self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_word_conversions() {
        let sw = StatusWord::from_u16(0x6988);
        assert_eq!(sw, StatusWord::NO_SECURE_MESSAGING);
        assert_eq!(sw.to_u16(), 0x6988);
        assert_eq!(sw.to_bytes(), [0x69, 0x88]);
        assert_eq!(StatusWord::from((0x90, 0x00)), StatusWord::SUCCESS);
    }

    #[test]
    fn test_display_and_level() {
        assert_eq!(
            StatusWord::FILE_NOT_FOUND.to_string(),
            "6A82 (File or application not found)"
        );
        assert_eq!(StatusWord::SUCCESS.tracing_level(), Level::DEBUG);
        assert_eq!(StatusWord::VERIFICATION_FAILED.tracing_level(), Level::INFO);
        assert_eq!(StatusWord::WRONG_LENGTH.tracing_level(), Level::WARN);
    }
}
