//! Accessory pairing configuration.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// Default number of failed pair-setup attempts before the accessory refuses
/// further attempts with `MaxTries`.
pub const DEFAULT_MAX_SETUP_ATTEMPTS: u32 = 100;

/// Default number of controller pairings an accessory keeps.
pub const DEFAULT_MAX_PAIRINGS: usize = 16;

/// Eight-digit setup code shared out of band with the controller.
///
/// Stored in its canonical `XXX-XX-XXX` form, which is also the SRP password.
#[derive(Clone, PartialEq, Eq)]
pub struct SetupCode(String);

impl SetupCode {
    /// Parse a setup code from `XXX-XX-XXX` or eight bare digits.
    pub fn parse(code: &str) -> Result<Self, ParseError> {
        let digits: Vec<u8> = match code.len() {
            10 => {
                let bytes = code.as_bytes();
                if bytes[3] != b'-' || bytes[6] != b'-' {
                    return Err(ParseError::InvalidFormat(
                        "setup code must look like XXX-XX-XXX".to_string(),
                    ));
                }
                bytes
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != 3 && *i != 6)
                    .map(|(_, b)| *b)
                    .collect()
            }
            8 => code.as_bytes().to_vec(),
            n => {
                return Err(ParseError::InvalidFormat(format!(
                    "setup code has {} characters",
                    n
                )))
            }
        };

        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(ParseError::InvalidValue(
                "setup code must contain only digits".to_string(),
            ));
        }

        let d = |range: std::ops::Range<usize>| String::from_utf8_lossy(&digits[range]).into_owned();
        Ok(Self(format!("{}-{}-{}", d(0..3), d(3..5), d(5..8))))
    }

    /// Canonical `XXX-XX-XXX` form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bytes used as the SRP password.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl FromStr for SetupCode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SetupCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SetupCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SetupCode(***-**-***)")
    }
}

/// Pairing behaviour of an accessory.
#[derive(Debug, Clone)]
pub struct PairingConfig {
    pub setup_code: SetupCode,
    /// Failed pair-setup attempts allowed before answering `MaxTries`.
    pub max_setup_attempts: u32,
    /// Answer pair-setup with `Unavailable` once any controller is paired.
    pub reject_setup_when_paired: bool,
}

impl PairingConfig {
    /// Configuration for the given setup code with default limits.
    pub fn new(setup_code: SetupCode) -> Self {
        Self {
            setup_code,
            max_setup_attempts: DEFAULT_MAX_SETUP_ATTEMPTS,
            reject_setup_when_paired: true,
        }
    }

    /// Parse the setup code and build a default configuration.
    pub fn with_setup_code(code: &str) -> Result<Self, ParseError> {
        Ok(Self::new(SetupCode::parse(code)?))
    }

    /// Configuration that lets further controllers run pair-setup while paired.
    ///
    /// Useful for test rigs that pair several controllers in a row.
    pub fn permissive(setup_code: SetupCode) -> Self {
        Self {
            reject_setup_when_paired: false,
            ..Self::new(setup_code)
        }
    }

    pub fn max_setup_attempts(mut self, attempts: u32) -> Self {
        self.max_setup_attempts = attempts;
        self
    }

    pub fn reject_setup_when_paired(mut self, enabled: bool) -> Self {
        self.reject_setup_when_paired = enabled;
        self
    }
}
