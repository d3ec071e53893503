//! TLV8 encoding/decoding for HAP pairing messages.
//!
//! TLV8 format: [Type: 1 byte][Length: 1 byte][Value: 0-255 bytes]
//! Values longer than 255 bytes are fragmented across consecutive TLVs of
//! the same type. Items keep their order; a type may appear more than once
//! when the occurrences are separated by another item (list-pairings uses
//! `Separator` for this).

use hap_core::error::{PairingError, ParseError};

/// TLV type constants for HAP pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    Method = 0x00,
    Identifier = 0x01,
    Salt = 0x02,
    PublicKey = 0x03,
    Proof = 0x04,
    EncryptedData = 0x05,
    State = 0x06,
    Error = 0x07,
    RetryDelay = 0x08,
    Certificate = 0x09,
    Signature = 0x0A,
    Permissions = 0x0B,
    FragmentData = 0x0C,
    FragmentLast = 0x0D,
    Flags = 0x13,
    Separator = 0xFF,
}

/// Error codes carried in the `Error` TLV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TlvError {
    /// Generic failure, also used for malformed requests.
    Unknown = 0x01,
    /// Setup code or signature did not verify.
    Authentication = 0x02,
    Backoff = 0x03,
    /// No room for another pairing.
    MaxPeers = 0x04,
    /// Too many failed setup attempts.
    MaxTries = 0x05,
    /// Already paired.
    Unavailable = 0x06,
    /// Another pairing is in progress.
    Busy = 0x07,
}

/// Values of the `Method` TLV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Method {
    PairSetup = 0x00,
    PairSetupWithAuth = 0x01,
    PairVerify = 0x02,
    AddPairing = 0x03,
    RemovePairing = 0x04,
    ListPairings = 0x05,
}

/// Parsed TLV8 message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlv8 {
    items: Vec<(u8, Vec<u8>)>,
}

impl Tlv8 {
    /// Create empty TLV8 message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a message holding only a `State` item.
    pub fn with_state(state: u8) -> Self {
        let mut tlv = Self::new();
        tlv.set(TlvType::State, vec![state]);
        tlv
    }

    /// Create an error response: `State` and `Error`, nothing else.
    pub fn error_response(state: u8, error: TlvError) -> Self {
        let mut tlv = Self::with_state(state);
        tlv.set(TlvType::Error, vec![error as u8]);
        tlv
    }

    /// Parse TLV8 from bytes.
    ///
    /// Consecutive TLVs with the same type are concatenated.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let mut items: Vec<(u8, Vec<u8>)> = Vec::new();
        let mut i = 0;

        while i < data.len() {
            if i + 2 > data.len() {
                return Err(ParseError::InvalidFormat(
                    "TLV8: truncated header".to_string(),
                ));
            }

            let typ = data[i];
            let len = data[i + 1] as usize;
            i += 2;

            if i + len > data.len() {
                return Err(ParseError::InvalidFormat(format!(
                    "TLV8: truncated value (expected {} bytes, got {})",
                    len,
                    data.len() - i
                )));
            }

            let value = &data[i..i + len];
            i += len;

            match items.last_mut() {
                Some((last, existing)) if *last == typ => existing.extend_from_slice(value),
                _ => items.push((typ, value.to_vec())),
            }
        }

        Ok(Self { items })
    }

    /// Encode to bytes in insertion order.
    ///
    /// Values > 255 bytes are automatically fragmented across multiple TLVs.
    pub fn encode(&self) -> Vec<u8> {
        let mut result = Vec::new();

        for (typ, value) in &self.items {
            if value.is_empty() {
                result.push(*typ);
                result.push(0);
            } else {
                for chunk in value.chunks(255) {
                    result.push(*typ);
                    result.push(chunk.len() as u8);
                    result.extend_from_slice(chunk);
                }
            }
        }

        result
    }

    /// Get the first value for type.
    pub fn get(&self, typ: TlvType) -> Option<&[u8]> {
        self.get_raw(typ as u8)
    }

    /// Get the first value for raw type.
    pub fn get_raw(&self, typ: u8) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(t, _)| *t == typ)
            .map(|(_, v)| v.as_slice())
    }

    /// Get a required value, or `MissingTlv`.
    pub fn require(&self, typ: TlvType) -> Result<&[u8], PairingError> {
        self.get(typ).ok_or(PairingError::MissingTlv(typ as u8))
    }

    /// Get a required fixed-size value.
    pub fn require_array<const N: usize>(&self, typ: TlvType) -> Result<[u8; N], PairingError> {
        let value = self.require(typ)?;
        value
            .try_into()
            .map_err(|_| PairingError::InvalidTlvLength {
                tag: typ as u8,
                expected: N,
                actual: value.len(),
            })
    }

    /// Set value for type, replacing its first occurrence or appending.
    pub fn set(&mut self, typ: TlvType, value: impl Into<Vec<u8>>) {
        self.set_raw(typ as u8, value);
    }

    /// Set value for raw type.
    pub fn set_raw(&mut self, typ: u8, value: impl Into<Vec<u8>>) {
        let value = value.into();
        match self.items.iter_mut().find(|(t, _)| *t == typ) {
            Some((_, existing)) => *existing = value,
            None => self.items.push((typ, value)),
        }
    }

    /// Append an item even if the type is already present.
    pub fn push(&mut self, typ: TlvType, value: impl Into<Vec<u8>>) {
        self.items.push((typ as u8, value.into()));
    }

    /// Check if type is present.
    pub fn contains(&self, typ: TlvType) -> bool {
        self.get(typ).is_some()
    }

    /// Iterate items in order as `(type, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &[u8])> {
        self.items.iter().map(|(t, v)| (*t, v.as_slice()))
    }

    /// Split the message into groups delimited by `Separator` items.
    pub fn split_records(&self) -> Vec<Tlv8> {
        let mut records = vec![Tlv8::new()];
        for (typ, value) in &self.items {
            if *typ == TlvType::Separator as u8 {
                records.push(Tlv8::new());
            } else if let Some(current) = records.last_mut() {
                current.items.push((*typ, value.clone()));
            }
        }
        records.retain(|r| !r.items.is_empty());
        records
    }

    /// Get state value (single byte).
    pub fn state(&self) -> Option<u8> {
        self.get(TlvType::State).and_then(|v| v.first().copied())
    }

    /// Get error value (single byte).
    pub fn error(&self) -> Option<u8> {
        self.get(TlvType::Error).and_then(|v| v.first().copied())
    }

    /// Get method value (single byte).
    pub fn method(&self) -> Option<u8> {
        self.get(TlvType::Method).and_then(|v| v.first().copied())
    }

    /// Get retry delay value in seconds.
    /// The value is little-endian encoded (1-2 bytes).
    pub fn retry_delay(&self) -> Option<u16> {
        self.get(TlvType::RetryDelay).map(|v| match v.len() {
            0 => 0,
            1 => v[0] as u16,
            _ => u16::from_le_bytes([v[0], v[1]]),
        })
    }

    /// Get error description string.
    pub fn error_description(&self) -> Option<String> {
        let error_code = self.error()?;
        let error_name = match TlvError::from_byte(error_code) {
            Some(TlvError::Unknown) => "Unknown",
            Some(TlvError::Authentication) => "Authentication",
            Some(TlvError::Backoff) => "Backoff (rate limited)",
            Some(TlvError::MaxPeers) => "MaxPeers",
            Some(TlvError::MaxTries) => "MaxTries",
            Some(TlvError::Unavailable) => "Unavailable",
            Some(TlvError::Busy) => "Busy",
            None => "Unknown error code",
        };

        let mut desc = format!("Error 0x{:02x}: {}", error_code, error_name);

        if let Some(delay) = self.retry_delay() {
            if delay > 0 {
                desc.push_str(&format!(" (retry after {} seconds)", delay));
            }
        }

        Some(desc)
    }

    /// Create M1 pair-setup request.
    pub fn pair_setup_m1() -> Self {
        let mut tlv = Self::with_state(0x01);
        tlv.set(TlvType::Method, vec![Method::PairSetup as u8]);
        tlv
    }

    /// Create M1 pair-verify request with public key.
    pub fn pair_verify_m1(public_key: &[u8; 32]) -> Self {
        let mut tlv = Self::with_state(0x01);
        tlv.set(TlvType::PublicKey, public_key.to_vec());
        tlv
    }
}

impl TlvType {
    /// Convert from raw byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Method),
            0x01 => Some(Self::Identifier),
            0x02 => Some(Self::Salt),
            0x03 => Some(Self::PublicKey),
            0x04 => Some(Self::Proof),
            0x05 => Some(Self::EncryptedData),
            0x06 => Some(Self::State),
            0x07 => Some(Self::Error),
            0x08 => Some(Self::RetryDelay),
            0x09 => Some(Self::Certificate),
            0x0A => Some(Self::Signature),
            0x0B => Some(Self::Permissions),
            0x0C => Some(Self::FragmentData),
            0x0D => Some(Self::FragmentLast),
            0x13 => Some(Self::Flags),
            0xFF => Some(Self::Separator),
            _ => None,
        }
    }
}

impl TlvError {
    /// Convert from raw byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Unknown),
            0x02 => Some(Self::Authentication),
            0x03 => Some(Self::Backoff),
            0x04 => Some(Self::MaxPeers),
            0x05 => Some(Self::MaxTries),
            0x06 => Some(Self::Unavailable),
            0x07 => Some(Self::Busy),
            _ => None,
        }
    }
}

impl Method {
    /// Convert from raw byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::PairSetup),
            0x01 => Some(Self::PairSetupWithAuth),
            0x02 => Some(Self::PairVerify),
            0x03 => Some(Self::AddPairing),
            0x04 => Some(Self::RemovePairing),
            0x05 => Some(Self::ListPairings),
            _ => None,
        }
    }
}
