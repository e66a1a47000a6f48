use std::cmp::Ordering;
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;

/// Largest value representable in 256 bits, in decimal.
pub const UINT256_MAX: &str =
    "115792089237316195423570985008687907853269984665640564039457584007913129639935";

/// Unsigned 256-bit integer held as a canonical decimal string (no sign,
/// no leading zeros).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uint256(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    Empty,
    InvalidDigit(char),
    Overflow,
}

impl fmt::Display for AmountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmountError::Empty => write!(f, "amount is empty"),
            AmountError::InvalidDigit(ch) => write!(f, "invalid digit '{ch}' in amount"),
            AmountError::Overflow => write!(f, "amount does not fit in 256 bits"),
        }
    }
}

impl StdError for AmountError {}

impl Uint256 {
    pub fn zero() -> Self {
        Uint256("0".to_string())
    }

    pub fn parse_decimal(text: &str) -> Result<Self, AmountError> {
        if text.is_empty() {
            return Err(AmountError::Empty);
        }
        if let Some(ch) = text.chars().find(|ch| !ch.is_ascii_digit()) {
            return Err(AmountError::InvalidDigit(ch));
        }
        let amount = canonical(text);
        if compare_decimal(amount.as_str(), UINT256_MAX) == Ordering::Greater {
            return Err(AmountError::Overflow);
        }
        Ok(amount)
    }

    /// Parses a hex quantity such as an `eth_call` result. `0x` alone is zero.
    pub fn from_hex(text: &str) -> Result<Self, AmountError> {
        if text.is_empty() {
            return Err(AmountError::Empty);
        }
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        // Quantities may drop the leading zero nibble.
        let padded = if digits.len() % 2 == 1 {
            format!("0{digits}")
        } else {
            digits.to_string()
        };
        let bytes = hex::decode(&padded).map_err(|err| match err {
            hex::FromHexError::InvalidHexCharacter { c, .. } => AmountError::InvalidDigit(c),
            _ => AmountError::Empty,
        })?;
        let first = bytes.iter().position(|byte| *byte != 0).unwrap_or(bytes.len());
        let bytes = &bytes[first..];
        if bytes.len() > 32 {
            return Err(AmountError::Overflow);
        }

        // Little-endian limbs in base 1e9.
        let mut limbs: Vec<u64> = vec![0];
        for byte in bytes {
            let mut carry = u64::from(*byte);
            for limb in limbs.iter_mut() {
                let value = *limb * 256 + carry;
                *limb = value % 1_000_000_000;
                carry = value / 1_000_000_000;
            }
            while carry > 0 {
                limbs.push(carry % 1_000_000_000);
                carry /= 1_000_000_000;
            }
        }

        let mut decimal = String::new();
        for (index, limb) in limbs.iter().rev().enumerate() {
            if index == 0 {
                decimal.push_str(&limb.to_string());
            } else {
                decimal.push_str(&format!("{limb:09}"));
            }
        }
        Ok(canonical(&decimal))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == "0"
    }
}

fn canonical(digits: &str) -> Uint256 {
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        Uint256::zero()
    } else {
        Uint256(trimmed.to_string())
    }
}

fn compare_decimal(left: &str, right: &str) -> Ordering {
    left.len()
        .cmp(&right.len())
        .then_with(|| left.cmp(right))
}

impl Ord for Uint256 {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_decimal(&self.0, &other.0)
    }
}

impl PartialOrd for Uint256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Uint256 {
    type Err = AmountError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse_decimal(text)
    }
}

impl fmt::Display for Uint256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
