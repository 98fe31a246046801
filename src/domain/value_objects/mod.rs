//! Value Objects for the marketplace

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

/// Money value object. Every amount in the marketplace is in Algerian dinar.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);
    pub const CURRENCY: &'static str = "DZD";

    pub fn new(amount: Decimal) -> Self { Self(amount) }
    pub fn dzd(units: i64) -> Self { Self(Decimal::from(units)) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn is_zero(&self) -> bool { self.0.is_zero() }
    pub fn multiply(&self, qty: u32) -> Money { Money(self.0 * Decimal::from(qty)) }

    /// `self - other`, clamped at zero.
    pub fn saturating_sub(&self, other: Money) -> Money {
        if other.0 >= self.0 { Money::ZERO } else { Money(self.0 - other.0) }
    }

    pub fn round_cents(&self) -> Money { Money(self.0.round_dp(2)) }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money { Money(self.0 + rhs.0) }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) { self.0 += rhs.0; }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money { Money(self.0 - rhs.0) }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money { iter.fold(Money::ZERO, Add::add) }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money { iter.copied().sum() }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self { Self(amount) }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{} {}", self.0.normalize(), Self::CURRENCY) }
}

/// National mobile number: `0`, then 5, 6 or 7, then eight digits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn parse(raw: &str) -> Result<Self, PhoneError> {
        let digits: String = raw.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
        if digits.is_empty() { return Err(PhoneError::Empty); }
        let bytes = digits.as_bytes();
        let well_formed = bytes.len() == 10
            && bytes[0] == b'0'
            && matches!(bytes[1], b'5' | b'6' | b'7')
            && bytes.iter().all(u8::is_ascii_digit);
        if !well_formed { return Err(PhoneError::Malformed(raw.to_string())); }
        Ok(Self(digits))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl TryFrom<String> for PhoneNumber {
    type Error = PhoneError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::parse(&value) }
}

impl From<PhoneNumber> for String {
    fn from(value: PhoneNumber) -> Self { value.0 }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhoneError {
    #[error("phone number is required")]
    Empty,
    #[error("invalid phone number '{0}': expected 0 followed by 5, 6 or 7 and 8 digits")]
    Malformed(String),
}

const WILAYA_NAMES: [&str; 58] = [
    "Adrar", "Chlef", "Laghouat", "Oum El Bouaghi", "Batna", "Bejaia", "Biskra", "Bechar",
    "Blida", "Bouira", "Tamanrasset", "Tebessa", "Tlemcen", "Tiaret", "Tizi Ouzou", "Alger",
    "Djelfa", "Jijel", "Setif", "Saida", "Skikda", "Sidi Bel Abbes", "Annaba", "Guelma",
    "Constantine", "Medea", "Mostaganem", "M'Sila", "Mascara", "Ouargla", "Oran", "El Bayadh",
    "Illizi", "Bordj Bou Arreridj", "Boumerdes", "El Tarf", "Tindouf", "Tissemsilt", "El Oued",
    "Khenchela", "Souk Ahras", "Tipaza", "Mila", "Ain Defla", "Naama", "Ain Temouchent",
    "Ghardaia", "Relizane", "Timimoun", "Bordj Badji Mokhtar", "Ouled Djellal", "Beni Abbes",
    "In Salah", "In Guezzam", "Touggourt", "Djanet", "El M'Ghair", "El Meniaa",
];

/// Wilaya (province). The set is closed: official codes 1 to 58.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Wilaya(u8);

impl Wilaya {
    pub fn from_code(code: u8) -> Result<Self, WilayaError> {
        if (1..=WILAYA_NAMES.len() as u8).contains(&code) { Ok(Self(code)) } else { Err(WilayaError::UnknownCode(code)) }
    }
    pub fn code(&self) -> u8 { self.0 }
    pub fn name(&self) -> &'static str { WILAYA_NAMES[usize::from(self.0) - 1] }
}

/// Lowercase, strip accents and everything that is not a letter or digit.
fn fold_name(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            'à' | 'á' | 'â' | 'ä' | 'À' | 'Â' | 'Ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' => 'e',
            'î' | 'ï' | 'Î' | 'Ï' => 'i',
            'ô' | 'ö' | 'Ô' => 'o',
            'û' | 'ü' | 'ù' | 'Û' => 'u',
            'ç' | 'Ç' => 'c',
            other => other.to_ascii_lowercase(),
        })
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

impl FromStr for Wilaya {
    type Err = WilayaError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() { return Err(WilayaError::Empty); }
        if let Ok(code) = trimmed.parse::<u8>() { return Self::from_code(code); }
        let folded = fold_name(trimmed);
        if matches!(folded.as_str(), "algiers" | "eldjazair" | "alger") { return Ok(Self(16)); }
        WILAYA_NAMES
            .iter()
            .position(|name| fold_name(name) == folded)
            .map(|idx| Self(idx as u8 + 1))
            .ok_or_else(|| WilayaError::UnknownName(trimmed.to_string()))
    }
}

impl TryFrom<String> for Wilaya {
    type Error = WilayaError;
    fn try_from(value: String) -> Result<Self, Self::Error> { value.parse() }
}

impl From<Wilaya> for String {
    fn from(value: Wilaya) -> Self { value.name().to_string() }
}

impl fmt::Display for Wilaya {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WilayaError {
    #[error("wilaya is required")]
    Empty,
    #[error("unknown wilaya code {0}")]
    UnknownCode(u8),
    #[error("unknown wilaya '{0}'")]
    UnknownName(String),
}

/// Parcel tracking number handed to delivery agents, e.g. `TRK-240615-9F3A0C11`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingNumber(String);

impl TrackingNumber {
    pub fn generate(at: DateTime<Utc>) -> Self {
        Self(format!("TRK-{}-{:08X}", at.format("%y%m%d"), rand::random::<u32>()))
    }
    pub fn from_stored(value: impl Into<String>) -> Self { Self(value.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for TrackingNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}
