//! Memory address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed virtual address in the target process
///
/// Requests carry a machine-word address; this wrapper keeps addresses from
/// being mixed up with lengths and offsets on the way there.
///
/// ## Example
///
/// ```rust
/// use memgate_core::types::Address;
///
/// let addr = Address::new(0x1000);
/// let next_addr = addr + 0x100; // Add offset
/// assert_eq!(next_addr.value(), 0x1100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    ///
    /// Module lookups report "not found" with this value.
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Whether this is the null address
    pub const fn is_zero(self) -> bool
    {
        self.0 == 0
    }

    /// The address as a native machine word, as the request structures expect it
    ///
    /// `None` when the address does not fit, which only happens on 32-bit
    /// targets.
    pub fn as_usize(self) -> Option<usize>
    {
        usize::try_from(self.0).ok()
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ```rust
    /// use memgate_core::types::Address;
    ///
    /// let addr = Address::new(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::new(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None); // Overflow
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Add an offset to this address, saturating at the maximum value
    pub fn saturating_add(self, offset: u64) -> Self
    {
        Address(self.0.saturating_add(offset))
    }

    /// Parse a hexadecimal address as typed by an operator
    ///
    /// Surrounding whitespace and an optional `0x`/`0X` prefix are accepted.
    /// Returns `None` for empty input, non-hex digits and the null address,
    /// which is never a readable location.
    ///
    /// ```rust
    /// use memgate_core::types::Address;
    ///
    /// assert_eq!(Address::parse_hex(" 0x4021B810 "), Some(Address::new(0x4021_b810)));
    /// assert_eq!(Address::parse_hex("7f00"), Some(Address::new(0x7f00)));
    /// assert_eq!(Address::parse_hex("0x0"), None);
    /// assert_eq!(Address::parse_hex("zz"), None);
    /// ```
    pub fn parse_hex(input: &str) -> Option<Self>
    {
        let trimmed = input.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty() {
            return None;
        }

        match u64::from_str_radix(digits, 16) {
            Ok(0) | Err(_) => None,
            Ok(value) => Some(Address(value)),
        }
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
