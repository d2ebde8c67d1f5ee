//! Checked fixed-width integers and binary pack/unpack.
//!
//! SDL integers are 8/16/32/64 bits wide, signed or unsigned, and every
//! arithmetic operation is range-checked: overflow, division by zero, and
//! out-of-range shifts raise `OutOfRange` instead of wrapping. Values are
//! carried in `u64`/`i64` with an explicit width so the constant folder and
//! the generated code share one implementation.

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::runtime::error::{ErrorKind, RtResult, RuntimeError};

/// Byte order for binary pack/unpack.
///
/// `Network` is big-endian on the wire; `Host` resolves to the machine order
/// at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, Serialize, Deserialize)]
pub enum ByteOrder {
    Little,
    Big,
    #[default]
    Network,
    Host,
}

impl ByteOrder {
    /// Resolves `Network`/`Host` aliases to a concrete order.
    pub fn resolve(self) -> Self {
        match self {
            Self::Network => Self::Big,
            Self::Host => {
                if cfg!(target_endian = "big") {
                    Self::Big
                } else {
                    Self::Little
                }
            }
            other => other,
        }
    }
}

/// Bit order for bitfield unpacking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, Serialize, Deserialize)]
pub enum BitOrder {
    #[default]
    Lsb0,
    Msb0,
}

/// Integer widths legal in SDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Width {
    W8,
    W16,
    W32,
    W64,
}

impl Width {
    /// Returns the width for a bit count, or `None` for anything but 8/16/32/64.
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            8 => Some(Self::W8),
            16 => Some(Self::W16),
            32 => Some(Self::W32),
            64 => Some(Self::W64),
            _ => None,
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            Self::W8 => 8,
            Self::W16 => 16,
            Self::W32 => 32,
            Self::W64 => 64,
        }
    }

    pub fn bytes(self) -> usize {
        usize::from(self.bits() / 8)
    }

    /// Inclusive maximum for an unsigned value of this width.
    pub fn unsigned_max(self) -> u64 {
        match self {
            Self::W8 => u64::from(u8::MAX),
            Self::W16 => u64::from(u16::MAX),
            Self::W32 => u64::from(u32::MAX),
            Self::W64 => u64::MAX,
        }
    }

    /// Inclusive signed range for this width.
    pub fn signed_range(self) -> (i64, i64) {
        match self {
            Self::W8 => (i64::from(i8::MIN), i64::from(i8::MAX)),
            Self::W16 => (i64::from(i16::MIN), i64::from(i16::MAX)),
            Self::W32 => (i64::from(i32::MIN), i64::from(i32::MAX)),
            Self::W64 => (i64::MIN, i64::MAX),
        }
    }
}

fn overflow(what: &str) -> RuntimeError {
    RuntimeError::out_of_range(format!("integer overflow in {what}"))
}

/// Unsigned integer with checked arithmetic at a fixed width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UInt {
    value: u64,
    width: Width,
}

impl UInt {
    /// Creates a value, checking it lies inside the width's range.
    pub fn new(value: u64, width: Width) -> RtResult<Self> {
        if value > width.unsigned_max() {
            return Err(RuntimeError::out_of_range(format!(
                "value {value} outside range of uint{bits}",
                bits = width.bits()
            )));
        }
        Ok(Self { value, width })
    }

    pub fn value(self) -> u64 {
        self.value
    }

    pub fn width(self) -> Width {
        self.width
    }

    fn wrap(self, value: Option<u64>, what: &str) -> RtResult<Self> {
        match value {
            Some(v) if v <= self.width.unsigned_max() => Ok(Self { value: v, width: self.width }),
            _ => Err(overflow(what)),
        }
    }

    pub fn add(self, rhs: Self) -> RtResult<Self> {
        self.wrap(self.value.checked_add(rhs.value), "addition")
    }

    pub fn sub(self, rhs: Self) -> RtResult<Self> {
        self.wrap(self.value.checked_sub(rhs.value), "subtraction")
    }

    pub fn mul(self, rhs: Self) -> RtResult<Self> {
        self.wrap(self.value.checked_mul(rhs.value), "multiplication")
    }

    pub fn div(self, rhs: Self) -> RtResult<Self> {
        if rhs.value == 0 {
            return Err(RuntimeError::out_of_range("division by zero"));
        }
        self.wrap(self.value.checked_div(rhs.value), "division")
    }

    pub fn rem(self, rhs: Self) -> RtResult<Self> {
        if rhs.value == 0 {
            return Err(RuntimeError::out_of_range("modulo by zero"));
        }
        self.wrap(self.value.checked_rem(rhs.value), "modulo")
    }

    pub fn pow(self, exp: u32) -> RtResult<Self> {
        self.wrap(self.value.checked_pow(exp), "power")
    }

    pub fn shl(self, amount: u64) -> RtResult<Self> {
        if amount >= u64::from(self.width.bits()) {
            return Err(RuntimeError::out_of_range(format!("shift of {amount} out of range")));
        }
        self.wrap(self.value.checked_shl(u32::try_from(amount).expect("amount < 64")), "shift left")
    }

    pub fn shr(self, amount: u64) -> RtResult<Self> {
        if amount >= u64::from(self.width.bits()) {
            return Err(RuntimeError::out_of_range(format!("shift of {amount} out of range")));
        }
        Ok(Self {
            value: self.value >> amount,
            width: self.width,
        })
    }

    /// Serializes to the width's byte count in the given order.
    pub fn pack(self, order: ByteOrder) -> Vec<u8> {
        let bytes = match order.resolve() {
            ByteOrder::Little => self.value.to_le_bytes(),
            _ => self.value.to_be_bytes(),
        };
        match order.resolve() {
            ByteOrder::Little => bytes[..self.width.bytes()].to_vec(),
            _ => bytes[8 - self.width.bytes()..].to_vec(),
        }
    }

    /// Reads a value of the given width from the front of `data`.
    ///
    /// Returns the value and the number of bytes consumed. The caller is
    /// responsible for having waited until enough input is available.
    pub fn unpack(data: &[u8], width: Width, order: ByteOrder) -> RtResult<(Self, usize)> {
        let n = width.bytes();
        if data.len() < n {
            return Err(RuntimeError::new(
                ErrorKind::InvalidArgument,
                format!("insufficient data to unpack uint{bits}", bits = width.bits()),
            ));
        }
        let mut buf = [0_u8; 8];
        match order.resolve() {
            ByteOrder::Little => buf[..n].copy_from_slice(&data[..n]),
            _ => buf[8 - n..].copy_from_slice(&data[..n]),
        }
        let value = match order.resolve() {
            ByteOrder::Little => u64::from_le_bytes(buf),
            _ => u64::from_be_bytes(buf),
        };
        Ok((Self { value, width }, n))
    }
}

/// Signed integer with checked arithmetic at a fixed width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SInt {
    value: i64,
    width: Width,
}

impl SInt {
    pub fn new(value: i64, width: Width) -> RtResult<Self> {
        let (lo, hi) = width.signed_range();
        if value < lo || value > hi {
            return Err(RuntimeError::out_of_range(format!(
                "value {value} outside range of int{bits}",
                bits = width.bits()
            )));
        }
        Ok(Self { value, width })
    }

    pub fn value(self) -> i64 {
        self.value
    }

    pub fn width(self) -> Width {
        self.width
    }

    fn wrap(self, value: Option<i64>, what: &str) -> RtResult<Self> {
        let (lo, hi) = self.width.signed_range();
        match value {
            Some(v) if v >= lo && v <= hi => Ok(Self { value: v, width: self.width }),
            _ => Err(overflow(what)),
        }
    }

    pub fn add(self, rhs: Self) -> RtResult<Self> {
        self.wrap(self.value.checked_add(rhs.value), "addition")
    }

    pub fn sub(self, rhs: Self) -> RtResult<Self> {
        self.wrap(self.value.checked_sub(rhs.value), "subtraction")
    }

    pub fn mul(self, rhs: Self) -> RtResult<Self> {
        self.wrap(self.value.checked_mul(rhs.value), "multiplication")
    }

    pub fn div(self, rhs: Self) -> RtResult<Self> {
        if rhs.value == 0 {
            return Err(RuntimeError::out_of_range("division by zero"));
        }
        self.wrap(self.value.checked_div(rhs.value), "division")
    }

    pub fn rem(self, rhs: Self) -> RtResult<Self> {
        if rhs.value == 0 {
            return Err(RuntimeError::out_of_range("modulo by zero"));
        }
        self.wrap(self.value.checked_rem(rhs.value), "modulo")
    }

    pub fn neg(self) -> RtResult<Self> {
        self.wrap(self.value.checked_neg(), "negation")
    }

    pub fn pow(self, exp: u32) -> RtResult<Self> {
        self.wrap(self.value.checked_pow(exp), "power")
    }

    pub fn pack(self, order: ByteOrder) -> Vec<u8> {
        // Two's-complement representation is shared with the unsigned path.
        let unsigned = UInt {
            value: self.value as u64 & mask(self.width),
            width: self.width,
        };
        unsigned.pack(order)
    }

    pub fn unpack(data: &[u8], width: Width, order: ByteOrder) -> RtResult<(Self, usize)> {
        let (raw, n) = UInt::unpack(data, width, order)?;
        Ok((Self { value: sign_extend(raw.value, width), width }, n))
    }
}

fn mask(width: Width) -> u64 {
    width.unsigned_max()
}

/// Sign-extends a two's-complement value of the given width to 64 bits.
fn sign_extend(raw: u64, width: Width) -> i64 {
    match width {
        Width::W8 => i64::from(raw as u8 as i8),
        Width::W16 => i64::from(raw as u16 as i16),
        Width::W32 => i64::from(raw as u32 as i32),
        Width::W64 => raw as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_overflow_raises() {
        let a = UInt::new(250, Width::W8).unwrap();
        let b = UInt::new(10, Width::W8).unwrap();
        let err = a.add(b).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfRange);
    }

    #[test]
    fn division_by_zero_raises() {
        let a = UInt::new(1, Width::W32).unwrap();
        let b = UInt::new(0, Width::W32).unwrap();
        assert_eq!(a.div(b).unwrap_err().kind, ErrorKind::OutOfRange);
    }

    #[test]
    fn shift_out_of_range_raises() {
        let a = UInt::new(1, Width::W16).unwrap();
        assert!(a.shl(16).is_err());
        assert_eq!(a.shl(15).unwrap().value(), 0x8000);
    }

    #[test]
    fn signed_narrowing_checked() {
        assert!(SInt::new(128, Width::W8).is_err());
        assert!(SInt::new(-128, Width::W8).is_ok());
    }

    #[test]
    fn pack_unpack_round_trip_all_widths_and_orders() {
        for width in [Width::W8, Width::W16, Width::W32, Width::W64] {
            for order in [ByteOrder::Little, ByteOrder::Big, ByteOrder::Network] {
                let max = width.unsigned_max();
                for value in [0, 1, max / 2, max] {
                    let v = UInt::new(value, width).unwrap();
                    let packed = v.pack(order);
                    assert_eq!(packed.len(), width.bytes());
                    let (back, used) = UInt::unpack(&packed, width, order).unwrap();
                    assert_eq!(used, width.bytes());
                    assert_eq!(back, v, "uint{b} {value} via {order}", b = width.bits());
                }
                let (lo, hi) = width.signed_range();
                for value in [lo, -1, 0, 1, hi] {
                    let v = SInt::new(value, width).unwrap();
                    let (back, _) = SInt::unpack(&v.pack(order), width, order).unwrap();
                    assert_eq!(back, v, "int{b} {value} via {order}", b = width.bits());
                }
            }
        }
    }

    #[test]
    fn network_order_is_big_endian() {
        let v = UInt::new(0x0102, Width::W16).unwrap();
        assert_eq!(v.pack(ByteOrder::Network), vec![0x01, 0x02]);
        assert_eq!(v.pack(ByteOrder::Little), vec![0x02, 0x01]);
    }
}
