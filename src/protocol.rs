// SBMS - Battery telemetry decoding and exposition
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Wire format of SBMS telemetry frames
//!
//! A frame is one line of exactly [`FRAME_LEN`] printable bytes. Every field
//! except the charging flag is a big-endian run of base-91 digits, each digit
//! being `byte - 35`:
//!
//! ```text
//! value = sum over i in 0..width of (frame[offset + width - 1 - i] - 35) * 91^i
//! ```
//!
//! The frame is described by [`FRAME_LAYOUT`], a table consumed by a single
//! generic routine in [`crate::decoder`].

use std::fmt;

/// Length of a well-formed frame in bytes
pub const FRAME_LEN: usize = 59;

/// ASCII value of the zero digit
pub const DIGIT_OFFSET: i64 = 35;

/// Radix of the digit packing
pub const RADIX: i64 = 91;

/// Offset of the unpacked charging flag byte
pub const CHARGING_FLAG_OFFSET: usize = 28;

/// Flag byte meaning "charging"; anything else means discharging
pub const CHARGING_FLAG: u8 = b'+';

/// Base year added to the packed year digit
pub const YEAR_BASE: i64 = 2000;

/// Logical field carried by a slice of the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    StateOfCharge,
    /// Cell voltage, zero-based cell index
    CellVoltage(u8),
    InternalTemp,
    ExternalTemp,
    /// Battery current magnitude; the sign lives in the charging flag
    BatteryCurrent,
    /// Array current, zero-based array index
    PvCurrent(u8),
    ExternalLoadCurrent,
    /// Raw ADC reading, zero-based slot
    Adc(u8),
    /// Raw heat reading, zero-based slot
    Heat(u8),
    Status,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Year => write!(f, "year"),
            Field::Month => write!(f, "month"),
            Field::Day => write!(f, "day"),
            Field::Hour => write!(f, "hour"),
            Field::Minute => write!(f, "minute"),
            Field::Second => write!(f, "second"),
            Field::StateOfCharge => write!(f, "soc"),
            Field::CellVoltage(i) => write!(f, "cell{}", i + 1),
            Field::InternalTemp => write!(f, "internal_temp"),
            Field::ExternalTemp => write!(f, "external_temp"),
            Field::BatteryCurrent => write!(f, "battery_current"),
            Field::PvCurrent(i) => write!(f, "pv{}_current", i + 1),
            Field::ExternalLoadCurrent => write!(f, "ext_load_current"),
            Field::Adc(i) => write!(f, "adc{}", i + 2),
            Field::Heat(i) => write!(f, "heat{}", i + 1),
            Field::Status => write!(f, "status"),
        }
    }
}

/// Numeric transform applied to an unpacked integer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Value used as is
    Identity,
    /// `raw + 2000`
    Year,
    /// `raw / 1000` (milli-units to units)
    Milli,
    /// `(raw - 450) / 10` (thermistor encoding to degrees Celsius)
    Celsius,
}

impl Transform {
    /// Apply the transform to a raw unpacked value
    pub fn apply(&self, raw: i64) -> f64 {
        match self {
            Transform::Identity => raw as f64,
            Transform::Year => (raw + YEAR_BASE) as f64,
            Transform::Milli => raw as f64 / 1000.0,
            Transform::Celsius => (raw - 450) as f64 / 10.0,
        }
    }
}

/// Position and encoding of one packed field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field: Field,
    pub offset: usize,
    pub width: usize,
    pub transform: Transform,
}

impl FieldSpec {
    const fn new(field: Field, offset: usize, width: usize, transform: Transform) -> Self {
        Self {
            field,
            offset,
            width,
            transform,
        }
    }

    /// Byte range covered by this field
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.width
    }

    /// Unpack and transform this field from a full frame.
    ///
    /// The frame must be at least `offset + width` bytes long.
    pub fn read(&self, frame: &[u8]) -> f64 {
        self.transform
            .apply(unpack_base91(&frame[self.range()]))
    }
}

/// Packed fields of a frame, in wire order.
///
/// The charging flag at [`CHARGING_FLAG_OFFSET`] is the only byte not listed.
pub const FRAME_LAYOUT: [FieldSpec; 27] = [
    FieldSpec::new(Field::Year, 0, 1, Transform::Year),
    FieldSpec::new(Field::Month, 1, 1, Transform::Identity),
    FieldSpec::new(Field::Day, 2, 1, Transform::Identity),
    FieldSpec::new(Field::Hour, 3, 1, Transform::Identity),
    FieldSpec::new(Field::Minute, 4, 1, Transform::Identity),
    FieldSpec::new(Field::Second, 5, 1, Transform::Identity),
    FieldSpec::new(Field::StateOfCharge, 6, 2, Transform::Identity),
    FieldSpec::new(Field::CellVoltage(0), 8, 2, Transform::Milli),
    FieldSpec::new(Field::CellVoltage(1), 10, 2, Transform::Milli),
    FieldSpec::new(Field::CellVoltage(2), 12, 2, Transform::Milli),
    FieldSpec::new(Field::CellVoltage(3), 14, 2, Transform::Milli),
    FieldSpec::new(Field::CellVoltage(4), 16, 2, Transform::Milli),
    FieldSpec::new(Field::CellVoltage(5), 18, 2, Transform::Milli),
    FieldSpec::new(Field::CellVoltage(6), 20, 2, Transform::Milli),
    FieldSpec::new(Field::CellVoltage(7), 22, 2, Transform::Milli),
    FieldSpec::new(Field::InternalTemp, 24, 2, Transform::Celsius),
    FieldSpec::new(Field::ExternalTemp, 26, 2, Transform::Celsius),
    FieldSpec::new(Field::BatteryCurrent, 29, 3, Transform::Milli),
    FieldSpec::new(Field::PvCurrent(0), 32, 3, Transform::Milli),
    FieldSpec::new(Field::PvCurrent(1), 35, 3, Transform::Milli),
    FieldSpec::new(Field::ExternalLoadCurrent, 38, 3, Transform::Milli),
    FieldSpec::new(Field::Adc(0), 41, 3, Transform::Identity),
    FieldSpec::new(Field::Adc(1), 44, 3, Transform::Identity),
    FieldSpec::new(Field::Adc(2), 47, 3, Transform::Identity),
    FieldSpec::new(Field::Heat(0), 50, 3, Transform::Identity),
    FieldSpec::new(Field::Heat(1), 53, 3, Transform::Identity),
    FieldSpec::new(Field::Status, 56, 3, Transform::Identity),
];

/// Unpack a big-endian run of base-91 digits.
///
/// Bytes below the alphabet produce negative digits; no validation happens
/// here.
pub fn unpack_base91(digits: &[u8]) -> i64 {
    digits
        .iter()
        .fold(0, |acc, &b| acc * RADIX + (b as i64 - DIGIT_OFFSET))
}
