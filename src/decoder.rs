// SBMS - Battery telemetry decoding and exposition
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Decoder module
//!
//! Turns one raw frame into a [`Reading`]. Decoding is a pure function of the
//! record bytes: the only check performed is the fixed frame length, decoded
//! magnitudes are trusted as sent by the device.

use crate::error::DecodeError;
use crate::protocol::{Field, CHARGING_FLAG, CHARGING_FLAG_OFFSET, FRAME_LAYOUT, FRAME_LEN};
use chrono::{DateTime, Months, NaiveDate, TimeDelta, Utc};

/// Number of battery cells reported per frame
pub const CELL_COUNT: usize = 8;

/// Number of solar arrays reported per frame
pub const PV_COUNT: usize = 2;

/// Number of raw ADC readings per frame
pub const ADC_COUNT: usize = 3;

/// Number of raw heat readings per frame
pub const HEAT_COUNT: usize = 2;

/// One decoded telemetry sample
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Device clock at sampling time
    pub timestamp: DateTime<Utc>,
    /// State of charge in percent
    pub state_of_charge: i64,
    /// Cell voltages in volts
    pub cell_volts: [f64; CELL_COUNT],
    /// Internal thermistor in degrees Celsius
    pub internal_temp: f64,
    /// External thermistor in degrees Celsius
    pub external_temp: f64,
    /// Whether the flag byte reported charging
    pub charging: bool,
    /// Battery current in amperes, positive while charging
    pub battery_current: f64,
    /// Array currents in amperes
    pub pv_current: [f64; PV_COUNT],
    /// External load current in amperes
    pub external_load_current: f64,
    /// Raw ADC values for channels 2, 3 and 4
    pub adc: [i64; ADC_COUNT],
    /// Raw heat values for channels 1 and 2
    pub heat: [i64; HEAT_COUNT],
    /// Device status code
    pub status: i64,
}

impl Reading {
    /// Total battery voltage (sum of the cell voltages)
    pub fn battery_volts(&self) -> f64 {
        self.cell_volts.iter().sum()
    }

    /// Battery power in watts, positive while charging
    pub fn battery_watts(&self) -> f64 {
        self.battery_current * self.battery_volts()
    }

    /// Power delivered by one array in watts
    pub fn pv_watts(&self, index: usize) -> f64 {
        self.pv_current[index] * self.battery_volts()
    }

    /// Combined current of all arrays
    pub fn pv_amperes_combined(&self) -> f64 {
        self.pv_current.iter().sum()
    }

    /// Combined power of all arrays
    pub fn pv_watts_combined(&self) -> f64 {
        (0..PV_COUNT).map(|i| self.pv_watts(i)).sum()
    }

    /// Power drawn by the external load in watts
    pub fn external_load_watts(&self) -> f64 {
        self.external_load_current * self.battery_volts()
    }
}

/// A magnitude whose sign is carried separately on the wire
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignedMagnitude {
    pub magnitude: f64,
    pub positive: bool,
}

impl SignedMagnitude {
    pub fn new(magnitude: f64, positive: bool) -> Self {
        Self {
            magnitude,
            positive,
        }
    }

    /// Combine magnitude and sign
    pub fn value(&self) -> f64 {
        if self.positive {
            self.magnitude
        } else {
            -self.magnitude
        }
    }
}

/// Field values gathered while walking the layout table
#[derive(Debug, Default)]
struct Unpacked {
    clock: [i64; 6],
    state_of_charge: i64,
    cell_volts: [f64; CELL_COUNT],
    internal_temp: f64,
    external_temp: f64,
    battery_current: f64,
    pv_current: [f64; PV_COUNT],
    external_load_current: f64,
    adc: [i64; ADC_COUNT],
    heat: [i64; HEAT_COUNT],
    status: i64,
}

impl Unpacked {
    fn store(&mut self, field: Field, value: f64) {
        match field {
            Field::Year => self.clock[0] = value as i64,
            Field::Month => self.clock[1] = value as i64,
            Field::Day => self.clock[2] = value as i64,
            Field::Hour => self.clock[3] = value as i64,
            Field::Minute => self.clock[4] = value as i64,
            Field::Second => self.clock[5] = value as i64,
            Field::StateOfCharge => self.state_of_charge = value as i64,
            Field::CellVoltage(i) => self.cell_volts[i as usize] = value,
            Field::InternalTemp => self.internal_temp = value,
            Field::ExternalTemp => self.external_temp = value,
            Field::BatteryCurrent => self.battery_current = value,
            Field::PvCurrent(i) => self.pv_current[i as usize] = value,
            Field::ExternalLoadCurrent => self.external_load_current = value,
            Field::Adc(i) => self.adc[i as usize] = value as i64,
            Field::Heat(i) => self.heat[i as usize] = value as i64,
            Field::Status => self.status = value as i64,
        }
    }
}

/// Decode one frame.
///
/// Fails only when the record is not exactly [`FRAME_LEN`] bytes long.
pub fn decode(record: &[u8]) -> Result<Reading, DecodeError> {
    if record.len() != FRAME_LEN {
        return Err(DecodeError::Length {
            expected: FRAME_LEN,
            actual: record.len(),
        });
    }

    let mut unpacked = Unpacked::default();
    for spec in FRAME_LAYOUT.iter() {
        unpacked.store(spec.field, spec.read(record));
    }

    let charging = record[CHARGING_FLAG_OFFSET] == CHARGING_FLAG;
    let battery_current = SignedMagnitude::new(unpacked.battery_current, charging);

    Ok(Reading {
        timestamp: civil_time(unpacked.clock),
        state_of_charge: unpacked.state_of_charge,
        cell_volts: unpacked.cell_volts,
        internal_temp: unpacked.internal_temp,
        external_temp: unpacked.external_temp,
        charging,
        battery_current: battery_current.value(),
        pv_current: unpacked.pv_current,
        external_load_current: unpacked.external_load_current,
        adc: unpacked.adc,
        heat: unpacked.heat,
        status: unpacked.status,
    })
}

/// Build a UTC timestamp from `[year, month, day, hour, minute, second]`.
///
/// Out-of-range components carry into the next unit (month 13 is January of
/// the following year, day 0 is the last day of the previous month).
fn civil_time(clock: [i64; 6]) -> DateTime<Utc> {
    let [year, month, day, hour, minute, second] = clock;
    let seconds = (day - 1) * 86_400 + hour * 3_600 + minute * 60 + second;

    let start_of_year = i32::try_from(year)
        .ok()
        .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1));
    let month_offset = month - 1;
    let start_of_month = start_of_year.and_then(|date| {
        if month_offset >= 0 {
            date.checked_add_months(Months::new(month_offset as u32))
        } else {
            date.checked_sub_months(Months::new(month_offset.unsigned_abs() as u32))
        }
    });

    start_of_month
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .and_then(|midnight| midnight.checked_add_signed(TimeDelta::try_seconds(seconds)?))
        .map(|naive| naive.and_utc())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use rand::Rng;

    const CHARGING: &[u8] = b"3';2LD$,I)I*I+I+H}I%I+I**h##+#)P####->##################%N(";
    const DISCHARGING: &[u8] = b"3';2LD#zI)I*I+I+H}I%I+I**h##,#0V####->##################%N(";

    fn with_byte(record: &[u8], offset: usize, byte: u8) -> Vec<u8> {
        let mut out = record.to_vec();
        out[offset] = byte;
        out
    }

    #[test]
    fn test_decode_reference_frame() {
        let reading = decode(CHARGING).unwrap();

        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2016, 4, 24, 15, 41, 33).unwrap()
        );
        assert_eq!(reading.state_of_charge, 100);
        assert_eq!(
            reading.cell_volts,
            [3.464, 3.465, 3.466, 3.466, 3.457, 3.460, 3.466, 3.465]
        );
        assert_eq!(reading.internal_temp, 25.6);
        assert_eq!(reading.external_temp, -45.0);
        assert!(reading.charging);
        assert_eq!(reading.battery_current, 0.591);
        assert_eq!(reading.pv_current, [0.0, 0.937]);
        assert_eq!(reading.external_load_current, 0.0);
        assert_eq!(reading.adc, [0, 0, 0]);
        assert_eq!(reading.heat, [0, 0]);
        assert_eq!(reading.status, 20480);
    }

    #[test]
    fn test_decode_discharging_frame() {
        let reading = decode(DISCHARGING).unwrap();

        assert!(!reading.charging);
        assert_eq!(reading.state_of_charge, 87);
        assert_eq!(reading.battery_current, -1.234);
        assert!(reading.battery_watts() < 0.0);
    }

    #[test]
    fn test_sign_follows_flag_byte() {
        for flag in [b'-', b' ', b'#', b'*', b'~'] {
            let record = with_byte(CHARGING, CHARGING_FLAG_OFFSET, flag);
            let reading = decode(&record).unwrap();
            assert!(!reading.charging);
            assert_eq!(reading.battery_current, -0.591);
        }
    }

    #[test]
    fn test_wrong_lengths_rejected() {
        assert_eq!(
            decode(&[]),
            Err(DecodeError::Length {
                expected: 59,
                actual: 0
            })
        );
        assert!(decode(&CHARGING[..58]).is_err());

        let mut long = CHARGING.to_vec();
        long.push(b'\n');
        assert_eq!(
            decode(&long),
            Err(DecodeError::Length {
                expected: 59,
                actual: 60
            })
        );
    }

    #[test]
    fn test_random_lengths_rejected() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let len = loop {
                let len = rng.gen_range(0..256);
                if len != FRAME_LEN {
                    break len;
                }
            };
            let record: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            assert!(matches!(
                decode(&record),
                Err(DecodeError::Length { actual, .. }) if actual == len
            ));
        }
    }

    #[test]
    fn test_any_bytes_of_frame_length_decode() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let record: Vec<u8> = (0..FRAME_LEN).map(|_| rng.gen_range(b'#'..=b'}')).collect();
            let reading = decode(&record).unwrap();
            assert_eq!(reading.charging, record[CHARGING_FLAG_OFFSET] == b'+');
            if reading.charging {
                assert!(reading.battery_current >= 0.0);
            } else {
                assert!(reading.battery_current <= 0.0);
            }
        }
    }

    #[test]
    fn test_derived_quantities() {
        let reading = decode(CHARGING).unwrap();

        assert_relative_eq!(reading.battery_volts(), 27.709, epsilon = 1e-9);
        assert_relative_eq!(reading.battery_watts(), 0.591 * 27.709, epsilon = 1e-9);
        assert_relative_eq!(reading.pv_watts(0), 0.0);
        assert_relative_eq!(reading.pv_watts(1), 0.937 * 27.709, epsilon = 1e-9);
        assert_relative_eq!(reading.pv_amperes_combined(), 0.937, epsilon = 1e-12);
        assert_relative_eq!(reading.pv_watts_combined(), 0.937 * 27.709, epsilon = 1e-9);
        assert_relative_eq!(reading.external_load_watts(), 0.0);
    }

    #[test]
    fn test_calendar_overflow_rolls_over() {
        // month digit 0: December of the previous year
        let reading = decode(&with_byte(CHARGING, 1, b'#')).unwrap();
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2015, 12, 24, 15, 41, 33).unwrap()
        );

        // day digit 0: last day of March
        let reading = decode(&with_byte(CHARGING, 2, b'#')).unwrap();
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2016, 3, 31, 15, 41, 33).unwrap()
        );

        // second digit 60: next minute
        let reading = decode(&with_byte(CHARGING, 5, b'#' + 60)).unwrap();
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2016, 4, 24, 15, 42, 0).unwrap()
        );
    }

    #[test]
    fn test_signed_magnitude() {
        assert_eq!(SignedMagnitude::new(1.5, true).value(), 1.5);
        assert_eq!(SignedMagnitude::new(1.5, false).value(), -1.5);
    }
}
