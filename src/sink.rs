// SBMS - Battery telemetry decoding and exposition
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Gauge sink
//!
//! Owns every gauge exposed for the device and maps a [`Reading`] onto them.
//! Gauges and their label children are created once; updates overwrite the
//! values in place so metric identities stay stable across reconnects.

use crate::decoder::{Reading, ADC_COUNT, CELL_COUNT, HEAT_COUNT, PV_COUNT};
use crate::error::Result;
use prometheus::core::Collector;
use prometheus::{Gauge, GaugeVec, Opts};

/// Default metric namespace
pub const DEFAULT_NAMESPACE: &str = "sbms";

/// Label values of the ADC channels carried by a frame
pub const ADC_CHANNELS: [&str; ADC_COUNT] = ["2", "3", "4"];

/// Label values of the heat channels carried by a frame
pub const HEAT_CHANNELS: [&str; HEAT_COUNT] = ["1", "2"];

/// Label values of the thermistors
pub const THERMISTORS: [&str; 2] = ["internal", "external"];

/// Configuration of the gauge sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Prefix of every metric name
    pub namespace: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

/// A labelled gauge family with its children created up front
#[derive(Debug, Clone)]
struct LabelledGauges {
    family: GaugeVec,
    children: Vec<Gauge>,
}

impl LabelledGauges {
    fn new(opts: Opts, label: &str, values: &[&str]) -> Result<Self> {
        let family = GaugeVec::new(opts, &[label])?;
        let children = values
            .iter()
            .map(|value| family.get_metric_with_label_values(&[*value]))
            .collect::<prometheus::Result<Vec<_>>>()?;
        Ok(Self { family, children })
    }

    fn set(&self, index: usize, value: f64) {
        self.children[index].set(value);
    }
}

/// Every gauge exposed for the device
#[derive(Debug, Clone)]
pub struct GaugeSink {
    up: Gauge,
    updated: Gauge,
    status: Gauge,
    battery_charging: Gauge,
    battery_soc: Gauge,
    battery_volts: Gauge,
    battery_amperes: Gauge,
    battery_watts: Gauge,
    cell_volts: LabelledGauges,
    pv_volts: Gauge,
    pv_amperes: LabelledGauges,
    pv_watts: LabelledGauges,
    pv_amperes_combined: Gauge,
    pv_watts_combined: Gauge,
    thermistor_celsius: LabelledGauges,
    adc_values: LabelledGauges,
    heat_values: LabelledGauges,
    external_load_volts: Gauge,
    external_load_amperes: Gauge,
    external_load_watts: Gauge,
}

impl GaugeSink {
    /// Create every gauge under the configured namespace
    pub fn new(config: &SinkConfig) -> Result<Self> {
        let ns = config.namespace.as_str();
        let opts = |subsystem: &str, name: &str, help: &str| {
            Opts::new(name, help).namespace(ns).subsystem(subsystem)
        };
        let gauge = |subsystem: &str, name: &str, help: &str| {
            Gauge::with_opts(opts(subsystem, name, help))
        };

        let cells: Vec<String> = (1..=CELL_COUNT).map(|i| i.to_string()).collect();
        let cells: Vec<&str> = cells.iter().map(String::as_str).collect();
        let arrays: Vec<String> = (1..=PV_COUNT).map(|i| i.to_string()).collect();
        let arrays: Vec<&str> = arrays.iter().map(String::as_str).collect();

        Ok(Self {
            up: gauge("", "up", "Was the last record read from the device decoded successfully.")?,
            updated: gauge(
                "updated",
                "unix",
                "The unix date the data was last updated (number of seconds elapsed since January 1, 1970 UTC).",
            )?,
            status: gauge("device", "status", "Device status number.")?,
            battery_charging: gauge(
                "battery",
                "charging",
                "Is the battery currently charging or discharging?",
            )?,
            battery_soc: gauge("battery", "soc", "Battery state of charge (%).")?,
            battery_volts: gauge("battery", "volts", "Battery voltage.")?,
            battery_amperes: gauge(
                "battery",
                "amperes",
                "Battery current (positive means charging, negative means discharging).",
            )?,
            battery_watts: gauge(
                "battery",
                "watts",
                "Battery power (positive means charging, negative means discharging).",
            )?,
            cell_volts: LabelledGauges::new(
                opts("cell", "volts", "Battery cell voltage."),
                "cell",
                &cells,
            )?,
            pv_volts: gauge("pv", "volts", "Array voltage.")?,
            pv_amperes: LabelledGauges::new(opts("pv", "amperes", "Array current."), "pv", &arrays)?,
            pv_watts: LabelledGauges::new(opts("pv", "watts", "Array power."), "pv", &arrays)?,
            pv_amperes_combined: gauge("pv", "amperes_combined", "Arrays total current.")?,
            pv_watts_combined: gauge("pv", "watts_combined", "Arrays total power.")?,
            thermistor_celsius: LabelledGauges::new(
                opts("thermistor", "celsius", "Device thermistor temperature."),
                "sensor",
                &THERMISTORS,
            )?,
            adc_values: LabelledGauges::new(
                opts("adc", "values", "Device ADC value."),
                "adc",
                &ADC_CHANNELS,
            )?,
            heat_values: LabelledGauges::new(
                opts("heat", "values", "Device heat value."),
                "heat",
                &HEAT_CHANNELS,
            )?,
            external_load_volts: gauge("external_load", "volts", "External load voltage.")?,
            external_load_amperes: gauge("external_load", "amperes", "External load current.")?,
            external_load_watts: gauge("external_load", "watts", "External load power.")?,
        })
    }

    /// The connectivity indicator, registered for the process lifetime
    pub fn up(&self) -> Gauge {
        self.up.clone()
    }

    /// Every collector except `up`.
    ///
    /// The returned handles share their values with this sink.
    pub fn collectors(&self) -> Vec<Box<dyn Collector>> {
        let gauges = [
            &self.updated,
            &self.status,
            &self.battery_charging,
            &self.battery_soc,
            &self.battery_volts,
            &self.battery_amperes,
            &self.battery_watts,
            &self.pv_volts,
            &self.pv_amperes_combined,
            &self.pv_watts_combined,
            &self.external_load_volts,
            &self.external_load_amperes,
            &self.external_load_watts,
        ];
        let families = [
            &self.cell_volts,
            &self.pv_amperes,
            &self.pv_watts,
            &self.thermistor_celsius,
            &self.adc_values,
            &self.heat_values,
        ];

        let mut collectors: Vec<Box<dyn Collector>> = Vec::with_capacity(gauges.len() + families.len());
        collectors.extend(gauges.into_iter().map(|g| Box::new(g.clone()) as Box<dyn Collector>));
        collectors.extend(
            families
                .into_iter()
                .map(|f| Box::new(f.family.clone()) as Box<dyn Collector>),
        );
        collectors
    }

    /// Overwrite every gauge with the values of a reading
    pub fn update(&self, reading: &Reading) {
        let volts = reading.battery_volts();

        self.updated.set(reading.timestamp.timestamp() as f64);
        self.status.set(reading.status as f64);
        self.battery_charging
            .set(if reading.charging { 1.0 } else { 0.0 });
        self.battery_soc.set(reading.state_of_charge as f64);
        self.battery_volts.set(volts);
        self.battery_amperes.set(reading.battery_current);
        self.battery_watts.set(reading.battery_watts());

        for (i, v) in reading.cell_volts.iter().enumerate() {
            self.cell_volts.set(i, *v);
        }

        // The arrays and the external load share the battery bus
        self.pv_volts.set(volts);
        for (i, a) in reading.pv_current.iter().enumerate() {
            self.pv_amperes.set(i, *a);
            self.pv_watts.set(i, reading.pv_watts(i));
        }
        self.pv_amperes_combined.set(reading.pv_amperes_combined());
        self.pv_watts_combined.set(reading.pv_watts_combined());

        self.thermistor_celsius.set(0, reading.internal_temp);
        self.thermistor_celsius.set(1, reading.external_temp);

        for (i, v) in reading.adc.iter().enumerate() {
            self.adc_values.set(i, *v as f64);
        }
        for (i, v) in reading.heat.iter().enumerate() {
            self.heat_values.set(i, *v as f64);
        }

        self.external_load_volts.set(volts);
        self.external_load_amperes.set(reading.external_load_current);
        self.external_load_watts.set(reading.external_load_watts());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use approx::assert_relative_eq;
    use prometheus::proto::MetricFamily;

    const FRAME: &[u8] = b"3';2LD$,I)I*I+I+H}I%I+I**h##+#)P####->##################%N(";

    fn collect_all(sink: &GaugeSink) -> Vec<MetricFamily> {
        let mut families: Vec<MetricFamily> = sink
            .collectors()
            .iter()
            .flat_map(|c| c.collect())
            .collect();
        families.sort_by(|a, b| a.get_name().cmp(b.get_name()));
        families
    }

    fn value(families: &[MetricFamily], name: &str, label: Option<&str>) -> f64 {
        let family = families
            .iter()
            .find(|mf| mf.get_name() == name)
            .unwrap_or_else(|| panic!("missing {}", name));
        let metric = family
            .get_metric()
            .iter()
            .find(|m| match label {
                Some(l) => m.get_label().iter().any(|p| p.get_value() == l),
                None => true,
            })
            .unwrap_or_else(|| panic!("missing {} {:?}", name, label));
        metric.get_gauge().get_value()
    }

    #[test]
    fn test_collector_set_excludes_up() {
        let sink = GaugeSink::new(&SinkConfig::default()).unwrap();
        let names: Vec<String> = collect_all(&sink)
            .iter()
            .map(|mf| mf.get_name().to_string())
            .collect();

        assert_eq!(sink.collectors().len(), 19);
        assert!(!names.contains(&"sbms_up".to_string()));
        assert!(names.contains(&"sbms_updated_unix".to_string()));
        assert!(names.contains(&"sbms_cell_volts".to_string()));
        assert!(names.contains(&"sbms_external_load_watts".to_string()));
    }

    #[test]
    fn test_label_children_exist_before_update() {
        let sink = GaugeSink::new(&SinkConfig::default()).unwrap();
        let families = collect_all(&sink);

        let cells = families
            .iter()
            .find(|mf| mf.get_name() == "sbms_cell_volts")
            .unwrap();
        assert_eq!(cells.get_metric().len(), CELL_COUNT);
        let adc = families
            .iter()
            .find(|mf| mf.get_name() == "sbms_adc_values")
            .unwrap();
        assert_eq!(adc.get_metric().len(), ADC_COUNT);
    }

    #[test]
    fn test_update_maps_reading() {
        let sink = GaugeSink::new(&SinkConfig::default()).unwrap();
        let reading = decode(FRAME).unwrap();
        sink.update(&reading);
        let f = collect_all(&sink);

        assert_eq!(value(&f, "sbms_updated_unix", None), 1461512493.0);
        assert_eq!(value(&f, "sbms_device_status", None), 20480.0);
        assert_eq!(value(&f, "sbms_battery_charging", None), 1.0);
        assert_eq!(value(&f, "sbms_battery_soc", None), 100.0);
        assert_relative_eq!(value(&f, "sbms_battery_volts", None), 27.709, epsilon = 1e-9);
        assert_eq!(value(&f, "sbms_battery_amperes", None), 0.591);
        assert_relative_eq!(
            value(&f, "sbms_battery_watts", None),
            0.591 * 27.709,
            epsilon = 1e-9
        );
        assert_eq!(value(&f, "sbms_cell_volts", Some("1")), 3.464);
        assert_eq!(value(&f, "sbms_cell_volts", Some("5")), 3.457);
        assert_eq!(value(&f, "sbms_cell_volts", Some("8")), 3.465);
        assert_relative_eq!(value(&f, "sbms_pv_volts", None), 27.709, epsilon = 1e-9);
        assert_eq!(value(&f, "sbms_pv_amperes", Some("1")), 0.0);
        assert_eq!(value(&f, "sbms_pv_amperes", Some("2")), 0.937);
        assert_relative_eq!(
            value(&f, "sbms_pv_watts", Some("2")),
            0.937 * 27.709,
            epsilon = 1e-9
        );
        assert_relative_eq!(value(&f, "sbms_pv_amperes_combined", None), 0.937);
        assert_eq!(value(&f, "sbms_thermistor_celsius", Some("internal")), 25.6);
        assert_eq!(value(&f, "sbms_thermistor_celsius", Some("external")), -45.0);
        assert_eq!(value(&f, "sbms_adc_values", Some("3")), 0.0);
        assert_eq!(value(&f, "sbms_heat_values", Some("2")), 0.0);
        assert_eq!(value(&f, "sbms_external_load_amperes", None), 0.0);
        assert_eq!(value(&f, "sbms_external_load_watts", None), 0.0);
    }

    #[test]
    fn test_update_reuses_gauges() {
        let sink = GaugeSink::new(&SinkConfig::default()).unwrap();
        let handles = sink.collectors();

        let reading = decode(FRAME).unwrap();
        sink.update(&reading);

        // Handles taken before the update observe the new values
        let soc = handles
            .iter()
            .flat_map(|c| c.collect())
            .find(|mf| mf.get_name() == "sbms_battery_soc")
            .unwrap();
        assert_eq!(soc.get_metric()[0].get_gauge().get_value(), 100.0);
    }

    #[test]
    fn test_custom_namespace() {
        let config = SinkConfig {
            namespace: "solar".to_string(),
        };
        let sink = GaugeSink::new(&config).unwrap();
        let up = sink.up().collect();
        assert_eq!(up[0].get_name(), "solar_up");
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let config = SinkConfig {
            namespace: "not a namespace".to_string(),
        };
        assert!(GaugeSink::new(&config).is_err());
    }
}
