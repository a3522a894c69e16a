// SBMS Exporter - Prometheus exposition
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus text exposition of the injected registry.

use prometheus::{Encoder, TextEncoder};
use sbms::MetricRegistry;

/// Content type of the text exposition format
pub fn content_type() -> &'static str {
    prometheus::TEXT_FORMAT
}

/// Encode every registered metric to Prometheus text format
pub fn encode_metrics(registry: &impl MetricRegistry) -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;
    use sbms::Exporter;
    use std::sync::Arc;

    const FRAME: &[u8] = b"3';2LD$,I)I*I+I+H}I%I+I**h##+#)P####->##################%N(";

    #[test]
    fn test_encode_down() {
        let registry = Arc::new(Registry::new());
        let _exporter = Exporter::new(registry.clone()).unwrap();

        let output = encode_metrics(&registry).unwrap();
        assert!(output.contains("# TYPE sbms_up gauge"));
        assert!(output.contains("sbms_up 0"));
        assert!(!output.contains("sbms_battery_soc"));
    }

    #[test]
    fn test_encode_up() {
        let registry = Arc::new(Registry::new());
        let mut exporter = Exporter::new(registry.clone()).unwrap();
        exporter.process(FRAME).unwrap();

        let output = encode_metrics(&registry).unwrap();
        assert!(output.contains("sbms_up 1"));
        assert!(output.contains("sbms_battery_soc 100"));
        assert!(output.contains("sbms_cell_volts{cell=\"1\"} 3.464"));
        assert!(output.contains("sbms_thermistor_celsius{sensor=\"external\"} -45"));
        assert!(output.contains("sbms_device_status 20480"));
    }

    #[test]
    fn test_content_type() {
        assert!(content_type().starts_with("text/plain"));
    }
}
