use serde::{Deserialize, Serialize};

/// OTLP span export.  Without an endpoint only JSON logs are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "d_service_name")]
    pub service_name: String,
    /// Fraction of traces exported, `0.0..=1.0`.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: d_sample_rate(),
        }
    }
}

impl ObservabilityConfig {
    /// The collector endpoint, treating a blank value as unset.
    pub fn exporter_endpoint(&self) -> Option<&str> {
        self.otlp_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    /// Sampling ratio clamped into range; NaN disables sampling.
    pub fn sampler_ratio(&self) -> f64 {
        if self.sample_rate.is_nan() {
            0.0
        } else {
            self.sample_rate.clamp(0.0, 1.0)
        }
    }
}

fn d_service_name() -> String {
    "agentdesk".into()
}

fn d_sample_rate() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_endpoint_disables_export() {
        let cfg: ObservabilityConfig = toml::from_str(r#"otlp_endpoint = "  ""#).unwrap();
        assert!(cfg.exporter_endpoint().is_none());
        assert_eq!(cfg.service_name, "agentdesk");
    }

    #[test]
    fn sampler_ratio_is_clamped() {
        let cfg: ObservabilityConfig = toml::from_str(
            r#"
            otlp_endpoint = "http://localhost:4317"
            sample_rate = 1.5
        "#,
        )
        .unwrap();
        assert_eq!(cfg.exporter_endpoint(), Some("http://localhost:4317"));
        assert!((cfg.sampler_ratio() - 1.0).abs() < f64::EPSILON);

        let low = ObservabilityConfig {
            sample_rate: -0.2,
            ..Default::default()
        };
        assert_eq!(low.sampler_ratio(), 0.0);
    }
}
