use serde::Deserialize;

use crate::sim::config::Config;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    pub enabled: bool,
    pub endpoints: usize,
    pub reqs_per_tick: u32,
    pub write_percent: u32,
    pub prefetch_percent: u32,
    pub footprint_bytes: u64,
    pub pattern: String,
    pub stride_bytes: u64,
    pub seed: u64,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoints: 1,
            reqs_per_tick: 1,
            write_percent: 30,
            prefetch_percent: 10,
            footprint_bytes: 16 << 20,
            pattern: "random".to_string(),
            stride_bytes: 64,
            seed: 0xcafe_f00d,
        }
    }
}
