use log::info;

use crate::dram::{ConfigError, DramConfig, MemoryController};
use crate::sim::config::{Config, SimConfig};
use crate::traffic::{TrafficConfig, TrafficEngine};

#[derive(Debug, Clone, Default)]
pub struct SimTopConfig {
    pub sim: SimConfig,
    pub dram: DramConfig,
    pub traffic: TrafficConfig,
}

impl SimTopConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        let value: toml::Value = text.parse()?;
        Ok(Self {
            sim: SimConfig::from_section(value.get("sim")),
            dram: DramConfig::from_section(value.get("dram")),
            traffic: TrafficConfig::from_section(value.get("traffic")),
        })
    }
}

/// Binds the controller to a synthetic traffic source and runs the warm-up
/// and measured phases.
pub struct SimTop {
    pub controller: MemoryController,
    traffic: TrafficEngine,
    warmup_ticks: u64,
    ticks: u64,
}

impl SimTop {
    pub fn new(config: &SimTopConfig) -> Result<Self, ConfigError> {
        let controller = MemoryController::new(&config.dram, config.traffic.endpoints.max(1))?;
        Ok(Self {
            controller,
            traffic: TrafficEngine::new(&config.traffic),
            warmup_ticks: config.sim.warmup_ticks,
            ticks: config.sim.ticks,
        })
    }

    pub fn tick_one(&mut self) {
        self.traffic.drive(&mut self.controller);
        self.controller.operate();
        self.traffic.collect(&mut self.controller);
    }

    /// Run warm-up then the measured phase, and report per-channel stats.
    pub fn run(&mut self) {
        self.controller.initialize();

        if self.warmup_ticks > 0 {
            self.controller.warmup = true;
            self.controller.begin_phase();
            for _ in 0..self.warmup_ticks {
                self.tick_one();
            }
        }

        self.controller.warmup = false;
        self.controller.begin_phase();
        for _ in 0..self.ticks {
            self.tick_one();
        }
        self.controller.end_phase();

        self.report();
    }

    #[cfg(test)]
    pub(crate) fn traffic(&self) -> &TrafficEngine {
        &self.traffic
    }

    fn report(&self) {
        info!(
            "traffic: {} issued, {} responses",
            self.traffic.issued(),
            self.traffic.responses()
        );
        for channel in self.controller.channels() {
            let stats = channel.roi_stats();
            info!(
                "{}: RQ hits {} misses {} | WQ hits {} misses {} | WQ full {} | \
                 refreshes {} | dbus congested {} times ({} dbus cycles)",
                stats.name(),
                stats.rq_row_buffer_hit(),
                stats.rq_row_buffer_miss(),
                stats.wq_row_buffer_hit(),
                stats.wq_row_buffer_miss(),
                stats.wq_full(),
                stats.refresh_cycles(),
                stats.dbus_count_congested(),
                stats.dbus_cycle_congested()
            );
        }
    }
}
