use serde::Deserialize;
use thiserror::Error;

use crate::sim::config::Config;

use super::BLOCK_SIZE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("prefetch size must be nonzero (channel width exceeds the block size?)")]
    ZeroPrefetchSize,
    #[error(
        "channel width {channel_width} B times prefetch size {prefetch_size} \
         must be a multiple of the {BLOCK_SIZE} B block size"
    )]
    MisalignedPrefetch {
        channel_width: usize,
        prefetch_size: usize,
    },
}

/// Off-chip DRAM topology and timing.
///
/// Periods are in picoseconds; `t_*` timings are in controller-clock cycles.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct DramConfig {
    pub dbus_period: u64,
    pub mc_period: u64,
    pub t_rp: u64,
    pub t_rcd: u64,
    pub t_cas: u64,
    pub t_ras: u64,
    pub refresh_period: u64,
    pub refreshes_per_period: u64,
    pub rq_size: usize,
    pub wq_size: usize,
    pub pq_size: usize,
    pub chans: usize,
    pub ranks: usize,
    pub banks: usize,
    pub columns: usize,
    pub rows: usize,
    pub chan_width: usize,
}

impl Config for DramConfig {}

impl Default for DramConfig {
    fn default() -> Self {
        // DDR4-1600-ish single channel
        Self {
            dbus_period: 625,
            mc_period: 1250,
            t_rp: 11,
            t_rcd: 11,
            t_cas: 11,
            t_ras: 28,
            refresh_period: 64_000_000_000,
            refreshes_per_period: 8192,
            rq_size: 64,
            wq_size: 64,
            pq_size: 32,
            chans: 1,
            ranks: 1,
            banks: 8,
            columns: 1024,
            rows: 65536,
            chan_width: 8,
        }
    }
}

impl DramConfig {
    /// Blocks transferred per row-buffer fill.
    pub fn prefetch_size(&self) -> usize {
        if self.chan_width == 0 {
            return 0;
        }
        BLOCK_SIZE / self.chan_width
    }
}
