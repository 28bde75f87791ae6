use serde::Serialize;

/// Per-channel counters, zeroed at each phase boundary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelStats {
    name: String,
    dbus_cycle_congested: u64,
    dbus_count_congested: u64,
    wq_row_buffer_hit: u64,
    wq_row_buffer_miss: u64,
    rq_row_buffer_hit: u64,
    rq_row_buffer_miss: u64,
    wq_full: u64,
    refresh_cycles: u64,
}

impl ChannelStats {
    pub(crate) fn named(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dbus_cycle_congested(&self) -> u64 {
        self.dbus_cycle_congested
    }

    pub fn dbus_count_congested(&self) -> u64 {
        self.dbus_count_congested
    }

    pub fn wq_row_buffer_hit(&self) -> u64 {
        self.wq_row_buffer_hit
    }

    pub fn wq_row_buffer_miss(&self) -> u64 {
        self.wq_row_buffer_miss
    }

    pub fn rq_row_buffer_hit(&self) -> u64 {
        self.rq_row_buffer_hit
    }

    pub fn rq_row_buffer_miss(&self) -> u64 {
        self.rq_row_buffer_miss
    }

    pub fn wq_full(&self) -> u64 {
        self.wq_full
    }

    pub fn refresh_cycles(&self) -> u64 {
        self.refresh_cycles
    }

    /// Total bank commands put on the data bus.
    pub fn bus_commands(&self) -> u64 {
        self.wq_row_buffer_hit
            + self.wq_row_buffer_miss
            + self.rq_row_buffer_hit
            + self.rq_row_buffer_miss
    }

    pub(crate) fn record_row_buffer(&mut self, write_mode: bool, hit: bool) {
        match (write_mode, hit) {
            (true, true) => self.wq_row_buffer_hit += 1,
            (true, false) => self.wq_row_buffer_miss += 1,
            (false, true) => self.rq_row_buffer_hit += 1,
            (false, false) => self.rq_row_buffer_miss += 1,
        }
    }

    pub(crate) fn record_congested(&mut self, dbus_cycles: u64) {
        self.dbus_cycle_congested += dbus_cycles;
        self.dbus_count_congested += 1;
    }

    pub(crate) fn record_wq_full(&mut self) {
        self.wq_full += 1;
    }

    pub(crate) fn record_refresh(&mut self) {
        self.refresh_cycles += 1;
    }
}
