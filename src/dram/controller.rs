use log::info;

use super::address::AddressMapping;
#[cfg(test)]
use super::bank::QueueKind;
use super::channel::DramChannel;
use super::config::{ConfigError, DramConfig};
use super::request::{QueuedRequest, RequestType, UpstreamQueues};
use super::stats::ChannelStats;
use super::{EndpointId, Time};

/// Top-level controller: routes upstream packets to channels by address and
/// drives every channel once per controller-clock tick.
#[derive(Debug)]
pub struct MemoryController {
    channels: Vec<DramChannel>,
    queues: Vec<UpstreamQueues>,
    address_mapping: AddressMapping,
    channel_width: usize,
    data_bus_period: Time,
    mc_period: Time,
    current_time: Time,
    pub warmup: bool,
}

impl MemoryController {
    pub fn new(config: &DramConfig, num_endpoints: usize) -> Result<Self, ConfigError> {
        let address_mapping = AddressMapping::new(
            config.chan_width,
            config.prefetch_size(),
            config.chans,
            config.banks,
            config.columns,
            config.ranks,
            config.rows,
        )?;

        let channels = (0..config.chans)
            .map(|_| DramChannel::new(config, address_mapping.clone()))
            .collect();
        let queues = (0..num_endpoints).map(|_| UpstreamQueues::default()).collect();

        Ok(Self {
            channels,
            queues,
            address_mapping,
            channel_width: config.chan_width,
            data_bus_period: config.dbus_period,
            mc_period: config.mc_period,
            current_time: 0,
            warmup: false,
        })
    }

    /// One controller tick: drain upstream queues, then tick every channel.
    pub fn operate(&mut self) -> u64 {
        let mut progress = self.initiate_requests();
        for channel in &mut self.channels {
            progress += channel.operate(&mut self.queues);
        }
        self.current_time += self.mc_period;
        progress
    }

    fn initiate_requests(&mut self) -> u64 {
        let mut progress = 0;
        for ul in 0..self.queues.len() {
            while let Some(pkt) = self.queues[ul].pq.front().cloned() {
                if !self.add_pq(&pkt, ul) {
                    break;
                }
                self.queues[ul].pq.pop_front();
                self.queues[ul].sim_stats.record_pq_admitted();
                progress += 1;
            }
            while let Some(pkt) = self.queues[ul].rq.front().cloned() {
                if !self.add_rq(&pkt, ul) {
                    break;
                }
                self.queues[ul].rq.pop_front();
                self.queues[ul].sim_stats.record_rq_admitted();
                progress += 1;
            }
            while let Some(pkt) = self.queues[ul].wq.front().cloned() {
                if !self.add_wq(&pkt) {
                    break;
                }
                self.queues[ul].wq.pop_front();
                self.queues[ul].sim_stats.record_wq_admitted();
                progress += 1;
            }
        }
        progress
    }

    /// Admit a read. A promotion claims the ready time of the prefetch it
    /// overtakes; a promotion with nothing to overtake simply vanishes.
    pub fn add_rq(&mut self, packet: &RequestType, from: EndpointId) -> bool {
        let now = self.current_time;
        let chan = self.address_mapping.get_channel(packet.address) as usize;
        let channel = &mut self.channels[chan];

        let Some(slot) = channel.rq.iter().position(|entry| entry.is_none()) else {
            return false;
        };

        let mut ready_time = now;
        if packet.promotion {
            let matching = channel
                .pq
                .iter_mut()
                .find(|entry| entry.as_ref().is_some_and(|p| p.address == packet.address));
            let Some(pq_slot) = matching else {
                return true;
            };
            match pq_slot.take_if(|p| !p.scheduled) {
                Some(prefetch) => ready_time = prefetch.ready_time,
                None => return true,
            }
        }

        let mut entry = QueuedRequest::from_request(packet);
        entry.forward_checked = false;
        entry.ready_time = ready_time;
        if packet.response_requested || packet.promotion {
            entry.to_return = vec![from];
        }
        channel.rq[slot] = Some(entry);
        true
    }

    pub fn add_pq(&mut self, packet: &RequestType, from: EndpointId) -> bool {
        let now = self.current_time;
        let chan = self.address_mapping.get_channel(packet.address) as usize;
        let channel = &mut self.channels[chan];

        let Some(slot) = channel.pq.iter().position(|entry| entry.is_none()) else {
            return false;
        };

        let mut entry = QueuedRequest::from_request(packet);
        entry.forward_checked = false;
        entry.ready_time = now;
        if packet.response_requested {
            entry.to_return = vec![from];
        }
        channel.pq[slot] = Some(entry);
        true
    }

    pub fn add_wq(&mut self, packet: &RequestType) -> bool {
        let now = self.current_time;
        let chan = self.address_mapping.get_channel(packet.address) as usize;
        let channel = &mut self.channels[chan];

        let Some(slot) = channel.wq.iter().position(|entry| entry.is_none()) else {
            channel.sim_stats.record_wq_full();
            return false;
        };

        let mut entry = QueuedRequest::from_request(packet);
        entry.forward_checked = false;
        entry.scheduled = false;
        entry.ready_time = now;
        channel.wq[slot] = Some(entry);
        true
    }

    /// Log the configured size and topology once at startup.
    pub fn initialize(&self) {
        info!(
            "Off-chip DRAM Size: {}",
            format_size(self.address_mapping.size())
        );
        info!(
            "Channels: {} Width: {}-bit Data Rate: {} MT/s",
            self.channels.len(),
            8 * self.channel_width,
            1_000_000 / self.data_bus_period
        );
    }

    /// Reset per-channel counters for the phase about to run and propagate
    /// the warm-up flag. Endpoint counters reset alongside.
    pub fn begin_phase(&mut self) {
        for (idx, channel) in self.channels.iter_mut().enumerate() {
            channel.sim_stats = ChannelStats::named(format!("Channel {idx}"));
            channel.warmup = self.warmup;
        }
        for ul in &mut self.queues {
            ul.sim_stats = Default::default();
            ul.roi_stats = Default::default();
        }
    }

    /// Snapshot the just-finished phase's counters.
    pub fn end_phase(&mut self) {
        for channel in &mut self.channels {
            channel.roi_stats = channel.sim_stats.clone();
        }
        for ul in &mut self.queues {
            ul.roi_stats = ul.sim_stats;
        }
    }

    /// Total addressable bytes across all channels.
    pub fn size(&self) -> u64 {
        self.address_mapping.size()
    }

    pub fn address_mapping(&self) -> &AddressMapping {
        &self.address_mapping
    }

    pub fn current_time(&self) -> Time {
        self.current_time
    }

    pub fn channels(&self) -> &[DramChannel] {
        &self.channels
    }

    pub fn endpoint(&self, id: EndpointId) -> &UpstreamQueues {
        &self.queues[id]
    }

    pub fn endpoint_mut(&mut self, id: EndpointId) -> &mut UpstreamQueues {
        &mut self.queues[id]
    }

    pub fn num_endpoints(&self) -> usize {
        self.queues.len()
    }

    pub fn print_deadlock(&self) {
        for (idx, channel) in self.channels.iter().enumerate() {
            log::error!("DRAM Channel {idx}");
            channel.print_deadlock();
        }
    }

    #[cfg(test)]
    pub(crate) fn queue_occupancy(&self, chan: usize, kind: QueueKind) -> usize {
        self.channels[chan]
            .queue(kind)
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}

fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1 << 10;
    const MIB: u64 = 1 << 20;
    const GIB: u64 = 1 << 30;
    if bytes >= GIB {
        format!("{} GiB", bytes / GIB)
    } else if bytes >= MIB {
        format!("{} MiB", bytes / MIB)
    } else if bytes >= KIB {
        format!("{} kiB", bytes / KIB)
    } else {
        format!("{bytes} B")
    }
}
