/*
Per-channel request pipeline.

One controller tick runs a fixed sequence: warm-up drain, collision checks,
data-bus completion, write-mode switch, refresh, data-bus arbitration, bank
scheduling. Each stage observes the state the previous one left behind, so
the ordering is part of the model.

Queues are fixed-capacity arrays of optional slots. A scheduled entry stays
in its slot until the data bus finishes its transfer; the owning bank slot
holds a (queue, index) back-reference to find it again on a later tick.
*/

use super::address::AddressMapping;
use super::bank::{BankRequest, QueueKind, SlotRef};
use super::config::DramConfig;
use super::request::{merge_sorted, QueuedRequest, UpstreamQueues};
use super::stats::ChannelStats;
use super::Time;

#[derive(Debug)]
pub struct DramChannel {
    pub(crate) address_mapping: AddressMapping,
    pub(crate) wq: Vec<Option<QueuedRequest>>,
    pub(crate) rq: Vec<Option<QueuedRequest>>,
    pub(crate) pq: Vec<Option<QueuedRequest>>,
    pub(crate) bank_request: Vec<BankRequest>,
    pub(crate) active_request: Option<usize>,
    pub(crate) write_mode: bool,
    pub(crate) dbus_cycle_available: Time,
    pub(crate) last_refresh: Time,
    pub(crate) refresh_row: u64,
    pub(crate) warmup: bool,
    pub(crate) current_time: Time,

    // Timings in picoseconds, fixed at construction.
    t_rp: Time,
    t_rcd: Time,
    t_cas: Time,
    t_ras: Time,
    t_ref: Time,
    dbus_turn_around: Time,
    dbus_return: Time,
    data_bus_period: Time,
    mc_period: Time,
    rows_per_refresh: u64,

    pub(crate) sim_stats: ChannelStats,
    pub(crate) roi_stats: ChannelStats,
}

impl DramChannel {
    pub(crate) fn new(config: &DramConfig, address_mapping: AddressMapping) -> Self {
        let prefetch = address_mapping.prefetch_size() as u64;
        let banks = address_mapping.ranks() * address_mapping.banks();
        let dbus_return = config.dbus_period * prefetch;
        Self {
            wq: vec![None; config.wq_size],
            rq: vec![None; config.rq_size],
            pq: vec![None; config.pq_size],
            bank_request: vec![BankRequest::default(); banks],
            active_request: None,
            write_mode: false,
            dbus_cycle_available: 0,
            last_refresh: 0,
            refresh_row: 0,
            warmup: false,
            current_time: 0,
            t_rp: config.t_rp * config.mc_period,
            t_rcd: config.t_rcd * config.mc_period,
            t_cas: config.t_cas * config.mc_period,
            t_ras: config.t_ras * config.mc_period,
            t_ref: config.refresh_period / config.refreshes_per_period,
            dbus_turn_around: config.t_ras * config.mc_period,
            // Floor the burst length to controller-clock resolution.
            dbus_return: dbus_return - dbus_return % config.mc_period,
            data_bus_period: config.dbus_period,
            mc_period: config.mc_period,
            rows_per_refresh: (address_mapping.rows() as u64) / config.refreshes_per_period,
            sim_stats: ChannelStats::default(),
            roi_stats: ChannelStats::default(),
            address_mapping,
        }
    }

    pub fn write_mode(&self) -> bool {
        self.write_mode
    }

    pub fn current_time(&self) -> Time {
        self.current_time
    }

    pub fn sim_stats(&self) -> &ChannelStats {
        &self.sim_stats
    }

    pub fn roi_stats(&self) -> &ChannelStats {
        &self.roi_stats
    }

    pub fn bank_request_capacity(&self) -> usize {
        self.bank_request.len()
    }

    pub(crate) fn operate(&mut self, endpoints: &mut [UpstreamQueues]) -> u64 {
        let mut progress = 0;

        if self.warmup {
            progress += self.warmup_drain(endpoints);
            self.current_time += self.mc_period;
            return progress;
        }

        self.check_write_collision();
        self.check_read_collision(endpoints);
        self.check_prefetch_collision(endpoints);
        progress += self.finish_dbus_request(endpoints);
        self.swap_write_mode();
        progress += self.schedule_refresh();
        progress += self.populate_dbus();
        let pkt = self.schedule_packet();
        progress += self.service_packet(pkt);

        self.current_time += self.mc_period;
        progress
    }

    /// No timing during warm-up: reads and prefetches complete on the spot,
    /// writes are absorbed.
    fn warmup_drain(&mut self, endpoints: &mut [UpstreamQueues]) -> u64 {
        let mut progress = 0;
        for i in 0..self.rq.len() {
            if let Some(entry) = self.rq[i].take() {
                Self::push_response(&entry, entry.data, endpoints);
                progress += 1;
            }
        }
        for i in 0..self.pq.len() {
            if let Some(entry) = self.pq[i].take() {
                Self::push_response(&entry, entry.data, endpoints);
                progress += 1;
            }
        }
        for slot in &mut self.wq {
            if slot.take().is_some() {
                progress += 1;
            }
        }
        progress
    }

    fn push_response(entry: &QueuedRequest, data: u64, endpoints: &mut [UpstreamQueues]) {
        let response = entry.response_with(data);
        for &id in &entry.to_return {
            if let Some(ul) = endpoints.get_mut(id) {
                ul.returned.push_back(response.clone());
                ul.sim_stats.record_response();
            }
        }
    }

    /// Earlier slots first, then later ones, skipping `skip` itself.
    fn find_colliding(&self, queue: QueueKind, addr: u64, skip: usize) -> Option<usize> {
        let queue = self.queue(queue);
        let hit = |slot: &Option<QueuedRequest>| {
            slot.as_ref()
                .is_some_and(|p| self.address_mapping.is_collision(p.address, addr))
        };
        (0..skip)
            .find(|&j| hit(&queue[j]))
            .or_else(|| (skip + 1..queue.len()).find(|&j| hit(&queue[j])))
    }

    fn check_write_collision(&mut self) {
        for i in 0..self.wq.len() {
            let Some(addr) = self.wq[i]
                .as_ref()
                .filter(|p| !p.forward_checked)
                .map(|p| p.address)
            else {
                continue;
            };

            // Two live writes to the same line are one write.
            if self.find_colliding(QueueKind::Write, addr, i).is_some() {
                self.wq[i] = None;
            } else if let Some(entry) = self.wq[i].as_mut() {
                entry.forward_checked = true;
            }
        }
    }

    fn check_read_collision(&mut self, endpoints: &mut [UpstreamQueues]) {
        for i in 0..self.rq.len() {
            let Some(addr) = self.rq[i]
                .as_ref()
                .filter(|p| !p.forward_checked)
                .map(|p| p.address)
            else {
                continue;
            };

            // A matching write short-circuits its payload back to the read.
            let forwarded = self.wq.iter().find_map(|slot| {
                slot.as_ref()
                    .filter(|p| self.address_mapping.is_collision(p.address, addr))
                    .map(|p| p.data)
            });
            if let Some(data) = forwarded {
                if let Some(entry) = self.rq[i].take() {
                    Self::push_response(&entry, data, endpoints);
                }
                continue;
            }

            if let Some(j) = self.find_colliding(QueueKind::Read, addr, i) {
                self.merge_into(QueueKind::Read, j, i);
            } else if let Some(entry) = self.rq[i].as_mut() {
                entry.forward_checked = true;
            }
        }
    }

    fn check_prefetch_collision(&mut self, endpoints: &mut [UpstreamQueues]) {
        for i in 0..self.pq.len() {
            let Some(block) = self.pq[i]
                .as_ref()
                .filter(|p| !p.forward_checked)
                .map(|p| p.block_number())
            else {
                continue;
            };

            let forwarded = self.wq.iter().find_map(|slot| {
                slot.as_ref()
                    .filter(|p| p.block_number() == block)
                    .map(|p| p.data)
            });
            if let Some(data) = forwarded {
                if let Some(entry) = self.pq[i].take() {
                    Self::push_response(&entry, data, endpoints);
                }
                continue;
            }

            let hit = |slot: &Option<QueuedRequest>| {
                slot.as_ref().is_some_and(|p| p.block_number() == block)
            };
            let found = (0..i)
                .find(|&j| hit(&self.pq[j]))
                .or_else(|| (i + 1..self.pq.len()).find(|&j| hit(&self.pq[j])));
            if let Some(j) = found {
                self.merge_into(QueueKind::Prefetch, j, i);
            } else if let Some(entry) = self.pq[i].as_mut() {
                entry.forward_checked = true;
            }
        }
    }

    /// Fold the entry at `src` into the collider at `dst`, union-ing the
    /// dependency and sink lists. Both lists stay sorted and unique.
    fn merge_into(&mut self, queue: QueueKind, dst: usize, src: usize) {
        let Some(entry) = self.queue_mut(queue)[src].take() else {
            return;
        };
        if let Some(target) = self.queue_mut(queue)[dst].as_mut() {
            target.instr_depend_on_me =
                merge_sorted(&target.instr_depend_on_me, &entry.instr_depend_on_me);
            target.to_return = merge_sorted(&target.to_return, &entry.to_return);
        }
    }

    /// Stage C: the active bank's transfer has drained; deliver the response
    /// and free the bank and the queue slot.
    fn finish_dbus_request(&mut self, endpoints: &mut [UpstreamQueues]) -> u64 {
        let Some(idx) = self.active_request else {
            return 0;
        };
        if self.bank_request[idx].ready_time > self.current_time {
            return 0;
        }

        if let Some(slot) = self.bank_request[idx].pkt.take() {
            if let Some(entry) = self.queue_mut(slot.queue)[slot.index].take() {
                Self::push_response(&entry, entry.data, endpoints);
            }
        }
        self.bank_request[idx].valid = false;
        self.active_request = None;
        1
    }

    /// Stage D: hysteretic switch between draining writes and serving reads.
    fn swap_write_mode(&mut self) {
        let high_wm = (self.wq.len() * 7) >> 3;
        let low_wm = (self.wq.len() * 6) >> 3;

        let wq_occu = self.wq.iter().filter(|slot| slot.is_some()).count();
        let rq_occu = self.rq.iter().filter(|slot| slot.is_some()).count();

        let flip = if self.write_mode {
            wq_occu == 0 || (rq_occu > 0 && wq_occu < low_wm)
        } else {
            wq_occu >= high_wm || (rq_occu == 0 && wq_occu > 0)
        };
        if !flip {
            return;
        }

        // Un-schedule everything except the request on the bus. A row stays
        // open only when its command is far enough along not to be cut off.
        let now = self.current_time;
        let t_cas = self.t_cas;
        for idx in 0..self.bank_request.len() {
            if Some(idx) == self.active_request {
                continue;
            }
            let bank = &mut self.bank_request[idx];
            if !bank.valid || bank.under_refresh {
                continue;
            }
            if bank.ready_time < now + t_cas {
                bank.open_row = None;
            }
            bank.valid = false;
            if let Some(slot) = bank.pkt.take() {
                if let Some(entry) = self.queue_mut(slot.queue)[slot.index].as_mut() {
                    entry.scheduled = false;
                    entry.ready_time = now;
                }
            }
        }

        // Turn the bus around once whatever is on it has drained.
        let busy_until = match self.active_request {
            Some(active) => self.bank_request[active].ready_time,
            None => self.current_time,
        };
        self.dbus_cycle_available = busy_until + self.dbus_turn_around;
        self.write_mode = !self.write_mode;
    }

    /// Stage E: distribute the periodic refresh pulse and walk each bank's
    /// refresh state. A refresh occupies its bank like any command.
    fn schedule_refresh(&mut self) -> u64 {
        let mut progress = 0;

        let refresh_due = self.current_time >= self.last_refresh + self.t_ref;
        if refresh_due {
            self.last_refresh = self.current_time;
            self.refresh_row =
                (self.refresh_row + self.rows_per_refresh) % self.address_mapping.rows() as u64;
            self.sim_stats.record_refresh();
        }

        let refresh_len = (self.t_rp + self.t_ras) * self.rows_per_refresh;
        for bank in &mut self.bank_request {
            if refresh_due {
                bank.need_refresh = true;
            }
            if bank.need_refresh && !bank.valid {
                bank.ready_time = self.current_time + refresh_len;
                bank.need_refresh = false;
                bank.under_refresh = true;
                bank.valid = true;
            } else if bank.under_refresh && bank.ready_time <= self.current_time {
                bank.under_refresh = false;
                bank.valid = false;
                bank.open_row = None;
                progress += 1;
            }
            if bank.under_refresh {
                progress += 1;
            }
        }
        progress
    }

    /// Stage F: the bank whose command has waited longest (smallest ready
    /// time) gets the data bus, if both it and the bus are ready.
    fn populate_dbus(&mut self) -> u64 {
        let mut next: Option<(usize, Time)> = None;
        for (idx, bank) in self.bank_request.iter().enumerate() {
            if bank.valid && next.is_none_or(|(_, t)| bank.ready_time < t) {
                next = Some((idx, bank.ready_time));
            }
        }
        let Some((idx, ready_time)) = next else {
            return 0;
        };
        if ready_time > self.current_time {
            return 0;
        }

        if self.active_request.is_none() && self.dbus_cycle_available <= self.current_time {
            self.active_request = Some(idx);
            self.bank_request[idx].ready_time = self.current_time + self.dbus_return;
            self.sim_stats
                .record_row_buffer(self.write_mode, self.bank_request[idx].row_buffer_hit);
            1
        } else {
            let busy_until = match self.active_request {
                Some(active) => self.bank_request[active].ready_time,
                None => self.dbus_cycle_available,
            };
            self.sim_stats
                .record_congested((busy_until - self.current_time) / self.data_bus_period);
            0
        }
    }

    pub(crate) fn bank_request_index(&self, addr: u64) -> usize {
        let rank = self.address_mapping.get_rank(addr) as usize;
        let bank = self.address_mapping.get_bank(addr) as usize;
        rank * self.address_mapping.banks() + bank
    }

    /// Returns true when `lhs` should be scheduled in preference to `rhs`.
    /// Absent or already-scheduled entries lose to anything; among the rest,
    /// a free target bank wins, then the smaller ready time.
    fn schedule_before(&self, queue: &[Option<QueuedRequest>], lhs: usize, rhs: usize) -> bool {
        let Some(rhs) = queue[rhs].as_ref().filter(|p| !p.scheduled) else {
            return true;
        };
        let Some(lhs) = queue[lhs].as_ref().filter(|p| !p.scheduled) else {
            return false;
        };

        let lhs_free = !self.bank_request[self.bank_request_index(lhs.address)].valid;
        let rhs_free = !self.bank_request[self.bank_request_index(rhs.address)].valid;
        if lhs_free == rhs_free {
            lhs.ready_time <= rhs.ready_time
        } else {
            lhs_free
        }
    }

    /// Stage G candidate selection: WQ in write mode, otherwise RQ with PQ
    /// as fallback when no read is ready.
    fn schedule_packet(&self) -> Option<SlotRef> {
        let pick = |kind: QueueKind| -> Option<SlotRef> {
            let queue = self.queue(kind);
            if queue.is_empty() {
                return None;
            }
            let mut best = 0;
            for idx in 1..queue.len() {
                if self.schedule_before(queue, idx, best) {
                    best = idx;
                }
            }
            Some(SlotRef {
                queue: kind,
                index: best,
            })
        };

        if self.write_mode {
            return pick(QueueKind::Write);
        }

        let slot = pick(QueueKind::Read);
        let ready = slot.and_then(|s| self.slot(s)).map(|p| p.ready_time);
        match ready {
            Some(t) if t <= self.current_time => slot,
            _ => pick(QueueKind::Prefetch),
        }
    }

    /// Stage G: issue the chosen packet to its bank if the bank is idle.
    fn service_packet(&mut self, pkt: Option<SlotRef>) -> u64 {
        let Some(slot) = pkt else {
            return 0;
        };
        let Some((addr, ready_time)) = self.slot(slot).map(|p| (p.address, p.ready_time)) else {
            return 0;
        };
        if ready_time > self.current_time {
            return 0;
        }

        let op_row = self.address_mapping.get_row(addr);
        let op_idx = self.bank_request_index(addr);
        let bank = &self.bank_request[op_idx];
        if bank.valid || bank.under_refresh {
            return 0;
        }

        let row_buffer_hit = bank.open_row == Some(op_row);
        // Opening a row on top of another costs a precharge first.
        let row_charge_delay = if bank.open_row.is_some() {
            self.t_rp + self.t_rcd
        } else {
            self.t_rcd
        };
        let delay = if row_buffer_hit { 0 } else { row_charge_delay };
        self.bank_request[op_idx] = BankRequest {
            valid: true,
            row_buffer_hit,
            need_refresh: false,
            under_refresh: false,
            open_row: Some(op_row),
            ready_time: self.current_time + self.t_cas + delay,
            pkt: Some(slot),
        };

        if let Some(entry) = self.queue_mut(slot.queue)[slot.index].as_mut() {
            entry.scheduled = true;
            entry.ready_time = Time::MAX;
        }
        1
    }

    pub(crate) fn queue(&self, kind: QueueKind) -> &[Option<QueuedRequest>] {
        match kind {
            QueueKind::Read => &self.rq,
            QueueKind::Write => &self.wq,
            QueueKind::Prefetch => &self.pq,
        }
    }

    pub(crate) fn queue_mut(&mut self, kind: QueueKind) -> &mut Vec<Option<QueuedRequest>> {
        match kind {
            QueueKind::Read => &mut self.rq,
            QueueKind::Write => &mut self.wq,
            QueueKind::Prefetch => &mut self.pq,
        }
    }

    fn slot(&self, slot: SlotRef) -> Option<&QueuedRequest> {
        self.queue(slot.queue)[slot.index].as_ref()
    }

    /// Dump queue occupancy for hang diagnosis.
    pub fn print_deadlock(&self) {
        for (label, kind) in [
            ("PQ", QueueKind::Prefetch),
            ("RQ", QueueKind::Read),
            ("WQ", QueueKind::Write),
        ] {
            let queue = self.queue(kind);
            if queue.iter().all(|slot| slot.is_none()) {
                log::error!("{label} empty");
                continue;
            }
            for entry in queue.iter().flatten() {
                log::error!(
                    "{label} entry: address: {:#x} forward_checked: {} scheduled: {}",
                    entry.address,
                    entry.forward_checked,
                    entry.scheduled
                );
            }
        }
    }
}
