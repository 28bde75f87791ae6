use crate::dram::{MemoryController, RequestType, BLOCK_SIZE};
use crate::traffic::config::TrafficConfig;

#[derive(Debug, Clone)]
enum PatternKind {
    Strided { stride: u64 },
    Random,
}

/// Synthetic request source for the demo binary: every tick it pushes a
/// handful of block-aligned reads/writes/prefetches into each endpoint and
/// drains whatever came back.
#[derive(Debug)]
pub struct TrafficEngine {
    enabled: bool,
    kind: PatternKind,
    reqs_per_tick: u32,
    write_percent: u32,
    prefetch_percent: u32,
    footprint_blocks: u64,
    seed: u64,
    issued: u64,
    responses: u64,
}

impl TrafficEngine {
    pub fn new(config: &TrafficConfig) -> Self {
        let kind = match config.pattern.trim().to_ascii_lowercase().as_str() {
            "strided" => PatternKind::Strided {
                stride: config.stride_bytes.max(BLOCK_SIZE as u64),
            },
            "random" | "random_access" => PatternKind::Random,
            other => panic!("unsupported traffic pattern '{other}' (expected strided|random)"),
        };
        Self {
            enabled: config.enabled,
            kind,
            reqs_per_tick: config.reqs_per_tick,
            write_percent: config.write_percent.min(100),
            prefetch_percent: config.prefetch_percent.min(100),
            footprint_blocks: (config.footprint_bytes / BLOCK_SIZE as u64).max(1),
            seed: config.seed,
            issued: 0,
            responses: 0,
        }
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }

    pub fn responses(&self) -> u64 {
        self.responses
    }

    fn block_address(&self, req_idx: u64) -> u64 {
        let block = match self.kind {
            PatternKind::Strided { stride } => {
                (req_idx * stride / BLOCK_SIZE as u64) % self.footprint_blocks
            }
            PatternKind::Random => mix64(self.seed ^ req_idx) % self.footprint_blocks,
        };
        block * BLOCK_SIZE as u64
    }

    /// Enqueue this tick's requests onto every endpoint's input queues.
    pub fn drive(&mut self, mc: &mut MemoryController) {
        if !self.enabled {
            return;
        }
        for endpoint in 0..mc.num_endpoints() {
            for _ in 0..self.reqs_per_tick {
                let idx = self.issued;
                self.issued += 1;

                let address = self.block_address(idx);
                let roll = mix64(self.seed ^ idx.rotate_left(17)) % 100;
                let packet = RequestType {
                    address,
                    v_address: address,
                    data: mix64(idx),
                    response_requested: true,
                    ..Default::default()
                };

                let ul = mc.endpoint_mut(endpoint);
                if roll < self.write_percent as u64 {
                    ul.wq.push_back(RequestType {
                        response_requested: false,
                        ..packet
                    });
                } else if roll < (self.write_percent + self.prefetch_percent) as u64 {
                    ul.pq.push_back(packet);
                } else {
                    ul.rq.push_back(packet);
                }
            }
        }
    }

    /// Drain completed responses from every endpoint.
    pub fn collect(&mut self, mc: &mut MemoryController) {
        for endpoint in 0..mc.num_endpoints() {
            let ul = mc.endpoint_mut(endpoint);
            while ul.returned.pop_front().is_some() {
                self.responses += 1;
            }
        }
    }
}

fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
