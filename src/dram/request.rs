use std::cmp::Ordering;
use std::collections::VecDeque;

use serde::Serialize;

use super::Time;

/// Cache block size in bytes. Offsets below this granularity never reach the
/// controller; collision checks compare everything above it.
pub const BLOCK_SIZE: usize = 64;

/// Index of an upstream endpoint registered with the controller. Doubles as
/// the response-sink handle carried on queued requests, so sink lists can be
/// kept sorted and merged like any other id list.
pub type EndpointId = usize;

/// A memory request as submitted by an upstream cache/channel endpoint.
#[derive(Debug, Clone, Default)]
pub struct RequestType {
    pub address: u64,
    pub v_address: u64,
    pub data: u64,
    pub pf_metadata: u32,
    pub instr_depend_on_me: Vec<u64>,
    pub response_requested: bool,
    pub promotion: bool,
    pub asid: [u16; 2],
}

/// Completed read/prefetch pushed back to each registered sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub address: u64,
    pub v_address: u64,
    pub data: u64,
    pub pf_metadata: u32,
    pub instr_depend_on_me: Vec<u64>,
}

/// One occupied slot of a channel queue.
#[derive(Debug, Clone)]
pub(crate) struct QueuedRequest {
    pub address: u64,
    pub v_address: u64,
    pub data: u64,
    pub pf_metadata: u32,
    pub instr_depend_on_me: Vec<u64>,
    pub to_return: Vec<EndpointId>,
    pub scheduled: bool,
    pub forward_checked: bool,
    pub ready_time: Time,
}

impl QueuedRequest {
    pub(crate) fn from_request(req: &RequestType) -> Self {
        Self {
            address: req.address,
            v_address: req.v_address,
            data: req.data,
            pf_metadata: req.pf_metadata,
            instr_depend_on_me: req.instr_depend_on_me.clone(),
            to_return: Vec::new(),
            scheduled: false,
            forward_checked: false,
            ready_time: 0,
        }
    }

    /// Response carrying `data`, which differs from the request's own payload
    /// when a write is forwarded to an in-flight read.
    pub(crate) fn response_with(&self, data: u64) -> Response {
        Response {
            address: self.address,
            v_address: self.v_address,
            data,
            pf_metadata: self.pf_metadata,
            instr_depend_on_me: self.instr_depend_on_me.clone(),
        }
    }

    pub(crate) fn block_number(&self) -> u64 {
        self.address >> super::address::lg2(BLOCK_SIZE as u64)
    }
}

/// Set-union of two sorted, duplicate-free id lists.
pub(crate) fn merge_sorted<T: Ord + Copy>(a: &[T], b: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct UpstreamStats {
    rq_admitted: u64,
    wq_admitted: u64,
    pq_admitted: u64,
    responses: u64,
}

impl UpstreamStats {
    pub fn rq_admitted(&self) -> u64 {
        self.rq_admitted
    }

    pub fn wq_admitted(&self) -> u64 {
        self.wq_admitted
    }

    pub fn pq_admitted(&self) -> u64 {
        self.pq_admitted
    }

    pub fn responses(&self) -> u64 {
        self.responses
    }

    pub(crate) fn record_rq_admitted(&mut self) {
        self.rq_admitted += 1;
    }

    pub(crate) fn record_wq_admitted(&mut self) {
        self.wq_admitted += 1;
    }

    pub(crate) fn record_pq_admitted(&mut self) {
        self.pq_admitted += 1;
    }

    pub(crate) fn record_response(&mut self) {
        self.responses += 1;
    }
}

/// The controller-facing side of an upstream endpoint: three input queues
/// drained front-to-back each tick, and a sink for completed responses.
#[derive(Debug, Default)]
pub struct UpstreamQueues {
    pub rq: VecDeque<RequestType>,
    pub wq: VecDeque<RequestType>,
    pub pq: VecDeque<RequestType>,
    pub returned: VecDeque<Response>,
    pub sim_stats: UpstreamStats,
    pub roi_stats: UpstreamStats,
}
