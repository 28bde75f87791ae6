use super::Time;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueKind {
    Read,
    Write,
    Prefetch,
}

/// Stable handle to a queue slot, valid for as long as the slot stays
/// occupied. Used as the bank back-reference so an in-flight command can
/// find its queue entry on later ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotRef {
    pub queue: QueueKind,
    pub index: usize,
}

/// Per-(rank, bank) command state. At most one command or refresh occupies a
/// bank at a time; `open_row` survives command completion and is what makes
/// a later same-row access a row-buffer hit.
#[derive(Debug, Clone)]
pub(crate) struct BankRequest {
    pub valid: bool,
    pub row_buffer_hit: bool,
    pub need_refresh: bool,
    pub under_refresh: bool,
    pub open_row: Option<u64>,
    pub ready_time: Time,
    pub pkt: Option<SlotRef>,
}

impl Default for BankRequest {
    fn default() -> Self {
        Self {
            valid: false,
            row_buffer_hit: false,
            need_refresh: false,
            under_refresh: false,
            open_row: None,
            ready_time: 0,
            pkt: None,
        }
    }
}
