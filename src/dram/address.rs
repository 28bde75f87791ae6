use super::config::ConfigError;
use super::BLOCK_SIZE;

/// Ceiling log2, with `lg2(1) == 0`.
pub(crate) fn lg2(n: u64) -> u32 {
    n.max(1).next_power_of_two().trailing_zeros()
}

/// One contiguous bit field of a physical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Extent {
    shift: u32,
    width: u32,
}

impl Extent {
    fn get(&self, addr: u64) -> u64 {
        if self.width == 0 {
            return 0;
        }
        (addr >> self.shift) & ((1u64 << self.width) - 1)
    }
}

/// Bit-field position within the slicer, least significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Offset = 0,
    Channel,
    Bank,
    Rank,
    Column,
    Row,
}

const NUM_FIELDS: usize = 6;

/// Decodes a physical byte address into DRAM coordinates.
///
/// The slicer is a fixed table of contiguous extents built once at
/// construction. Field widths are derived from the topology counts, so the
/// decode is a pair of shift-and-mask operations per field.
#[derive(Debug, Clone)]
pub struct AddressMapping {
    extents: [Extent; NUM_FIELDS],
    prefetch_size: usize,
}

impl AddressMapping {
    pub fn new(
        channel_width: usize,
        prefetch_size: usize,
        channels: usize,
        banks: usize,
        columns: usize,
        ranks: usize,
        rows: usize,
    ) -> Result<Self, ConfigError> {
        if prefetch_size == 0 {
            return Err(ConfigError::ZeroPrefetchSize);
        }
        if (channel_width * prefetch_size) % BLOCK_SIZE != 0 {
            return Err(ConfigError::MisalignedPrefetch {
                channel_width,
                prefetch_size,
            });
        }

        let widths = [
            lg2((channel_width * prefetch_size) as u64),
            lg2(channels as u64),
            lg2(banks as u64),
            lg2(ranks as u64),
            lg2((columns / prefetch_size) as u64),
            lg2(rows as u64),
        ];
        let mut extents = [Extent { shift: 0, width: 0 }; NUM_FIELDS];
        let mut shift = 0;
        for (extent, width) in extents.iter_mut().zip(widths) {
            *extent = Extent { shift, width };
            shift += width;
        }

        Ok(Self {
            extents,
            prefetch_size,
        })
    }

    fn slice(&self, field: Field, addr: u64) -> u64 {
        self.extents[field as usize].get(addr)
    }

    fn width(&self, field: Field) -> u32 {
        self.extents[field as usize].width
    }

    pub fn get_channel(&self, addr: u64) -> u64 {
        self.slice(Field::Channel, addr)
    }

    pub fn get_rank(&self, addr: u64) -> u64 {
        self.slice(Field::Rank, addr)
    }

    pub fn get_bank(&self, addr: u64) -> u64 {
        self.slice(Field::Bank, addr)
    }

    pub fn get_row(&self, addr: u64) -> u64 {
        self.slice(Field::Row, addr)
    }

    pub fn get_column(&self, addr: u64) -> u64 {
        self.slice(Field::Column, addr)
    }

    pub fn rows(&self) -> usize {
        1 << self.width(Field::Row)
    }

    pub fn columns(&self) -> usize {
        self.prefetch_size << self.width(Field::Column)
    }

    pub fn ranks(&self) -> usize {
        1 << self.width(Field::Rank)
    }

    pub fn banks(&self) -> usize {
        1 << self.width(Field::Bank)
    }

    pub fn channels(&self) -> usize {
        1 << self.width(Field::Channel)
    }

    pub fn prefetch_size(&self) -> usize {
        self.prefetch_size
    }

    /// Total addressable bytes covered by the slicer.
    pub fn size(&self) -> u64 {
        1u64 << self.bit_size()
    }

    pub fn bit_size(&self) -> u32 {
        self.extents.iter().map(|e| e.width).sum()
    }

    /// Two addresses collide when everything above the offset field matches,
    /// i.e. they name the same row-buffer fill.
    pub fn is_collision(&self, a: u64, b: u64) -> bool {
        let offset_bits = self.width(Field::Offset);
        (a >> offset_bits) == (b >> offset_bits)
    }
}
