//! Layouts shared with the queue microcode.
use static_assertions::{assert_eq_size, const_assert_eq};
use zerocopy::big_endian::{I16, U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Offset of the [`QueueHeader`] in DMEM.
pub const QUEUE_HEADER: usize = 32;

pub const MAX_OVERLAYS: usize = 8;
pub const OVERLAY_SLOTS: usize = 16;

/// Everything the queue needs to know about one overlay, so it can swap it in.
#[derive(Debug, Default, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct OverlayDescriptor {
    pub code: U32,
    pub data: U32,
    pub state: U32,
    pub code_size: U16,
    pub data_size: U16,
}

/// Render mode of the RDP helpers.
#[derive(Debug, Default, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct RdpMode {
    pub combiner: U64,
    pub combiner_mipmap_mask: U64,
    pub blend_step0: U32,
    pub blend_step1: U32,
    pub other_modes: U64,
}

/// The queue's bookkeeping, placed at [`QUEUE_HEADER`] in DMEM.
#[derive(Debug, Default, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct QueueHeader {
    /// Maps the high nibble of a command to the byte offset of its descriptor.
    pub overlay_table: [u8; OVERLAY_SLOTS],
    pub descriptors: [OverlayDescriptor; MAX_OVERLAYS],
    /// Return addresses of calls, by byte offset.
    pub pointer_stack: [U32; 8],
    pub lowpri: U32,
    pub highpri: U32,
    pub current: U32,
    pub rdp_sentinel: U32,
    pub rdp_mode: RdpMode,
    pub scissor: U64,
    pub rdp_buffers: [U32; 2],
    pub rdp_current: U32,
    pub fill_color: U32,
    pub target_bitdepth: u8,
    pub syncfull_ongoing: u8,
    pub rdpq_debug: u8,
    pub padding: u8,
    pub current_overlay: I16,
}

assert_eq_size!(OverlayDescriptor, [u8; 16]);
assert_eq_size!(QueueHeader, [u8; 254]);
const_assert_eq!(std::mem::offset_of!(QueueHeader, pointer_stack) + QUEUE_HEADER, 0xB0);
const_assert_eq!(std::mem::offset_of!(QueueHeader, current) + QUEUE_HEADER, 0xD8);

impl QueueHeader {
    /// DMEM offset of the pointer stack slot that saves the low priority position.
    pub const LOWPRI_SLOT: u32 = 0x20;
    /// DMEM offset of the pointer stack slot that saves the high priority position.
    pub const HIGHPRI_SLOT: u32 = 0x24;
}

/// Header at the start of an overlay's data, past the queue's own data. Followed by one entry
/// per command.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct OverlayHeader {
    pub state_start: U16,
    pub state_size: U16,
    pub command_base: U16,
    pub padding: U16,
}

assert_eq_size!(OverlayHeader, [u8; 8]);

/// Parsed [`OverlayHeader`] along with its command table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub header: OverlayHeader,
    /// Per command: the word count in the top nibble, the entry point below.
    pub commands: Vec<u16>,
}

impl Overlay {
    /// Parses an overlay header out of `data`. The command table ends at the first zero entry.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (header, rest) = OverlayHeader::read_from_prefix(data).ok()?;
        let commands = rest
            .chunks_exact(2)
            .map(|entry| u16::from_be_bytes([entry[0], entry[1]]))
            .take_while(|&entry| entry != 0)
            .collect();

        Some(Self { header, commands })
    }

    /// Number of overlay table slots the commands span.
    pub fn slots(&self) -> usize {
        self.commands.len().div_ceil(16)
    }

    /// State size in bytes. The header stores it minus one.
    pub fn state_len(&self) -> usize {
        self.header.state_size.get() as usize + 1
    }
}
