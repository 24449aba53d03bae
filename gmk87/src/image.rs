//! Converts decoded RGB565 pixel streams into the offset-addressed chunks
//! the display controller consumes, and enforces the combined frame ceiling.

use tracing::warn;

use crate::frame::MAX_DATA_LEN;

/// Display dimensions
pub const DISPLAY_WIDTH: u32 = 240;
pub const DISPLAY_HEIGHT: u32 = 135;

/// Bytes reserved per display frame in the upload address space.
pub const FRAME_STRIDE: usize = 0x10000;

/// Combined display-frame ceiling across both slots. The position field
/// could address far more, but tested units lock up beyond this.
pub const MAX_TOTAL_FRAMES: usize = 36;

/// One of the two image storage regions on the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Slot {
    First = 0,
    Second = 1,
}

/// One transmission unit: up to 56 bytes of pixel data at a running offset
/// into its slot's buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFrame {
    pub slot: Slot,
    pub offset: u32,
    pub data: Vec<u8>,
}

/// Pack RGB565 pixels MSB first.
pub fn encode_rgb565(pixels: &[u16]) -> Vec<u8> {
    pixels.iter().flat_map(|p| p.to_be_bytes()).collect()
}

/// Slice a pixel stream into 56-byte chunks with running offsets.
pub fn build_frames(pixels: &[u16], slot: Slot) -> Vec<ImageFrame> {
    chunk_bytes(&encode_rgb565(pixels), slot)
}

fn chunk_bytes(bytes: &[u8], slot: Slot) -> Vec<ImageFrame> {
    bytes
        .chunks(MAX_DATA_LEN)
        .enumerate()
        .map(|(i, chunk)| ImageFrame {
            slot,
            offset: (i * MAX_DATA_LEN) as u32,
            data: chunk.to_vec(),
        })
        .collect()
}

/// Report of display frames dropped to satisfy the hardware ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncation {
    pub requested: (usize, usize),
    pub kept: (usize, usize),
}

/// Cap the combined display-frame count at [`MAX_TOTAL_FRAMES`], splitting
/// the budget proportionally between the slots. Never silent: overflows are
/// logged and reported.
pub fn apply_frame_budget(first: usize, second: usize) -> (usize, usize, Option<Truncation>) {
    let total = first + second;
    if total <= MAX_TOTAL_FRAMES {
        return (first, second, None);
    }
    let mut keep_first = (MAX_TOTAL_FRAMES * first / total).min(first);
    if first > 0 && keep_first == 0 {
        keep_first = 1;
    }
    let keep_second = (MAX_TOTAL_FRAMES - keep_first).min(second);
    let truncation = Truncation {
        requested: (first, second),
        kept: (keep_first, keep_second),
    };
    warn!(
        "frame budget exceeded: requested {first}+{second}, keeping {keep_first}+{keep_second} \
         (ceiling {MAX_TOTAL_FRAMES})"
    );
    (keep_first, keep_second, Some(truncation))
}

/// All chunks for one upload session, both slots, in transmission order.
#[derive(Debug, Clone)]
pub struct UploadPlan {
    chunks: Vec<ImageFrame>,
    frame_counts: (u8, u8),
}

impl UploadPlan {
    /// Build a plan from per-slot lists of decoded display frames. Frames
    /// beyond the combined ceiling are dropped proportionally and reported.
    pub fn build(first: &[Vec<u16>], second: &[Vec<u16>]) -> (Self, Option<Truncation>) {
        let (keep_first, keep_second, truncation) = apply_frame_budget(first.len(), second.len());
        let mut chunks = chunk_bytes(&slot_buffer(&first[..keep_first]), Slot::First);
        chunks.extend(chunk_bytes(&slot_buffer(&second[..keep_second]), Slot::Second));
        let plan = Self {
            chunks,
            frame_counts: (keep_first as u8, keep_second as u8),
        };
        (plan, truncation)
    }

    /// Chunks in strict transmission order: slot 0 ascending, then slot 1.
    pub fn chunks(&self) -> &[ImageFrame] {
        &self.chunks
    }

    /// Display frame counts (slot 0, slot 1) after budgeting.
    pub fn frame_counts(&self) -> (u8, u8) {
        self.frame_counts
    }

    /// Base of a slot's region in the upload address space. The second
    /// slot's frames follow directly after the first slot's.
    pub fn slot_base(&self, slot: Slot) -> u32 {
        match slot {
            Slot::First => 0,
            Slot::Second => (self.frame_counts.0 as usize * FRAME_STRIDE) as u32,
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.data.len()).sum()
    }
}

/// Concatenate display frames, each padded out to the device's frame stride.
fn slot_buffer(frames: &[Vec<u16>]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(frames.len() * FRAME_STRIDE);
    for pixels in frames {
        debug_assert!(pixels.len() * 2 <= FRAME_STRIDE);
        let start = buf.len();
        buf.extend(encode_rgb565(pixels));
        buf.resize(start + FRAME_STRIDE, 0);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_covers_the_stream() {
        for n in [0usize, 1, 27, 28, 29, 100, 32400] {
            let pixels: Vec<u16> = (0..n).map(|i| (i * 31) as u16).collect();
            let frames = build_frames(&pixels, Slot::First);
            assert_eq!(frames.len(), (n * 2).div_ceil(MAX_DATA_LEN));

            // concatenated payloads reconstruct the stream, in offset order
            let mut bytes = Vec::new();
            let mut expected_offset = 0u32;
            for frame in &frames {
                assert_eq!(frame.offset, expected_offset);
                expected_offset += frame.data.len() as u32;
                bytes.extend_from_slice(&frame.data);
            }
            assert_eq!(bytes, encode_rgb565(&pixels));
        }
    }

    #[test]
    fn rgb565_is_msb_first() {
        assert_eq!(encode_rgb565(&[0xf800, 0x07e0]), vec![0xf8, 0x00, 0x07, 0xe0]);
    }

    #[test]
    fn budget_passes_through_under_ceiling() {
        assert_eq!(apply_frame_budget(20, 16), (20, 16, None));
    }

    #[test]
    fn budget_truncates_proportionally() {
        for (first, second) in [(50, 50), (90, 0), (0, 90), (1, 100), (70, 2)] {
            let (keep_first, keep_second, truncation) = apply_frame_budget(first, second);
            assert!(keep_first + keep_second <= MAX_TOTAL_FRAMES);
            assert!(keep_first <= first && keep_second <= second);
            // neither slot is starved out entirely
            assert_eq!(keep_first == 0, first == 0);
            let t = truncation.expect("overflow must be reported");
            assert_eq!(t.requested, (first, second));
            assert_eq!(t.kept, (keep_first, keep_second));
        }
    }

    #[test]
    fn plan_addresses_second_slot_after_first() {
        let frame = vec![0u16; 10];
        let (plan, truncation) = UploadPlan::build(&[frame.clone(), frame.clone()], &[frame]);
        assert!(truncation.is_none());
        assert_eq!(plan.frame_counts(), (2, 1));
        assert_eq!(plan.slot_base(Slot::First), 0);
        assert_eq!(plan.slot_base(Slot::Second), 2 * FRAME_STRIDE as u32);
        assert_eq!(plan.total_bytes(), 3 * FRAME_STRIDE);

        // strict offset order within each slot
        let first_chunks: Vec<_> = plan.chunks().iter().filter(|c| c.slot == Slot::First).collect();
        assert_eq!(first_chunks[0].offset, 0);
        assert!(first_chunks.windows(2).all(|w| w[0].offset < w[1].offset));
    }
}
