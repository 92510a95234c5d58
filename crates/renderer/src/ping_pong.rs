//! Parity selection for the alternating accumulation images.
//!
//! The accumulation pass reads last frame's history while writing this
//! frame's, which cannot target a single image. Two images alternate
//! roles instead: the one written by frame `f` is the one read by frame
//! `f + 1`. The selection is a pure function of the frame counter so
//! every component derives the same answer without shared state.

/// Attachment-set index of the trace target.
pub const TRACE_INDEX: usize = 0;

/// Attachment-set indices of the two accumulation images.
pub const ACCUMULATION_INDICES: [usize; 2] = [1, 2];

/// Accumulation roles resolved for a single frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTargets {
    /// Attachment-set index holding the previous frame's accumulated history.
    pub read: usize,
    /// Attachment-set index the accumulation pass writes this frame.
    pub write: usize,
}

/// Resolves which accumulation image is read and which is written for the
/// given frame.
///
/// Even frames read index 1 and write index 2; odd frames swap the pair.
/// Consequently `frame_targets(f).write == frame_targets(f + 1).read` and
/// no frame reads the image it writes.
pub fn frame_targets(frame_number: u64) -> FrameTargets {
    if frame_number % 2 == 0 {
        FrameTargets {
            read: ACCUMULATION_INDICES[0],
            write: ACCUMULATION_INDICES[1],
        }
    } else {
        FrameTargets {
            read: ACCUMULATION_INDICES[1],
            write: ACCUMULATION_INDICES[0],
        }
    }
}

/// Framebuffer parity for the given frame.
///
/// Framebuffers are built in pairs per swapchain image, one per parity,
/// so the same render pass serves both accumulation orderings.
#[inline]
pub fn parity(frame_number: u64) -> usize {
    (frame_number % 2) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_frame_reads_zeroed_history() {
        // Frame 0 must read the image the attachment set initializes to
        // black, which is the first of the accumulation pair.
        let targets = frame_targets(0);
        assert_eq!(targets.read, ACCUMULATION_INDICES[0]);
        assert_eq!(targets.write, ACCUMULATION_INDICES[1]);
    }

    #[test]
    fn test_two_slot_sequence() {
        // With two frames in flight, frames 0-3 alternate strictly.
        let writes: Vec<usize> = (0..4).map(|f| frame_targets(f).write).collect();
        let reads: Vec<usize> = (0..4).map(|f| frame_targets(f).read).collect();
        assert_eq!(writes, vec![2, 1, 2, 1]);
        assert_eq!(reads, vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_written_image_is_next_frames_history() {
        for f in 0..100 {
            assert_eq!(
                frame_targets(f).write,
                frame_targets(f + 1).read,
                "frame {f} write must feed frame {} read",
                f + 1
            );
        }
    }

    #[test]
    fn test_no_frame_reads_its_own_write() {
        for f in 0..100 {
            let targets = frame_targets(f);
            assert_ne!(targets.read, targets.write, "frame {f}");
            assert!(ACCUMULATION_INDICES.contains(&targets.read));
            assert!(ACCUMULATION_INDICES.contains(&targets.write));
        }
    }

    #[test]
    fn test_parity_matches_targets() {
        for f in 0..100 {
            let expected = frame_targets(f);
            assert_eq!(frame_targets(f + 2), expected, "period is two frames");
            if parity(f) == 0 {
                assert_eq!(expected.read, ACCUMULATION_INDICES[0]);
            } else {
                assert_eq!(expected.read, ACCUMULATION_INDICES[1]);
            }
        }
    }
}
