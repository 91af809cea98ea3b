//! Pure calculation functions for rendition dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::ResizeParams;

/// Height of a rendition scaled to `target_width`, preserving aspect ratio.
///
/// Computes `round(height * target_width / width)` with halves rounded up,
/// in integer arithmetic so results never depend on float rounding.
/// Never returns zero: extreme panoramas still get a one-pixel-high strip.
///
/// # Examples
/// ```
/// # use image_derivatives::imaging::scaled_height;
/// assert_eq!(scaled_height((4000, 3000), 200), 150);
/// assert_eq!(scaled_height((3, 2), 2), 1); // 1.33 rounds down
/// ```
pub fn scaled_height(original: (u32, u32), target_width: u32) -> u32 {
    let (orig_w, orig_h) = original;
    if orig_w == 0 {
        return 1;
    }
    let numerator = 2 * orig_h as u128 * target_width as u128 + orig_w as u128;
    let height = numerator / (2 * orig_w as u128);
    height.clamp(1, u32::MAX as u128) as u32
}

/// Largest width or height a WebP bitstream can carry.
pub const WEBP_MAX_DIMENSION: u32 = 16383;

/// Whether a `width`×`height` WebP can be produced within `max_pixels`.
///
/// Checked before resizing: the resample buffer is allocated at full size,
/// so an oversized plan must be refused before any pixels exist.
pub fn fits_webp(width: u32, height: u32, max_pixels: u64) -> bool {
    width <= WEBP_MAX_DIMENSION
        && height <= WEBP_MAX_DIMENSION
        && width as u64 * height as u64 <= max_pixels
}

/// One planned rendition: the ladder width and its computed dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSize {
    /// Ladder entry this rendition was planned for.
    pub target: u32,
    pub params: ResizeParams,
}

/// Plan output dimensions for every ladder width, in ladder order.
///
/// Unlike a responsive `srcset`, the ladder is a naming contract: every width
/// is produced even if it exceeds the original (the image is upscaled).
pub fn plan_ladder(original: (u32, u32), widths: &[u32]) -> Vec<PlannedSize> {
    widths
        .iter()
        .map(|&width| PlannedSize {
            target: width,
            params: ResizeParams {
                width,
                height: scaled_height(original, width),
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_height_landscape() {
        assert_eq!(scaled_height((1600, 900), 800), 450);
    }

    #[test]
    fn scaled_height_portrait() {
        assert_eq!(scaled_height((900, 1600), 450), 800);
    }

    #[test]
    fn scaled_height_rounds_half_up() {
        // 3 * 1 / 2 = 1.5 → 2
        assert_eq!(scaled_height((2, 3), 1), 2);
        // 5 * 1 / 4 = 1.25 → 1
        assert_eq!(scaled_height((4, 5), 1), 1);
        // 7 * 3 / 4 = 5.25 → 5
        assert_eq!(scaled_height((4, 7), 3), 5);
        // 1080 * 200 / 1920 = 112.5 → 113
        assert_eq!(scaled_height((1920, 1080), 200), 113);
    }

    #[test]
    fn scaled_height_upscales() {
        assert_eq!(scaled_height((100, 50), 3200), 1600);
    }

    #[test]
    fn scaled_height_never_zero() {
        assert_eq!(scaled_height((10_000, 1), 200), 1);
        assert_eq!(scaled_height((0, 100), 200), 1);
    }

    #[test]
    fn scaled_height_large_values_do_not_overflow() {
        assert_eq!(scaled_height((u32::MAX, u32::MAX), 3200), 3200);
    }

    #[test]
    fn scaled_height_extreme_inputs_saturate() {
        assert_eq!(scaled_height((1, u32::MAX), u32::MAX), u32::MAX);
        assert_eq!(scaled_height((u32::MAX, u32::MAX), u32::MAX), u32::MAX);
    }

    #[test]
    fn tall_source_plans_huge_heights() {
        assert_eq!(scaled_height((1, 2000), 3200), 6_400_000);
    }

    #[test]
    fn fits_webp_limits() {
        assert!(fits_webp(16383, 16383, u64::MAX));
        assert!(!fits_webp(16384, 1, u64::MAX));
        assert!(!fits_webp(3200, 6_400_000, u64::MAX));
        assert!(fits_webp(1000, 1000, 1_000_000));
        assert!(!fits_webp(1000, 1001, 1_000_000));
    }

    #[test]
    fn plan_ladder_keeps_order_and_all_widths() {
        let plan = plan_ladder((400, 300), &[800, 200, 400]);
        let widths: Vec<u32> = plan.iter().map(|p| p.params.width).collect();
        assert_eq!(widths, vec![800, 200, 400]);
        assert_eq!(plan[0].params.height, 600);
        assert_eq!(plan[1].params.height, 150);
        assert_eq!(plan[2].params.height, 300);
        assert!(plan.iter().all(|p| p.target == p.params.width));
    }

    #[test]
    fn plan_ladder_empty() {
        assert!(plan_ladder((400, 300), &[]).is_empty());
    }
}
