//! Greyscale frames and rectangular check areas.

use image::{imageops, GrayImage};
use serde::{Deserialize, Serialize};

/// A check area as written in the trim catalog: top-left corner and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckArea {
    pub start: [u32; 2],
    pub size: [u32; 2],
}

/// A check area clipped to a concrete frame size. Always at least 1x1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Clip `area` to a `frame_width` x `frame_height` frame.
    ///
    /// An end coordinate at or past the frame edge becomes `dim - 1`. A start
    /// outside the frame is pulled inside, and a region that would end up
    /// empty keeps a single row/column.
    pub fn clamp(area: &CheckArea, frame_width: u32, frame_height: u32) -> Self {
        let (x, width) = clamp_axis(area.start[0], area.size[0], frame_width);
        let (y, height) = clamp_axis(area.start[1], area.size[1], frame_height);
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

fn clamp_axis(start: u32, size: u32, dim: u32) -> (u32, u32) {
    let dim = dim.max(1);
    let start = start.min(dim - 1);
    let mut end = start.saturating_add(size);
    if end >= dim {
        end = dim - 1;
    }
    if end <= start {
        end = (start + 1).min(dim);
    }
    (start, end - start)
}

/// Wrap raw `gray` pixels from ffmpeg. None unless the buffer holds exactly
/// one `width` x `height` frame.
pub fn frame_from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Option<GrayImage> {
    if width == 0 || height == 0 || pixels.len() != width as usize * height as usize {
        return None;
    }
    GrayImage::from_raw(width, height, pixels)
}

/// Copy out `area` of `frame`, clipped to the frame.
pub fn crop_area(frame: &GrayImage, area: &CheckArea) -> GrayImage {
    let r = Region::clamp(area, frame.width(), frame.height());
    imageops::crop_imm(frame, r.x, r.y, r.width, r.height).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_region_inside_frame_unchanged() {
        let area = CheckArea {
            start: [10, 20],
            size: [100, 50],
        };
        assert_eq!(
            Region::clamp(&area, 640, 360),
            Region {
                x: 10,
                y: 20,
                width: 100,
                height: 50
            }
        );
    }

    #[test]
    fn test_region_end_clipped_to_last_index() {
        let area = CheckArea {
            start: [600, 300],
            size: [100, 100],
        };
        let r = Region::clamp(&area, 640, 360);
        assert_eq!(r.x + r.width, 639);
        assert_eq!(r.y + r.height, 359);
    }

    #[test]
    fn test_region_outside_frame_keeps_one_pixel() {
        let area = CheckArea {
            start: [5000, 5000],
            size: [10, 10],
        };
        let r = Region::clamp(&area, 640, 360);
        assert_eq!((r.x, r.y, r.width, r.height), (639, 359, 1, 1));
    }

    #[test]
    fn test_crop_copies_pixels() {
        let pixels: Vec<u8> = (0..16).collect();
        let frame = GrayImage::from_raw(4, 4, pixels).unwrap();
        let cropped = crop_area(
            &frame,
            &CheckArea {
                start: [1, 1],
                size: [2, 2],
            },
        );
        assert_eq!(cropped.dimensions(), (2, 2));
        assert_eq!(cropped.as_raw(), &vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_crop_past_edge_is_clipped() {
        let frame = GrayImage::from_pixel(64, 36, image::Luma([7]));
        let cropped = crop_area(
            &frame,
            &CheckArea {
                start: [40, 20],
                size: [100, 100],
            },
        );
        assert_eq!(cropped.dimensions(), (23, 15));
    }

    #[test]
    fn test_from_raw_rejects_wrong_length() {
        assert!(frame_from_raw(4, 4, vec![0; 15]).is_none());
        assert!(frame_from_raw(4, 4, vec![0; 17]).is_none());
        assert!(frame_from_raw(0, 4, vec![]).is_none());
        assert_eq!(frame_from_raw(2, 1, vec![3, 4]).unwrap().get_pixel(1, 0)[0], 4);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_region_clamped_to_frame(
            sx in 0u32..2000,
            sy in 0u32..2000,
            w in 0u32..2000,
            h in 0u32..2000,
            fw in 1u32..1000,
            fh in 1u32..1000,
        ) {
            let area = CheckArea { start: [sx, sy], size: [w, h] };
            let r = Region::clamp(&area, fw, fh);

            prop_assert!(r.width >= 1 && r.height >= 1);
            prop_assert!(r.x + r.width <= fw);
            prop_assert!(r.y + r.height <= fh);

            // Requested end past the last index is clipped to dim - 1
            if sx + w >= fw && sx + 1 < fw {
                prop_assert_eq!(r.x + r.width, fw - 1);
            }
            if sy + h >= fh && sy + 1 < fh {
                prop_assert_eq!(r.y + r.height, fh - 1);
            }
            // Fully inside requests are untouched
            if sx + w < fw && w > 0 {
                prop_assert_eq!((r.x, r.width), (sx, w));
            }
        }
    }
}
