use std::num::NonZeroU32;

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut, BresenhamLineIter};

use crate::detect::DetectedFace;
use crate::landmark::{Landmark, LandmarkGroup};

/// Stroke settings for one render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStyle {
    pub line_thickness: NonZeroU32,
    pub point_radius: u32,
    pub color: Rgb<u8>,
}

impl RenderStyle {
    pub const DEFAULT_COLOR: Rgb<u8> = Rgb([255, 210, 0]);

    /// Largest line thickness or point radius the renderer draws. Larger
    /// values are clamped.
    pub const MAX_STROKE: u32 = 100;

    /// Copy of this style with the caller's overrides applied.
    pub fn with_overrides(
        &self,
        line_thickness: Option<NonZeroU32>,
        point_radius: Option<u32>,
    ) -> Self {
        Self {
            line_thickness: line_thickness.unwrap_or(self.line_thickness),
            point_radius: point_radius.unwrap_or(self.point_radius),
            color: self.color,
        }
    }
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            line_thickness: NonZeroU32::new(2).unwrap_or(NonZeroU32::MIN),
            point_radius: 5,
            color: Self::DEFAULT_COLOR,
        }
    }
}

/// Draw group polylines, then every landmark as a filled disc, on a copy
/// of `image`.
pub fn render(
    image: &RgbImage,
    faces: &[DetectedFace],
    groups: &[LandmarkGroup],
    style: &RenderStyle,
) -> RgbImage {
    let mut canvas = image.clone();

    for face in faces {
        for group in groups {
            for pair in face.landmarks.group(group).windows(2) {
                draw_segment(&mut canvas, pair[0], pair[1], style);
            }
        }

        for point in face.landmarks.points() {
            draw_filled_circle_mut(
                &mut canvas,
                (point.x, point.y),
                stroke_px(style.point_radius),
                style.color,
            );
        }
    }

    canvas
}

fn draw_segment(canvas: &mut RgbImage, a: Landmark, b: Landmark, style: &RenderStyle) {
    let start = (a.x as f32, a.y as f32);
    let end = (b.x as f32, b.y as f32);
    let thickness = style.line_thickness.get().min(RenderStyle::MAX_STROKE);

    if thickness == 1 {
        draw_line_segment_mut(canvas, start, end, style.color);
        return;
    }

    // stamp a disc on every pixel of the center line
    let radius = stroke_px(thickness / 2);
    for (x, y) in BresenhamLineIter::new(start, end) {
        draw_filled_circle_mut(canvas, (x, y), radius, style.color);
    }
}

/// `value` as an imageproc radius, clamped to `MAX_STROKE`.
fn stroke_px(value: u32) -> i32 {
    i32::try_from(value.min(RenderStyle::MAX_STROKE)).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::FaceBox;
    use crate::landmark::{LandmarkPointSet, LANDMARK_COUNT, LANDMARK_GROUPS};

    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    /// 68 points on a loose grid inside a 200x200 image.
    fn grid_face() -> DetectedFace {
        let points: Vec<Landmark> = (0..LANDMARK_COUNT as i32)
            .map(|i| Landmark::new(20 + (i % 9) * 20, 20 + (i / 9) * 20))
            .collect();
        DetectedFace {
            bounds: FaceBox {
                x: 10.0,
                y: 10.0,
                width: 180.0,
                height: 180.0,
                score: 0.99,
            },
            landmarks: LandmarkPointSet::try_from(points).unwrap(),
        }
    }

    fn style(thickness: u32, radius: u32) -> RenderStyle {
        RenderStyle {
            line_thickness: NonZeroU32::new(thickness).unwrap(),
            point_radius: radius,
            color: RenderStyle::DEFAULT_COLOR,
        }
    }

    #[test]
    fn empty_faces_leave_image_unchanged() {
        let image = RgbImage::from_pixel(50, 40, Rgb([12, 34, 56]));
        let out = render(&image, &[], &LANDMARK_GROUPS, &RenderStyle::default());
        assert_eq!(out, image);
    }

    #[test]
    fn render_does_not_touch_input() {
        let image = RgbImage::from_pixel(200, 200, BLACK);
        let _ = render(&image, &[grid_face()], &LANDMARK_GROUPS, &RenderStyle::default());
        assert!(image.pixels().all(|p| *p == BLACK));
    }

    #[test]
    fn rendering_is_deterministic() {
        let image = RgbImage::from_pixel(200, 200, BLACK);
        let faces = [grid_face()];
        let first = render(&image.clone(), &faces, &LANDMARK_GROUPS, &RenderStyle::default());
        let second = render(&image.clone(), &faces, &LANDMARK_GROUPS, &RenderStyle::default());
        assert_eq!(first, second);
    }

    #[test]
    fn style_changes_stroke_not_positions() {
        let image = RgbImage::from_pixel(200, 200, BLACK);
        let face = grid_face();
        let thin = render(&image, &[face.clone()], &LANDMARK_GROUPS, &style(1, 1));
        let thick = render(&image, &[face.clone()], &LANDMARK_GROUPS, &style(4, 6));

        for p in face.landmarks.points() {
            let (x, y) = (p.x as u32, p.y as u32);
            assert_eq!(*thin.get_pixel(x, y), RenderStyle::DEFAULT_COLOR);
            assert_eq!(*thick.get_pixel(x, y), RenderStyle::DEFAULT_COLOR);
        }

        let painted = |img: &RgbImage| img.pixels().filter(|p| **p != BLACK).count();
        assert!(painted(&thick) > painted(&thin));
    }

    #[test]
    fn point_radius_sets_disc_size() {
        let image = RgbImage::from_pixel(200, 200, BLACK);
        let face = grid_face();
        let out = render(&image, &[face.clone()], &[], &style(1, 5));

        // point 0 sits at (20, 20); no group lines were drawn
        assert_eq!(*out.get_pixel(25, 20), RenderStyle::DEFAULT_COLOR);
        assert_eq!(*out.get_pixel(20, 15), RenderStyle::DEFAULT_COLOR);
        assert_eq!(*out.get_pixel(27, 20), BLACK);
    }

    #[test]
    fn thick_segment_is_wider_than_one_pixel() {
        let image = RgbImage::from_pixel(60, 60, BLACK);
        let mut canvas = image.clone();
        draw_segment(
            &mut canvas,
            Landmark::new(10, 30),
            Landmark::new(50, 30),
            &style(4, 0),
        );
        assert_eq!(*canvas.get_pixel(30, 30), RenderStyle::DEFAULT_COLOR);
        assert_eq!(*canvas.get_pixel(30, 32), RenderStyle::DEFAULT_COLOR);
        assert_eq!(*canvas.get_pixel(30, 35), BLACK);
    }

    #[test]
    fn oversized_point_radius_is_clamped() {
        let image = RgbImage::from_pixel(300, 300, BLACK);
        let out = render(&image, &[grid_face()], &[], &style(1, u32::MAX));

        // point 0 at (20, 20): the disc reaches MAX_STROKE pixels and stops
        assert_eq!(*out.get_pixel(20, 20), RenderStyle::DEFAULT_COLOR);
        assert_eq!(*out.get_pixel(20 + RenderStyle::MAX_STROKE, 20), RenderStyle::DEFAULT_COLOR);
        assert_eq!(*out.get_pixel(299, 299), BLACK);
    }

    #[test]
    fn oversized_thickness_is_clamped() {
        let image = RgbImage::from_pixel(400, 60, BLACK);
        let mut canvas = image.clone();
        draw_segment(
            &mut canvas,
            Landmark::new(10, 30),
            Landmark::new(12, 30),
            &style(u32::MAX, 0),
        );
        let half = RenderStyle::MAX_STROKE / 2;
        assert_eq!(*canvas.get_pixel(12 + half, 30), RenderStyle::DEFAULT_COLOR);
        assert_eq!(*canvas.get_pixel(12 + half + 2, 30), BLACK);
    }

    #[test]
    fn overrides_keep_unset_fields() {
        let base = RenderStyle::default();
        let merged = base.with_overrides(None, Some(1));
        assert_eq!(merged.line_thickness.get(), 2);
        assert_eq!(merged.point_radius, 1);
        assert_eq!(merged.color, base.color);
    }
}
