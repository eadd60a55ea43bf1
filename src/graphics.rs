//! Text composition onto an 8-bit grayscale canvas.

use std::convert::Infallible;

use embedded_graphics::{
    mono_font::{MonoFont, MonoTextStyle, iso_8859_1::FONT_6X10},
    pixelcolor::{Gray8, GrayColor},
    prelude::*,
    primitives::{Line, PrimitiveStyle, Triangle},
    text::{Baseline, Text, renderer::TextRenderer},
};
use serde::{Deserialize, Serialize};

/// Glyph set used for every rendered line.
pub const FONT: MonoFont<'static> = FONT_6X10;

/// Vertical advance between two lines, in pixels.
pub const LINE_HEIGHT: i32 = 10;

/// Grayscale image the display thresholds into its framebuffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayCanvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl GrayCanvas {
    /// Creates a black canvas.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; (width * height) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Luminance at `(x, y)`; black outside the canvas.
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn set_luma(&mut self, x: u32, y: u32, luma: u8) {
        if x < self.width && y < self.height {
            self.pixels[(y * self.width + x) as usize] = luma;
        }
    }
}

impl OriginDimensions for GrayCanvas {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for GrayCanvas {
    type Color = Gray8;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x >= 0 && point.y >= 0 {
                self.set_luma(point.x as u32, point.y as u32, color.luma());
            }
        }
        Ok(())
    }
}

/// Placement of a block of lines on the canvas.
///
/// Without alignment, lines are anchored at the top-left margins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawOptions {
    pub vertical_align: bool,
    pub horizontal_align: bool,
    pub margin_left: i32,
    pub margin_right: i32,
    pub margin_top: i32,
    pub margin_bottom: i32,
}

impl DrawOptions {
    /// Vertically centered block, left aligned. Used for the status page.
    pub const fn vertical() -> Self {
        Self {
            vertical_align: true,
            horizontal_align: false,
            margin_left: 0,
            margin_right: 0,
            margin_top: 0,
            margin_bottom: 0,
        }
    }

    /// Centered on both axes. Used for notifications.
    pub const fn centered() -> Self {
        Self {
            horizontal_align: true,
            ..Self::vertical()
        }
    }
}

/// Rendered width of `line` in pixels.
pub fn measure(line: &str) -> u32 {
    MonoTextStyle::new(&FONT, Gray8::WHITE)
        .measure_string(line, Point::zero(), Baseline::Top)
        .bounding_box
        .size
        .width
}

/// Top-left origin of every line given its measured width.
pub fn layout(width: u32, height: u32, line_widths: &[u32], opts: &DrawOptions) -> Vec<Point> {
    let (width, height) = (width as i32, height as i32);
    let y_offset = if opts.vertical_align {
        (height - line_widths.len() as i32 * LINE_HEIGHT - opts.margin_top - opts.margin_bottom) / 2
    } else {
        0
    };

    line_widths
        .iter()
        .enumerate()
        .map(|(i, &line_width)| {
            let x = if opts.horizontal_align {
                let occupied = line_width as i32 + opts.margin_right + opts.margin_left;
                opts.margin_left + (width - occupied) / 2
            } else {
                opts.margin_left
            };
            Point::new(x, y_offset + i as i32 * LINE_HEIGHT + opts.margin_top)
        })
        .collect()
}

/// Draws white text on a black canvas of the given size.
pub fn render_text<S: AsRef<str>>(width: u32, height: u32, lines: &[S], opts: &DrawOptions) -> GrayCanvas {
    let mut canvas = GrayCanvas::new(width, height);
    let widths: Vec<u32> = lines.iter().map(|l| measure(l.as_ref())).collect();

    for (line, origin) in lines.iter().zip(layout(width, height, &widths, opts)) {
        draw_line(&mut canvas, line.as_ref(), origin);
    }
    canvas
}

/// Arrows are not in the ISO-8859-1 font and are drawn as shapes in their
/// character cell.
fn arrow(c: char) -> Option<bool> {
    match c {
        '↑' => Some(true),
        '↓' => Some(false),
        _ => None,
    }
}

fn draw_line(canvas: &mut GrayCanvas, line: &str, origin: Point) {
    let style = MonoTextStyle::new(&FONT, Gray8::WHITE);
    let text: String = line
        .chars()
        .map(|c| if arrow(c).is_some() { ' ' } else { c })
        .collect();
    let Ok(_) = Text::with_baseline(&text, origin, style, Baseline::Top).draw(canvas);

    let advance = (FONT.character_size.width + FONT.character_spacing) as i32;
    for (i, c) in line.chars().enumerate() {
        if let Some(up) = arrow(c) {
            draw_arrow(canvas, origin + Point::new(i as i32 * advance, 0), up);
        }
    }
}

fn draw_arrow(canvas: &mut GrayCanvas, cell: Point, up: bool) {
    let (tip, base, tail) = if up { (1, 4, 8) } else { (8, 5, 1) };
    let head = Triangle::new(
        cell + Point::new(2, tip),
        cell + Point::new(0, base),
        cell + Point::new(4, base),
    );
    let shaft = Line::new(cell + Point::new(2, base), cell + Point::new(2, tail));

    let Ok(_) = head
        .into_styled(PrimitiveStyle::with_fill(Gray8::WHITE))
        .draw(canvas);
    let Ok(_) = shaft
        .into_styled(PrimitiveStyle::with_stroke(Gray8::WHITE, 1))
        .draw(canvas);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lit_rows(canvas: &GrayCanvas) -> Vec<u32> {
        (0..canvas.height())
            .filter(|&y| (0..canvas.width()).any(|x| canvas.luma(x, y) > 0))
            .collect()
    }

    fn lit_columns(canvas: &GrayCanvas) -> Vec<u32> {
        (0..canvas.width())
            .filter(|&x| (0..canvas.height()).any(|y| canvas.luma(x, y) > 0))
            .collect()
    }

    #[test]
    fn vertical_alignment_centers_the_block() {
        for lines in 1..=6 {
            let widths = vec![30; lines];
            let origins = layout(128, 64, &widths, &DrawOptions::vertical());

            let top = origins[0].y;
            let bottom = 64 - (origins[lines - 1].y + LINE_HEIGHT);
            assert!((top - bottom).abs() <= 1, "{lines} lines: top {top} bottom {bottom}");
        }
    }

    #[test]
    fn lines_advance_by_glyph_height() {
        let origins = layout(128, 64, &[10, 20, 30], &DrawOptions::default());

        assert_eq!(
            origins,
            vec![Point::new(0, 0), Point::new(0, 10), Point::new(0, 20)]
        );
    }

    #[test]
    fn horizontal_alignment_centers_each_line() {
        let origins = layout(128, 64, &[28, 60], &DrawOptions::centered());

        assert_eq!(origins[0].x, 50);
        assert_eq!(origins[1].x, 34);
    }

    #[test]
    fn margins_shift_the_anchor() {
        let opts = DrawOptions {
            margin_left: 4,
            margin_top: 3,
            ..DrawOptions::default()
        };

        assert_eq!(layout(128, 64, &[10], &opts), vec![Point::new(4, 3)]);

        let centered = DrawOptions {
            horizontal_align: true,
            margin_left: 10,
            margin_right: 2,
            ..DrawOptions::default()
        };
        // 10 + (128 - (20 + 2 + 10)) / 2
        assert_eq!(layout(128, 64, &[20], &centered)[0].x, 58);
    }

    #[test]
    fn measure_uses_fixed_advance() {
        assert_eq!(measure(""), 0);
        assert_eq!(measure("CPU"), 18);
        assert_eq!(measure("45.0°C"), 36);
    }

    #[test]
    fn render_text_draws_inside_the_centered_block() {
        let canvas = render_text(128, 64, &["Connect success"], &DrawOptions::centered());

        let rows = lit_rows(&canvas);
        let columns = lit_columns(&canvas);
        assert!(!rows.is_empty());
        assert!(*rows.first().unwrap() >= 27 && *rows.last().unwrap() < 37);
        let text_width = measure("Connect success");
        let left = (128 - text_width) / 2;
        assert!(*columns.first().unwrap() >= left);
        assert!(*columns.last().unwrap() < left + text_width);
    }

    #[test]
    fn render_text_clips_to_canvas() {
        let long = "x".repeat(40);
        let canvas = render_text(32, 16, &[long.as_str(), "a", "b"], &DrawOptions::default());

        assert_eq!(canvas.width(), 32);
        assert!(lit_rows(&canvas).iter().all(|&y| y < 16));
    }

    #[test]
    fn canvas_ignores_out_of_range_pixels() {
        let mut canvas = GrayCanvas::new(4, 4);
        canvas.set_luma(4, 0, 255);
        let Ok(_) = canvas.draw_iter([Pixel(Point::new(-1, 2), Gray8::WHITE)]);

        assert_eq!(canvas, GrayCanvas::new(4, 4));
        assert_eq!(canvas.luma(10, 10), 0);
    }

    #[test]
    fn arrows_are_drawn_instead_of_the_fallback_glyph() {
        let up = render_text(6, 10, &["↑"], &DrawOptions::default());
        let down = render_text(6, 10, &["↓"], &DrawOptions::default());
        let question = render_text(6, 10, &["?"], &DrawOptions::default());

        assert_ne!(up, question);
        assert_ne!(down, question);
        assert_ne!(up, down);
        assert_ne!(up, GrayCanvas::new(6, 10));
        // Head and shaft swap rows between the two directions.
        assert!(up.luma(2, 3) > 0 && up.luma(2, 8) > 0);
        assert!(down.luma(2, 1) > 0 && down.luma(2, 7) > 0);
    }

    #[test]
    fn arrows_keep_the_rest_of_the_line_in_place() {
        let canvas = render_text(60, 10, &["↑2.00KB/s"], &DrawOptions::default());
        let plain = render_text(60, 10, &[" 2.00KB/s"], &DrawOptions::default());

        for x in 6..60 {
            for y in 0..10 {
                assert_eq!(canvas.luma(x, y), plain.luma(x, y), "pixel ({x}, {y})");
            }
        }
    }
}
