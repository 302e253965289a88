use crate::effects::Effect;
use crate::layout::PixelInfo;

/// One color everywhere, unless a layout entry carries its own
/// `"color": [r, g, b]`.
pub struct StaticColor {
    color: palette::LinSrgb,
}

impl StaticColor {
    pub fn new(color: palette::LinSrgb) -> StaticColor {
        StaticColor { color }
    }
}

impl Effect for StaticColor {
    fn calculate_pixel(&self, pixel: &PixelInfo) -> palette::LinSrgb {
        let color = &pixel.layout()["color"];
        if !color.is_array() || color.len() != 3 {
            return self.color;
        }

        match (color[0].as_f32(), color[1].as_f32(), color[2].as_f32()) {
            (Some(red), Some(green), Some(blue)) => palette::LinSrgb::new(red, green, blue),
            _ => self.color,
        }
    }
}
