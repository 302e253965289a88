use palette::FromColor;

use crate::effects::Effect;
use crate::layout::PixelInfo;

/// Hue bands that travel through the installation along its diagonal.
pub struct Rainbow {
    /// Hue rotations per second.
    speed: f32,
    /// Hue rotations per unit of distance.
    spread: f32,
    cycle: f32,
}

impl Rainbow {
    pub fn new(speed: f32, spread: f32) -> Rainbow {
        Rainbow {
            speed,
            spread,
            cycle: 0.0,
        }
    }
}

impl Effect for Rainbow {
    fn next_frame(&mut self, time_delta: f32) {
        self.cycle = (self.cycle + time_delta * self.speed).rem_euclid(1.0);
    }

    fn calculate_pixel(&self, pixel: &PixelInfo) -> palette::LinSrgb {
        let distance: f32 = pixel.point().iter().sum();
        let hue = (self.cycle + distance * self.spread).rem_euclid(1.0) * 360.0;
        let hsv = palette::Hsv::new(hue, 1.0, 1.0);
        palette::Srgb::from_color(hsv).into_linear()
    }
}
