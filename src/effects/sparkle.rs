use rand::Rng;

use crate::effects::Effect;
use crate::layout::PixelInfo;

struct Strike {
    index: usize,
    intensity: f32,
}

/// White flashes at random pixels over a dim accent color.
///
/// Flashes are added on top of the background, so bright pixels overshoot
/// 1.0 and rely on the runner to clamp.
pub struct Sparkle {
    accent_color: palette::LinSrgb,
    pixel_count: usize,
    /// Fraction of intensity a strike keeps after one second.
    falloff: f32,
    /// Expected new strikes per second.
    rate: f32,
    strikes: Vec<Strike>,
}

impl Sparkle {
    pub fn new(accent_color: palette::LinSrgb, pixel_count: usize) -> Sparkle {
        Sparkle {
            accent_color,
            pixel_count,
            falloff: 0.02,
            rate: 12.0,
            strikes: vec![],
        }
    }

    fn decay_strikes(&mut self, time_delta: f32) {
        let decay = self.falloff.powf(time_delta);
        for strike in &mut self.strikes {
            strike.intensity *= decay;
        }
    }

    fn remove_strikes(&mut self) {
        self.strikes.retain(|strike| strike.intensity > 0.01);
    }

    fn create_strikes(&mut self, time_delta: f32) {
        if self.pixel_count == 0 {
            return;
        }

        let expected = self.rate * time_delta;
        if expected.is_nan() || expected <= 0.0 {
            return;
        }

        // More strikes than pixels in one frame would only overlap.
        let attempts = expected.ceil().min(self.pixel_count as f32) as usize;
        let mut rng = rand::thread_rng();
        for attempt in 0..attempts {
            if rng.gen::<f32>() < (expected - attempt as f32).min(1.0) {
                self.strikes.push(Strike {
                    index: rng.gen_range(0..self.pixel_count),
                    intensity: 1.0,
                });
            }
        }
    }

    fn intensity_at(&self, index: usize) -> f32 {
        self.strikes
            .iter()
            .filter(|strike| strike.index == index)
            .map(|strike| strike.intensity)
            .sum()
    }
}

impl Effect for Sparkle {
    fn next_frame(&mut self, time_delta: f32) {
        self.decay_strikes(time_delta);
        self.remove_strikes();
        self.create_strikes(time_delta);
    }

    fn calculate_pixel(&self, pixel: &PixelInfo) -> palette::LinSrgb {
        let flash = self.intensity_at(pixel.index);
        self.accent_color * 0.3 + palette::LinSrgb::new(flash, flash, flash)
    }
}
