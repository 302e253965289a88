pub(crate) mod rainbow;
pub(crate) mod sparkle;
pub(crate) mod staticcolor;

use serde::Deserialize;

use crate::layout::PixelInfo;

pub trait Effect {
    /// Advance internal state by `time_delta` seconds. Deltas vary from frame
    /// to frame and may be zero.
    fn next_frame(&mut self, _time_delta: f32) {}

    /// Calculate a pixel value, using floating point RGB in the range [0, 1].
    /// The caller clamps, so effects may overshoot or layer with each other
    /// at more than 8-bit precision.
    fn calculate_pixel(&self, pixel: &PixelInfo) -> palette::LinSrgb;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
    #[default]
    Rainbow,
    Static,
    Sparkle,
}

impl EffectKind {
    pub fn build(self, color: palette::LinSrgb, pixel_count: usize) -> Box<dyn Effect> {
        match self {
            EffectKind::Rainbow => Box::new(rainbow::Rainbow::new(0.2, 0.5)),
            EffectKind::Static => Box::new(staticcolor::StaticColor::new(color)),
            EffectKind::Sparkle => Box::new(sparkle::Sparkle::new(color, pixel_count)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_requested_effect() {
        let pixel = PixelInfo::new(0, json::object! { point: json::array![0, 0, 0] });
        let color = palette::LinSrgb::new(0.0, 0.5, 0.0);

        let effect = EffectKind::Static.build(color, 1);
        assert_eq!(effect.calculate_pixel(&pixel), color);

        let mut effect = EffectKind::Rainbow.build(color, 1);
        effect.next_frame(0.0);
        let red = effect.calculate_pixel(&pixel);
        assert!((red.red - 1.0).abs() < 1e-4);
    }
}
