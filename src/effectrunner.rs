use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::effects::Effect;
use crate::frametimer::{self, FrameTimer};
use crate::layout::{Layout, LoadError};
use crate::opcclient::{OpcClient, Transport, TransportError};

/// Converts one color channel to a byte, rounding to nearest and clamping.
fn channel_to_byte(value: f32) -> u8 {
    ((value * 255.0 + 0.5) as i32).clamp(0, 255) as u8
}

/// Drives an effect over a layout and streams the frames to a transport.
pub struct EffectRunner<T: Transport = OpcClient> {
    min_time_delta: f32,
    layout: Option<Layout>,
    client: T,
    effect: Option<Box<dyn Effect>>,
    timer: FrameTimer,
    write_failing: bool,
}

impl<T: Transport> EffectRunner<T> {
    pub fn new(client: T) -> EffectRunner<T> {
        EffectRunner {
            min_time_delta: 0.0,
            layout: None,
            client,
            effect: None,
            timer: FrameTimer::new(true),
            write_failing: false,
        }
    }

    pub fn set_server(&mut self, hostport: &str) -> Result<(), TransportError> {
        self.client.resolve(hostport)
    }

    /// Loads a layout file. A failed load leaves the current layout in place.
    pub fn set_layout<P: AsRef<Path>>(&mut self, path: P) -> Result<(), LoadError> {
        let layout = Layout::from_file(path.as_ref())?;
        if layout.is_empty() {
            log::warn!("Layout {} has no pixels", path.as_ref().display());
        }

        let mapped = layout.pixels().iter().filter(|p| p.is_mapped()).count();
        log::info!(
            "Loaded layout with {} pixels ({} mapped, {} byte frames) from {}",
            layout.len(),
            mapped,
            layout.frame().len(),
            path.as_ref().display()
        );
        self.replace_layout(layout);
        Ok(())
    }

    pub fn replace_layout(&mut self, layout: Layout) {
        self.layout = Some(layout);
    }

    pub fn set_effect(&mut self, effect: Option<Box<dyn Effect>>) {
        self.effect = effect;
    }

    /// Caps the frame rate. `fps` must be positive.
    pub fn set_max_frame_rate(&mut self, fps: f32) {
        self.min_time_delta = 1.0 / fps;
    }

    pub fn has_layout(&self) -> bool {
        self.layout.is_some()
    }

    pub fn layout(&self) -> Option<&Layout> {
        self.layout.as_ref()
    }

    pub fn effect(&self) -> Option<&dyn Effect> {
        self.effect.as_deref()
    }

    pub fn client(&self) -> &T {
        &self.client
    }

    /// Renders one frame, measuring the time step from the wall clock.
    pub fn do_frame(&mut self) -> Result<(), TransportError> {
        self.do_frame_at(Instant::now())
    }

    fn do_frame_at(&mut self, now: Instant) -> Result<(), TransportError> {
        let time_delta = self.timer.tick(now);
        self.do_frame_with_delta(time_delta)
    }

    /// Renders one frame with an explicit time step. Without an effect or a
    /// layout this does nothing.
    pub fn do_frame_with_delta(&mut self, time_delta: f32) -> Result<(), TransportError> {
        let (Some(effect), Some(layout)) = (self.effect.as_mut(), self.layout.as_mut()) else {
            return Ok(());
        };

        effect.next_frame(time_delta);

        let (pixels, payload) = layout.pixels_and_payload();
        for (pixel, dest) in pixels.iter().zip(payload.chunks_exact_mut(3)) {
            // Unmapped pixels stay dark and are never shown to the effect.
            let rgb = if pixel.is_mapped() {
                effect.calculate_pixel(pixel)
            } else {
                palette::LinSrgb::new(0.0, 0.0, 0.0)
            };

            dest[0] = channel_to_byte(rgb.red);
            dest[1] = channel_to_byte(rgb.green);
            dest[2] = channel_to_byte(rgb.blue);
        }

        let result = self.client.write(layout.frame().as_bytes());

        // Extra delay, to adjust frame rate
        frametimer::pace(time_delta, self.min_time_delta);

        result
    }

    /// Sends an all-black frame for the current layout.
    pub fn blackout(&mut self) -> Result<(), TransportError> {
        let Some(layout) = self.layout.as_mut() else {
            return Ok(());
        };

        layout.frame_mut().payload_mut().fill(0);
        self.client.write(layout.frame().as_bytes())
    }

    fn run_frame(&mut self) {
        match self.do_frame() {
            Ok(()) => {
                if self.write_failing {
                    log::info!("Frames are being delivered again");
                    self.write_failing = false;
                }
            }
            Err(err) => {
                if self.write_failing {
                    log::debug!("Dropped frame: {err}");
                } else {
                    log::warn!("Dropped frame: {err}");
                    self.write_failing = true;
                }
            }
        }
    }

    /// Minimal main loop. Only ends when the process is terminated.
    pub fn run(&mut self) -> ! {
        loop {
            self.run_frame();
        }
    }

    /// Like [`EffectRunner::run`], but stops between frames once `running`
    /// is cleared.
    pub fn run_while(&mut self, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            self.run_frame();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frametimer::MAX_TIME_STEP;
    use crate::layout::PixelInfo;
    use crate::opcclient::HEADER_LEN;
    use std::cell::{Cell, RefCell};
    use std::fs;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingTransport {
        frames: Vec<Vec<u8>>,
        resolved: Vec<String>,
        fail_writes: bool,
    }

    impl Transport for RecordingTransport {
        fn resolve(&mut self, hostport: &str) -> Result<(), TransportError> {
            if hostport.contains("bogus") {
                return Err(TransportError::NoAddress(hostport.to_string()));
            }
            self.resolved.push(hostport.to_string());
            Ok(())
        }

        fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            if self.fail_writes {
                return Err(TransportError::NotResolved);
            }
            self.frames.push(frame.to_vec());
            Ok(())
        }
    }

    type Recorder = (Box<FixedEffect>, Rc<RefCell<Vec<f32>>>, Rc<Cell<usize>>);

    /// Returns one fixed color and records what the runner asked of it.
    struct FixedEffect {
        color: palette::LinSrgb,
        deltas: Rc<RefCell<Vec<f32>>>,
        calls: Rc<Cell<usize>>,
    }

    impl FixedEffect {
        fn boxed(red: f32, green: f32, blue: f32) -> Recorder {
            let deltas = Rc::new(RefCell::new(vec![]));
            let calls = Rc::new(Cell::new(0));
            let effect = Box::new(FixedEffect {
                color: palette::LinSrgb::new(red, green, blue),
                deltas: Rc::clone(&deltas),
                calls: Rc::clone(&calls),
            });
            (effect, deltas, calls)
        }
    }

    impl Effect for FixedEffect {
        fn next_frame(&mut self, time_delta: f32) {
            self.deltas.borrow_mut().push(time_delta);
        }

        fn calculate_pixel(&self, pixel: &PixelInfo) -> palette::LinSrgb {
            assert!(pixel.is_mapped());
            self.calls.set(self.calls.get() + 1);
            self.color
        }
    }

    fn runner_with(layout: &str) -> EffectRunner<RecordingTransport> {
        let mut runner = EffectRunner::new(RecordingTransport::default());
        runner.replace_layout(Layout::parse(layout).unwrap());
        runner
    }

    fn temp_layout(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "effectrunner-{}-{}.json",
            std::process::id(),
            name
        ));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn channel_conversion_rounds_and_clamps() {
        assert_eq!(channel_to_byte(1.2), 255);
        assert_eq!(channel_to_byte(-0.3), 0);
        assert_eq!(channel_to_byte(0.5), 128);
        assert_eq!(channel_to_byte(0.0), 0);
        assert_eq!(channel_to_byte(1.0), 255);
        assert_eq!(channel_to_byte(0.001), 0);
        assert_eq!(channel_to_byte(f32::NAN), 0);
    }

    #[test]
    fn renders_red_and_leaves_garbage_dark() {
        let mut runner = runner_with(r#"[{"point":[0,0,0]}, {"point":[1,0,0]}, "garbage"]"#);
        let (effect, _, calls) = FixedEffect::boxed(1.0, 0.0, 0.0);
        runner.set_effect(Some(effect));

        runner.do_frame_with_delta(0.0).unwrap();

        let frames = &runner.client().frames;
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0],
            vec![
                0x00, 0x00, 0x00, 0x09, // header
                0xff, 0x00, 0x00, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00,
            ]
        );
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn out_of_range_colors_are_clamped() {
        let mut runner = runner_with(r#"[{}]"#);
        let (effect, _, _) = FixedEffect::boxed(1.2, -0.3, 0.5);
        runner.set_effect(Some(effect));

        runner.do_frame_with_delta(0.0).unwrap();
        assert_eq!(&runner.client().frames[0][HEADER_LEN..], &[255, 0, 128]);
    }

    #[test]
    fn advances_effect_once_per_frame() {
        let mut runner = runner_with(r#"[{}, {}, {}]"#);
        let (effect, deltas, calls) = FixedEffect::boxed(0.0, 0.0, 1.0);
        runner.set_effect(Some(effect));

        runner.do_frame_with_delta(0.016).unwrap();
        runner.do_frame_with_delta(0.0).unwrap();

        assert_eq!(*deltas.borrow(), vec![0.016, 0.0]);
        assert_eq!(calls.get(), 6);
    }

    #[test]
    fn skips_frame_without_effect() {
        let mut runner = runner_with(r#"[{}, {}]"#);
        let before = runner.layout().unwrap().frame().clone();

        runner.do_frame_with_delta(0.01).unwrap();

        assert!(runner.client().frames.is_empty());
        assert_eq!(runner.layout().unwrap().frame(), &before);
    }

    #[test]
    fn skips_frame_without_layout() {
        let mut runner = EffectRunner::new(RecordingTransport::default());
        let (effect, deltas, _) = FixedEffect::boxed(1.0, 1.0, 1.0);
        runner.set_effect(Some(effect));

        runner.do_frame_with_delta(0.01).unwrap();

        assert!(!runner.has_layout());
        assert!(runner.client().frames.is_empty());
        assert!(deltas.borrow().is_empty());
    }

    #[test]
    fn clearing_effect_stops_output() {
        let mut runner = runner_with(r#"[{}]"#);
        let (effect, _, _) = FixedEffect::boxed(1.0, 1.0, 1.0);
        runner.set_effect(Some(effect));
        runner.do_frame_with_delta(0.0).unwrap();

        runner.set_effect(None);
        assert!(runner.effect().is_none());
        runner.do_frame_with_delta(0.0).unwrap();

        assert_eq!(runner.client().frames.len(), 1);
    }

    #[test]
    fn effect_accessor_reflects_setter() {
        let mut runner = runner_with(r#"[{}]"#);
        assert!(runner.effect().is_none());

        let (effect, _, _) = FixedEffect::boxed(0.0, 0.0, 1.0);
        runner.set_effect(Some(effect));
        let pixel = &runner.layout().unwrap().pixels()[0];
        let color = runner.effect().unwrap().calculate_pixel(pixel);
        assert_eq!(color, palette::LinSrgb::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn swapped_effect_applies_next_frame() {
        let mut runner = runner_with(r#"[{}]"#);
        let (red, _, _) = FixedEffect::boxed(1.0, 0.0, 0.0);
        let (green, _, _) = FixedEffect::boxed(0.0, 1.0, 0.0);

        runner.set_effect(Some(red));
        runner.do_frame_with_delta(0.0).unwrap();
        runner.set_effect(Some(green));
        runner.do_frame_with_delta(0.0).unwrap();

        let frames = &runner.client().frames;
        assert_eq!(&frames[0][HEADER_LEN..], &[255, 0, 0]);
        assert_eq!(&frames[1][HEADER_LEN..], &[0, 255, 0]);
    }

    #[test]
    fn write_failure_is_reported_and_not_fatal() {
        let mut runner = runner_with(r#"[{}]"#);
        let (effect, deltas, _) = FixedEffect::boxed(1.0, 0.0, 0.0);
        runner.set_effect(Some(effect));

        runner.client.fail_writes = true;
        assert!(runner.do_frame_with_delta(0.0).is_err());

        runner.client.fail_writes = false;
        runner.do_frame_with_delta(0.0).unwrap();

        assert_eq!(deltas.borrow().len(), 2);
        assert_eq!(runner.client().frames.len(), 1);
    }

    #[test]
    fn paces_to_max_frame_rate() {
        let mut runner = runner_with(r#"[{}]"#);
        let (effect, _, _) = FixedEffect::boxed(1.0, 0.0, 0.0);
        runner.set_effect(Some(effect));
        runner.set_max_frame_rate(10.0);

        let start = Instant::now();
        runner.do_frame_with_delta(0.02).unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(75));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn no_pacing_by_default() {
        let mut runner = runner_with(r#"[{}]"#);
        let (effect, _, _) = FixedEffect::boxed(1.0, 0.0, 0.0);
        runner.set_effect(Some(effect));

        let start = Instant::now();
        runner.do_frame_with_delta(0.0).unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn stalled_clock_is_clamped() {
        let mut runner = runner_with(r#"[{}]"#);
        let (effect, deltas, _) = FixedEffect::boxed(1.0, 0.0, 0.0);
        runner.set_effect(Some(effect));

        let start = Instant::now();
        runner.do_frame_at(start).unwrap();
        runner.do_frame_at(start + Duration::from_secs(5)).unwrap();

        assert_eq!(*deltas.borrow(), vec![0.0, MAX_TIME_STEP]);
    }

    #[test]
    fn server_resolution_is_delegated() {
        let mut runner = EffectRunner::new(RecordingTransport::default());
        runner.set_server("lights.local:7890").unwrap();
        assert!(runner.set_server("bogus").is_err());
        assert_eq!(runner.client().resolved, vec!["lights.local:7890".to_string()]);
    }

    #[test]
    fn set_layout_reads_file() {
        let path = temp_layout("good", r#"[{"point": [0, 1, 2]}, "unmapped"]"#);
        let mut runner = EffectRunner::new(RecordingTransport::default());

        let result = runner.set_layout(&path);
        let _ = fs::remove_file(&path);
        result.unwrap();

        let layout = runner.layout().unwrap();
        assert_eq!(layout.len(), 2);
        assert_eq!(layout.pixels()[0].point(), [0.0, 1.0, 2.0]);
        assert_eq!(layout.frame().len(), HEADER_LEN + 6);
    }

    #[test]
    fn failed_reload_keeps_layout() {
        let mut runner = runner_with(r#"[{"point": [1, 2, 3]}, {}]"#);
        let path = temp_layout("broken", r#"[{"point": [1, 2"#);

        let result = runner.set_layout(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(LoadError::Malformed(_))));

        let missing = std::env::temp_dir().join("effectrunner-missing-layout.json");
        assert!(matches!(
            runner.set_layout(&missing),
            Err(LoadError::Unreadable { .. })
        ));

        let layout = runner.layout().unwrap();
        assert_eq!(layout.len(), 2);
        assert_eq!(layout.pixels()[0].point(), [1.0, 2.0, 3.0]);
        assert_eq!(layout.frame().len(), HEADER_LEN + 6);
    }

    #[test]
    fn new_layout_resizes_frame() {
        let mut runner = runner_with(r#"[{}]"#);
        let (effect, _, _) = FixedEffect::boxed(1.0, 1.0, 1.0);
        runner.set_effect(Some(effect));
        runner.do_frame_with_delta(0.0).unwrap();

        runner.replace_layout(Layout::parse(r#"[{}, {}, {}, {}]"#).unwrap());
        runner.do_frame_with_delta(0.0).unwrap();

        let frames = &runner.client().frames;
        assert_eq!(frames[0].len(), HEADER_LEN + 3);
        assert_eq!(frames[1].len(), HEADER_LEN + 12);
        assert_eq!(&frames[1][..HEADER_LEN], &[0, 0, 0, 12]);
    }

    #[test]
    fn blackout_sends_dark_frame() {
        let mut runner = runner_with(r#"[{}, {}]"#);
        let (effect, _, _) = FixedEffect::boxed(1.0, 1.0, 1.0);
        runner.set_effect(Some(effect));
        runner.do_frame_with_delta(0.0).unwrap();

        runner.blackout().unwrap();

        let frames = &runner.client().frames;
        assert_eq!(&frames[0][HEADER_LEN..], &[255; 6]);
        assert_eq!(frames[1], vec![0, 0, 0, 6, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn run_while_stops_when_cleared() {
        let mut runner = runner_with(r#"[{}]"#);
        let running = AtomicBool::new(false);
        runner.run_while(&running);
        assert!(runner.client().frames.is_empty());
    }

    #[test]
    fn run_frame_tracks_failures() {
        let mut runner = runner_with(r#"[{}]"#);
        let (effect, _, _) = FixedEffect::boxed(1.0, 1.0, 1.0);
        runner.set_effect(Some(effect));

        runner.client.fail_writes = true;
        runner.run_frame();
        runner.run_frame();
        assert!(runner.write_failing);

        runner.client.fail_writes = false;
        runner.run_frame();
        assert!(!runner.write_failing);
        assert_eq!(runner.client().frames.len(), 1);
    }
}
