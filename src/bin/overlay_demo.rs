//! Drives the overlay core against the headless device.
//!
//! A producer thread paints a moving gradient at ~60 Hz while the main
//! thread renders, reacts to activity changes, and resizes once.
//!
//! ```text
//! RUST_LOG=debug cargo run --bin overlay_demo
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use glaze::{
    ActivityState, HeadlessDevice, HeadlessOptions, OverlaySettings, Renderer, ResourceUsageLevel,
};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 360;
const FRAMES: u32 = 240;

fn paint(pixels: &mut [u8], tick: u32) {
    let bar = (tick * 4) % WIDTH;
    for (i, px) in pixels.chunks_exact_mut(4).enumerate() {
        let x = i as u32 % WIDTH;
        let y = i as u32 / WIDTH;
        let lit = x.abs_diff(bar) < 8;
        // BGRA
        px[0] = (y * 255 / HEIGHT) as u8;
        px[1] = if lit { 255 } else { 40 };
        px[2] = (x * 255 / WIDTH) as u8;
        px[3] = 200;
    }
}

fn main() -> glaze::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let device = Arc::new(HeadlessDevice::new(HeadlessOptions::default()));
    let settings = OverlaySettings {
        vsync: false,
        target_frame_rate: 120,
        ..OverlaySettings::default()
    };
    let mut renderer = Renderer::new(device.clone(), settings, WIDTH, HEIGHT)?;

    let running = Arc::new(AtomicBool::new(true));
    let producer = {
        let sink = renderer.frame_sink();
        let running = running.clone();
        thread::spawn(move || {
            let mut pixels = vec![0u8; (WIDTH * HEIGHT * 4) as usize];
            let mut tick = 0u32;
            while running.load(Ordering::Relaxed) {
                paint(&mut pixels, tick);
                if let Err(e) =
                    sink.submit_frame(&pixels, WIDTH, HEIGHT, wgpu::TextureFormat::Bgra8Unorm)
                {
                    log::error!("Producer stopped: {e}");
                    break;
                }
                tick = tick.wrapping_add(1);
                thread::sleep(Duration::from_millis(16));
            }
        })
    };

    for frame in 0..FRAMES {
        match frame {
            80 => {
                renderer.adapt_to_activity(ActivityState::Background, ResourceUsageLevel::Low);
            }
            120 => {
                renderer.resize(960, 540)?;
            }
            160 => {
                renderer.adapt_to_activity(ActivityState::Active, ResourceUsageLevel::High);
            }
            _ => {}
        }
        renderer.render_frame()?;
        renderer.throttle();
    }

    running.store(false, Ordering::Relaxed);
    if producer.join().is_err() {
        log::error!("Producer thread panicked");
    }

    renderer.wait_for_gpu()?;
    let stats = device.stats();
    let cache = renderer.cache().stats();
    log::info!(
        "{} presents, {} copies, {} draws, {} barriers ({} elided)",
        stats.presents,
        stats.copies,
        stats.draws,
        stats.barriers,
        renderer.tracker().stats().elided
    );
    log::info!(
        "Cache: {} resources, {} bytes, {} reuse hits",
        cache.tracked,
        cache.total_bytes,
        cache.counters.reuse_hits
    );

    let errors = device.validation_errors();
    if errors.is_empty() {
        log::info!("No validation errors");
    } else {
        log::warn!("{} validation errors", errors.len());
    }
    Ok(())
}
