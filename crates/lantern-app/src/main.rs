// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use lantern_core::{init_tracing, AppConfig};
use lantern_platform::ResizeTracker;
use lantern_render::{FrameOutcome, RenderSize, Renderer};
use lantern_render_vk::VkRenderer;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info};

use lantern_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to ./lantern.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
    /// OBJ model to draw
    #[arg(long)]
    model: Option<PathBuf>,
    /// Texture applied to the model
    #[arg(long)]
    texture: Option<PathBuf>,
    /// Directory holding vert.spv and frag.spv
    #[arg(long)]
    shaders: Option<PathBuf>,
    /// Enable or disable the Khronos validation layer
    #[arg(long)]
    validation: Option<bool>,
    #[arg(long)]
    frames_in_flight: Option<usize>,
}

impl Args {
    fn resolve(&self) -> Result<AppConfig> {
        let mut cfg = AppConfig::load(self.config.as_deref())?;
        let r = &mut cfg.render;
        if let Some(p) = &self.model {
            r.model_path = p.clone();
        }
        if let Some(p) = &self.texture {
            r.texture_path = p.clone();
        }
        if let Some(p) = &self.shaders {
            r.shader_dir = p.clone();
        }
        if let Some(v) = self.validation {
            r.validation = v;
        }
        if let Some(n) = self.frames_in_flight {
            r.max_frames_in_flight = n;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize {
        width: size.width,
        height: size.height,
    }
}

struct App {
    cfg: AppConfig,
    // Declared before the window so it is dropped first.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    resize: ResizeTracker,
    failure: Option<anyhow::Error>,

    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.failure = Some(e);
        self.renderer = None;
        event_loop.exit();
    }

    fn draw(&mut self, event_loop: &ActiveEventLoop) {
        if self.resize.is_degenerate() {
            return;
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        if self.resize.take_pending() {
            renderer.resize(render_size(self.resize.size()));
        }
        match renderer.render() {
            Ok(FrameOutcome::Presented { recreated, .. }) => {
                self.frames = self.frames.saturating_add(1);
                if recreated {
                    debug!("swapchain recreated after present");
                }
            }
            Ok(FrameOutcome::Skipped | FrameOutcome::Deferred) => {}
            Err(e) => self.fail(event_loop, e),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.cfg.window.width, self.cfg.window.height));
        let window = match event_loop.create_window(attrs) {
            Ok(w) => w,
            Err(e) => return self.fail(event_loop, e.into()),
        };

        let size = window.inner_size();
        self.resize = ResizeTracker::new(size);
        match VkRenderer::new(&window, &window, render_size(size), &self.cfg.render) {
            Ok(r) => self.renderer = Some(r),
            Err(e) => return self.fail(event_loop, e.context("renderer init")),
        }
        info!("window {}x{}", size.width, size.height);

        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if self.window.as_ref().is_some_and(|w| w.id() != window_id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                if let Some(r) = &self.renderer {
                    info!(
                        "presented {} frames, {} swapchain recreations",
                        r.frames_presented(),
                        r.recreations()
                    );
                }
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                self.resize.on_resized(new_size);
                if !self.resize.is_degenerate() {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }
            WindowEvent::RedrawRequested => self.draw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_none() {
            return;
        }

        // Minimized: sleep until the next window event.
        if self.resize.is_degenerate() {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cfg = Args::parse().resolve()?;
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App {
        resize: ResizeTracker::new(PhysicalSize::new(cfg.window.width, cfg.window.height)),
        cfg,
        renderer: None,
        window: None,
        failure: None,
        frames: 0,
        last_fps_instant: Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
