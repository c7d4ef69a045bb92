// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use prism_core::{init_tracing, ResourceKind, ResourcePaths};
use prism_math::glam::Vec2;
use prism_render::{ImageData, MeshData, RenderDesc, RenderSize, Renderer};
use prism_render_vk::VkRenderer;
use tracing::{error, info, warn};

use prism_platform::winit::{
    application::ApplicationHandler,
    event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use config::{AppCfg, AssetsCfg, DEFAULT_CONFIG};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file
    #[arg(long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
    /// OBJ model, overrides `assets.model`
    #[arg(long)]
    model: Option<String>,
    /// Texture image, overrides `assets.texture`
    #[arg(long)]
    texture: Option<String>,
    /// Skip the validation layer even if the config asks for it
    #[arg(long)]
    no_validation: bool,
}

fn load_cfg(args: &Args) -> AppCfg {
    let mut cfg = AppCfg::load(&args.config);
    if let Some(m) = &args.model {
        cfg.assets.model = m.clone();
    }
    if let Some(t) = &args.texture {
        cfg.assets.texture = t.clone();
    }
    if args.no_validation {
        cfg.render.validation = false;
    }
    cfg
}

/// Configured model and texture, or the built-in scene for whichever can't
/// be found or decoded.
fn load_scene(assets: &AssetsCfg, paths: &ResourcePaths) -> (MeshData, ImageData) {
    let mesh = match paths.require(ResourceKind::Model, &assets.model) {
        Ok(path) => prism_assets::load_mesh(&path).unwrap_or_else(|e| {
            warn!("{e:#}; using built-in mesh");
            prism_assets::fallback_mesh()
        }),
        Err(e) => {
            info!("{e}; using built-in mesh");
            prism_assets::fallback_mesh()
        }
    };
    let texture = match paths.require(ResourceKind::Texture, &assets.texture) {
        Ok(path) => prism_assets::load_image(&path).unwrap_or_else(|e| {
            warn!("{e:#}; using built-in texture");
            prism_assets::checkerboard(256, 8)
        }),
        Err(e) => {
            info!("{e}; using built-in texture");
            prism_assets::checkerboard(256, 8)
        }
    };
    (mesh, texture)
}

#[derive(Default)]
struct Pointer {
    pos: Option<Vec2>,
    left: bool,
    right: bool,
}

struct App {
    cfg: AppCfg,
    // Dropped before the window it presents to.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,
    pointer: Pointer,

    exiting: bool,
    failure: Option<anyhow::Error>,
    frames: u32,
    last_fps_instant: std::time::Instant,
}

impl App {
    fn close(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        if let Some(r) = &mut self.renderer {
            if let Err(e) = r.wait_idle() {
                warn!("wait idle on close: {e:#}");
            }
        }
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.failure = Some(e);
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let w = &self.cfg.window;
        let window = event_loop.create_window(prism_platform::window_attributes(
            &w.title, w.width, w.height,
        ))?;
        let (width, height) = prism_platform::drawable_size(&window);
        self.render_size = RenderSize { width, height };

        let paths = self.cfg.assets.resource_paths();
        let (mesh, texture) = load_scene(&self.cfg.assets, &paths);
        let r = &self.cfg.render;
        let desc = RenderDesc {
            clear_color: r.clear_color,
            vsync: r.vsync,
            max_samples: r.msaa,
            validation: r.validation,
            device_policy: r.device_policy.into(),
            mipmaps: r.mipmaps,
            fov_degrees: r.fov,
            vertex_shader: self.cfg.assets.vertex_shader.clone(),
            fragment_shader: self.cfg.assets.fragment_shader.clone(),
            paths,
            mesh,
            texture,
        };

        let renderer = VkRenderer::new(&window, &window, self.render_size, desc)?;
        info!(
            "renderer up ({}x{}, vsync={}, diagnostics={})",
            width,
            height,
            self.cfg.render.vsync,
            renderer.has_diagnostics()
        );
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn toggle_vsync(&mut self) -> Result<()> {
        let Some(r) = &mut self.renderer else {
            return Ok(());
        };
        let on = !self.cfg.render.vsync;
        r.set_vsync(on)?;
        self.cfg.render.vsync = on;
        info!("vsync {}", if on { "on" } else { "off" });
        Ok(())
    }

    fn on_cursor(&mut self, pos: Vec2) {
        let Some(prev) = self.pointer.pos.replace(pos) else {
            return;
        };
        let delta = pos - prev;
        let Some(renderer) = &mut self.renderer else {
            return;
        };
        let RenderSize { width, height } = self.render_size;
        let camera = renderer.camera_mut();
        if self.pointer.left {
            camera.rotate(pos, delta, width, height);
        } else if self.pointer.right {
            camera.translate(delta.x, delta.y);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e.context("startup"));
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.close(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                info!(
                    "Resized → {}x{} (paused={})",
                    new_size.width,
                    new_size.height,
                    self.render_size.is_zero_area()
                );
                let res = match &mut self.renderer {
                    Some(r) => r.resize(self.render_size),
                    None => Ok(()),
                };
                if let Err(e) = res {
                    self.fail(event_loop, e);
                }
            }

            WindowEvent::CursorMoved { position, .. } => {
                self.on_cursor(Vec2::new(position.x as f32, position.y as f32));
            }

            WindowEvent::MouseInput { state, button, .. } => {
                let pressed = state == ElementState::Pressed;
                match button {
                    MouseButton::Left => self.pointer.left = pressed,
                    MouseButton::Right => self.pointer.right = pressed,
                    _ => {}
                }
            }

            WindowEvent::MouseWheel { delta, .. } => {
                let steps = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32 / 10.0,
                };
                if let Some(r) = &mut self.renderer {
                    r.camera_mut().zoom(steps);
                }
            }

            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                match &event.logical_key {
                    Key::Character(c) if c.eq_ignore_ascii_case("r") => {
                        if let Some(r) = &mut self.renderer {
                            r.camera_mut().reset();
                        }
                    }
                    Key::Character(c) if c.eq_ignore_ascii_case("v") => {
                        if let Err(e) = self.toggle_vsync() {
                            self.fail(event_loop, e);
                        }
                    }
                    Key::Named(NamedKey::Escape) => self.close(event_loop),
                    _ => {}
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.render_size.is_zero_area() {
                    return;
                }
                let res = match &mut self.renderer {
                    Some(r) => r.render(),
                    None => return,
                };
                match res {
                    Ok(()) => self.frames = self.frames.saturating_add(1),
                    Err(e) => self.fail(event_loop, e),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.render_size.is_zero_area() {
            // Minimized: sleep until the next event.
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = std::time::Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App {
        cfg: load_cfg(&args),
        renderer: None,
        window: None,
        render_size: RenderSize {
            width: 0,
            height: 0,
        },
        pointer: Pointer::default(),
        exiting: false,
        failure: None,
        frames: 0,
        last_fps_instant: std::time::Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    match app.failure.take() {
        Some(e) => Err(anyhow!("exiting after error: {e:#}")),
        None => Ok(()),
    }
}
