//! Vulkan Ray Tracer - Main Entry Point
//!
//! Progressive sphere ray tracer: each frame traces the scene, blends
//! the result into an accumulated history, and presents the composite.

use anyhow::Result;
use glam::Vec3;
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use raytracer_core::FrameTimer;
use raytracer_platform::{InputState, KeyCode, Window};
use raytracer_renderer::{Renderer, RendererConfig};
use raytracer_scene::Camera;

/// Camera translation speed in world units per second.
const MOVE_SPEED: f32 = 3.0;

struct App {
    window: Option<Window>,
    renderer: Option<Renderer>,
    camera: Camera,
    input: InputState,
    timer: FrameTimer,
}

impl App {
    fn new() -> Self {
        let mut camera = Camera::new();
        camera.position = Vec3::new(0.0, 1.5, -8.0);
        camera.look_at(Vec3::new(0.0, 1.0, 0.0));

        Self {
            window: None,
            renderer: None,
            camera,
            input: InputState::new(),
            timer: FrameTimer::new(),
        }
    }

    fn update_camera(&mut self, delta_time: f32) {
        let mut movement = Vec3::ZERO;

        if self.input.is_key_pressed(KeyCode::KeyW) {
            movement += self.camera.forward();
        }
        if self.input.is_key_pressed(KeyCode::KeyS) {
            movement -= self.camera.forward();
        }
        if self.input.is_key_pressed(KeyCode::KeyD) {
            movement += self.camera.right();
        }
        if self.input.is_key_pressed(KeyCode::KeyA) {
            movement -= self.camera.right();
        }
        if self.input.is_key_pressed(KeyCode::KeyQ) {
            movement += Vec3::Y;
        }
        if self.input.is_key_pressed(KeyCode::KeyE) {
            movement -= Vec3::Y;
        }

        if movement != Vec3::ZERO {
            self.camera.position += movement.normalize() * MOVE_SPEED * delta_time;
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            match Window::new(event_loop, 800, 600, "Vulkan Ray Tracer") {
                Ok(window) => {
                    match Renderer::new(&window, RendererConfig::default()) {
                        Ok(renderer) => {
                            info!("Initialization complete, entering main loop");
                            self.camera.set_aspect(renderer.aspect_ratio());
                            self.renderer = Some(renderer);
                            self.window = Some(window);
                        }
                        Err(e) => {
                            error!("Failed to create renderer: {:?}", e);
                            event_loop.exit();
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to create window: {}", e);
                    event_loop.exit();
                }
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(ref mut window) = self.window {
                    window.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                // Pick up any resize recorded since the last frame, and
                // skip rendering entirely while the window is minimized.
                if let (Some(window), Some(renderer)) = (&mut self.window, &mut self.renderer) {
                    if window.was_resized() {
                        renderer.on_window_resized(window.width(), window.height());
                        window.reset_resized_flag();
                    }
                    if window.is_degenerate() {
                        return;
                    }
                }

                let delta_time = self.timer.begin_frame();
                self.update_camera(delta_time);

                if let Some(fps) = self.timer.fps_sample() {
                    debug!("{:.1} fps", fps);
                }

                if let Some(ref mut renderer) = self.renderer {
                    self.camera.set_aspect(renderer.aspect_ratio());
                    if let Err(e) = renderer.render_frame(&self.camera) {
                        error!("Render error, shutting down: {:?}", e);
                        event_loop.exit();
                    }
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::PhysicalKey;
                if let PhysicalKey::Code(key) = event.physical_key {
                    if event.state.is_pressed() {
                        if key == KeyCode::Escape {
                            info!("Escape pressed, shutting down");
                            event_loop.exit();
                            return;
                        }
                        self.input.on_key_pressed(key);
                    } else {
                        self.input.on_key_released(key);
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            if window.is_degenerate() {
                // Minimized: sleep until the platform delivers an event
                event_loop.set_control_flow(ControlFlow::Wait);
            } else {
                event_loop.set_control_flow(ControlFlow::Poll);
                window.request_redraw();
            }
        }
    }
}

fn main() -> Result<()> {
    raytracer_core::init_logging();
    info!("Starting Vulkan Ray Tracer");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new();
    event_loop.run_app(&mut app)?;

    Ok(())
}
