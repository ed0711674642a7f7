//! Sandbox application
//!
//! A small game shim exercising the engine: a textured spinning cube in
//! the world pass, the default quad in the UI pass, and a free camera on
//! the keyboard.

use forge_engine::foundation::math::{Mat4, Vec3};
use forge_engine::prelude::*;
use forge_engine::systems::geometry_system::GeometrySystem;

struct Sandbox {
    cube_geometry: Option<u32>,
    cube_rotation: f32,
    camera_name: String,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            cube_geometry: None,
            cube_rotation: 0.0,
            camera_name: "world".to_string(),
        }
    }

    fn update_camera(&mut self, engine: &mut Engine, delta_time: f64) {
        let move_speed = 5.0 * delta_time as f32;
        let turn_speed = 1.8 * delta_time as f32;

        let forward = engine.input.is_key_down(Keys::W) || engine.input.is_key_down(Keys::Up);
        let backward = engine.input.is_key_down(Keys::S) || engine.input.is_key_down(Keys::Down);
        let left = engine.input.is_key_down(Keys::A);
        let right = engine.input.is_key_down(Keys::D);
        let turn_left = engine.input.is_key_down(Keys::Left);
        let turn_right = engine.input.is_key_down(Keys::Right);
        let up = engine.input.is_key_down(Keys::Space);
        let down = engine.input.is_key_down(Keys::X);

        let Some(camera) = engine.cameras.acquire(&self.camera_name) else {
            return;
        };
        if forward {
            camera.move_forward(move_speed);
        }
        if backward {
            camera.move_backward(move_speed);
        }
        if left {
            camera.move_left(move_speed);
        }
        if right {
            camera.move_right(move_speed);
        }
        if up {
            camera.move_up(move_speed);
        }
        if down {
            camera.move_down(move_speed);
        }
        if turn_left {
            camera.yaw(turn_speed);
        }
        if turn_right {
            camera.yaw(-turn_speed);
        }

        let view = camera.view();
        engine.cameras.release(&self.camera_name);
        engine.renderer.set_view(view);
    }
}

impl Game for Sandbox {
    fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
        log::info!("Sandbox initializing...");

        let camera = engine
            .cameras
            .acquire(&self.camera_name)
            .ok_or_else(|| AppError::Custom("failed to acquire the world camera".to_string()))?;
        camera.set_position(Vec3::new(0.0, 1.0, 8.0));

        // a unit cube; the material falls back to the default when the
        // asset is missing
        let cube_config = GeometrySystem::generate_cube_config(
            2.0,
            2.0,
            2.0,
            1.0,
            1.0,
            "sandbox_cube",
            "test_material",
        );
        let Engine {
            ref mut renderer,
            ref resources,
            ref mut textures,
            ref mut materials,
            ref mut shaders,
            ref mut geometries,
            ..
        } = *engine;
        self.cube_geometry = geometries.acquire_from_config(
            &cube_config,
            true,
            renderer,
            resources,
            textures,
            materials,
            shaders,
        );
        if self.cube_geometry.is_none() {
            return Err(AppError::Custom("failed to create the cube geometry".to_string()));
        }

        Ok(())
    }

    fn update(&mut self, engine: &mut Engine, delta_time: f64) -> Result<(), AppError> {
        self.update_camera(engine, delta_time);
        self.cube_rotation += delta_time as f32 * 0.5;
        Ok(())
    }

    fn render(
        &mut self,
        engine: &mut Engine,
        packet: &mut RenderPacket,
        _delta_time: f64,
    ) -> Result<(), AppError> {
        if let Some(geometry) = self.cube_geometry {
            let model = Mat4::from_axis_angle(
                &nalgebra::Unit::new_normalize(Vec3::new(0.0, 1.0, 0.0)),
                self.cube_rotation,
            );
            packet.geometries.push(GeometryRenderData {
                model,
                geometry,
            });
        }

        packet.ui_geometries.push(GeometryRenderData {
            model: Mat4::identity(),
            geometry: engine.geometries.default_2d_geometry_id(),
        });
        Ok(())
    }

    fn on_resize(&mut self, _engine: &mut Engine, width: u32, height: u32) {
        log::debug!("Sandbox resized to {width}x{height}.");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    forge_engine::foundation::logging::init();

    let config = match ApplicationConfig::from_file("sandbox.toml") {
        Ok(config) => config,
        Err(_) => ApplicationConfig {
            name: "Forge Sandbox".to_string(),
            width: 1280,
            height: 720,
            ..ApplicationConfig::default()
        },
    };

    Application::new(config, Sandbox::new())?.run()?;
    Ok(())
}
