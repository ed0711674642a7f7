//! Application loop and game lifecycle
//!
//! `Application::new` brings the subsystems up in dependency order
//! (memory → events → input → platform → renderer → resource systems →
//! game), `run` drives the per-frame loop (pump messages → update →
//! render → input snapshot) and shuts everything down in reverse order on
//! exit. Rendering suspends while either framebuffer dimension is zero.

use std::cell::Cell;
use std::rc::Rc;

use serde::Deserialize;
use thiserror::Error;

use crate::events::{codes, EventContext, EventSystem};
use crate::foundation::clock::Clock;
use crate::foundation::memory::MemorySystem;
use crate::input::{InputSystem, Keys};
use crate::platform::{Platform, PlatformError};
use crate::renderer::backend::RendererError;
use crate::renderer::types::RenderPacket;
use crate::renderer::Renderer;
use crate::systems::camera_system::{CameraSystem, CameraSystemConfig};
use crate::systems::geometry_system::{GeometrySystem, GeometrySystemConfig};
use crate::systems::material_system::{MaterialSystem, MaterialSystemConfig};
use crate::systems::resource_system::{ResourceSystem, ResourceSystemConfig};
use crate::systems::shader_system::{
    builtin_material_shader_config, builtin_ui_shader_config, ShaderSystem, ShaderSystemConfig,
};
use crate::systems::texture_system::{TextureSystem, TextureSystemConfig};

/// Errors surfaced by the application or a game callback.
#[derive(Error, Debug)]
pub enum AppError {
    /// A game-defined failure.
    #[error("{0}")]
    Custom(String),

    /// A renderer failure.
    #[error(transparent)]
    Renderer(#[from] RendererError),

    /// A platform failure.
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Window and startup configuration for the application.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Window title.
    pub name: String,
    /// Window x position.
    pub start_x: i32,
    /// Window y position.
    pub start_y: i32,
    /// Window width in pixels.
    pub width: u32,
    /// Window height in pixels.
    pub height: u32,
    /// Base path the resource system resolves assets against.
    pub asset_base_path: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Forge Engine".to_string(),
            start_x: 100,
            start_y: 100,
            width: 1280,
            height: 720,
            asset_base_path: "assets".to_string(),
        }
    }
}

impl ApplicationConfig {
    /// Loads a configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::Custom(format!("unable to read config '{path}': {e}")))?;
        toml::from_str(&text)
            .map_err(|e| AppError::Custom(format!("unable to parse config '{path}': {e}")))
    }
}

/// Lifecycle callbacks a game provides to the engine.
pub trait Game {
    /// Called once after every subsystem is up.
    fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError>;

    /// Called once per frame before rendering.
    fn update(&mut self, engine: &mut Engine, delta_time: f64) -> Result<(), AppError>;

    /// Called once per frame to fill the render packet.
    fn render(
        &mut self,
        engine: &mut Engine,
        packet: &mut RenderPacket,
        delta_time: f64,
    ) -> Result<(), AppError>;

    /// Called when the framebuffer size changes (and once at startup).
    fn on_resize(&mut self, engine: &mut Engine, width: u32, height: u32);
}

/// Every engine subsystem, handed to game callbacks.
pub struct Engine {
    /// Tagged allocation accounting.
    pub memory: MemorySystem,
    /// The event bus.
    pub events: EventSystem,
    /// Keyboard/mouse state.
    pub input: InputSystem,
    /// Loader registry.
    pub resources: ResourceSystem,
    /// The renderer frontend.
    pub renderer: Renderer,
    /// Named textures.
    pub textures: TextureSystem,
    /// Named shaders.
    pub shaders: ShaderSystem,
    /// Named materials.
    pub materials: MaterialSystem,
    /// Named geometries.
    pub geometries: GeometrySystem,
    /// Named cameras.
    pub cameras: CameraSystem,
}

impl Engine {
    /// Renders a frame from `packet` through the renderer frontend.
    pub fn draw_frame(&mut self, packet: &RenderPacket) -> Result<(), RendererError> {
        self.renderer.draw_frame(
            packet,
            &mut self.shaders,
            &mut self.materials,
            &self.geometries,
            &self.textures,
        )
    }
}

const APPLICATION_LISTENER: u64 = 1;

/// The application: subsystems, platform, the game and the main loop.
pub struct Application<G: Game> {
    engine: Engine,
    platform: Platform,
    game: G,
    clock: Clock,
    width: u32,
    height: u32,
    is_suspended: bool,
    last_time: f64,

    is_running: Rc<Cell<bool>>,
    quit_requested: Rc<Cell<bool>>,
    pending_resize: Rc<Cell<Option<(u16, u16)>>>,
}

impl<G: Game> Application<G> {
    /// Initializes every subsystem in order and calls the game's
    /// `initialize`.
    pub fn new(config: ApplicationConfig, game: G) -> Result<Self, AppError> {
        let memory = MemorySystem::new();
        let mut events = EventSystem::new();
        let input = InputSystem::new();

        let mut platform = Platform::startup(
            &config.name,
            config.start_x,
            config.start_y,
            config.width,
            config.height,
        )?;

        let is_running = Rc::new(Cell::new(true));
        let quit_requested = Rc::new(Cell::new(false));
        let pending_resize = Rc::new(Cell::new(None));

        // application-level listeners
        let running = is_running.clone();
        events.register(
            codes::APPLICATION_QUIT,
            APPLICATION_LISTENER,
            Box::new(move |_, _| {
                log::info!("APPLICATION_QUIT received, shutting down.");
                running.set(false);
                true
            }),
        );
        let quit = quit_requested.clone();
        events.register(
            codes::KEY_PRESSED,
            APPLICATION_LISTENER,
            Box::new(move |_, context| {
                if context.u16(0) == Keys::Escape as u16 {
                    quit.set(true);
                    return true;
                }
                false
            }),
        );
        let resize = pending_resize.clone();
        events.register(
            codes::RESIZED,
            APPLICATION_LISTENER,
            Box::new(move |_, context| {
                resize.set(Some((context.u16(0), context.u16(1))));
                false
            }),
        );

        let mut renderer = Renderer::new(&mut platform, &config.name, config.width, config.height)?;

        let resources = ResourceSystem::new(ResourceSystemConfig {
            asset_base_path: config.asset_base_path.clone(),
            ..ResourceSystemConfig::default()
        });

        let mut textures = TextureSystem::new(TextureSystemConfig::default(), &mut renderer)?;

        let mut shaders = ShaderSystem::new(ShaderSystemConfig::default());
        let material_shader_id = shaders
            .create(&builtin_material_shader_config(), &mut renderer, &resources)
            .ok_or_else(|| {
                AppError::Custom("failed to create the builtin material shader".to_string())
            })?;
        let ui_shader_id = shaders
            .create(&builtin_ui_shader_config(), &mut renderer, &resources)
            .ok_or_else(|| AppError::Custom("failed to create the builtin UI shader".to_string()))?;

        let mut materials = MaterialSystem::new(
            MaterialSystemConfig::default(),
            material_shader_id,
            ui_shader_id,
            &mut renderer,
            &mut shaders,
        )?;

        let geometries = GeometrySystem::new(
            GeometrySystemConfig::default(),
            &mut renderer,
            &resources,
            &mut textures,
            &mut materials,
            &mut shaders,
        )?;

        let cameras = CameraSystem::new(CameraSystemConfig::default());

        let mut application = Self {
            engine: Engine {
                memory,
                events,
                input,
                resources,
                renderer,
                textures,
                shaders,
                materials,
                geometries,
                cameras,
            },
            platform,
            game,
            clock: Clock::new(),
            width: config.width,
            height: config.height,
            is_suspended: false,
            last_time: 0.0,
            is_running,
            quit_requested,
            pending_resize,
        };

        application.game.initialize(&mut application.engine)?;
        application
            .game
            .on_resize(&mut application.engine, application.width, application.height);

        log::info!("{}", application.engine.memory.usage_report());
        Ok(application)
    }

    /// Runs the main loop until a quit is requested or a callback fails.
    pub fn run(mut self) -> Result<(), AppError> {
        self.clock.start(self.platform.absolute_time());
        self.clock.update(self.platform.absolute_time());
        self.last_time = self.clock.elapsed;

        let result = self.run_loop();

        // shut down in reverse initialization order
        self.engine.events.unregister(codes::APPLICATION_QUIT, APPLICATION_LISTENER);
        self.engine.events.unregister(codes::KEY_PRESSED, APPLICATION_LISTENER);
        self.engine.events.unregister(codes::RESIZED, APPLICATION_LISTENER);

        let _ = self.engine.renderer.wait_idle();
        let Engine {
            ref mut renderer,
            ref mut textures,
            ref mut shaders,
            ref mut materials,
            ref mut geometries,
            ref mut events,
            ..
        } = self.engine;
        geometries.shutdown(renderer, textures, materials, shaders);
        materials.shutdown(renderer, textures, shaders);
        shaders.shutdown(renderer);
        textures.shutdown(renderer);
        renderer.shutdown();
        events.shutdown();

        log::info!("Application shutdown complete.");
        result
    }

    fn run_loop(&mut self) -> Result<(), AppError> {
        while self.is_running.get() {
            if !self
                .platform
                .pump_messages(&mut self.engine.input, &mut self.engine.events)
            {
                self.is_running.set(false);
            }

            // escape fires the quit event through the bus
            if self.quit_requested.take() {
                self.engine
                    .events
                    .fire(codes::APPLICATION_QUIT, EventContext::empty());
            }

            if let Some((width, height)) = self.pending_resize.take() {
                self.handle_resize(u32::from(width), u32::from(height));
            }

            if !self.is_suspended {
                self.clock.update(self.platform.absolute_time());
                let current_time = self.clock.elapsed;
                let delta_time = current_time - self.last_time;
                self.last_time = current_time;

                if let Err(err) = self.game.update(&mut self.engine, delta_time) {
                    crate::fatal!("Game update failed, shutting down: {err}");
                    self.is_running.set(false);
                    return Err(err);
                }

                let mut packet = RenderPacket {
                    delta_time: delta_time as f32,
                    ..RenderPacket::default()
                };
                if let Err(err) = self.game.render(&mut self.engine, &mut packet, delta_time) {
                    crate::fatal!("Game render failed, shutting down: {err}");
                    self.is_running.set(false);
                    return Err(err);
                }

                if let Err(err) = self.engine.draw_frame(&packet) {
                    crate::fatal!("draw_frame failed, shutting down: {err}");
                    self.is_running.set(false);
                    return Err(err.into());
                }

                // input snapshots roll over after everything that reads
                // this frame's input has run
                self.engine.input.update(delta_time);
            }
        }

        self.is_running.set(false);
        Ok(())
    }

    fn handle_resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;

        if width == 0 || height == 0 {
            log::info!("Window minimized, suspending application.");
            self.is_suspended = true;
            return;
        }

        if self.is_suspended {
            log::info!("Window restored, resuming application.");
            self.is_suspended = false;
        }
        self.game.on_resize(&mut self.engine, width, height);
        self.engine.renderer.on_resized(width, height);
    }
}
