use std::sync::{atomic::AtomicBool, Arc};

use glam::{uvec2, UVec2};
use parking_lot::{Mutex, MutexGuard};
use slotmap::SlotMap;

use crate::{
    backend::Backend,
    command::{Command, CommandQueueManager},
    error::Result,
    graphics::MAX_VERTEX_COUNT,
    images::{restore, ImageType, Images},
    shader::{Program, Shader, ShaderDesc, ShaderId, ShaderUnit},
    thread::RenderThread,
    Image,
};

/// Builder for a [`Context`].
pub struct ContextBuilder {
    settings: Settings,
    backend: Box<dyn Backend>,
}

impl ContextBuilder {
    /// Sets whether presenting a frame waits for the display.
    /// A frame-ending flush blocks until the render thread is done
    /// when this is on.
    ///
    /// The default is `true`.
    pub fn vsync(mut self, enabled: bool) -> Self {
        self.settings.vsync = enabled;
        self
    }

    /// Sets the number of vertices one vertex buffer generation can hold.
    /// Draws that would exceed it start a new generation and are never
    /// merged with earlier ones.
    ///
    /// The default is the platform maximum.
    pub fn max_vertex_count(mut self, count: usize) -> Self {
        assert!(count > 0 && count <= MAX_VERTEX_COUNT);
        self.settings.max_vertex_count = count;
        self
    }

    /// Sets how many operations an image records before it stops
    /// recording and is read back at the next frame boundary instead.
    ///
    /// The default is 1024.
    pub fn max_history_len(mut self, len: usize) -> Self {
        self.settings.max_history_len = len;
        self
    }

    /// Sets whether images keep what they need to survive a context loss.
    /// Turning this off skips all bookkeeping; reads go to the GPU.
    ///
    /// The default is `true`.
    pub fn restorable(mut self, enabled: bool) -> Self {
        self.settings.restorable = enabled;
        self
    }

    pub fn render_thread_name(mut self, name: impl Into<String>) -> Self {
        self.settings.render_thread_name = name.into();
        self
    }

    /// Starts the render thread and builds the context.
    pub fn build(self) -> Result<Context> {
        let settings = self.settings;
        let render_thread = RenderThread::spawn(settings.render_thread_name.clone(), self.backend)?;

        let vsync = settings.vsync;
        render_thread.run(move |backend| backend.set_vsync_enabled(vsync))?;
        let max_image_size = render_thread.call(|backend| backend.max_image_size())?;

        let mut state = State {
            images: Images::new(settings.restorable, settings.max_history_len),
            shaders: SlotMap::with_key(),
            manager: CommandQueueManager::new(
                settings.max_vertex_count,
                Arc::new(AtomicBool::new(vsync)),
            ),
        };
        let nearest_shader = state.new_shader(ShaderDesc::new(Program::Texture, ShaderUnit::Pixels));
        let color_shader = state.new_shader(ShaderDesc::new(Program::VertexColor, ShaderUnit::Pixels));

        log::info!(
            "Created context (max image size {}, vsync {}, restorable {})",
            max_image_size,
            vsync,
            settings.restorable
        );
        Ok(Context(Arc::new(Inner {
            settings,
            max_image_size,
            nearest_shader,
            color_shader,
            state: Mutex::new(state),
            render_thread,
        })))
    }
}

#[derive(Debug)]
pub(crate) struct Settings {
    pub(crate) vsync: bool,
    pub(crate) max_vertex_count: usize,
    pub(crate) max_history_len: usize,
    pub(crate) restorable: bool,
    pub(crate) render_thread_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vsync: true,
            max_vertex_count: MAX_VERTEX_COUNT,
            max_history_len: 1024,
            restorable: true,
            render_thread_name: "render".to_owned(),
        }
    }
}

/// Everything the producer side mutates, behind one lock.
pub(crate) struct State {
    pub(crate) images: Images,
    pub(crate) shaders: SlotMap<ShaderId, Arc<ShaderDesc>>,
    pub(crate) manager: CommandQueueManager,
}

impl State {
    fn new_shader(&mut self, desc: ShaderDesc) -> Shader {
        let desc = Arc::new(desc);
        let id = self.shaders.insert(Arc::clone(&desc));
        self.manager.queue().enqueue(Command::NewShader {
            id,
            desc: Arc::clone(&desc),
        });
        Shader::new(id, desc)
    }
}

/// The thread-safe context. Owns the render thread, all images
/// and shaders, and the queue of pending GPU commands.
///
/// The `Context` can be cloned to create a new handle.
/// It internally uses an `Arc`.
#[derive(Clone)]
pub struct Context(Arc<Inner>);

struct Inner {
    settings: Settings,
    max_image_size: u32,

    nearest_shader: Shader,
    color_shader: Shader,

    state: Mutex<State>,
    render_thread: RenderThread,
}

impl Context {
    pub fn builder(backend: impl Backend) -> ContextBuilder {
        ContextBuilder {
            settings: Settings::default(),
            backend: Box::new(backend),
        }
    }

    /// Creates a transparent image.
    ///
    /// # Panics
    /// Panics if either side is zero or larger than [`max_image_size`](Self::max_image_size).
    pub fn new_image(&self, width: u32, height: u32, ty: ImageType) -> Image {
        let size = self.checked_size(width, height);
        let mut state = self.state();
        let state = &mut *state;
        let id = state.images.new_image(state.manager.queue(), size, ty);
        Image::new(self.clone(), id)
    }

    /// Creates a regular image holding `pixels`, RGBA8 in row-major order.
    pub fn new_image_with_pixels(&self, width: u32, height: u32, pixels: &[u8]) -> Image {
        let image = self.new_image(width, height, ImageType::Regular);
        image.write_pixels(pixels, crate::Rect::from_size(uvec2(width, height)));
        image
    }

    fn checked_size(&self, width: u32, height: u32) -> UVec2 {
        let max = self.0.max_image_size;
        assert!(
            width > 0 && height > 0 && width <= max && height <= max,
            "image size {}x{} must be positive and at most {}",
            width,
            height,
            max
        );
        uvec2(width, height)
    }

    pub fn new_shader(&self, desc: ShaderDesc) -> Shader {
        self.state().new_shader(desc)
    }

    /// Disposes a shader. Images whose recorded draws use it will be
    /// read back at the next frame boundary.
    pub fn dispose_shader(&self, shader: Shader) {
        assert!(
            shader != self.0.nearest_shader && shader != self.0.color_shader,
            "built-in shaders cannot be disposed"
        );
        let mut state = self.state();
        if state.shaders.remove(shader.id()).is_some() {
            state.images.invalidate_shader_users(shader.id());
            state.manager.queue().enqueue(Command::DisposeShader(shader.id()));
        }
    }

    /// Samples the first source with nearest filtering, scaled by
    /// the vertex color.
    pub fn nearest_filter_shader(&self) -> &Shader {
        &self.0.nearest_shader
    }

    /// Outputs the vertex color.
    pub fn vertex_color_shader(&self) -> &Shader {
        &self.0.color_shader
    }

    pub fn max_image_size(&self) -> u32 {
        self.0.max_image_size
    }

    pub fn is_restorable(&self) -> bool {
        self.0.settings.restorable
    }

    /// Sends pending commands to the render thread.
    ///
    /// Errors from earlier asynchronous flushes are reported here.
    pub fn flush(&self, end_frame: bool) -> Result<()> {
        let mut state = self.state();
        state.manager.flush(&self.0.render_thread, end_frame)
    }

    /// Resolves stale images, then flushes and presents the frame.
    pub fn end_frame(&self) -> Result<()> {
        let mut state = self.state();
        let state = &mut *state;
        state
            .images
            .resolve_stale_images(&mut state.manager, &self.0.render_thread)?;
        state.manager.flush(&self.0.render_thread, true)
    }

    /// Reads back every image whose contents exist only on the GPU.
    ///
    /// Must run at each frame boundary for restoration to succeed
    /// after a context loss.
    pub fn resolve_stale_images(&self) -> Result<()> {
        let mut state = self.state();
        let state = &mut *state;
        state
            .images
            .resolve_stale_images(&mut state.manager, &self.0.render_thread)
    }

    /// Restores every image if the backend reports a lost context.
    /// Returns whether a restoration happened.
    pub fn restore_if_needed(&self) -> Result<bool> {
        if !self.0.settings.restorable {
            return Ok(false);
        }
        let lost = self.0.render_thread.call(|backend| backend.is_context_lost())?;
        if !lost {
            return Ok(false);
        }
        log::info!("Graphics context was lost");
        self.restore()?;
        Ok(true)
    }

    /// Rebuilds all shaders and images on the backend unconditionally.
    pub fn restore(&self) -> Result<()> {
        let mut state = self.state();
        let state = &mut *state;
        restore::restore(
            &state.images,
            &state.shaders,
            &mut state.manager,
            &self.0.render_thread,
        )
    }

    pub fn vsync_enabled(&self) -> bool {
        self.state().manager.vsync_enabled()
    }

    /// Changes vsync at runtime. Takes effect from the next frame.
    pub fn set_vsync_enabled(&self, enabled: bool) -> Result<()> {
        let mut state = self.state();
        state.manager.set_vsync_enabled(enabled);
        state.manager.flush(&self.0.render_thread, false)?;
        log::info!("Vsync {}", if enabled { "enabled" } else { "disabled" });
        self.0
            .render_thread
            .call(move |backend| backend.set_vsync_enabled(enabled))
    }

    /// Registers a callback that runs on the render thread once the
    /// current frame has been flushed and presented.
    pub fn add_finalizer(&self, f: impl FnOnce() + Send + 'static) {
        self.state().manager.queue().add_finalizer(f);
    }

    /// Flushes pending commands, then runs `f` against the backend and
    /// returns its result.
    pub fn run_on_render_thread<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut dyn Backend) -> R + Send + 'static,
    ) -> Result<R> {
        let mut state = self.state();
        state.manager.flush(&self.0.render_thread, false)?;
        self.0.render_thread.call(f)
    }

    pub(crate) fn state(&self) -> MutexGuard<State> {
        self.0.state.lock()
    }

    pub(crate) fn render_thread(&self) -> &RenderThread {
        &self.0.render_thread
    }

    pub(crate) fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
