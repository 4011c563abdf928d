//! Restorable GPU images with batched command submission.
//!
//! Draws and uploads are queued on the caller's thread, merged where
//! possible, and executed on a dedicated render thread through a
//! [`Backend`]. Every regular image keeps a CPU-side record of its
//! contents so that all images can be rebuilt after the graphics
//! context is lost.

pub mod backend;
pub mod command;
mod context;
mod error;
pub mod graphics;
mod image;
pub mod images;
mod rect;
pub mod shader;
mod thread;

pub use backend::{Backend, BackendError, Blend, BlendFactor, BlendOperation, FillRule, TextureId};
pub use context::{Context, ContextBuilder};
pub use error::{Error, Result};
pub use image::{DrawTriangles, Image};
pub use images::{Hint, ImageId, ImageState, ImageType};
pub use rect::Rect;
pub use shader::{Program, Shader, ShaderDesc, ShaderId, ShaderUnit};
pub use thread::RenderThread;
