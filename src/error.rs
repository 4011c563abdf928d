use crate::backend::BackendError;

/// An error returned at a flush, readback, or restoration boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("the render thread has shut down")]
    RenderThreadGone,
    #[error("failed to spawn the render thread: {0}")]
    SpawnThread(#[source] std::io::Error),
    /// Restoration was requested while some images had contents that
    /// existed only on the GPU. Call `resolve_stale_images` at every
    /// frame boundary to capture them before a context loss.
    #[error("{count} image(s) were never resolved and cannot be restored")]
    UnresolvedImages { count: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
