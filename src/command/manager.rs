use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{error::Error, thread::RenderThread};

use super::{pool::QueuePool, queue::CommandQueue};

/// Owns the current command queue and hands filled queues
/// to the render thread.
pub struct CommandQueueManager {
    current: CommandQueue,
    pool: Arc<QueuePool>,
    vsync: Arc<AtomicBool>,
}

impl CommandQueueManager {
    pub(crate) fn new(max_vertex_count: usize, vsync: Arc<AtomicBool>) -> Self {
        let pool = Arc::new(QueuePool::new(max_vertex_count));
        let current = pool.new_queue();
        Self {
            current,
            pool,
            vsync,
        }
    }

    /// The queue accepting commands.
    pub fn queue(&mut self) -> &mut CommandQueue {
        &mut self.current
    }

    pub fn vsync_enabled(&self) -> bool {
        self.vsync.load(Ordering::Acquire)
    }

    pub fn set_vsync_enabled(&self, enabled: bool) {
        self.vsync.store(enabled, Ordering::Release);
    }

    /// Swaps in a fresh queue and flushes the previous one on the render thread.
    ///
    /// The flush blocks when it ends a frame with vsync enabled or when
    /// a queued command needs synchronization; otherwise it runs in the
    /// background and any error it hits is returned by a later flush.
    pub fn flush(&mut self, thread: &RenderThread, end_frame: bool) -> Result<(), Error> {
        self.flush_with(thread, end_frame, false)
    }

    /// Like [`flush`](Self::flush), but always waits for completion.
    pub fn flush_sync(&mut self, thread: &RenderThread, end_frame: bool) -> Result<(), Error> {
        self.flush_with(thread, end_frame, true)
    }

    fn flush_with(
        &mut self,
        thread: &RenderThread,
        end_frame: bool,
        force_sync: bool,
    ) -> Result<(), Error> {
        if self.current.is_empty() && !end_frame {
            if force_sync {
                // Wait for background flushes so their errors are visible.
                thread.call(|_| ())?;
            }
            return self.pool.take_error().map_or(Ok(()), Err);
        }

        let next = self.pool.get()?;
        let mut queue = std::mem::replace(&mut self.current, next);
        if !end_frame {
            self.current.adopt_finalizers(&mut queue);
        }
        let sync = force_sync || (end_frame && self.vsync_enabled()) || queue.needs_sync();
        let pool = Arc::clone(&self.pool);

        if sync {
            log::debug!("Flushing synchronously (end of frame: {})", end_frame);
            thread.call(move |backend| {
                let result = queue.flush(backend, end_frame);
                pool.put(queue);
                result
            })??;
            // Tasks run in order, so earlier background flushes have finished.
            if let Some(err) = self.pool.take_error() {
                return Err(err);
            }
        } else {
            log::debug!("Flushing asynchronously (end of frame: {})", end_frame);
            thread.run(move |backend| {
                if let Err(err) = queue.flush(backend, end_frame) {
                    log::error!("Asynchronous flush failed: {}", err);
                    queue.set_error(err);
                }
                pool.put(queue);
            })?;
        }
        Ok(())
    }

    /// Drops everything queued since the last flush.
    pub(crate) fn discard_pending(&mut self) {
        self.current.discard();
    }

    /// Waits for background flushes and drops the errors they stored.
    pub(crate) fn discard_errors(&mut self, thread: &RenderThread) -> Result<(), Error> {
        thread.call(|_| ())?;
        while let Some(err) = self.pool.take_error() {
            log::warn!("Dropping error from before the context was restored: {}", err);
        }
        Ok(())
    }
}
