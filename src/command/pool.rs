//! Free lists shared between the producer and the render thread.
//!
//! Locks are held only while checking items in or out.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;

use super::{queue::CommandQueue, DrawTrianglesCommand};

#[derive(Debug, Default)]
pub(crate) struct DrawCommandPool {
    free: Mutex<Vec<Box<DrawTrianglesCommand>>>,
}

impl DrawCommandPool {
    pub fn get(&self) -> Box<DrawTrianglesCommand> {
        self.free.lock().pop().unwrap_or_default()
    }

    pub fn put(&self, commands: impl IntoIterator<Item = Box<DrawTrianglesCommand>>) {
        let mut free = self.free.lock();
        for mut command in commands {
            command.dst_regions.clear();
            free.push(command);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.free.lock().len()
    }
}

/// Idle command queues.
///
/// A queue whose asynchronous flush failed comes back carrying its
/// error; the next checkout reports that error instead of a queue.
pub(crate) struct QueuePool {
    free: Mutex<Vec<CommandQueue>>,
    draw_commands: Arc<DrawCommandPool>,
    max_vertex_count: usize,
}

impl QueuePool {
    pub fn new(max_vertex_count: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            draw_commands: Arc::new(DrawCommandPool::default()),
            max_vertex_count,
        }
    }

    pub fn get(&self) -> Result<CommandQueue, Error> {
        if let Some(err) = self.take_error() {
            return Err(err);
        }
        let queue = self.free.lock().pop();
        Ok(queue.unwrap_or_else(|| self.new_queue()))
    }

    pub fn new_queue(&self) -> CommandQueue {
        log::debug!("Allocating a new command queue");
        CommandQueue::new(self.max_vertex_count, Arc::clone(&self.draw_commands))
    }

    pub fn put(&self, queue: CommandQueue) {
        self.free.lock().push(queue);
    }

    /// Removes a failed queue, if any, and returns its error.
    pub fn take_error(&self) -> Option<Error> {
        let mut free = self.free.lock();
        let index = free.iter().position(|q| q.error().is_some())?;
        let mut queue = free.swap_remove(index);
        queue.take_error()
    }

    #[cfg(test)]
    pub fn idle_count(&self) -> usize {
        self.free.lock().len()
    }
}
