use std::thread::{self, JoinHandle};

use flume::Sender;

use crate::{backend::Backend, error::Error};

type Task = Box<dyn FnOnce(&mut dyn Backend) + Send>;

/// A dedicated thread that owns the backend and runs tasks
/// against it in submission order.
pub struct RenderThread {
    tasks: Option<Sender<Task>>,
    handle: Option<JoinHandle<()>>,
}

impl RenderThread {
    pub fn spawn(name: impl Into<String>, mut backend: Box<dyn Backend>) -> Result<Self, Error> {
        let (sender, receiver) = flume::unbounded::<Task>();

        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                for task in receiver {
                    task(backend.as_mut());
                }
                log::debug!("Render thread shutting down");
            })
            .map_err(Error::SpawnThread)?;

        Ok(Self {
            tasks: Some(sender),
            handle: Some(handle),
        })
    }

    /// Queues a task without waiting for it.
    pub fn run(&self, task: impl FnOnce(&mut dyn Backend) + Send + 'static) -> Result<(), Error> {
        self.tasks
            .as_ref()
            .ok_or(Error::RenderThreadGone)?
            .send(Box::new(task))
            .map_err(|_| Error::RenderThreadGone)
    }

    /// Runs a task and blocks until its result is available.
    pub fn call<R: Send + 'static>(
        &self,
        task: impl FnOnce(&mut dyn Backend) -> R + Send + 'static,
    ) -> Result<R, Error> {
        let (reply, result) = flume::bounded(1);
        self.run(move |backend| {
            let _ = reply.send(task(backend));
        })?;
        result.recv().map_err(|_| Error::RenderThreadGone)
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        // Closing the channel ends the task loop.
        self.tasks.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Render thread panicked");
            }
        }
    }
}
