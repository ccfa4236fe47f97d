use tokio::task::JoinHandle;

/// An owned background task feeding the tracker, such as the position stream or the ticker.
///
/// Replacing or dropping the subscription aborts the task it held, so at most one is ever live.
#[derive(Debug, Default)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new() -> Self {
        Self { task: None }
    }

    /// Releases any previous task before taking ownership of `task`.
    pub fn replace(&mut self, task: JoinHandle<()>) {
        self.cancel();
        self.task = Some(task);
    }

    /// Idempotent.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
