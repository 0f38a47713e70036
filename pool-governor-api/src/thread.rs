use std::fmt::Debug;
use std::io;
use std::thread::{self, JoinHandle};

/// Source of worker threads for a pool.
pub trait ThreadFactory: Debug + Send + Sync {
    /// Name for the next thread, or `None` to leave it unnamed.
    fn next_thread_name(&self) -> Option<String>;

    /// Spawns a thread running `body`, named by [`next_thread_name`](Self::next_thread_name).
    fn new_thread(&self, body: Box<dyn FnOnce() + Send + 'static>) -> io::Result<JoinHandle<()>> {
        let mut builder = thread::Builder::new();
        if let Some(name) = self.next_thread_name() {
            builder = builder.name(name);
        }
        builder.spawn(body)
    }
}
