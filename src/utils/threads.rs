use std::io;
use std::thread;

/// Spawns a thread carrying `name`, so it can be told apart in panics and debuggers.
pub fn spawn_named_thread<F, T, S>(name: S, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
    S: ToString,
{
    thread::Builder::new().name(name.to_string()).spawn(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawned_thread_has_name() {
        let handle = spawn_named_thread("named-test-thread", || {
            thread::current().name().map(str::to_string)
        })
        .unwrap();

        assert_eq!(handle.join().unwrap().as_deref(), Some("named-test-thread"));
    }
}
