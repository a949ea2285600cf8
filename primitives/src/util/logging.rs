use slog::{o, Discard, Drain, Logger};
use slog_async::Async;
use slog_term::{CompactFormat, TermDecorator};

/// Asynchronous terminal logger tagging every record with `component`.
pub fn new_logger(component: &'static str) -> Logger {
    let decorator = TermDecorator::new().build();
    let drain = CompactFormat::new(decorator).build().fuse();
    let drain = Async::new(drain).build().fuse();

    Logger::root(drain, o!("component" => component))
}

/// Logger dropping every record, used until a real one is attached.
pub fn discard_logger() -> Logger {
    Logger::root(Discard, o!())
}
