use colored::Colorize;
use env_logger::Builder;
use log::Level;
use std::io::Write;

/// Stage name of a pipeline thread (`pelter-worker` → `worker`), `None` for other threads.
fn stage_of(thread_name: Option<&str>) -> Option<&str> {
    thread_name?
        .strip_prefix(env!("CARGO_PKG_NAME"))?
        .strip_prefix('-')
}

pub fn setup_logging(verbose: bool) {
    use log::LevelFilter;

    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // `try_init` so a library caller (or a test) that already set a logger is left alone.
    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn) // Default: only warnings from dependencies
        .filter_module(env!("CARGO_PKG_NAME"), level) // Our crate: use requested level
        .format(|buf, record| {
            let name = env!("CARGO_PKG_NAME");
            let thread = std::thread::current();
            let stage = stage_of(thread.name())
                .map(|s| format!(" {}", s.dimmed()))
                .unwrap_or_default();
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = match record.level() {
                        Level::Warn => "WARN".yellow(),
                        Level::Error => "ERROR".red(),
                        _ => unreachable!(),
                    };
                    let path = record.target().to_string().white();
                    format!(
                        "[{}{} {} {}] {}",
                        name.cyan(),
                        stage,
                        level_str,
                        path,
                        record.args()
                    )
                }
                _ => format!("[{}{}] {}", name.cyan(), stage, record.args()),
            };
            writeln!(buf, "{}", line)
        })
        .try_init();
}
