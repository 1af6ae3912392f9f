//! Logging setup. `OBJSTRESS_LOG` (then `RUST_LOG`) overrides the
//! defaults; `--verbose` raises the crate to debug while keeping the
//! HTTP stack quiet.
use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "info";
const VERBOSE_DIRECTIVES: &str = "debug,hyper=info,reqwest=info";

pub fn init_logging(verbose: bool) {
    let fallback = if verbose {
        VERBOSE_DIRECTIVES
    } else {
        DEFAULT_DIRECTIVES
    };
    let filter = std::env::var("OBJSTRESS_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(fallback));

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .try_init();
    if let Err(err) = result {
        eprintln!("Failed to initialize logging: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(false);
        // The second call loses the try_init race and must not panic.
        init_logging(true);
    }
}
