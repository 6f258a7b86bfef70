use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber for the process
///
/// `RUST_LOG` takes precedence over `default_level`. Safe to call more than
/// once; later calls are ignored.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::init;

    #[test]
    fn init_tolerates_repeats_and_bad_levels() {
        init("debug");
        init("warn");
        init("not a level ][");
    }
}
