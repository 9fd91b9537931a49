/// Initializes the global `tracing` subscriber. Called once from each binary
/// entry point (the HTTP server, the standalone worker, the migrator).
///
/// Configures thread ids, file/line, and an env filter, pulled into its own
/// module so every binary shares one initialization path instead of
/// repeating it.
pub fn init_tracing(default_filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_env_filter(env_filter)
        .init();
}
