use std::io::Write;

/// Installs the process-wide logger. `RUST_LOG` wins over `default_filter`.
pub fn init(prefix: &'static str, default_filter: &str) {
    let env = env_logger::Env::default().default_filter_or(default_filter);
    let result = env_logger::Builder::from_env(env)
        .format(move |buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                buf.timestamp(),
                record.level(),
                prefix,
                record.args()
            )
        })
        .try_init();

    if result.is_err() {
        log::debug!("logger already initialised, keeping the existing one");
    }
}
