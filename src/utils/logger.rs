use env_logger::{Builder, Env, Target};
use log::LevelFilter;
use std::io::Write;

/// Console logging for a peer process.
///
/// `RUST_LOG` still wins when set; otherwise this crate logs at `level` and every
/// dependency stays at warn so the prompt is not drowned out.
pub fn setup_logging(level: LevelFilter) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("warn"));

    if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_module("lan_sync", level);
    }

    let _ = builder
        .target(Target::Stdout)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or("unknown"),
                record.args()
            )
        })
        .try_init();
}
