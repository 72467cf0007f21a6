use std::fs;
use std::io;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mzoscfixer::{MZOscFixer, MZOscFixerError};

#[cfg(feature = "mimalloc")]
use mimalloc::MiMalloc;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn configure_log(
    args: &MZOscFixer,
) -> io::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    let (file_layer, guard) = match args.log_file.as_ref() {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(fs::File::create(path)?);
            let layer = fmt::layer()
                .compact()
                .with_ansi(false)
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(writer)
                .with_filter(
                    EnvFilter::builder()
                        .with_default_directive(level.into())
                        .from_env_lossy(),
                );
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()))
        .with(
            fmt::layer()
                .compact()
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(io::stderr)
                .with_filter(
                    EnvFilter::builder()
                        .with_default_directive(level.into())
                        .from_env_lossy(),
                ),
        )
        .with(file_layer)
        .init();
    Ok(guard)
}

fn main() -> Result<(), MZOscFixerError> {
    let args = MZOscFixer::parse().configure()?;
    let _guard = configure_log(&args)?;
    if let Err(e) = args.main() {
        tracing::error!("{e}");
        return Err(e);
    }
    Ok(())
}
