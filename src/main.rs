// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;
mod session;

use args::Args;
use clap::Parser;
use edgefirst_camera_engine::error::BoxError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt as _, EnvFilter, Layer as _, Registry};

fn init_tracing(args: &Args) -> Result<(), BoxError> {
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stdout = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_filter(filter);

    let journald = if args.journald {
        match tracing_journald::layer() {
            Ok(layer) => Some(layer),
            Err(err) => {
                eprintln!("journald unavailable: {err}");
                None
            }
        }
    } else {
        None
    };

    let tracy = if args.tracy {
        tracy_client::Client::start();
        Some(tracing_tracy::TracyLayer::default())
    } else {
        None
    };

    let console = args
        .tokio_console
        .then(|| console_subscriber::ConsoleLayer::builder().with_default_env().spawn());

    let subscriber = Registry::default()
        .with(stdout)
        .with(journald)
        .with(tracy)
        .with(console);

    tracing_log::LogTracer::init()?;
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();
    init_tracing(&args)?;

    info!(
        pool_size = args.pool_size,
        format = ?args.format,
        facing = ?args.facing,
        frames = args.frames,
        "edgefirst camera engine demo"
    );

    if let Err(err) = session::run(args).await {
        warn!(error = %err, "session ended with an error");
        return Err(err);
    }
    Ok(())
}
