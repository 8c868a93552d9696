mod aggregate;
mod cli;
mod mock;
mod model;
mod refresh;
mod render;
mod source;
mod watch;
mod window;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::mock::run_mock;
use crate::render::RenderError;
use crate::source::SourceError;
use crate::watch::run_watch;

fn main() {
    // stdout belongs to the live view
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let result: Result<()> = match cli.command {
        Some(Commands::Watch(watch)) => run_watch(watch),
        Some(Commands::Mock(mock)) => run_mock(mock),
        None => {
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(err) = result {
        let code = exit_code_for_error(&err);
        eprintln!("error: {err:?}");
        std::process::exit(code);
    }
}

pub(crate) fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    // 2: could not connect, 3: stream failed, 4: render failure, 1: other
    for cause in err.chain() {
        if let Some(src) = cause.downcast_ref::<SourceError>() {
            return match src {
                SourceError::Connect { .. } => 2,
                SourceError::Stream { .. } | SourceError::Decode { .. } => 3,
            };
        }
        if cause.is::<RenderError>() {
            return 4;
        }
    }
    1
}
