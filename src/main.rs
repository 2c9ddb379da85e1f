use std::process::ExitCode;

use clap::Parser;
use log::error;

use picsearch::cli::SubCommandExtend;
use picsearch::config::{Opts, SubCommand};
use picsearch::{Error, metrics};

fn main() -> ExitCode {
    env_logger::init();

    let opts = Opts::parse();

    let result = match &opts.subcmd {
        SubCommand::Index(cmd) => cmd.run(&opts),
        SubCommand::Search(cmd) => cmd.run(&opts),
        SubCommand::Stat(cmd) => cmd.run(&opts),
        SubCommand::Export(cmd) => cmd.run(&opts),
    };

    if opts.metrics {
        match metrics::gather_text() {
            Ok(text) => eprint!("{text}"),
            Err(e) => error!("无法导出指标: {e}"),
        }
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<Error>() {
            Some(err) if err.is_invalid_request() => {
                eprintln!("{err}");
                ExitCode::from(2)
            }
            _ => {
                eprintln!("错误: {e:?}");
                ExitCode::FAILURE
            }
        },
    }
}
