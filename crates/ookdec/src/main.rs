use anyhow::anyhow;
use clap::Parser;
use log::LevelFilter;

use ookay::{Device, FirFilter};

mod app;
mod cli;
mod desc;

use cli::{Args, CliError, Command};

fn main() {
    match ookdec() {
        Ok(()) => {}
        Err(cli_error) => cli_error.exit(),
    }
}

fn ookdec() -> Result<(), CliError> {
    // Parse options and start logging
    let args = Args::try_parse()?;
    log_setup(&args);

    // optional receive filter
    let mut filter = match args.filter.as_deref() {
        Some(path) => {
            let stages = desc::load_filter(path)?;
            Some(FirFilter::new(&stages, app::CHUNK_SAMPLES).map_err(anyhow::Error::from)?)
        }
        None => None,
    };

    // when receiving through a decimating filter, the decoder sees the
    // post-decimation rate
    let sample_rate = match (&args.command, filter.as_ref()) {
        (Command::Rx(_), Some(fir)) => args.rate / fir.total_decimation(),
        _ => args.rate,
    };

    // build the device from its description file
    let device_path = args
        .device
        .as_deref()
        .ok_or_else(|| anyhow!("a --device description file is required"))?;
    let device_desc = desc::load_device(device_path)?;
    let mut device = Device::new(&device_desc, sample_rate).map_err(anyhow::Error::from)?;

    match &args.command {
        Command::Rx(rx) => app::run_rx(rx, &mut device, filter.as_mut())?,
        Command::Tx(tx) => app::run_tx(&args, tx, &mut device)?,
    }

    Ok(())
}

fn log_setup(args: &Args) {
    if args.quiet {
        // no logging
        return;
    } else if std::env::var_os("RUST_LOG").is_none() {
        // parameter controls
        let log_filter = match args.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        pretty_env_logger::formatted_builder()
            .filter_module("ookay", log_filter)
            .filter_module("ookdec", log_filter)
            .init();
    } else {
        // environment controls
        pretty_env_logger::init();
    }
}
