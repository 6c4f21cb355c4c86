// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

#[derive(Parser)]
#[command(version, propagate_version = true)]
#[command(about = "Strider motion daemon", long_about = None)]
struct Args {
    /// Largest payload sent as a single protocol line.
    #[arg(long, value_name = "BYTES")]
    chunk_size: Option<usize>,
    /// Transfer chunk acknowledgement timeout in milliseconds.
    #[arg(long, value_name = "MS")]
    ack_timeout: Option<u64>,
    /// Wheel diameter in inches.
    #[arg(long, value_name = "INCHES")]
    wheel_diameter: Option<f64>,
    /// Free speed of the drive motors in RPM.
    #[arg(long, value_name = "RPM")]
    max_rpm: Option<f64>,
    /// Quiet output (no logging).
    #[arg(long)]
    quiet: bool,
    /// Daemonize the service.
    #[arg(short = 'D', long)]
    daemon: bool,
    /// Level of verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use log::LevelFilter;

    let args = Args::parse();

    let mut config = strider::Config {
        bin_name: env!("CARGO_BIN_NAME").to_string(),
        ..Default::default()
    };
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(ack_timeout) = args.ack_timeout {
        config.ack_timeout = Duration::from_millis(ack_timeout);
    }
    if let Some(wheel_diameter) = args.wheel_diameter {
        config.drive.wheel_diameter = wheel_diameter;
    }
    if let Some(max_rpm) = args.max_rpm {
        config.drive.max_rpm = max_rpm;
    }

    let mut log_config = simplelog::ConfigBuilder::new();
    if args.daemon {
        log_config.set_time_level(LevelFilter::Off);
        log_config.set_thread_level(LevelFilter::Off);
    }

    log_config.set_target_level(LevelFilter::Off);
    log_config.set_location_level(LevelFilter::Off);
    log_config.add_filter_ignore_str("mio");

    let log_level = if args.daemon {
        LevelFilter::Info
    } else if args.quiet {
        LevelFilter::Off
    } else {
        match args.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    let color_choice = if args.daemon {
        simplelog::ColorChoice::Never
    } else {
        simplelog::ColorChoice::Auto
    };

    // Stdout carries the protocol lines; logging goes to stderr only.
    simplelog::TermLogger::init(
        log_level,
        log_config.build(),
        simplelog::TerminalMode::Stderr,
        color_choice,
    )?;

    if args.daemon {
        log::debug!("Running service as daemon");
    }

    log::info!("Starting {} {}", config.bin_name, strider::consts::VERSION);
    log::debug!(
        "Drive: wheel {}\", {} RPM free speed",
        config.drive.wheel_diameter,
        config.drive.max_rpm
    );

    let policy = tabu::TransferPolicy {
        chunk_size: config.chunk_size,
        ack_timeout: config.ack_timeout,
        ack_attempts: config.ack_attempts,
    };
    let bus = tabu::Bus::with_policy(tokio::io::stdout(), policy);

    let robot = Arc::new(strider::service::Robot::new(&config));
    strider::service::install(&bus, robot, &config);

    tokio::select! {
        result = bus.run(tokio::io::stdin()) => {
            result?;
            log::info!("Input stream closed");
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Termination requested");
        }
    }

    let stats = bus.stats();
    log::debug!(
        "Session: {} received, {} sent, {:.1}% receive failures",
        stats.rx_count,
        stats.tx_count,
        stats.rx_failure_rate()
    );
    log::debug!("{} was shutdown gracefully", config.bin_name);

    Ok(())
}
