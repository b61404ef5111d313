// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Entry point for the Parsec token-exchange service.

mod build_info;
mod claims;
mod claims_mapping;
mod clock;
mod config;
mod credential;
mod datasource;
mod error;
mod handlers;
mod issuers;
mod keys;
mod token_service;
mod validators;

use anyhow::Result;
use clap::Parser;
use config::Config;
use log::info;

use std::path::PathBuf;

// Include the license notice generated by build.rs
include!(concat!(env!("OUT_DIR"), "/license_notice.rs"));

/// Parsec: a trust-boundary token-exchange service.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to a configuration to validate and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Output the configuration schema as JSON and exit
    #[arg(long)]
    show_config_schema: bool,

    /// Network address to bind to, overriding the configuration file
    #[arg(short = 'a', long)]
    address: Option<String>,

    /// TCP port to bind to, overriding the configuration file
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Trust domain this instance issues and validates tokens for,
    /// overriding the configuration file
    #[arg(long)]
    trust_domain: Option<String>,

    /// Print version information and exit
    #[arg(long)]
    show_version: bool,

    /// Print detailed build information and exit
    #[arg(long)]
    build_info: bool,

    /// Print version hash and exit (for maintenance purposes)
    #[arg(long)]
    get_version_hash: bool,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Return a working demo configuration file with comments; use
    /// `--get-demo-config > parsec.yaml`
    #[arg(long = "get-demo-config")]
    get_demo_config: bool,

    /// Show the license notice for this project and exit
    #[arg(long = "show-license-notice")]
    show_license_notice: bool,
}

#[rocket::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.show_license_notice {
        println!("{}", LICENSE_NOTICE);
        return Ok(());
    }

    if args.show_version {
        build_info::print_version_info();
        return Ok(());
    }

    if args.build_info {
        build_info::print_build_info();
        return Ok(());
    }

    if args.get_version_hash {
        println!("{}", build_info::get_version_hash());
        return Ok(());
    }

    // Initialize the default crypto provider for rustls, required before any
    // TLS operation (JWKS fetches over HTTPS, and the server's own TLS mode).
    if rustls::crypto::ring::default_provider().install_default().is_err()
        && rustls::crypto::aws_lc_rs::default_provider().install_default().is_err()
    {
        return Err(anyhow::anyhow!(
            "Failed to install any crypto provider for rustls. TLS functionality will not be available."
        ));
    }

    if args.get_demo_config {
        let demo_config = include_str!("../config.example.yaml");
        println!(
            "#Save this demo configuration file in a yaml file\n#    and use --config FILE:\n#\n{}",
            demo_config
        );
        return Ok(());
    }

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env().filter_level(log_level).init();

    if args.show_config_schema {
        return config::output_config_schema();
    }

    if let Some(validate_path) = args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }
        Config::from_file(&validate_path).map_err(|err| anyhow::anyhow!("Configuration validation failed: {}", err))?;
        println!("Configuration file is valid: {}", validate_path.display());
        return Ok(());
    }

    let config_path = args.config.clone().unwrap_or_else(|| PathBuf::from("parsec.yaml"));
    let mut config = Config::from_file(&config_path)?;
    config.apply_args(args.port, args.address.clone(), args.trust_domain.clone());

    if !config.server.enabled {
        info!("server disabled by configuration, exiting");
        return Ok(());
    }

    info!(
        "starting parsec {} for trust domain '{}' on {}:{}",
        env!("CARGO_PKG_VERSION"),
        config.trust_domain,
        config.server.address,
        config.server.port
    );

    let rocket = handlers::build_rocket(config).await?;
    rocket.launch().await?;

    Ok(())
}
