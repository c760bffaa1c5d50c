//! Check-config command - validate the config file and summarize it.

use anyhow::Result;
use clap::Args;
use graph_layer_server::proxy::PathFilter;
use graph_layer_server::{AddressFilter, TokenEndpointConfig};

use super::Context;

/// Arguments for the check-config command.
#[derive(Args, Debug)]
pub struct CheckConfigArgs {
    /// Only report errors
    #[arg(short, long)]
    pub quiet: bool,
}

/// Run the check-config command.
///
/// The file was already parsed and validated on load; this also compiles the
/// whitelist and path filters the endpoints would build at startup.
pub fn run(args: CheckConfigArgs, ctx: &Context) -> Result<()> {
    let config = &ctx.config;

    TokenEndpointConfig::from(&config.token_endpoint).validate()?;
    AddressFilter::parse(&config.token_endpoint.whitelist)?;
    PathFilter::new(&config.proxy.whitelist, &config.proxy.blacklist)?;

    if args.quiet {
        return Ok(());
    }

    println!("Configuration OK: {}", ctx.config_path.display());
    println!("  storage:        {}", config.storage.path.display());
    println!(
        "  token endpoint: {}:{}",
        config.token_endpoint.host, config.token_endpoint.port
    );
    println!(
        "  proxy endpoint: {}:{}{} -> {}",
        config.proxy.host, config.proxy.port, config.proxy.base_path, config.proxy.upstream_url
    );

    let ids = config.app_ids();
    if ids.is_empty() {
        println!("  applications:   (none)");
    }
    for id in ids {
        if let Some(app) = config.app(&id) {
            let anonymous = if app.anonymous.is_some() {
                ", anonymous"
            } else {
                ""
            };
            println!("  application:    {} ({}{})", id, app.authority(), anonymous);
        }
    }
    Ok(())
}
