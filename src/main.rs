use std::process::ExitCode;

use clap::Parser;
use log::{error, info, LevelFilter};

use chord_dht::cli::DhtArgs;
use chord_dht::config::Params;
use chord_dht::file_logger;
use chord_dht::node::Node;

#[tokio::main]
async fn main() -> ExitCode {
    let args = DhtArgs::parse();

    let params = match Params::load(&args.config) {
        Ok(params) => params,
        Err(err) => {
            eprintln!("configuration error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = file_logger::init(&params.log_file, LevelFilter::Info) {
        eprintln!("failed to initialize logger: {}", err);
        return ExitCode::FAILURE;
    }

    info!("starting node: p2p={} api={}", params.p2p_address, params.api_address);

    let node = match Node::bootstrap(params).await {
        Ok(node) => node,
        Err(err) => {
            error!("fatal startup error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let node = std::sync::Arc::new(node);
    let shutdown_node = node.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal: {}", shutdown_node.routing_summary());
            shutdown_node.stop();
        }
    });

    if let Err(err) = node.serve().await {
        error!("node exited with error: {}", err);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
