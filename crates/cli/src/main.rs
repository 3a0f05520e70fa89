use anyhow::Context;
use clap::Parser;
use mdrive_cli::cli::Cli;
use mdrive_cli::config::Config;
use mdrive_cli::state::AppState;
use mdrive_cli::{logging, server};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = run(cli).await {
		error!(target = "mdrive", error = %format!("{err:#}"), "server failed");
		std::process::exit(1);
	}
}

async fn run(cli: Cli) -> anyhow::Result<()> {
	let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
	config.apply_overrides(&cli);

	let state = AppState::from_config(&config).context("initializing session engine")?;
	let addr = config.bind_addr();
	let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
	info!(target = "mdrive.server", %addr, "mdrive server starting");

	server::serve(listener, state, shutdown_signal()).await.context("serving requests")?;
	Ok(())
}

async fn shutdown_signal() {
	match tokio::signal::ctrl_c().await {
		Ok(()) => info!(target = "mdrive.server", "shutdown requested"),
		Err(err) => {
			warn!(target = "mdrive.server", error = %err, "cannot listen for ctrl-c; running until killed");
			std::future::pending::<()>().await;
		}
	}
}
