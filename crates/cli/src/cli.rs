use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mdrive")]
#[command(about = "Session server for remote-controlled mobile devices")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Configuration file (defaults to <config dir>/mdrive/config.json)
	#[arg(short, long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Address to listen on
	#[arg(long)]
	pub host: Option<String>,

	/// Port to listen on
	#[arg(short, long)]
	pub port: Option<u16>,

	/// Start budget of the first session attempt, in seconds
	#[arg(long, value_name = "SECS")]
	pub new_session_timeout: Option<u64>,

	/// Session creations allowed to run at once
	#[arg(long, value_name = "N")]
	pub max_sessions: Option<usize>,
}
