use std::io;

use anyhow::Result;
use clap::Parser;

use usi_consult::usi::{self, HostSink};

/// USI consultation proxy: presents one USI engine to the host while driving
/// multiple backend engines and fusing their bestmoves.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Engine display name reported to the host
    #[arg(long, default_value = "usi-consult")]
    name: String,

    /// Engine author reported to the host
    #[arg(long, default_value = "SH11235")]
    author: String,
}

fn main() -> Result<()> {
    // ログは stderr へ。stdout はホストとの USI チャネル専用に保つ。
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    )
    .init();

    let cli = Cli::parse();
    let sink = HostSink::stdout();
    let stdin = io::stdin().lock();
    if let Err(err) = usi::run(stdin, &sink, &cli.name, &cli.author) {
        // ホストへ一報入れてから非0終了する。repr は1行に収める。
        let message = format!("{err:#}").replace('\n', "\\n");
        sink.send(&format!("info string Error {message}"));
        return Err(err);
    }
    Ok(())
}
