use clap::Parser;

use weave_eval::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = Args::parse();

	weave_eval::run(args).await
}
