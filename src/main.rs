use clap::Parser;
use vitsearch::Opts;
use vitsearch::cli::SubCommandExtend;
use vitsearch::config::SubCommand;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Build(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::Status(config) => config.run(&opts).await,
        SubCommand::Shell(config) => config.run(&opts).await,
        SubCommand::Serve(config) => config.run(&opts).await,
        SubCommand::Export(config) => config.run(&opts).await,
    }
}
