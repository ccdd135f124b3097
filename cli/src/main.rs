use svnc_common::runtime::build_runtime_from_env;

mod cli;
mod commands;
mod env;
mod opener;
mod store;

fn main() -> anyhow::Result<()> {
    let rt = build_runtime_from_env()?;

    rt.block_on(async {
        let cli = cli::parse();
        if let cli::Commands::Version = cli.command {
            println!("{}", env::version());
            return Ok(());
        }

        let config = env::init()?;
        svnc_common::logger::init("svnc", config.mode.default_log_filter());
        commands::run(config, cli).await
    })
}
