use clap::Parser;
use env_logger::Env;

use dataset_manager::{run, Args};

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let result = args
        .to_config()
        .and_then(|config| run(args.action, &config));

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}
