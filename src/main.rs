// src/main.rs

use changewatch::errors::ChangewatchError;
use changewatch::{cli, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level, args.log_format) {
        eprintln!("changewatch error: {err:?}");
        std::process::exit(1);
    }

    if let Err(err) = run(args).await {
        eprintln!("changewatch error: {err}");
        std::process::exit(exit_code(&err));
    }
}

fn exit_code(err: &ChangewatchError) -> i32 {
    err.exit_code()
}
