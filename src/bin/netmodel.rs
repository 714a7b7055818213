use std::{env, process};

use netmodel::{
    BlobStore, MemoryBlobStore, SqliteBlobStore, StoreConfig,
    cli::{CommandLineConfig, run_command},
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() {
    let filter = EnvFilter::try_from_env("NETMODEL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("{}", CommandLineConfig::help());
        return;
    }
    let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    let config = match CommandLineConfig::from_args(&arg_refs) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(2);
        }
    };

    let store: Box<dyn BlobStore> = if config.database == "memory" {
        Box::new(MemoryBlobStore::new())
    } else {
        match SqliteBlobStore::open(&config.database, &StoreConfig::default()) {
            Ok(store) => Box::new(store),
            Err(err) => {
                eprintln!("{err}");
                process::exit(2);
            }
        }
    };

    match run_command(store.as_ref(), &config) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
        }
        Err(err) => {
            eprintln!("command failed: {err}");
            process::exit(1);
        }
    }
}
