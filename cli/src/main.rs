//! streamindex CLI — inspect and manage indexer state.
//!
//! Usage:
//! ```bash
//! streamindex reset ./index.db my-indexer
//! streamindex info
//! ```

use std::env;
use std::process;

use streamindex_core::storage::StorageManager;
use streamindex_storage::SqliteStorageManager;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    match args[1].as_str() {
        "info" => cmd_info(),
        "reset" => {
            if args.len() < 4 {
                eprintln!("Usage: streamindex reset <db-path> <indexer-id>");
                process::exit(1);
            }
            if let Err(err) = cmd_reset(&args[2], &args[3]) {
                eprintln!("Reset failed: {err}");
                process::exit(1);
            }
        }
        "version" | "--version" | "-V" => {
            println!("streamindex {}", env!("CARGO_PKG_VERSION"));
        }
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!("streamindex {}", env!("CARGO_PKG_VERSION"));
    println!("Resumable streaming-indexer runner\n");
    println!("USAGE:");
    println!("    streamindex <COMMAND>\n");
    println!("COMMANDS:");
    println!("    info                        Show StreamIndex configuration info");
    println!("    reset <db-path> <indexer>   Wipe persisted state for an indexer");
    println!("    version                     Print version");
    println!("    help                        Print this help");
}

fn cmd_info() {
    println!("StreamIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Handshake batch size: 1 (pinned)");
    println!("  Default finality: accepted");
    println!("  Default transport security: on");
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
}

fn cmd_reset(db_path: &str, indexer_id: &str) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut storage = SqliteStorageManager::open(db_path).await?;
        storage.namespace(indexer_id).await?;
        storage.drop_all().await?;
        Ok::<_, anyhow::Error>(())
    })?;

    println!("Cleared persisted state for '{indexer_id}' in {db_path}");
    Ok(())
}
