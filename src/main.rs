use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tidefs::backend::localfs::LocalDirBackend;
use tidefs::fuse::mount::mount_unprivileged;
use tidefs::vfs::demo::e2e_local_demo;
use tidefs::vfs::fs::Vfs;

#[derive(Parser)]
#[command(name = "tidefs", about = "Mount an append-oriented store as a POSIX filesystem")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mount a store rooted at a local directory onto an empty mountpoint.
    Mount {
        /// Directory backing the store namespace.
        root: PathBuf,
        /// Empty directory to mount onto.
        mountpoint: PathBuf,
    },
    /// Run the end-to-end demo against a local directory.
    Demo {
        /// Scratch directory for the demo namespace.
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Mount { root, mountpoint } => {
            let fs = Vfs::new(LocalDirBackend::new(&root));
            let handle = match mount_unprivileged(fs, &mountpoint).await {
                Ok(h) => h,
                Err(e) => {
                    eprintln!("mount failed: {e}");
                    std::process::exit(1);
                }
            };
            log::info!("mounted {} on {}", root.display(), mountpoint.display());
            if let Err(e) = handle.await {
                eprintln!("filesystem stopped: {e}");
                std::process::exit(1);
            }
        }
        Command::Demo { dir } => match e2e_local_demo(&dir).await {
            Ok(()) => println!("demo: OK"),
            Err(e) => {
                eprintln!("demo failed: {e}");
                std::process::exit(1);
            }
        },
    }
}
