use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "heartyfs", about = "Inspect and edit a heartyfs disk image")]
pub struct Cli {
    /// Disk image to operate on
    #[arg(long, short, env = "HEARTYFS_IMAGE", default_value = "/tmp/heartyfs")]
    pub image: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Format the image, creating it if needed
    Init {
        /// Number of 512 byte blocks in the image
        #[arg(long, default_value_t = heartyfs::DEFAULT_BLOCKS)]
        blocks: usize,
    },
    /// Create an empty file
    Creat { path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Remove a file
    Rm { path: String },
    /// Remove an empty directory
    Rmdir { path: String },
    /// Copy a host file into the image
    Write { path: String, source: PathBuf },
    /// Print a file's content to stdout
    Read { path: String },
    /// Print the directory tree
    Tree,
    /// Verify the image's structural invariants
    Check,
}
