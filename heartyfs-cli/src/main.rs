mod cli;

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::process;

use clap::Parser;
use cli::{Cli, Command};
use heartyfs::io::{FileRegion, FileRegionBuilder};
use heartyfs::{FsConfig, FsError, HeartyFs, BLOCK_SIZE};

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        eprintln!("heartyfs: {}", err);
        process::exit(1);
    }
}

fn run(cli: Cli) -> heartyfs::Result<()> {
    let command = match cli.command {
        Command::Init { blocks } => return init(&cli.image, blocks),
        command => command,
    };

    let mut fs = open(&cli.image)?;
    match command {
        Command::Init { .. } => {}
        Command::Creat { path } => {
            fs.create_file(&path)?;
        }
        Command::Mkdir { path } => {
            fs.make_directory(&path)?;
        }
        Command::Rm { path } => fs.remove_file(&path)?,
        Command::Rmdir { path } => fs.remove_directory(&path)?,
        Command::Write { path, source } => {
            let data = std::fs::read(&source)?;
            fs.write_file(&path, &data)?;
            log::info!("copied {:?} into {}", source, path);
        }
        Command::Read { path } => {
            let contents = fs.read_file(&path)?;
            let stdout = io::stdout();
            contents.write_to(&mut stdout.lock())?;
        }
        Command::Tree => print!("{}", fs.list_tree()?),
        Command::Check => {
            let report = fs.check()?;
            println!(
                "{} blocks reachable, {} free, {} leaked",
                report.reachable,
                fs.free_blocks()?,
                report.leaked.len()
            );
            if !report.leaked.is_empty() {
                println!("leaked blocks: {:?}", report.leaked);
            }
        }
    }
    Ok(())
}

/// Creates or truncates the image and formats it.
fn init(image: &Path, blocks: usize) -> heartyfs::Result<()> {
    let config = FsConfig::default().with_block_count(blocks);
    config.validate()?;
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(image)?;
    let region = FileRegionBuilder::from(fd)
        .with_block_count(config.block_count)
        .build()?;
    HeartyFs::format(region, config)?;
    println!("formatted {:?} with {} blocks", image, blocks);
    Ok(())
}

/// Opens an existing image, sizing it from the file length.
fn open(image: &Path) -> heartyfs::Result<HeartyFs<FileRegion>> {
    let len = std::fs::metadata(image)?.len() as usize;
    if len % BLOCK_SIZE != 0 {
        return Err(FsError::CorruptImage(format!(
            "image length {} is not a multiple of {}",
            len, BLOCK_SIZE
        )));
    }
    let config = FsConfig::default().with_block_count(len / BLOCK_SIZE);
    let region = FileRegion::open(image, config.block_count)?;
    HeartyFs::open(region, config)
}
