use std::{
    fs,
    io::{self, BufWriter, Write},
    os::unix::fs::{FileTypeExt, MetadataExt},
    path::{Component, Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{debug, warn};

use ustar_stream::{ArchiveWriter, Content, EntryMetadata, EntryType, Options, DEFAULT_CHUNK_SIZE};

/// ustar-stream
#[derive(Debug, Parser)]
#[clap(name = "ustar-stream", version)]
pub struct App {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Args)]
struct Inputs {
    /// Files and directories to archive; directories are walked recursively
    #[clap(required = true)]
    paths: Vec<PathBuf>,
    /// Stamp every entry with this modification time (seconds since the epoch)
    #[clap(long)]
    mtime: Option<u64>,
    /// Record this uid instead of the on-disk owner
    #[clap(long)]
    owner_uid: Option<u32>,
    /// Record this gid instead of the on-disk group
    #[clap(long)]
    owner_gid: Option<u32>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Writes a tar archive of the given paths to a file or stdout
    Create {
        /// the output file (default: stdout)
        #[clap(short, long)]
        output: Option<PathBuf>,
        /// maximum number of content bytes read per chunk
        #[clap(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
        #[clap(flatten)]
        inputs: Inputs,
    },
    /// Prints the exact archive size without reading any file content
    Size {
        #[clap(flatten)]
        inputs: Inputs,
    },
}

/// Archive name for a path given on the command line: leading `/`, `.` and
/// `..` components are dropped.
fn archive_name(path: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        if let Component::Normal(part) = component {
            let Some(part) = part.to_str() else {
                bail!("Path is not valid UTF-8: {}", path.display());
            };
            parts.push(part);
        }
    }
    Ok(parts.join("/"))
}

fn join_name(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}/{child}")
    }
}

// glibc encoding of dev_t
fn dev_major(rdev: u64) -> u32 {
    (((rdev >> 32) & 0xffff_f000) | ((rdev >> 8) & 0x0000_0fff)) as u32
}

fn dev_minor(rdev: u64) -> u32 {
    (((rdev >> 12) & 0xffff_ff00) | (rdev & 0x0000_00ff)) as u32
}

fn add_path(writer: &mut ArchiveWriter, inputs: &Inputs, path: &Path, name: &str) -> Result<()> {
    let stat = fs::symlink_metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    let file_type = stat.file_type();

    let (meta, content) = if file_type.is_dir() {
        if !name.is_empty() {
            let meta = EntryMetadata::directory(format!("{name}/"));
            queue(writer, inputs, &stat, meta, Content::empty())?;
        }

        let mut children = fs::read_dir(path)
            .with_context(|| format!("Failed to read directory {}", path.display()))?
            .collect::<io::Result<Vec<_>>>()?;
        children.sort_by_key(|entry| entry.file_name());
        for child in children {
            let Some(child_name) = child.file_name().to_str().map(str::to_owned) else {
                bail!("Path is not valid UTF-8: {}", child.path().display());
            };
            add_path(writer, inputs, &child.path(), &join_name(name, &child_name))?;
        }
        return Ok(());
    } else if name.is_empty() {
        bail!("Cannot archive {} without a name", path.display());
    } else if file_type.is_file() {
        (
            EntryMetadata::file(name, stat.len()),
            Content::from_path(path),
        )
    } else if file_type.is_symlink() {
        let target = fs::read_link(path)
            .with_context(|| format!("Failed to read link {}", path.display()))?;
        let Some(target) = target.to_str() else {
            bail!("Link target is not valid UTF-8: {}", target.display());
        };
        (EntryMetadata::symlink(name, target), Content::empty())
    } else if file_type.is_fifo() {
        (EntryMetadata::fifo(name), Content::empty())
    } else if file_type.is_char_device() || file_type.is_block_device() {
        let entry_type = if file_type.is_char_device() {
            EntryType::Char
        } else {
            EntryType::Block
        };
        let rdev = stat.rdev();
        (
            EntryMetadata::device(name, entry_type, dev_major(rdev), dev_minor(rdev)),
            Content::empty(),
        )
    } else {
        warn!("Skipping {}: unsupported file type", path.display());
        return Ok(());
    };

    queue(writer, inputs, &stat, meta, content)
}

fn queue(
    writer: &mut ArchiveWriter,
    inputs: &Inputs,
    stat: &fs::Metadata,
    meta: EntryMetadata,
    content: Content,
) -> Result<()> {
    let mtime = writer
        .options()
        .default_mtime
        .unwrap_or_else(|| u64::try_from(stat.mtime()).unwrap_or(0));
    let meta = EntryMetadata {
        mode: stat.mode() & 0o7777,
        ..meta
    }
    .with_owner(
        inputs.owner_uid.unwrap_or(stat.uid()),
        inputs.owner_gid.unwrap_or(stat.gid()),
    )
    .with_mtime(mtime);

    debug!("adding {}", meta.name);
    let name = meta.name.clone();
    writer
        .append(meta, content)
        .with_context(|| format!("Failed to add {name}"))
}

fn build_writer(inputs: &Inputs, chunk_size: usize) -> Result<ArchiveWriter> {
    let mut writer = ArchiveWriter::with_options(Options {
        chunk_size,
        default_mtime: inputs.mtime,
    });
    for path in &inputs.paths {
        add_path(&mut writer, inputs, path, &archive_name(path)?)?;
    }
    writer.finalize();
    Ok(writer)
}

fn main() -> Result<()> {
    env_logger::init();

    let args = App::parse();

    match args.cmd {
        Command::Create {
            output,
            chunk_size,
            inputs,
        } => {
            let writer = build_writer(&inputs, chunk_size)?;
            let mut reader = writer.into_reader();
            let written = match output {
                Some(path) => {
                    let file = fs::File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    let mut out = BufWriter::new(file);
                    let written = io::copy(&mut reader, &mut out)?;
                    out.flush()?;
                    written
                }
                None => {
                    let mut out = io::stdout().lock();
                    let written = io::copy(&mut reader, &mut out)?;
                    out.flush()?;
                    written
                }
            };
            debug!("wrote {written} bytes");
        }
        Command::Size { inputs } => {
            let writer = build_writer(&inputs, DEFAULT_CHUNK_SIZE)?;
            let size = writer
                .archive_size()
                .context("Archive size unavailable after production started")?;
            println!("{size}");
        }
    }

    Ok(())
}
