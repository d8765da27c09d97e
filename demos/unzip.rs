use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use anyhow::*;
use log::*;
use memmap2::Mmap;
use rayon::prelude::*;
use structopt::*;

use pagezip::*;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "unzip",
    about = "Dumps the pages of a .zip/.cbz or .rar/.cbr file into the current directory"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Write pages into this directory instead of the current one.
    #[structopt(short = "C", long)]
    directory: Option<PathBuf>,

    /// Lists the files in the archive, in page order, instead of extracting them.
    #[structopt(short = "n", long)]
    dry_run: bool,

    /// Accept stored or DEFLATEd ZIP entries from any version up to 2.0.
    #[structopt(long)]
    lenient: bool,

    #[structopt(name("archive"))]
    archive_path: PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    info!("Memory mapping {:#?}", &args.archive_path);
    let archive_file = File::open(&args.archive_path).context("Couldn't open archive")?;
    let mapping = unsafe { Mmap::map(&archive_file).context("Couldn't mmap archive")? };

    if let Some(out_dir) = args.directory {
        std::env::set_current_dir(&out_dir)
            .with_context(|| format!("Couldn't move into {}", out_dir.display()))?;
    }

    if args.dry_run {
        return print_listing(&mapping);
    }

    let options = DecodeOptions {
        strict_versions: !args.lenient,
        ..DecodeOptions::default()
    };
    let mut last_percent = None;
    let progress = decode_with(&mapping, &options, |progress| {
        let percent = (progress.fraction_done() * 100.0) as u32;
        if last_percent != Some(percent) {
            info!(
                "{}% ({} of {} files)",
                percent,
                progress.entries.len(),
                progress.total_entries
            );
            last_percent = Some(percent);
        }
    })
    .map_err(|failure| failure.into_owned())
    .context("Couldn't decode archive")?;

    for entry in progress.entries.iter().filter(|e| !e.is_valid()) {
        if let Some(e) = &entry.error {
            warn!("Skipping {}: {}", entry.path, e);
        }
    }
    write_entries(&progress)
}

fn print_listing(archive: &[u8]) -> Result<()> {
    if archive.starts_with(b"PK") {
        for entry in read::scan(archive)? {
            println!(
                "{} ({:?}, {} bytes)",
                entry.path, entry.compression_method, entry.size
            );
        }
    } else {
        // RAR archives are only listed as a side effect of decoding.
        let progress = decode(archive).map_err(|failure| failure.into_owned())?;
        for entry in &progress.entries {
            println!(
                "{} ({:?}, {} bytes)",
                entry.path, entry.compression_method, entry.size
            );
        }
    }
    Ok(())
}

fn write_entries(progress: &Progress) -> Result<()> {
    for entry in progress.valid_entries().filter(|e| !e.is_contained()) {
        warn!("Skipping {}: it would land outside the output directory", entry.path);
    }
    progress
        .valid_entries()
        .filter(|e| e.is_contained())
        .par_bridge()
        .try_for_each(|entry| {
            let page = entry.data.as_deref().unwrap_or_default();
            match entry.path.parent() {
                Some(dir) if !dir.as_str().is_empty() => fs::create_dir_all(dir)
                    .with_context(|| format!("Couldn't make {}", dir))?,
                _ => {}
            }
            File::create(&*entry.path)
                .and_then(|mut out| out.write_all(page))
                .with_context(|| format!("Couldn't write {}", entry.path))
        })
}
