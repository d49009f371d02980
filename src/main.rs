use b1pack::archive::{add_path, Archive, FsWriterProvider};
use b1pack::explorer::ExplorerVisitor;
use b1pack::io_stream::DEFAULT_MAX_CHUNK_SIZE;
use b1pack::writer::{ArchiveWriter, Content, WriterOptions};
use b1pack::{CatalogEntry, EntryKind, PackError};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "b1", about = "The B1 multi-volume archive CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack files and directories into a B1 archive
    Pack {
        /// Archive path; `.b1` or `.partN.b1` is appended
        #[arg(short, long)]
        output: PathBuf,
        /// Maximum chunk size in KiB for streamed content
        #[arg(long, default_value_t = DEFAULT_MAX_CHUNK_SIZE / 1024)]
        chunk_size: usize,
        /// Split into volumes of roughly this many KiB
        #[arg(long)]
        volume_size: Option<u64>,
        /// `-` reads one streamed file named `stdin` from standard input
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
    /// Unpack a B1 archive
    Unpack {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// List archive contents
    List {
        input: PathBuf,
        /// Also hash every file's content with BLAKE3
        #[arg(long)]
        hash: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show archive metadata
    Info {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Write one file's content to standard output
    Cat {
        input: PathBuf,
        /// Entry path inside the archive, `/`-separated
        path:  String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_writer(io::stderr)
        .init();

    match Cli::parse().command {

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { output, chunk_size, volume_size, input } => {
            let options = WriterOptions {
                max_chunk_size: chunk_size.max(1) * 1024,
                max_volume_size: volume_size.map(|kib| kib.max(1) * 1024),
                ..WriterOptions::default()
            };
            let naming = FsWriterProvider::new(&output, options.max_volume_size.is_some());
            let mut writer = ArchiveWriter::new(naming.clone(), options);
            for path in &input {
                if path.as_os_str() == "-" {
                    writer.add_file(None, "stdin", None, Content::streamed(io::stdin().lock()))?;
                } else {
                    add_path(&mut writer, None, path)?;
                }
                println!("  packed  {}", path.display());
            }
            let written = writer.finish()?;
            for number in 1..=written.volumes.len() as u64 {
                println!("Created: {}", naming.path_for(number).display());
            }
        }

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { input, output_dir } => {
            let mut ar = Archive::open(&input)?;
            ar.extract_all(&output_dir)?;
            println!("Unpacked to: {}", output_dir.display());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, hash, json } => {
            let mut ar = Archive::open(&input)?;
            let hashes = if hash { hash_contents(&mut ar)? } else { HashMap::new() };
            let files = ar.list();

            if json {
                let rows: Vec<_> = files
                    .iter()
                    .map(|info| -> Result<serde_json::Value, serde_json::Error> {
                        let mut row = serde_json::to_value(info)?;
                        if let Some(digest) = hashes.get(&info.id) {
                            row["blake3"] = serde_json::Value::String(digest.clone());
                        }
                        Ok(row)
                    })
                    .collect::<Result<_, serde_json::Error>>()?;
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }

            println!("Archive: {}", input.display());
            println!("{:<40} {:>12}  {:<20}  BLAKE3", "Path", "Size", "Modified");
            for info in &files {
                let size = match info.kind {
                    EntryKind::File { size } => size.to_string(),
                    EntryKind::Folder        => "<dir>".into(),
                };
                let modified = info
                    .modified_utc()
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".into());
                let digest = hashes.get(&info.id).map(|h| &h[..16]).unwrap_or("-");
                println!("{:<40} {:>12}  {:<20}  {}", info.path, size, modified, digest);
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json } => {
            let ar = Archive::open(&input)?;
            let explorer = ar.explorer();
            let header = explorer.header_set().summary();
            let entries = explorer.entries();
            let files = entries.iter().filter(|e| e.is_file()).count();
            let content: u64 = entries.iter().filter_map(CatalogEntry::size).sum();

            if json {
                let value = serde_json::json!({
                    "volumes": ar.volume_paths(),
                    "header":  header,
                    "entries": entries.len(),
                    "files":   files,
                    "contentBytes": content,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
                return Ok(());
            }

            println!("── B1 Archive ───────────────────────────────────────────");
            println!("  Path            {}", input.display());
            println!("  Archive id      {}", header.archive_id.as_deref().unwrap_or("-"));
            println!("  Schema version  {}", header.version.map_or_else(|| "-".into(), |v| v.to_string()));
            println!("  Catalog         {}", explorer.catalog_pointer());
            println!("  Entries         {} ({files} files)", entries.len());
            println!("  Content         {content} B");
            println!("  Volumes ({}):", ar.volume_paths().len());
            for path in ar.volume_paths() {
                println!("    {}", path.display());
            }
        }

        // ── Cat ──────────────────────────────────────────────────────────────
        Commands::Cat { input, path } => {
            let mut ar = Archive::open(&input)?;
            let data = ar.read_file(&path)?;
            io::stdout().lock().write_all(&data)?;
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// BLAKE3 of every file, keyed by entry id.
fn hash_contents(ar: &mut Archive) -> Result<HashMap<u64, String>, PackError> {
    struct Hasher(HashMap<u64, String>);

    impl ExplorerVisitor for Hasher {
        fn visit_file(&mut self, entry: &CatalogEntry, content: &mut dyn Read) -> b1pack::Result<()> {
            let mut hasher = blake3::Hasher::new();
            io::copy(content, &mut hasher)?;
            self.0.insert(entry.id, hex::encode(hasher.finalize().as_bytes()));
            Ok(())
        }
    }

    let mut hasher = Hasher(HashMap::new());
    ar.explorer_mut().visit(&mut hasher)?;
    Ok(hasher.0)
}
