use std::path::Path;

use anyhow::{bail, Context};
use brigade_bucket::{BrigadeKind, BucketBrigade, FREED_FIELD};
use brigade_diff::{diff_sources, ReaderSource};
use brigade_object::{ObjectBrigade, ObjectConfig};
use brigade_state::ONCE_KEY;
use colored::Colorize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::cli::*;
use crate::{loaders, mule, settings};

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let base = settings::load(cli.config.as_deref())?;
    match cli.command {
        Command::LoadTsv(args) => cmd_load(&base, args, Format::Tsv).await,
        Command::LoadDump(args) => cmd_load(&base, args, Format::Dump).await,
        Command::Diff(args) => cmd_diff(&base, args).await,
        Command::Stat(args) => cmd_stat(&base, args).await,
        Command::Mule(args) => cmd_mule(&base, args).await,
    }
}

enum Format {
    Tsv,
    Dump,
}

async fn cmd_load(base: &ObjectConfig, args: LoadArgs, format: Format) -> anyhow::Result<()> {
    let config = settings::for_store(base, &args.db, args.data_dir.as_deref());
    let ob = ObjectBrigade::open(BrigadeKind::Store, config)
        .await
        .with_context(|| format!("opening store {}", args.db.display()))?;
    let stats = match format {
        Format::Tsv => loaders::load_tsv(&ob, &args.file).await?,
        Format::Dump => loaders::load_dump(&ob, &args.file).await?,
    };
    println!(
        "{} Loaded {} records from {} lines into {}",
        "✓".green().bold(),
        stats.loaded.to_string().bold(),
        stats.seen,
        args.db.display()
    );
    Ok(())
}

async fn cmd_diff(base: &ObjectConfig, args: DiffArgs) -> anyhow::Result<()> {
    let open = |dir: &Path, data_dir: Option<&Path>| {
        let mut config = settings::for_store(base, dir, data_dir);
        if args.permissive {
            config.brigade.strict_state = false;
        }
        let dir = dir.to_path_buf();
        async move {
            ObjectBrigade::open(BrigadeKind::Store, config)
                .await
                .with_context(|| format!("opening store {}", dir.display()))
        }
    };
    let prev = open(&args.prev, args.prev_data_dir.as_deref()).await?;
    let next = open(&args.next, args.next_data_dir.as_deref()).await?;

    let prev_reader = prev.reader("in0")?;
    let next_reader = next.reader("in1")?;
    prev_reader.seek(0).await?;
    next_reader.seek(0).await?;

    let summary = diff_sources(
        &mut ReaderSource::new(prev_reader),
        &mut ReaderSource::new(next_reader),
        |change| println!("{change}"),
    )
    .await?;

    eprintln!(
        "{} {} added, {} deleted, {} updated, {} unchanged",
        "✓".green().bold(),
        summary.added.to_string().green(),
        summary.deleted.to_string().red(),
        summary.updated.to_string().yellow(),
        summary.unchanged
    );
    Ok(())
}

async fn cmd_stat(base: &ObjectConfig, args: StatArgs) -> anyhow::Result<()> {
    let mut config = settings::for_store(base, &args.db, args.data_dir.as_deref()).brigade;
    if !config.state_path().exists() {
        bail!("no brigade ledger at {}", config.state_path().display());
    }
    config.strict_state = false;
    let kind = if args.queue { BrigadeKind::Queue } else { BrigadeKind::Store };
    let bb = BucketBrigade::open(kind, config).await?;

    let doc = bb.state().current();
    let shard = &bb.config().shard;
    println!("{} {} at {}", "Brigade".bold(), kind.to_string().cyan(), args.db.display());
    println!(
        "  Layout: width {}, depth {}, extension {:?}, capacity {}",
        shard.shard_width,
        shard.path_depth,
        shard.extension,
        bb.capacity()
    );
    println!(
        "  Output: pos {}{}",
        bb.write_position().to_string().bold(),
        if bb.is_closed() { " (closed)".yellow().to_string() } else { String::new() }
    );

    if let Some(sections) = doc.as_object() {
        for (key, section) in sections {
            if brigade_bucket::kind::is_reserved_key(key) {
                continue;
            }
            if let Some(pos) = section.get("pos").and_then(Value::as_u64) {
                match section.get(FREED_FIELD).and_then(Value::as_u64) {
                    Some(freed) if freed != pos => {
                        println!("  Reader {}: pos {}, files freed up to {}", key.yellow(), pos, freed)
                    }
                    _ => println!("  Reader {}: pos {}", key.yellow(), pos),
                }
            }
        }
    }
    if let Some(once) = doc.get(ONCE_KEY).and_then(Value::as_object) {
        for (tag, value) in once {
            println!("  Recorded {}: {}", tag, value);
        }
    }

    let root = bb.layout().root();
    let files = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .and_then(|rel| bb.layout().parse_name(rel))
                .is_some()
        })
        .count();
    println!("  Data files: {}", files.to_string().bold());
    Ok(())
}

async fn cmd_mule(base: &ObjectConfig, args: MuleArgs) -> anyhow::Result<()> {
    let kind = if args.queue { BrigadeKind::Queue } else { BrigadeKind::Store };
    if kind == BrigadeKind::Queue && args.mode == MuleMode::Seek {
        bail!("a queue cannot seek");
    }
    let config = settings::for_store(base, &args.db, None);
    let ob = ObjectBrigade::open(kind, config).await?;
    mule::run(&ob, args.mode, args.count).await?;
    println!("All done");
    Ok(())
}
