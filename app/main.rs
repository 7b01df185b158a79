use std::{
    fs::File,
    io::{stdout, Read, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use rcs::{
    checkin::CheckinOptions,
    checkout::PassThrough,
    config::StoreConfig,
    graph::ExpansionMode,
    hardlink::HardlinkTracker,
    locks::LogNotifier,
    outdate::Bounds,
    Result, RevisionGraph, RevisionId,
};
use serde::Serialize;

#[derive(Parser, Debug)]
struct Arguments {
    #[arg(long, default_value = "rcs.json", help = "store settings file")]
    config: PathBuf,
    #[arg(short, long, env = "USER", help = "user acting on the file")]
    user: String,
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[clap(about = "check a revision out")]
    Co {
        file: PathBuf,
        #[arg(short, long, help = "revision, branch or tag; default tip if absent")]
        rev: Option<String>,
        #[arg(short, long, help = "working file to write; stdout if absent")]
        output: Option<PathBuf>,
        #[arg(short = 'k', long, help = "keyword expansion mode (kv, kvl, k, v, o, b)")]
        mode: Option<String>,
        #[arg(short, long, help = "lock the revision checked out")]
        lock: bool,
    },
    #[clap(about = "print a revision with the origin of every line")]
    Annotate {
        file: PathBuf,
        #[arg(short, long)]
        rev: Option<String>,
    },
    #[clap(about = "record a new revision")]
    Ci {
        file: PathBuf,
        #[arg(short, long, help = "working file to record; stdin if absent")]
        input: Option<PathBuf>,
        #[arg(short, long, help = "message to leave with this revision")]
        message: String,
        #[arg(short, long, help = "revision or branch number for the new revision")]
        rev: Option<String>,
        #[arg(short, long, help = "keep a lock on the new revision")]
        lock: bool,
        #[arg(short, long)]
        state: Option<String>,
        #[arg(short, long, help = "YYYY.MM.DD.hh.mm.ss, default now")]
        date: Option<String>,
    },
    #[clap(about = "describe every revision as JSON")]
    Log { file: PathBuf },
    #[clap(about = "lock a revision")]
    Lock {
        file: PathBuf,
        #[arg(short, long)]
        rev: Option<String>,
    },
    #[clap(about = "release a lock")]
    Unlock {
        file: PathBuf,
        #[arg(short, long, help = "default: the one revision you have locked")]
        rev: Option<String>,
    },
    #[clap(about = "set or delete a tag")]
    Tag {
        file: PathBuf,
        name: String,
        #[arg(help = "revision to tag; default tip if absent")]
        rev: Option<String>,
        #[arg(short, long, help = "delete the tag instead")]
        delete: bool,
    },
    #[clap(about = "remove a run of revisions")]
    Outdate {
        file: PathBuf,
        from: String,
        to: String,
        #[arg(long, help = "keep the end points")]
        exclusive: bool,
    },
}

#[derive(Serialize, Debug)]
struct LogEntry {
    revision: String,
    date: String,
    author: String,
    state: String,
    next: Option<String>,
    branches: Vec<String>,
    tags: Vec<String>,
    locked_by: Option<String>,
    log: String,
}

fn log_entries(graph: &RevisionGraph) -> Result<Vec<LogEntry>> {
    let mut entries = Vec::new();
    for revision in graph.revisions() {
        entries.push(LogEntry {
            revision: revision.id.to_string(),
            date: revision.date.clone(),
            author: revision.author.clone(),
            state: revision.state.clone(),
            next: revision.next.as_ref().map(|n| n.to_string()),
            branches: revision.branches.iter().map(|b| b.to_string()).collect(),
            tags: graph
                .symbols_for(&revision.id)
                .into_iter()
                .map(String::from)
                .collect(),
            locked_by: graph.locks().holder(&revision.id).map(String::from),
            log: String::from_utf8_lossy(&graph.change_text(&revision.id)?.log).into_owned(),
        });
    }
    Ok(entries)
}

fn open(file: &Path) -> Result<RevisionGraph> {
    if file.exists() {
        RevisionGraph::open(file)
    } else {
        log::info!("{} does not exist yet, starting a new file", file.display());
        Ok(RevisionGraph::new())
    }
}

fn run(args: Arguments) -> Result<()> {
    let config = StoreConfig::load(&args.config)?;
    let user = args.user;
    use Command::*;
    match args.cmd {
        Co {
            file,
            rev,
            output,
            mode,
            lock,
        } => {
            let mode = mode.map(|m| m.parse::<ExpansionMode>()).transpose()?;
            let mut graph = RevisionGraph::open(&file)?;
            let id = match &output {
                Some(output) => {
                    let mut tracker = HardlinkTracker::default();
                    graph.checkout_file(
                        rev.as_deref(),
                        output,
                        mode,
                        &PassThrough,
                        config.hardlinks.then_some(&mut tracker),
                    )?
                }
                None => graph.checkout(rev.as_deref(), mode, &PassThrough, &mut stdout())?,
            };
            eprintln!("revision {}", id);
            if lock && graph.lock(&id, &user)? {
                graph.rewrite_with(&file, &config)?;
            }
        }
        Annotate { file, rev } => {
            let graph = RevisionGraph::open(&file)?;
            let mut out = stdout().lock();
            graph.write_annotations(rev.as_deref(), &mut out)?;
            out.flush()?;
        }
        Ci {
            file,
            input,
            message,
            rev,
            lock,
            state,
            date,
        } => {
            let mut content = Vec::new();
            match input {
                Some(input) => File::open(input)?.read_to_end(&mut content)?,
                None => std::io::stdin().read_to_end(&mut content)?,
            };
            let rev = rev.map(|r| r.parse::<RevisionId>()).transpose()?;
            let mut graph = open(&file)?;
            let options = CheckinOptions {
                date,
                state: state.or_else(|| Some(config.default_state.clone())),
                keep_lock: lock,
                ..CheckinOptions::new(user)
            };
            let id = graph.checkin(rev.as_ref(), &content, &message, &options)?;
            graph.rewrite_with(&file, &config)?;
            eprintln!("new revision: {}", id);
        }
        Log { file } => {
            let graph = RevisionGraph::open(&file)?;
            serde_json::to_writer_pretty(stdout(), &log_entries(&graph)?)?;
            println!();
        }
        Lock { file, rev } => {
            let mut graph = RevisionGraph::open(&file)?;
            let id = graph.resolve(rev.as_deref().unwrap_or(""))?;
            if graph.lock(&id, &user)? {
                graph.rewrite_with(&file, &config)?;
            }
            eprintln!("{} locked", id);
        }
        Unlock { file, rev } => {
            let mut graph = RevisionGraph::open(&file)?;
            let id = rev.map(|r| graph.resolve(&r)).transpose()?;
            match graph.unlock(id.as_ref(), &user, config.lock_break_policy, &LogNotifier)? {
                Some(lock) => {
                    graph.rewrite_with(&file, &config)?;
                    eprintln!("{} unlocked", lock.revision);
                }
                None => eprintln!("no lock to release"),
            }
        }
        Tag {
            file,
            name,
            rev,
            delete,
        } => {
            let mut graph = RevisionGraph::open(&file)?;
            if delete {
                if !graph.delete_tag(&name) {
                    eprintln!("no tag {}", name);
                    return Ok(());
                }
            } else {
                let id = graph.resolve(rev.as_deref().unwrap_or(""))?;
                graph.set_tag(&name, &id)?;
            }
            graph.rewrite_with(&file, &config)?;
        }
        Outdate {
            file,
            from,
            to,
            exclusive,
        } => {
            let mut graph = RevisionGraph::open(&file)?;
            let (from, to) = (graph.resolve(&from)?, graph.resolve(&to)?);
            let bounds = if exclusive {
                Bounds::Exclusive
            } else {
                Bounds::Inclusive
            };
            let gone = graph.delete_range(&from, &to, bounds)?;
            if !gone.is_empty() {
                graph.rewrite_with(&file, &config)?;
            }
            for id in gone {
                eprintln!("deleting revision {}", id);
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Arguments::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("revtool: {}", err);
            ExitCode::FAILURE
        }
    }
}
