// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use datapin::{
    config::{Config, RemoteSettings},
    path::{find_project_root, DATAPIN_DIR},
    pointer::{is_pointer_path, pointer_path_for},
    remote::RemoteStore,
    PointerFile, Status, Tracker,
};

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    collections::BTreeSet,
    env, fs,
    path::{Path, PathBuf},
    process::exit,
    time::Duration,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "datapin [options] <datapin-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Init(opts) => run_init(opts),
            Command::Add(opts) => run_add(opts),
            Command::Status(opts) => run_status(opts),
            Command::Checkout(opts) => run_checkout(opts),
            Command::Push(opts) => run_push(opts),
            Command::Fetch(opts) => run_fetch(opts),
            Command::Pull(opts) => run_pull(opts),
            Command::Remote(opts) => run_remote(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Initialize new project in current directory.
    #[command(override_usage = "datapin init [options]")]
    Init(InitOptions),

    /// Track data files by content.
    #[command(override_usage = "datapin add [options] <path|glob>...")]
    Add(AddOptions),

    /// Show whether working files match their pointers.
    #[command(override_usage = "datapin status [options] [<pointer>]...")]
    Status(PointerOptions),

    /// Materialize working files from their pointers.
    #[command(override_usage = "datapin checkout [options] [<pointer>]...")]
    Checkout(PointerOptions),

    /// Upload blobs referenced by pointers to remote.
    #[command(override_usage = "datapin push [options]")]
    Push(TransferOptions),

    /// Download blobs referenced by pointers from remote.
    #[command(override_usage = "datapin fetch [options]")]
    Fetch(TransferOptions),

    /// Fetch from remote, then checkout every pointer.
    #[command(override_usage = "datapin pull [options]")]
    Pull(TransferOptions),

    /// Manage remote stores.
    #[command(subcommand)]
    Remote(RemoteCommand),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Directory to initialize instead of the current one.
    #[arg(short, long, value_name = "path")]
    pub path: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct AddOptions {
    /// Paths or glob patterns of working files to track.
    #[arg(required = true, value_name = "path|glob")]
    pub paths: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PointerOptions {
    /// Pointer files or their working paths. Every pointer when omitted.
    #[arg(value_name = "pointer")]
    pub pointers: Vec<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct TransferOptions {
    /// Name of remote to use instead of the default one.
    #[arg(short, long, value_name = "remote")]
    pub remote: Option<String>,
}

#[derive(Debug, Clone, Subcommand)]
enum RemoteCommand {
    /// Register new remote store.
    #[command(override_usage = "datapin remote add [options] <name> <url>")]
    Add(RemoteAddOptions),

    /// List registered remote stores.
    #[command(override_usage = "datapin remote list")]
    List,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RemoteAddOptions {
    /// Name of remote.
    #[arg(required = true, value_name = "name")]
    pub name: String,

    /// Location of remote store.
    #[arg(required = true, value_name = "url")]
    pub url: String,

    /// Make this the default remote.
    #[arg(short, long)]
    pub default: bool,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

struct Project {
    root: PathBuf,
    config: Config,
    tracker: Tracker,
}

impl Project {
    fn open() -> Result<Self> {
        let cwd = env::current_dir()?;
        let root = find_project_root(&cwd)
            .ok_or_else(|| anyhow!("{:?} is not inside a datapin project", cwd.display()))?;
        let config = Config::load(&root)?;
        let tracker = Tracker::open(&root, &config);

        Ok(Self {
            root,
            config,
            tracker,
        })
    }

    fn remote(&self, name: Option<&str>) -> Result<RemoteStore> {
        Ok(RemoteStore::from_config(&self.config, name, &self.root)?)
    }

    fn pointers(&self, args: &[PathBuf]) -> Result<Vec<PointerFile>> {
        if args.is_empty() {
            return Ok(self.tracker.pointers()?);
        }

        let cwd = env::current_dir()?;
        args.iter()
            .map(|arg| {
                let path = cwd.join(arg);
                let path = if is_pointer_path(&path) {
                    path
                } else {
                    pointer_path_for(path)
                };
                Ok(PointerFile::load(path)?)
            })
            .collect()
    }
}

fn spinner(message: impl Into<String>) -> Result<ProgressBar> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner:.yellow} {elapsed:.green}  {msg}")?);
    bar.set_message(message.into());
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

fn run_init(opts: InitOptions) -> Result<()> {
    let root = match opts.path {
        Some(path) => path,
        None => env::current_dir()?,
    };
    let config = Config::default();
    fs::create_dir_all(root.join(DATAPIN_DIR))?;
    fs::create_dir_all(config.store_dir(&root))?;

    // INVARIANT: Never clobber existing project configuration.
    if Config::project_path(&root).exists() {
        warn!("reinitialize existing project at {:?}", root.display());
    } else {
        config.save(&root)?;
        fs::write(root.join(DATAPIN_DIR).join(".gitignore"), "/cache\n")?;
        info!("initialize project at {:?}", root.display());
    }

    Ok(())
}

fn run_add(opts: AddOptions) -> Result<()> {
    let project = Project::open()?;
    let cwd = env::current_dir()?;

    for target in resolve_targets(&cwd, &opts.paths)? {
        let pointer = project.tracker.add(&target)?;
        println!("{}  {}", pointer.digest, pointer.path.display());
    }

    Ok(())
}

/// Expand paths and glob patterns into working files to track.
///
/// Literal paths are passed through as is, so a missing file or directory
/// is reported by the tracker. Glob matches that are directories or pointer
/// files are skipped, but a pattern left with nothing to track is an error.
fn resolve_targets(cwd: &Path, patterns: &[String]) -> Result<BTreeSet<PathBuf>> {
    let mut targets = BTreeSet::new();
    for pattern in patterns {
        let path = cwd.join(pattern);
        if is_pointer_path(&path) {
            bail!("{pattern:?} is a pointer file, add its working file instead");
        }

        if !pattern.contains(['*', '?', '[']) {
            targets.insert(path);
            continue;
        }

        let mut matched = 0;
        for entry in glob::glob(&path.to_string_lossy())? {
            let entry = entry?;
            if entry.is_dir() || is_pointer_path(&entry) {
                debug!("skip {:?} matched by {pattern:?}", entry.display());
                continue;
            }
            targets.insert(entry);
            matched += 1;
        }

        if matched == 0 {
            bail!("{pattern:?} matched no files to track");
        }
    }

    Ok(targets)
}

fn run_status(opts: PointerOptions) -> Result<()> {
    let project = Project::open()?;
    for pointer in project.pointers(&opts.pointers)? {
        let label = match project.tracker.status(&pointer.path, &pointer)? {
            Status::Clean => "clean",
            Status::Modified => "modified",
            Status::Missing => "missing",
        };
        println!("{label:<10}{}", pointer.path.display());
    }

    Ok(())
}

fn run_checkout(opts: PointerOptions) -> Result<()> {
    let project = Project::open()?;
    for pointer in project.pointers(&opts.pointers)? {
        project.tracker.checkout(&pointer)?;
    }

    Ok(())
}

fn run_push(opts: TransferOptions) -> Result<()> {
    let project = Project::open()?;
    let remote = project.remote(opts.remote.as_deref())?;
    let pointers = project.pointers(&[])?;

    let bar = spinner(format!("push to {}", remote.name()))?;
    let result = project.tracker.push(&pointers, &remote);
    bar.finish_and_clear();

    info!("pushed {} blobs to {:?}", result?.len(), remote.name());
    Ok(())
}

fn run_fetch(opts: TransferOptions) -> Result<()> {
    let project = Project::open()?;
    let remote = project.remote(opts.remote.as_deref())?;
    let pointers = project.pointers(&[])?;

    let bar = spinner(format!("fetch from {}", remote.name()))?;
    let result = project.tracker.fetch(&pointers, &remote);
    bar.finish_and_clear();

    info!("fetched {} blobs from {:?}", result?.len(), remote.name());
    Ok(())
}

fn run_pull(opts: TransferOptions) -> Result<()> {
    let project = Project::open()?;
    let remote = project.remote(opts.remote.as_deref())?;
    let pointers = project.pointers(&[])?;

    let bar = spinner(format!("pull from {}", remote.name()))?;
    let result = project.tracker.pull(&pointers, &remote);
    bar.finish_and_clear();

    info!("pulled {} blobs from {:?}", result?.len(), remote.name());
    Ok(())
}

fn run_remote(opts: RemoteCommand) -> Result<()> {
    match opts {
        RemoteCommand::Add(opts) => run_remote_add(opts),
        RemoteCommand::List => run_remote_list(),
    }
}

fn run_remote_add(opts: RemoteAddOptions) -> Result<()> {
    let project = Project::open()?;

    // INVARIANT: Only touch project configuration, never merged user values.
    let mut config = Config::load_file(Config::project_path(&project.root))?.unwrap_or_default();
    config
        .remote
        .insert(opts.name.clone(), RemoteSettings { url: opts.url });
    if opts.default {
        config.core.remote = Some(opts.name.clone());
    }
    config.save(&project.root)?;

    info!("add remote {:?}", opts.name);
    Ok(())
}

fn run_remote_list() -> Result<()> {
    let project = Project::open()?;
    let default = project.config.core.remote.as_deref();
    for (name, settings) in &project.config.remote {
        let marker = if Some(name.as_str()) == default { "*" } else { " " };
        println!("{marker} {name:<16}{}", settings.url);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn setup_tree() -> anyhow::Result<TempDir> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("data/raw"))?;
        fs::write(dir.path().join("data/a.csv"), "a")?;
        fs::write(dir.path().join("data/b.csv"), "b")?;
        fs::write(dir.path().join("data/a.csv.ptr"), "")?;
        Ok(dir)
    }

    #[test]
    fn resolve_glob_skips_pointers_and_directories() -> anyhow::Result<()> {
        let dir = setup_tree()?;
        let result = resolve_targets(dir.path(), &["data/*".into()])?;
        let expect = BTreeSet::from([dir.path().join("data/a.csv"), dir.path().join("data/b.csv")]);
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn resolve_passes_literal_paths_through() -> anyhow::Result<()> {
        let dir = setup_tree()?;
        let result = resolve_targets(dir.path(), &["data".into(), "missing.csv".into()])?;
        let expect = BTreeSet::from([dir.path().join("data"), dir.path().join("missing.csv")]);
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn resolve_rejects_pointer_files() -> anyhow::Result<()> {
        let dir = setup_tree()?;
        assert!(resolve_targets(dir.path(), &["data/a.csv.ptr".into()]).is_err());

        Ok(())
    }

    #[test]
    fn resolve_rejects_glob_with_nothing_to_track() -> anyhow::Result<()> {
        let dir = setup_tree()?;
        assert!(resolve_targets(dir.path(), &["data/r*".into()]).is_err());
        assert!(resolve_targets(dir.path(), &["*.parquet".into()]).is_err());

        Ok(())
    }
}
