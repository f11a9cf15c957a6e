use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use dmf_sync::acquire::{Credentials, Fetcher};
use dmf_sync::config::Cli;
use dmf_sync::engine::{Engine, LoadReport};
use dmf_sync::integrity;
use dmf_sync::logging;
use dmf_sync::report::LogReporter;
use dmf_sync::store::{MemoryStore, SqliteStore, Store};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process;

fn main() {
    let cli = Cli::try_parse().unwrap_or_else(|err| {
        let _ = err.print();
        process::exit(1);
    });
    let today = Local::now().date_naive();
    if let Err(err) = logging::init(cli.log_level(), &cli.log_dir, today) {
        eprintln!("could not open log file in {}: {}", cli.log_dir.display(), err);
        process::exit(1);
    }

    if let Err(err) = run(&cli, today) {
        log::error!("{:#}", err);
        process::exit(1);
    }
}

fn run(cli: &Cli, today: NaiveDate) -> Result<()> {
    let input = resolve_input(cli, today)?;
    log::info!("loading {}", input.display());

    let report = if cli.dry_run {
        load(MemoryStore::new(), &input, cli)?
    } else {
        let db = cli.database_path();
        let store = SqliteStore::open(&db)
            .with_context(|| format!("could not open database {}", db.display()))?;
        load(store, &input, cli)?
    };

    report
        .write_csv(std::io::stdout())
        .context("could not display summary")?;
    Ok(())
}

/// Finds the file to load and checks it against whatever checksum is known.
fn resolve_input(cli: &Cli, today: NaiveDate) -> Result<PathBuf> {
    if cli.update {
        if cli.md5.is_some() {
            log::warn!("--md5 is ignored in update mode");
        }
        let credentials = cli.user.clone().map(|user| Credentials {
            user,
            password: cli.password.clone(),
        });
        let fetcher = Fetcher::new(
            &cli.listing_url,
            credentials,
            cli.http_timeout(),
            cli.retries,
            cli.download_dir.clone(),
        )?;
        let acquired = fetcher.fetch_update(&cli.marker, today)?;
        integrity::verify_or_discard(&acquired.path, &acquired.checksum)?;
        return Ok(acquired.path);
    }

    let Some(path) = cli.file.clone() else {
        bail!("no input file given");
    };
    if !path.is_file() {
        bail!("{} does not exist", path.display());
    }
    let expected = match &cli.md5 {
        Some(sum) => Some(sum.clone()),
        None => integrity::read_sidecar(&path)
            .with_context(|| format!("could not read checksum for {}", path.display()))?,
    };
    match expected {
        Some(sum) => integrity::verify_or_discard(&path, &sum)?,
        None => log::warn!("no checksum known for {}, loading unverified", path.display()),
    }
    Ok(path)
}

fn load<S: Store>(mut store: S, input: &Path, cli: &Cli) -> Result<LoadReport> {
    let file = File::open(input).with_context(|| format!("could not open {}", input.display()))?;
    let mut reporter = match &cli.rejects {
        Some(path) => {
            let rejects = File::create(path)
                .with_context(|| format!("could not create {}", path.display()))?;
            LogReporter::with_rejects(Box::new(rejects))
        }
        None => LogReporter::new(),
    };

    let result = Engine::new(&mut store, &mut reporter, cli.commit_interval(), cli.policy())
        .process(BufReader::with_capacity(1 << 16, file));
    let closed = store.close();
    if let Err(err) = reporter.flush() {
        log::error!("could not write rejects: {}", err);
    }

    let report = result.with_context(|| format!("load of {} aborted", input.display()))?;
    closed.context("could not close the database")?;
    Ok(report)
}
