use chrono::NaiveDate;
use env_logger::{Builder, Env, Target};
use log::LevelFilter;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Copies everything written to stderr into the run's log file as well.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

pub fn log_file_path(dir: &Path, today: NaiveDate) -> PathBuf {
    dir.join(format!("dmf-sync-{}.log", today.format("%Y%m%d")))
}

/// Installs the global logger once per process. `RUST_LOG` still wins over
/// `level` when set.
pub fn init(level: LevelFilter, dir: &Path, today: NaiveDate) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = log_file_path(dir, today);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    Builder::from_env(Env::default().default_filter_or(level.as_str()))
        .target(Target::Pipe(Box::new(Tee { file })))
        .init();
    Ok(path)
}
