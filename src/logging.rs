use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use env_logger::{Builder, Env, Target};
use log::Record;

use crate::writer::sibling_path;

/// `<stem>_omezarr.log` next to the input file.
pub fn convert_log_path(czi_path: &Path) -> PathBuf {
    sibling_path(czi_path, "_omezarr.log")
}

/// `<stem>_hcs_omezarr.log` next to the input file.
pub fn hcs_log_path(czi_path: &Path) -> PathBuf {
    sibling_path(czi_path, "_hcs_omezarr.log")
}

/// Writes every record to stderr and to a file.
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

/// `<timestamp> - <target> - <LEVEL> - <message>`
fn write_record(
    out: &mut impl Write,
    timestamp: impl Display,
    record: &Record,
) -> io::Result<()> {
    writeln!(
        out,
        "{} - {} - {} - {}",
        timestamp,
        record.target(),
        record.level(),
        record.args()
    )
}

/// Install the global logger.
///
/// The level defaults to `info` and can be changed through `RUST_LOG`. If a logger
/// is already installed it is kept.
pub fn init(log_file: Option<&Path>) -> crate::Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        let timestamp = buf.timestamp_millis();
        write_record(buf, timestamp, record)
    });
    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(Tee { file })));
    }
    if let Err(e) = builder.try_init() {
        log::debug!("keeping the installed logger: {e}");
        return Ok(());
    }
    if let Some(path) = log_file {
        log::info!("logging to {}", path.display());
    }
    Ok(())
}
