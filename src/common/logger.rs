use std::{
  fs::{self, File, OpenOptions},
  io::{self, BufRead, BufReader, Write},
  path::{Path, PathBuf},
  sync::Arc,
};

use parking_lot::Mutex;
use tracing_subscriber::{
  EnvFilter,
  fmt::{
    self,
    time::{FormatTime, LocalTime},
  },
  prelude::*,
};

use crate::configs::{Config, LoggingConfig};

/// Builds the filter directive: `level[,filters]`.
fn filter_directive(logging: Option<&LoggingConfig>) -> String {
  let level = logging.and_then(|l| l.level.as_deref()).unwrap_or("info");
  match logging.and_then(|l| l.filters.as_deref()) {
    Some(filters) if !filters.is_empty() => format!("{},{}", level, filters),
    _ => level.to_string(),
  }
}

fn timer() -> impl FormatTime {
  LocalTime::new(time::macros::format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
  ))
}

/// Installs the global subscriber. `RUST_LOG` wins over the config.
/// Calling it twice is a no-op.
pub fn init(config: &Config) {
  let env_filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(filter_directive(config.logging.as_ref())));

  let stdout_layer = fmt::layer()
    .with_timer(timer())
    .with_target(true)
    .with_line_number(true)
    .with_file(false);

  let file_layer = config
    .logging
    .as_ref()
    .and_then(|l| l.file.as_ref())
    .map(|file_config| {
      if let Some(parent) = Path::new(&file_config.path).parent() {
        if let Err(e) = fs::create_dir_all(parent) {
          eprintln!("Failed to create log directory: {}", e);
        }
      }
      fmt::layer()
        .with_writer(RotatingLineWriter::new(&file_config.path, file_config.max_lines))
        .with_timer(timer())
        .with_target(true)
        .with_ansi(false)
    });

  let _ = tracing_subscriber::registry()
    .with(env_filter)
    .with(stdout_layer)
    .with(file_layer)
    .try_init();
}

/// Appends to a file and trims the head once it grows past `max_lines`.
#[derive(Clone)]
pub(crate) struct RotatingLineWriter {
  path: PathBuf,
  max_lines: u32,
  pending: Arc<Mutex<u32>>,
}

impl RotatingLineWriter {
  pub(crate) fn new(path: impl Into<PathBuf>, max_lines: u32) -> Self {
    Self {
      path: path.into(),
      max_lines: max_lines.max(1),
      pending: Arc::new(Mutex::new(0)),
    }
  }

  fn trim(&self) -> io::Result<()> {
    if !self.path.exists() {
      return Ok(());
    }

    let lines: Vec<String> = BufReader::new(File::open(&self.path)?)
      .lines()
      .collect::<Result<_, _>>()?;

    let max = self.max_lines as usize;
    if lines.len() > max {
      let mut file = File::create(&self.path)?;
      for line in &lines[lines.len() - max..] {
        writeln!(file, "{}", line)?;
      }
    }
    Ok(())
  }
}

impl io::Write for RotatingLineWriter {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)?
      .write_all(buf)?;

    let mut pending = self.pending.lock();
    *pending += buf.iter().filter(|&&b| b == b'\n').count() as u32;

    // trim every 10% of capacity, at least every 50 lines
    if *pending >= (self.max_lines / 10).max(50) {
      if let Err(e) = self.trim() {
        eprintln!("Failed to trim log file: {}", e);
      }
      *pending = 0;
    }

    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl<'a> fmt::MakeWriter<'a> for RotatingLineWriter {
  type Writer = Self;

  fn make_writer(&'a self) -> Self::Writer {
    self.clone()
  }
}
