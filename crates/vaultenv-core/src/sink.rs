//! Destinations for loaded secrets.
//!
//! A sink is opened once per `load_secrets` call. The file variant owns its
//! handle: `finish` flushes it, and dropping it on an error path still
//! flushes and closes whatever was written so far.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::OutputMode;
use crate::error::{Error, Result};

pub enum SecretSink {
    Env,
    File { path: PathBuf, writer: BufWriter<File> },
}

impl SecretSink {
    /// Open the sink for `mode`. A file destination is created or truncated.
    pub fn open(mode: &OutputMode) -> Result<Self> {
        match mode {
            OutputMode::Env => Ok(SecretSink::Env),
            OutputMode::File(path) => {
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::io(path, e))?;
                Ok(SecretSink::File {
                    path: path.clone(),
                    writer: BufWriter::new(file),
                })
            }
        }
    }

    /// Emit one pair. Values are written verbatim, no escaping.
    pub fn emit(&mut self, key: &str, value: &str) -> Result<()> {
        match self {
            SecretSink::Env => {
                check_env_entry(key, value)?;
                std::env::set_var(key, value);
                Ok(())
            }
            SecretSink::File { path, writer } => {
                writeln!(writer, "{}={}", key, value).map_err(|e| Error::io(path.as_path(), e))
            }
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            SecretSink::Env => None,
            SecretSink::File { path, .. } => Some(path),
        }
    }

    /// Flush and close.
    pub fn finish(self) -> Result<()> {
        match self {
            SecretSink::Env => Ok(()),
            SecretSink::File { path, mut writer } => {
                writer.flush().map_err(|e| Error::io(&path, e))?;
                writer
                    .get_ref()
                    .sync_all()
                    .map_err(|e| Error::io(&path, e))
            }
        }
    }
}

/// `set_var` panics on these, so reject them up front.
fn check_env_entry(key: &str, value: &str) -> Result<()> {
    let reason = if key.is_empty() {
        "empty name"
    } else if key.contains('=') {
        "name contains '='"
    } else if key.contains('\0') {
        "name contains NUL"
    } else if value.contains('\0') {
        "value contains NUL"
    } else {
        return Ok(());
    };
    Err(Error::InvalidEnvEntry {
        key: key.to_string(),
        reason,
    })
}
