use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use thiserror::Error;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

// os
#[cfg(not(windows))]
const TICK_SETTINGS: (&str, u64) = ("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ", 80);
#[cfg(windows)]
const TICK_SETTINGS: (&str, u64) = (r"+-x| ", 200);

/// return a pre-configured progress bar
pub fn get_progress_bar(length: u64, msg: &str) -> ProgressBar {
    let progressbar_style = ProgressStyle::default_spinner()
        .tick_chars(TICK_SETTINGS.0)
        .template(" {spinner} {msg:<30} {wide_bar} {pos}/{len} ETA {eta_precise} ")
        .unwrap_or_else(|_| ProgressStyle::default_bar());

    let progress_bar = ProgressBar::new(length);

    progress_bar.set_style(progressbar_style);
    progress_bar.enable_steady_tick(Duration::from_millis(TICK_SETTINGS.1));
    progress_bar.set_message(msg.to_owned());

    progress_bar
}

/// write any collection of lines to a file
pub fn write_collection(data: &[String], path: &Path) -> Result<(), CliError> {
    log::info!("Lines in {:?}: {}. Writing...", path, data.len());
    let mut writer = BufWriter::new(File::create(path)?);

    for line in data.iter() {
        writeln!(writer, "{}", line)?;
    }

    writer.flush()?;
    Ok(())
}

/// write a serializable descriptor as pretty json
pub fn write_descriptor<T: Serialize>(data: &T, path: &Path) -> Result<(), CliError> {
    log::info!("Writing descriptor to {:?}", path);
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, data)?;

    Ok(())
}

/// argument checker for quantification runs
pub trait ArgCheck {
    fn check(&self) -> Result<(), CliError> {
        self.validate_args()
    }

    fn validate_args(&self) -> Result<(), CliError> {
        self.check_dbs()?;

        match self.get_profile() {
            Some(profile) => validate_table(profile)?,
            None => log::warn!("No bias profile provided. Using uniform coverage..."),
        }

        Ok(())
    }

    fn check_dbs(&self) -> Result<(), CliError> {
        if self.get_annotation().is_empty() {
            let err = "No annotation files provided".to_string();
            return Err(CliError::InvalidInput(err));
        }
        for db in self.get_annotation() {
            validate(db)?;
        }

        validate(self.get_reads())?;

        Ok(())
    }

    fn get_annotation(&self) -> &Vec<PathBuf>;
    fn get_reads(&self) -> &PathBuf;
    fn get_profile(&self) -> Option<&PathBuf>;
}

/// error handling for CLI
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

/// true for .bed and .bed.gz paths
pub fn is_bed(arg: &Path) -> bool {
    match arg.extension() {
        Some(ext) if ext == "bed" => true,
        Some(ext) if ext == "gz" => arg
            .file_stem()
            .map(Path::new)
            .and_then(|stem| stem.extension())
            .is_some_and(|ext| ext == "bed"),
        _ => false,
    }
}

/// argument validation
pub fn validate(arg: &PathBuf) -> Result<(), CliError> {
    exists(arg)?;

    if !is_bed(arg) {
        return Err(CliError::InvalidInput(format!(
            "file {:?} is not a BED file",
            arg
        )));
    }

    non_empty(arg)
}

/// validation for plain tables (bias profiles)
pub fn validate_table(arg: &PathBuf) -> Result<(), CliError> {
    exists(arg)?;
    non_empty(arg)
}

fn exists(arg: &PathBuf) -> Result<(), CliError> {
    if !arg.exists() {
        return Err(CliError::InvalidInput(format!("{:?} does not exist", arg)));
    }

    if !arg.is_file() {
        return Err(CliError::InvalidInput(format!("{:?} is not a file", arg)));
    }

    Ok(())
}

fn non_empty(arg: &PathBuf) -> Result<(), CliError> {
    match std::fs::metadata(arg) {
        Ok(metadata) if metadata.len() == 0 => {
            Err(CliError::InvalidInput(format!("file {:?} is empty", arg)))
        }
        Ok(_) => Ok(()),
        Err(e) => Err(CliError::IoError(e)),
    }
}
