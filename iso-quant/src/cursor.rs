use std::fmt::Debug;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use anyhow::{anyhow, Result};
use hashbrown::HashSet;
use log::warn;
use packbed::{open, Bed12, GenePred};

/// Forward-only cursor over coordinate-sorted BED12 alignments.
///
/// Yields an error, and stops, as soon as the input turns out unsorted:
/// a start decreasing within a chromosome, or a chromosome resuming after
/// another one began.
pub struct ReadCursor<R: BufRead> {
    lines: Lines<R>,
    current: Option<(String, u64)>,
    finished: HashSet<String>,
    line_no: usize,
    pub skipped: usize,
    failed: bool,
}

impl ReadCursor<BufReader<Box<dyn std::io::Read + Send>>> {
    pub fn from_path<P: AsRef<Path> + Debug>(path: P) -> Result<Self> {
        Ok(Self::new(BufReader::new(open(path)?)))
    }
}

impl<R: BufRead> ReadCursor<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            current: None,
            finished: HashSet::new(),
            line_no: 0,
            skipped: 0,
            failed: false,
        }
    }

    fn check_order(&mut self, read: &GenePred) -> Result<()> {
        if let Some((chrom, start)) = self.current.as_mut().filter(|(c, _)| *c == read.chrom) {
            if read.start < *start {
                return Err(anyhow!(
                    "Unsorted reads at line {}: {}:{} after {}:{}",
                    self.line_no,
                    read.chrom,
                    read.start,
                    chrom,
                    start
                ));
            }

            *start = read.start;
            return Ok(());
        }

        if self.finished.contains(&read.chrom) {
            return Err(anyhow!(
                "Unsorted reads at line {}: chromosome {} appears again",
                self.line_no,
                read.chrom
            ));
        }

        if let Some((chrom, _)) = self.current.take() {
            self.finished.insert(chrom);
        }
        self.current = Some((read.chrom.clone(), read.start));

        Ok(())
    }
}

impl<R: BufRead> Iterator for ReadCursor<R> {
    type Item = Result<GenePred>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e.into()));
                }
            };
            self.line_no += 1;

            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }

            let read = match Bed12::read(&line, false) {
                Ok(read) => read,
                Err(e) => {
                    warn!("Skipping malformed read at line {} ({})", self.line_no, e);
                    self.skipped += 1;
                    continue;
                }
            };

            if let Err(e) = self.check_order(&read) {
                self.failed = true;
                return Some(Err(e));
            }

            return Some(Ok(read));
        }
    }
}
