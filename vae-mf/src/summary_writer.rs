use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const SUMMARY_FILE: &str = "summary.tsv";

///
/// Append-only run summary: one `step \t tag \t value` line per
/// record in `{dir}/summary.tsv`. Records from earlier runs stay
/// in place.
///
pub struct SummaryWriter {
    path: PathBuf,
    buf: BufWriter<File>,
}

impl SummaryWriter {
    pub fn create<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(SUMMARY_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_new = file.metadata()?.len() == 0;
        let mut buf = BufWriter::new(file);
        if is_new {
            writeln!(buf, "step\ttag\tvalue")?;
        }
        Ok(Self { path, buf })
    }

    pub fn add_scalar(&mut self, step: usize, tag: &str, value: f32) -> anyhow::Result<()> {
        writeln!(self.buf, "{}\t{}\t{}", step, tag, value)?;
        Ok(())
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.buf.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
