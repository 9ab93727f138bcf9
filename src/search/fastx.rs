use crate::search::alphabet::{classify, CharAction};
use crate::search::db::Record;
use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

const MAGIC_GZIP: [u8; 2] = [0x1f, 0x8b];
const MAGIC_BZIP: [u8; 2] = [0x42, 0x5a];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastxFormat {
    Fasta,
    Fastq,
}

/// FASTQ quality decoding parameters.
///
/// * `ascii_offset` – 33 or 64
/// * `qmin`/`qmax`  – inclusive window; scores outside it are fatal
#[derive(Debug, Clone, Copy)]
pub struct QualityParams {
    pub ascii_offset: u8,
    pub qmin: i32,
    pub qmax: i32,
}

impl Default for QualityParams {
    fn default() -> Self {
        QualityParams {
            ascii_offset: 33,
            qmin: 0,
            qmax: 41,
        }
    }
}

/// Streaming FASTA/FASTQ reader with gzip/bzip2 auto-detection.
///
/// Raw sequence bytes pass through the 256-entry classification table:
/// stripped bytes are counted per value and reported once at end of
/// stream, fatal bytes abort with the line number.
pub struct FastxReader {
    path: PathBuf,
    inner: Box<dyn BufRead + Send>,
    format: FastxFormat,
    quality: QualityParams,
    line: u64,
    strip_counts: Box<[u64; 256]>,
    finished: bool,
}

fn open_decoded(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    // peek the first two bytes on the plain file, then reopen through the
    // matching decompressor
    let mut probe = [0u8; 2];
    let mut f = File::open(path).context(format!("opening {:?}", path))?;
    let n = f.read(&mut probe).context(format!("reading {:?}", path))?;

    let inner: Box<dyn BufRead + Send> = if n == 2 && probe == MAGIC_GZIP {
        let f = File::open(path)?;
        Box::new(BufReader::new(flate2::read::MultiGzDecoder::new(f)))
    } else if n == 2 && probe == MAGIC_BZIP {
        let f = File::open(path)?;
        Box::new(BufReader::new(bzip2::read::MultiBzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(File::open(path)?))
    };
    Ok(inner)
}

impl FastxReader {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, QualityParams::default())
    }

    pub fn open_with(path: &Path, quality: QualityParams) -> Result<Self> {
        let mut inner = open_decoded(path)?;

        // the first significant byte decides the format
        let first = {
            let buf = inner.fill_buf().context(format!("reading {:?}", path))?;
            buf.first().copied()
        };
        let format = match first {
            Some(b'>') => FastxFormat::Fasta,
            Some(b'@') => FastxFormat::Fastq,
            Some(other) => bail!(
                "unrecognized file format in {:?}: expected '>' or '@', found '{}'",
                path,
                other as char
            ),
            None => FastxFormat::Fasta, // empty input yields zero records
        };

        Ok(FastxReader {
            path: path.to_path_buf(),
            inner,
            format,
            quality,
            line: 1,
            strip_counts: Box::new([0u64; 256]),
            finished: false,
        })
    }

    pub fn format(&self) -> FastxFormat {
        self.format
    }

    /// 1-based line number of the reader position.
    pub fn line(&self) -> u64 {
        self.line
    }

    fn read_line_raw(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        buf.clear();
        let n = self
            .inner
            .read_until(b'\n', buf)
            .context(format!("reading {:?}", self.path))?;
        if n > 0 {
            self.line += 1;
            while buf.last() == Some(&b'\n') || buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        Ok(n)
    }

    fn peek_byte(&mut self) -> Result<Option<u8>> {
        let buf = self.inner.fill_buf()?;
        Ok(buf.first().copied())
    }

    /// Filter one raw sequence line into canonical bytes.
    fn filter_sequence_line(&mut self, raw: &[u8], out: &mut Vec<u8>) -> Result<()> {
        for &b in raw {
            match classify(b) {
                CharAction::Accept => out.push(b),
                CharAction::Strip => self.strip_counts[b as usize] += 1,
                CharAction::Whitespace | CharAction::Newline => {}
                CharAction::Fatal => bail!(
                    "fatal character '{}' (0x{:02x}) on line {} of {:?}",
                    b as char,
                    b,
                    self.line - 1,
                    self.path
                ),
            }
        }
        Ok(())
    }

    fn next_fasta(&mut self) -> Result<Option<Record>> {
        let mut header = Vec::new();
        if self.read_line_raw(&mut header)? == 0 {
            return Ok(None);
        }
        if header.first() != Some(&b'>') {
            bail!(
                "expected '>' at line {} of {:?}",
                self.line - 1,
                self.path
            );
        }
        header.remove(0);

        let mut sequence = Vec::new();
        let mut raw = Vec::new();
        loop {
            match self.peek_byte()? {
                None | Some(b'>') => break,
                _ => {
                    if self.read_line_raw(&mut raw)? == 0 {
                        break;
                    }
                    let line = std::mem::take(&mut raw);
                    self.filter_sequence_line(&line, &mut sequence)?;
                    raw = line;
                }
            }
        }
        if sequence.is_empty() {
            bail!(
                "empty sequence for record ending at line {} of {:?}",
                self.line - 1,
                self.path
            );
        }
        Ok(Some(Record::new(header, sequence, None)?))
    }

    fn next_fastq(&mut self) -> Result<Option<Record>> {
        let mut header = Vec::new();
        if self.read_line_raw(&mut header)? == 0 {
            return Ok(None);
        }
        if header.first() != Some(&b'@') {
            bail!(
                "expected '@' at line {} of {:?}",
                self.line - 1,
                self.path
            );
        }
        header.remove(0);

        let mut sequence = Vec::new();
        let mut raw = Vec::new();
        loop {
            match self.peek_byte()? {
                Some(b'+') => break,
                None => bail!("truncated FASTQ record in {:?}", self.path),
                _ => {
                    if self.read_line_raw(&mut raw)? == 0 {
                        bail!("truncated FASTQ record in {:?}", self.path);
                    }
                    let line = std::mem::take(&mut raw);
                    self.filter_sequence_line(&line, &mut sequence)?;
                    raw = line;
                }
            }
        }

        // '+' separator, content ignored
        self.read_line_raw(&mut raw)?;

        let mut quality = Vec::with_capacity(sequence.len());
        while quality.len() < sequence.len() {
            if self.read_line_raw(&mut raw)? == 0 {
                bail!("truncated FASTQ quality in {:?}", self.path);
            }
            for &b in &raw {
                let q = b as i32 - self.quality.ascii_offset as i32;
                if q < self.quality.qmin || q > self.quality.qmax {
                    bail!(
                        "quality score {} out of range [{}..{}] on line {} of {:?}",
                        q,
                        self.quality.qmin,
                        self.quality.qmax,
                        self.line - 1,
                        self.path
                    );
                }
                quality.push(b);
            }
        }
        if quality.len() != sequence.len() {
            bail!(
                "sequence and quality length mismatch at line {} of {:?}",
                self.line - 1,
                self.path
            );
        }
        if sequence.is_empty() {
            bail!(
                "empty sequence for record ending at line {} of {:?}",
                self.line - 1,
                self.path
            );
        }
        Ok(Some(Record::new(header, sequence, Some(quality))?))
    }

    /// Pull the next record; `None` at clean end of stream, where the
    /// stripped-byte summary is logged once.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let rec = match self.format {
            FastxFormat::Fasta => self.next_fasta()?,
            FastxFormat::Fastq => self.next_fastq()?,
        };
        if rec.is_none() && !self.finished {
            self.finished = true;
            self.report_stripped();
        }
        Ok(rec)
    }

    fn report_stripped(&self) {
        for (value, &count) in self.strip_counts.iter().enumerate() {
            if count > 0 {
                log::warn!(
                    "stripped {} occurrence(s) of character '{}' (0x{:02x}) from {:?}",
                    count,
                    value as u8 as char,
                    value,
                    self.path
                );
            }
        }
    }

    /// Read everything that is left in the stream.
    pub fn read_all(&mut self) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        while let Some(rec) = self.next_record()? {
            out.push(rec);
        }
        Ok(out)
    }
}
