use crate::search::db::Record;
use anyhow::{bail, Context, Result};
use std::io::Read;
use std::path::Path;

const SFF_MAGIC: u32 = 0x2e736666; // ".sff"
const SFF_VERSION: u32 = 1;

/// Options for SFF import.
///
/// * `clip` – honour the quality/adapter clip points instead of keeping
///   the full read
/// * `ascii_offset` – offset used when remapping quality scores to FASTQ
#[derive(Debug, Clone, Copy)]
pub struct SffParams {
    pub clip: bool,
    pub ascii_offset: u8,
    pub qmax: u8,
}

impl Default for SffParams {
    fn default() -> Self {
        SffParams {
            clip: false,
            ascii_offset: 33,
            qmax: 41,
        }
    }
}

struct BeReader<R: Read> {
    inner: R,
    consumed: u64,
}

impl<R: Read> BeReader<R> {
    fn new(inner: R) -> Self {
        BeReader { inner, consumed: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.inner
            .read_exact(&mut buf)
            .context("truncated SFF file")?;
        self.consumed += n as u64;
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.bytes(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Skip to the next 8-byte boundary.
    fn pad8(&mut self) -> Result<()> {
        let rem = (self.consumed % 8) as usize;
        if rem != 0 {
            let pad = self.bytes(8 - rem)?;
            if pad.iter().any(|&b| b != 0) {
                bail!("non-zero padding in SFF file");
            }
        }
        Ok(())
    }
}

/// Import a Standard Flowgram Format file as a list of records with
/// FASTQ-style quality strings.
pub fn read_sff(path: &Path, params: SffParams) -> Result<Vec<Record>> {
    let file = std::fs::File::open(path).context(format!("opening {:?}", path))?;
    let mut r = BeReader::new(std::io::BufReader::new(file));

    // common header, big-endian throughout
    let magic = r.u32()?;
    if magic != SFF_MAGIC {
        bail!("{:?} is not an SFF file (bad magic)", path);
    }
    let version = r.u32()?;
    if version != SFF_VERSION {
        bail!("unsupported SFF version {} in {:?}", version, path);
    }
    let _index_offset = r.u64()?;
    let _index_length = r.u32()?;
    let read_count = r.u32()?;
    let header_length = r.u16()?;
    let key_length = r.u16()?;
    let flow_count = r.u16()?;
    let flowgram_format = r.u8()?;
    if flowgram_format != 1 {
        bail!(
            "unsupported SFF flowgram format code {} in {:?}",
            flowgram_format,
            path
        );
    }

    let _flow_chars = r.bytes(flow_count as usize)?;
    let _key = r.bytes(key_length as usize)?;
    r.pad8()?;
    if r.consumed != header_length as u64 {
        bail!("inconsistent SFF common header length in {:?}", path);
    }

    let mut out = Vec::with_capacity(read_count as usize);

    for _ in 0..read_count {
        let read_header_start = r.consumed;
        let read_header_length = r.u16()?;
        let name_length = r.u16()?;
        let base_count = r.u32()? as usize;
        let clip_qual_left = r.u16()? as usize;
        let clip_qual_right = r.u16()? as usize;
        let clip_adapter_left = r.u16()? as usize;
        let clip_adapter_right = r.u16()? as usize;
        let name = r.bytes(name_length as usize)?;
        r.pad8()?;
        if r.consumed - read_header_start != read_header_length as u64 {
            bail!("inconsistent SFF read header length in {:?}", path);
        }

        let _flowgram = r.bytes(2 * flow_count as usize)?;
        let _flow_index = r.bytes(base_count)?;
        let bases = r.bytes(base_count)?;
        let scores = r.bytes(base_count)?;
        r.pad8()?;

        // clip window: 1-based inclusive, zero meaning "no clip point"
        let (from, to) = if params.clip {
            let left = clip_qual_left.max(clip_adapter_left).max(1) - 1;
            let right_qual = if clip_qual_right == 0 {
                base_count
            } else {
                clip_qual_right
            };
            let right_adapter = if clip_adapter_right == 0 {
                base_count
            } else {
                clip_adapter_right
            };
            (left.min(base_count), right_qual.min(right_adapter).min(base_count))
        } else {
            (0, base_count)
        };
        if from >= to {
            continue; // read fully clipped away
        }

        let sequence: Vec<u8> = bases[from..to]
            .iter()
            .map(|b| b.to_ascii_uppercase())
            .collect();
        let quality: Vec<u8> = scores[from..to]
            .iter()
            .map(|&q| q.min(params.qmax) + params.ascii_offset)
            .collect();

        out.push(Record::new(name, sequence, Some(quality))?);
    }

    Ok(out)
}
