use crate::search::alphabet::Alphabet;
use crate::search::db::{Database, Record};
use crate::search::kmerindex::KmerIndex;
use anyhow::{bail, Context, Result};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC_HEADER: u32 = 0x5544_4246; // "FBDU"
const MAGIC_HEADER_END: u32 = 0x5544_4266; // "fBDU"
const MAGIC_LISTS: u32 = 0x5544_4233; // "3BDU"
const MAGIC_SECOND: u32 = 0x5544_4234; // "4BDU"
const SENTINEL_A: u32 = 0x005e_0db3;
const SENTINEL_B: u32 = 0x005e_0db4;
const ALPHABET_NT: u32 = 0x0000_746e; // "nt"

/// Serialise the frozen database plus k-mer index, little-endian, in one
/// streaming pass. All offsets in the file are absolute positions.
pub fn write_udb(path: &Path, db: &Database, index: &KmerIndex) -> Result<()> {
    let file = std::fs::File::create(path).context(format!("creating {:?}", path))?;
    let mut w = BufWriter::new(file);

    let seqcount = db.len() as u32;
    let hashsize = index.hashsize();

    // 50-word header
    let mut header = [0u32; 50];
    header[0] = MAGIC_HEADER;
    header[2] = 32; // bits
    header[4] = index.wordlength() as u32;
    header[5] = 1; // dbstep
    header[6] = 100; // dbaccelpct
    header[13] = seqcount;
    header[17] = ALPHABET_NT;
    header[49] = MAGIC_HEADER_END;
    for word in header {
        w.write_all(&word.to_le_bytes())?;
    }

    // k-mer counts
    for &count in index.counts() {
        w.write_all(&count.to_le_bytes())?;
    }

    w.write_all(&MAGIC_LISTS.to_le_bytes())?;

    // record lists, bitmap-backed k-mers expanded
    for kmer in 0..hashsize as u32 {
        for seqno in index.expanded_list(kmer) {
            w.write_all(&seqno.to_le_bytes())?;
        }
    }

    // second header with 64-bit totals
    let header_chars: u64 = (0..db.len())
        .map(|i| db.header(i).len() as u64 + 1)
        .sum();
    let ntcount = db.total_symbols();
    w.write_all(&MAGIC_SECOND.to_le_bytes())?;
    w.write_all(&SENTINEL_A.to_le_bytes())?;
    w.write_all(&seqcount.to_le_bytes())?;
    w.write_all(&((ntcount & 0xffff_ffff) as u32).to_le_bytes())?;
    w.write_all(&((ntcount >> 32) as u32).to_le_bytes())?;
    w.write_all(&((header_chars & 0xffff_ffff) as u32).to_le_bytes())?;
    w.write_all(&((header_chars >> 32) as u32).to_le_bytes())?;
    w.write_all(&SENTINEL_B.to_le_bytes())?;

    // header offsets, then the zero-terminated headers themselves
    let mut sum = 0u32;
    for i in 0..db.len() {
        w.write_all(&sum.to_le_bytes())?;
        sum += db.header(i).len() as u32 + 1;
    }
    for i in 0..db.len() {
        w.write_all(db.header(i))?;
        w.write_all(&[0u8])?;
    }

    // sequence lengths, then the raw sequences
    for i in 0..db.len() {
        w.write_all(&(db.sequence_len(i) as u32).to_le_bytes())?;
    }
    for i in 0..db.len() {
        w.write_all(db.sequence(i))?;
    }

    w.flush()?;
    Ok(())
}

struct LeReader<R: Read> {
    inner: R,
}

impl<R: Read> LeReader<R> {
    fn u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.inner
            .read_exact(&mut b)
            .context("truncated UDB file")?;
        Ok(u32::from_le_bytes(b))
    }

    fn u64_pair(&mut self) -> Result<u64> {
        let lo = self.u32()? as u64;
        let hi = self.u32()? as u64;
        Ok(lo | (hi << 32))
    }

    fn bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.inner
            .read_exact(&mut buf)
            .context("truncated UDB file")?;
        Ok(buf)
    }
}

/// Check whether the file starts with the UDB magic.
pub fn detect_udb(path: &Path) -> Result<bool> {
    let mut file = std::fs::File::open(path).context(format!("opening {:?}", path))?;
    let mut probe = [0u8; 4];
    match file.read(&mut probe)? {
        4 => Ok(u32::from_le_bytes(probe) == MAGIC_HEADER),
        _ => Ok(false),
    }
}

/// Load a UDB file back into a database and its index.
pub fn read_udb(path: &Path) -> Result<(Database, KmerIndex)> {
    let file = std::fs::File::open(path).context(format!("opening {:?}", path))?;
    let mut r = LeReader {
        inner: BufReader::new(file),
    };

    let mut header = [0u32; 50];
    for word in header.iter_mut() {
        *word = r.u32()?;
    }
    if header[0] != MAGIC_HEADER || header[49] != MAGIC_HEADER_END {
        bail!("{:?} is not a UDB file", path);
    }
    if header[17] != ALPHABET_NT {
        bail!("unsupported UDB alphabet in {:?}", path);
    }
    let wordlength = header[4] as usize;
    if !(3..=15).contains(&wordlength) {
        bail!("invalid UDB word length {} in {:?}", wordlength, path);
    }
    let seqcount = header[13] as usize;
    let hashsize = 1usize << (2 * wordlength);

    let mut counts = vec![0u32; hashsize];
    for c in counts.iter_mut() {
        *c = r.u32()?;
    }

    if r.u32()? != MAGIC_LISTS {
        bail!("missing record-list section in {:?}", path);
    }
    let total: u64 = counts.iter().map(|&c| c as u64).sum();
    let mut lists = vec![0u32; total as usize];
    for x in lists.iter_mut() {
        *x = r.u32()?;
    }

    if r.u32()? != MAGIC_SECOND || r.u32()? != SENTINEL_A {
        bail!("missing second header in {:?}", path);
    }
    let seqcount2 = r.u32()? as usize;
    if seqcount2 != seqcount {
        bail!("inconsistent sequence counts in {:?}", path);
    }
    let ntcount = r.u64_pair()?;
    let header_chars = r.u64_pair()?;
    if r.u32()? != SENTINEL_B {
        bail!("missing second header sentinel in {:?}", path);
    }

    let mut offsets = vec![0u32; seqcount];
    for o in offsets.iter_mut() {
        *o = r.u32()?;
    }
    let header_blob = r.bytes(header_chars as usize)?;

    let mut lengths = vec![0u32; seqcount];
    for l in lengths.iter_mut() {
        *l = r.u32()?;
    }
    let total_nt: u64 = lengths.iter().map(|&l| l as u64).sum();
    if total_nt != ntcount {
        bail!("inconsistent nucleotide totals in {:?}", path);
    }

    let mut db = Database::new(Alphabet::Nucleotide);
    for i in 0..seqcount {
        let from = offsets[i] as usize;
        let to = header_blob[from..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| from + p)
            .context("unterminated header in UDB file")?;
        let header = header_blob[from..to].to_vec();
        let sequence = r.bytes(lengths[i] as usize)?;
        db.push(Record::new(header, sequence, None)?);
    }

    let index = KmerIndex::from_parts(wordlength, counts, lists, seqcount);
    Ok((db, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_of(seqs: &[(&str, &[u8])]) -> Database {
        let mut db = Database::new(Alphabet::Nucleotide);
        for (h, s) in seqs {
            db.push(Record::new(h.as_bytes().to_vec(), s.to_vec(), None).unwrap());
        }
        db
    }

    #[test]
    fn roundtrip_preserves_records_and_index() {
        let db = db_of(&[
            ("a;size=3;", b"ACGTACGTAA"),
            ("b", b"TTTTGGGCCC"),
            ("c", b"ACGTACGTAA"),
        ]);
        let index = KmerIndex::build(&db, 4, false);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.udb");
        write_udb(&path, &db, &index).unwrap();
        assert!(detect_udb(&path).unwrap());

        let (db2, index2) = read_udb(&path).unwrap();
        assert_eq!(db2.len(), db.len());
        for i in 0..db.len() {
            assert_eq!(db2.header(i), db.header(i));
            assert_eq!(db2.sequence(i), db.sequence(i));
            assert_eq!(db2.abundance(i), db.abundance(i));
        }
        for kmer in 0..index.hashsize() as u32 {
            assert_eq!(index2.matchcount(kmer), index.matchcount(kmer));
            assert_eq!(index2.matchlist(kmer), index.matchlist(kmer));
        }
    }

    #[test]
    fn rejects_non_udb_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.fa");
        std::fs::write(&path, b">a\nACGT\n").unwrap();
        assert!(!detect_udb(&path).unwrap());
        assert!(read_udb(&path).is_err());
    }
}
