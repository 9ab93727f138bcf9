use crate::search::alphabet::{normalize, seq_identical};
use crate::search::bitmap::Bitmap;
use crate::search::db::Database;
use crate::search::hits::{align_trim, hit_compare, Hit, Strand};
use crate::search::scorematrix::ScoreMatrix;
use fxhash::hash64;

#[derive(Debug, Clone, Copy, Default)]
struct HashBucket {
    hash: u64,
    seqno: u32,
}

/// Open-addressed hash of normalized database sequences.
///
/// Sized for a 2/3 maximum fill rate; occupancy lives in a separate
/// bitmap so a zeroed bucket array needs no sentinel values. Duplicate
/// sequences occupy consecutive probe positions and are all returned.
pub struct SeqHash {
    mask: u64,
    occupied: Bitmap,
    buckets: Vec<HashBucket>,
}

/// Probe cursor for walking all duplicates of one query.
pub struct SeqHashCursor {
    hash: u64,
    index: u64,
    normalized: Vec<u8>,
}

impl SeqHash {
    /// Hash every database sequence.
    pub fn build(db: &Database) -> Self {
        let mut size = 1u64;
        while 3 * db.len() as u64 > 2 * size {
            size <<= 1;
        }
        let mut h = SeqHash {
            mask: size - 1,
            occupied: Bitmap::new(size as usize),
            buckets: vec![HashBucket::default(); size as usize],
        };
        for seqno in 0..db.len() {
            h.add(db, seqno as u32);
        }
        h
    }

    fn add(&mut self, db: &Database, seqno: u32) {
        let normalized = normalize(db.sequence(seqno as usize));
        let hash = hash64(&normalized);
        let mut index = hash & self.mask;
        while self.occupied.get(index as usize) {
            index = (index + 1) & self.mask;
        }
        self.occupied.set(index as usize);
        self.buckets[index as usize] = HashBucket { hash, seqno };
    }

    fn matches(&self, db: &Database, index: u64, cursor: &SeqHashCursor) -> bool {
        let b = &self.buckets[index as usize];
        b.hash == cursor.hash
            && db.sequence_len(b.seqno as usize) == cursor.normalized.len()
            && seq_identical(
                db.sequence(b.seqno as usize),
                &cursor.normalized,
                cursor.normalized.len(),
            )
    }

    /// First database record whose sequence equals `seq` (up to case and
    /// T/U spelling), with a cursor for the remaining duplicates.
    pub fn search_first(&self, db: &Database, seq: &[u8]) -> (Option<u32>, SeqHashCursor) {
        let normalized = normalize(seq);
        let hash = hash64(&normalized);
        let mut cursor = SeqHashCursor {
            hash,
            index: hash & self.mask,
            normalized,
        };
        loop {
            if !self.occupied.get(cursor.index as usize) {
                return (None, cursor);
            }
            if self.matches(db, cursor.index, &cursor) {
                return (Some(self.buckets[cursor.index as usize].seqno), cursor);
            }
            cursor.index = (cursor.index + 1) & self.mask;
        }
    }

    /// Next duplicate after a successful `search_first`/`search_next`.
    pub fn search_next(&self, db: &Database, cursor: &mut SeqHashCursor) -> Option<u32> {
        loop {
            cursor.index = (cursor.index + 1) & self.mask;
            if !self.occupied.get(cursor.index as usize) {
                return None;
            }
            if self.matches(db, cursor.index, cursor) {
                return Some(self.buckets[cursor.index as usize].seqno);
            }
        }
    }

    /// Exact-match search for one query strand: every duplicate of the
    /// query sequence becomes a full hit with identity 100.0 and a
    /// single all-match CIGAR run, no aligner involved. The identity
    /// threshold is pinned to 1.0 in this mode by construction.
    pub fn search_exact_query(
        &self,
        db: &Database,
        matrix: &ScoreMatrix,
        seq: &[u8],
        strand: Strand,
        maxaccepts: usize,
    ) -> Vec<Hit> {
        let mut hits = Vec::new();
        let score: i64 = seq.iter().map(|&b| matrix.score_bytes(b, b)).sum();
        for seqno in self.search_all(db, seq) {
            if maxaccepts > 0 && hits.len() >= maxaccepts {
                break;
            }
            let len = seq.len() as u32;
            let mut hit = Hit {
                target: seqno,
                strand,
                count: 0,
                nw_score: score,
                nw_alen: len,
                matches: len,
                mismatches: 0,
                nw_gaps: 0,
                nw_indels: 0,
                cigar: if len > 1 {
                    format!("{}M", len)
                } else {
                    "M".to_string()
                },
                shortest: len,
                longest: len,
                aligned: true,
                accepted: true,
                ..Hit::default()
            };
            align_trim(&mut hit, 2);
            hits.push(hit);
        }
        hits.sort_by(hit_compare);
        hits
    }

    /// All records whose sequence equals `seq`, in probe order.
    pub fn search_all(&self, db: &Database, seq: &[u8]) -> Vec<u32> {
        let mut out = Vec::new();
        let (first, mut cursor) = self.search_first(db, seq);
        let Some(first) = first else { return out };
        out.push(first);
        while let Some(next) = self.search_next(db, &mut cursor) {
            out.push(next);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::alphabet::Alphabet;
    use crate::search::db::Record;

    fn db_of(seqs: &[&[u8]]) -> Database {
        let mut db = Database::new(Alphabet::Nucleotide);
        for (i, s) in seqs.iter().enumerate() {
            db.push(Record::new(format!("s{}", i).into_bytes(), s.to_vec(), None).unwrap());
        }
        db
    }

    #[test]
    fn every_record_finds_itself() {
        let db = db_of(&[b"ACGT", b"GGGG", b"ACGTACGT", b"TTTT"]);
        let h = SeqHash::build(&db);
        for seqno in 0..db.len() {
            let found = h.search_all(&db, db.sequence(seqno));
            assert_eq!(found, vec![seqno as u32]);
        }
    }

    #[test]
    fn duplicates_and_case_insensitivity() {
        let db = db_of(&[b"ACGT", b"acgt", b"ACGU", b"CCCC"]);
        let h = SeqHash::build(&db);
        // all three spellings normalize to the same sequence
        let mut found = h.search_all(&db, b"ACGT");
        found.sort_unstable();
        assert_eq!(found, vec![0, 1, 2]);
        assert!(h.search_all(&db, b"GGGG").is_empty());
    }
}
