use crate::search::bitmap::Bitmap;
use crate::search::db::Database;
use crate::search::unique::UniqueKmerCounter;
use indicatif::ProgressBar;

/// Count ratio above which a k-mer's record list is replaced by a dense
/// bit-per-record membership vector.
const BITMAP_THRESHOLD: u32 = 8;

/// Inverted index from k-mers to the database records containing them
/// exactly once.
///
/// Three parallel arrays over the 4^k k-mer space plus an optional bitmap
/// per very frequent k-mer:
///
/// * `count[w]` – number of indexed records containing w
/// * `hash[w]`  – start offset of w's record list inside `index`
/// * `index`    – concatenated record lists (index ordinals)
/// * `bitmap[w]` – dense membership vector used instead of the list when
///   `count[w] ≥ seqcount / 8`
///
/// Indexed records are numbered separately from database ordinals;
/// `mapping` translates back.
pub struct KmerIndex {
    wordlength: usize,
    hashsize: usize,
    count: Vec<u32>,
    hash: Vec<u32>,
    index: Vec<u32>,
    bitmap: Vec<Option<Bitmap>>,
    map: Vec<u32>,
    indexed_count: usize,
}

impl KmerIndex {
    /// Build the index in two passes over the database.
    ///
    /// * `use_bitmap` – allow the dense variant for frequent k-mers
    pub fn build(db: &Database, wordlength: usize, use_bitmap: bool) -> Self {
        assert!((3..=15).contains(&wordlength), "word length must be in 3..=15");
        let seqcount = db.len() as u32;
        let hashsize = 1usize << (2 * wordlength);
        let mut uh = UniqueKmerCounter::new(wordlength);

        // first pass: count occurrences
        let mut count = vec![0u32; hashsize];
        let pb = ProgressBar::new(db.len() as u64);
        for seqno in 0..db.len() {
            for &kmer in uh.count(db.sequence(seqno)) {
                count[kmer as usize] += 1;
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        let bitmap_mincount = if use_bitmap {
            (seqcount / BITMAP_THRESHOLD).max(1)
        } else {
            seqcount + 1
        };

        // prefix sums for the list-backed k-mers; dense bitmaps for the
        // rest, padded so vector scans can overrun the logical end
        let mut hash = vec![0u32; hashsize + 1];
        let mut bitmap: Vec<Option<Bitmap>> = Vec::with_capacity(hashsize);
        let mut sum = 0u32;
        for w in 0..hashsize {
            hash[w] = sum;
            if count[w] >= bitmap_mincount {
                bitmap.push(Some(Bitmap::new(seqcount as usize + 127)));
            } else {
                bitmap.push(None);
                sum += count[w];
            }
        }
        hash[hashsize] = sum;

        // second pass: fill lists and bitmaps
        let mut index = vec![0u32; sum as usize];
        let mut cursor = vec![0u32; hashsize];
        let mut map = Vec::with_capacity(db.len());
        let pb = ProgressBar::new(db.len() as u64);
        for seqno in 0..db.len() {
            let index_ordinal = map.len() as u32;
            map.push(seqno as u32);
            for &kmer in uh.count(db.sequence(seqno)) {
                let w = kmer as usize;
                match bitmap[w].as_mut() {
                    Some(b) => b.set(index_ordinal as usize),
                    None => {
                        index[(hash[w] + cursor[w]) as usize] = index_ordinal;
                        cursor[w] += 1;
                    }
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        let indexed_count = map.len();
        KmerIndex {
            wordlength,
            hashsize,
            count,
            hash,
            index,
            bitmap,
            map,
            indexed_count,
        }
    }

    pub fn wordlength(&self) -> usize {
        self.wordlength
    }

    pub fn hashsize(&self) -> usize {
        self.hashsize
    }

    /// Number of indexed records.
    pub fn indexed_count(&self) -> usize {
        self.indexed_count
    }

    /// Database ordinal of an index ordinal.
    #[inline(always)]
    pub fn mapping(&self, index_ordinal: usize) -> u32 {
        self.map[index_ordinal]
    }

    /// Number of indexed records containing this k-mer.
    #[inline(always)]
    pub fn matchcount(&self, kmer: u32) -> u32 {
        self.count[kmer as usize]
    }

    /// Record list of a list-backed k-mer (empty for bitmap-backed ones).
    #[inline(always)]
    pub fn matchlist(&self, kmer: u32) -> &[u32] {
        let w = kmer as usize;
        if self.bitmap[w].is_some() {
            &[]
        } else {
            let from = self.hash[w] as usize;
            &self.index[from..from + self.count[w] as usize]
        }
    }

    /// Membership bitmap of a frequent k-mer, if it has one.
    #[inline(always)]
    pub fn bitmap(&self, kmer: u32) -> Option<&Bitmap> {
        self.bitmap[kmer as usize].as_ref()
    }

    /// Whether the indexed record contains this k-mer exactly once.
    pub fn contains(&self, kmer: u32, index_ordinal: u32) -> bool {
        match self.bitmap(kmer) {
            Some(b) => b.get(index_ordinal as usize),
            None => self.matchlist(kmer).contains(&index_ordinal),
        }
    }

    /// Raw count table, used by the UDB writer.
    pub fn counts(&self) -> &[u32] {
        &self.count
    }

    /// Record list of a k-mer with bitmap-backed entries expanded,
    /// used by the UDB writer.
    pub fn expanded_list(&self, kmer: u32) -> Vec<u32> {
        match self.bitmap(kmer) {
            Some(b) => (0..self.indexed_count as u32)
                .filter(|&j| b.get(j as usize))
                .collect(),
            None => self.matchlist(kmer).to_vec(),
        }
    }

    /// Rebuild an index from its serialised parts (UDB load).
    pub(crate) fn from_parts(
        wordlength: usize,
        count: Vec<u32>,
        index: Vec<u32>,
        seqcount: usize,
    ) -> Self {
        let hashsize = 1usize << (2 * wordlength);
        assert_eq!(count.len(), hashsize);
        let mut hash = vec![0u32; hashsize + 1];
        let mut sum = 0u32;
        for w in 0..hashsize {
            hash[w] = sum;
            sum += count[w];
        }
        hash[hashsize] = sum;
        assert_eq!(index.len(), sum as usize);
        KmerIndex {
            wordlength,
            hashsize,
            count,
            hash,
            index,
            bitmap: (0..hashsize).map(|_| None).collect(),
            map: (0..seqcount as u32).collect(),
            indexed_count: seqcount,
        }
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
    fn membership_invariant_lists_and_bitmaps() {
        // 9 records sharing AAA pushes it over seqcount/8 and onto the
        // bitmap path; GGGTTT only in the last record stays on a list
        let mut seqs: Vec<&[u8]> = vec![b"AAACCC"; 8];
        seqs.push(b"AAAGGGTTT");
        let db = db_of(&seqs);
        let idx = KmerIndex::build(&db, 3, true);

        let mut uh = UniqueKmerCounter::new(3);
        for seqno in 0..db.len() {
            let kmers: Vec<u32> = uh.count(db.sequence(seqno)).to_vec();
            for w in 0..idx.hashsize() as u32 {
                let expected = kmers.contains(&w);
                assert_eq!(
                    idx.contains(w, seqno as u32),
                    expected,
                    "kmer {} record {}",
                    w,
                    seqno
                );
            }
        }
    }

    #[test]
    fn counts_are_totals_even_for_bitmap_backed_kmers() {
        let mut seqs: Vec<&[u8]> = vec![b"AAACCC"; 8];
        seqs.push(b"AAAGGGTTT");
        let db = db_of(&seqs);
        let idx = KmerIndex::build(&db, 3, true);
        let aaa = 0u32; // A=0 -> code 0b000000
        assert!(idx.bitmap(aaa).is_some());
        assert_eq!(idx.matchcount(aaa), 9);
        assert_eq!(idx.expanded_list(aaa).len(), 9);
    }

    #[test]
    fn without_bitmaps_everything_is_a_list() {
        let db = db_of(&[b"ACGTACGTAA", b"TTTTGGGCCC"]);
        let idx = KmerIndex::build(&db, 4, false);
        for w in 0..idx.hashsize() as u32 {
            assert!(idx.bitmap(w).is_none());
            assert_eq!(idx.matchlist(w).len() as u32, idx.matchcount(w));
        }
    }
}
