use crate::search::alphabet::reverse_complement;
use crate::search::bitmap::Bitmap;
use crate::search::db::Database;
use crate::search::kmerindex::KmerIndex;
use crate::search::minheap::TopScore;
use crate::search::select::{increment_counters_from_bitmap, ScanKernel};
use crate::search::unique::UniqueKmerCounter;

/// K-mers subsampled per bootstrap round.
const SUBSET_SIZE: usize = 32;
/// Bootstrap rounds per query and strand.
const BOOTSTRAP_COUNT: usize = 100;

/// Taxonomy rank letters, highest rank first.
pub const TAX_LETTERS: &[u8] = b"dkpcofgs";
pub const TAX_LEVELS: usize = 8;

/// Small seedable generator for the bootstrap subsampling; xorshift64*
/// keeps single-threaded runs byte-identical for a fixed seed.
#[derive(Debug, Clone)]
pub struct Xorshift {
    state: u64,
}

impl Xorshift {
    pub fn new(seed: u64) -> Self {
        Xorshift {
            state: seed.max(1),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Uniform value in `0..n`.
    pub fn below(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

/// One rank annotation split out of a database header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxField {
    pub level: usize,
    pub name: Vec<u8>,
}

/// Split the `tax=d:...,p:...;` annotation of a header into per-rank
/// names. Unannotated ranks stay empty.
pub fn tax_split(header: &[u8]) -> [Vec<u8>; TAX_LEVELS] {
    let mut out: [Vec<u8>; TAX_LEVELS] = Default::default();
    let Some(pos) = find_tax_annotation(header) else {
        return out;
    };
    let rest = &header[pos..];
    let end = rest.iter().position(|&b| b == b';').unwrap_or(rest.len());
    for part in rest[..end].split(|&b| b == b',') {
        if part.len() >= 2 && part[1] == b':' {
            if let Some(level) = TAX_LETTERS.iter().position(|&l| l == part[0]) {
                out[level] = part[2..].to_vec();
            }
        }
    }
    out
}

fn find_tax_annotation(header: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i < header.len() {
        let at_start = i == 0 || header[i - 1] == b';';
        if at_start && header[i..].starts_with(b"tax=") {
            return Some(i + 4);
        }
        i += 1;
    }
    None
}

/// Outcome of classifying one query.
#[derive(Debug, Clone, Default)]
pub struct SintaxResult {
    /// Per rank: consensus name and its bootstrap support, 0..=1.
    pub levels: Vec<(Vec<u8>, f64)>,
    pub strand_minus: bool,
    /// Enough successful bootstraps to report at all.
    pub classified: bool,
}

/// Per-thread scratch for the classifier.
pub struct SintaxState {
    pub uh: UniqueKmerCounter,
    counts: Vec<u16>,
    rng: Xorshift,
    kernel: ScanKernel,
    /// Break best-target ties randomly instead of by length and ordinal.
    random_ties: bool,
}

impl SintaxState {
    pub fn new(wordlength: usize, kernel: ScanKernel, seed: u64, random_ties: bool) -> Self {
        SintaxState {
            uh: UniqueKmerCounter::new(wordlength),
            counts: Vec::new(),
            rng: Xorshift::new(seed),
            kernel,
            random_ties,
        }
    }

    /// Single best target for one k-mer subsample: most shared k-mers,
    /// ties to the shortest record then the lowest ordinal, or uniformly
    /// random when so configured.
    fn best_target(&mut self, index: &KmerIndex, db: &Database, kmers: &[u32]) -> Option<TopScore> {
        let n = index.indexed_count();
        self.counts.clear();
        self.counts.resize(n + 128, 0);

        for &kmer in kmers {
            match index.bitmap(kmer) {
                Some(b) => increment_counters_from_bitmap(self.kernel, &mut self.counts, b, n),
                None => {
                    for &j in index.matchlist(kmer) {
                        self.counts[j as usize] += 1;
                    }
                }
            }
        }

        let mut best = TopScore::default();
        let mut tied = 0u32;
        for i in 0..n {
            let count = self.counts[i] as u32;
            if count == 0 {
                continue;
            }
            let seqno = index.mapping(i);
            let length = db.sequence_len(seqno as usize) as u32;
            let cand = TopScore {
                count,
                seqno,
                length,
            };
            if count > best.count {
                best = cand;
                tied = 1;
            } else if count == best.count {
                if self.random_ties {
                    tied += 1;
                    if self.rng.below(tied as usize) == 0 {
                        best = cand;
                    }
                } else if cand.better_than(&best) {
                    best = cand;
                }
            }
        }

        (best.count > 1).then_some(best)
    }

    /// Run the bootstrap rounds for one strand; the returned ordinals
    /// are the per-round winning targets.
    fn bootstrap(&mut self, index: &KmerIndex, db: &Database, seq: &[u8]) -> Vec<u32> {
        let kmers = self.uh.count(seq).to_vec();
        if kmers.len() < SUBSET_SIZE {
            return Vec::new();
        }

        let mut winners = Vec::new();
        let mut picked = Bitmap::new(kmers.len());
        let mut subset = Vec::with_capacity(SUBSET_SIZE);

        for _ in 0..BOOTSTRAP_COUNT {
            subset.clear();
            picked.reset_all();
            for _ in 0..SUBSET_SIZE {
                let x = self.rng.below(kmers.len());
                if !picked.get(x) {
                    picked.set(x);
                    subset.push(kmers[x]);
                }
            }
            if let Some(best) = self.best_target(index, db, &subset) {
                winners.push(best.seqno);
            }
        }
        winners
    }
}

/// Classify one query: bootstrap both strands when requested, keep the
/// strand with more successful rounds, then build the rank consensus
/// restricted to candidates agreeing on all higher ranks.
pub fn sintax_classify(
    state: &mut SintaxState,
    index: &KmerIndex,
    db: &Database,
    seq: &[u8],
    both_strands: bool,
) -> SintaxResult {
    let winners_plus = state.bootstrap(index, db, seq);
    let winners_minus = if both_strands {
        let rc = reverse_complement(seq);
        state.bootstrap(index, db, &rc)
    } else {
        Vec::new()
    };

    let (winners, strand_minus) = if winners_minus.len() > winners_plus.len() {
        (winners_minus, true)
    } else {
        (winners_plus, false)
    };

    // at least half the rounds must produce a winner
    let count = winners.len();
    if count < (BOOTSTRAP_COUNT + 1) / 2 {
        return SintaxResult {
            strand_minus,
            ..SintaxResult::default()
        };
    }

    let taxa: Vec<[Vec<u8>; TAX_LEVELS]> = winners
        .iter()
        .map(|&seqno| tax_split(db.header(seqno as usize)))
        .collect();

    let mut included = vec![true; count];
    let mut levels = Vec::with_capacity(TAX_LEVELS);

    for k in 0..TAX_LEVELS {
        // group the still-included candidates by their name at this rank
        let mut best_name: &[u8] = b"";
        let mut best_votes = 0usize;
        for i in 0..count {
            if !included[i] {
                continue;
            }
            let name = &taxa[i][k];
            let votes = (0..count)
                .filter(|&j| included[j] && taxa[j][k] == *name)
                .count();
            if votes > best_votes {
                best_votes = votes;
                best_name = name;
            }
        }
        for i in 0..count {
            if included[i] && taxa[i][k] != best_name {
                included[i] = false;
            }
        }
        levels.push((best_name.to_vec(), best_votes as f64 / count as f64));
    }

    SintaxResult {
        levels,
        strand_minus,
        classified: true,
    }
}

/// Render the classification the way the tabbed output expects:
/// all ranks with confidence, strand, then the ranks above the cutoff.
pub fn format_tabbed(query_header: &[u8], result: &SintaxResult, cutoff: f64) -> String {
    let mut line = String::from_utf8_lossy(query_header).into_owned();
    line.push('\t');
    if result.classified {
        let mut first = true;
        for (k, (name, boot)) in result.levels.iter().enumerate() {
            if name.is_empty() {
                continue;
            }
            if !first {
                line.push(',');
            }
            first = false;
            line.push(TAX_LETTERS[k] as char);
            line.push(':');
            line.push_str(&String::from_utf8_lossy(name));
            line.push_str(&format!("({:.4})", boot));
        }
        line.push('\t');
        line.push(if result.strand_minus { '-' } else { '+' });
        if cutoff > 0.0 {
            line.push('\t');
            let mut first = true;
            for (k, (name, boot)) in result.levels.iter().enumerate() {
                if name.is_empty() || *boot < cutoff {
                    continue;
                }
                if !first {
                    line.push(',');
                }
                first = false;
                line.push(TAX_LETTERS[k] as char);
                line.push(':');
                line.push_str(&String::from_utf8_lossy(name));
            }
        }
    } else {
        line.push('\t');
        if cutoff > 0.0 {
            line.push('\t');
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::alphabet::Alphabet;
    use crate::search::db::Record;
    use crate::search::select::detect_kernel;

    #[test]
    fn tax_annotation_is_split_by_rank() {
        let fields = tax_split(b"ref1;tax=d:Bacteria,p:Firmicutes,g:Bacillus;size=5;");
        assert_eq!(fields[0], b"Bacteria");
        assert_eq!(fields[2], b"Firmicutes");
        assert_eq!(fields[6], b"Bacillus");
        assert!(fields[7].is_empty());
        assert!(tax_split(b"no annotation here").iter().all(|f| f.is_empty()));
    }

    #[test]
    fn xorshift_is_deterministic() {
        let mut a = Xorshift::new(42);
        let mut b = Xorshift::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
        let mut c = Xorshift::new(42);
        for _ in 0..1000 {
            assert!(c.below(7) < 7);
        }
    }

    #[test]
    fn classifies_a_clean_database() {
        // two clearly separated genera; the query equals a member of one
        let mut db = Database::new(Alphabet::Nucleotide);
        let a = b"ACGGTTACCAGTTGACCATGCAAGGCTAGGCTATTAGCAC".to_vec();
        let b = b"TTTTAAAACCCCGGGGTTTTAAAACCCCGGGGTTTTAAAA".to_vec();
        for i in 0..4 {
            let mut seq = a.clone();
            seq.rotate_left(i);
            db.push(
                Record::new(
                    format!("a{};tax=d:Bacteria,g:Alpha;", i).into_bytes(),
                    seq,
                    None,
                )
                .unwrap(),
            );
            let mut seq = b.clone();
            seq.rotate_left(i);
            db.push(
                Record::new(
                    format!("b{};tax=d:Bacteria,g:Beta;", i).into_bytes(),
                    seq,
                    None,
                )
                .unwrap(),
            );
        }
        let index = KmerIndex::build(&db, 5, false);
        let mut state = SintaxState::new(5, detect_kernel(), 1, false);
        let result = sintax_classify(&mut state, &index, &db, &a, false);
        assert!(result.classified);
        assert_eq!(result.levels[0].0, b"Bacteria");
        assert_eq!(result.levels[6].0, b"Alpha");
        assert!(result.levels[6].1 > 0.5);
    }
}
