use crate::search::kmerindex::KmerIndex;
use crate::search::unique::UniqueKmerCounter;

/// Strand call for one query against the reference index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Forward,
    Reverse,
    Undetermined,
}

impl Orientation {
    pub fn symbol(&self) -> char {
        match self {
            Orientation::Forward => '+',
            Orientation::Reverse => '-',
            Orientation::Undetermined => '?',
        }
    }
}

/// Reverse complement a 2-bit packed k-mer of the index word length.
pub fn rc_kmer(kmer: u32, k: usize) -> u32 {
    debug_assert!(2 * k <= 32);
    let mut fwd = kmer;
    let mut rev = 0u32;
    for _ in 0..k {
        let complement = (fwd & 3) ^ 3;
        fwd >>= 2;
        rev = (rev << 2) | complement;
    }
    rev
}

/// A k-mer votes for a strand when that strand has more than this many
/// times as many index hits as the other.
const HITS_FACTOR: u32 = 8;
/// The winning strand needs at least this many votes...
const MIN_COUNT: u32 = 1;
/// ... and this many times the votes of the other strand.
const MIN_FACTOR: u32 = 4;

/// Per-query vote counts for both strands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrandVotes {
    pub forward: u32,
    pub reverse: u32,
}

/// Count, per unique query k-mer, whether the forward or the reverse
/// complemented form dominates the reference index.
pub fn strand_votes(index: &KmerIndex, uh: &mut UniqueKmerCounter, seq: &[u8]) -> StrandVotes {
    let k = index.wordlength();
    let mut votes = StrandVotes::default();
    for &kmer_fwd in uh.count(seq) {
        let kmer_rev = rc_kmer(kmer_fwd, k);
        let hits_fwd = index.matchcount(kmer_fwd);
        let hits_rev = index.matchcount(kmer_rev);
        if hits_fwd > HITS_FACTOR * hits_rev {
            votes.forward += 1;
        } else if hits_rev > HITS_FACTOR * hits_fwd {
            votes.reverse += 1;
        }
    }
    votes
}

/// Resolve the votes into a strand call.
pub fn classify(votes: StrandVotes) -> Orientation {
    if votes.forward >= MIN_COUNT && votes.forward >= MIN_FACTOR * votes.reverse {
        Orientation::Forward
    } else if votes.reverse >= MIN_COUNT && votes.reverse >= MIN_FACTOR * votes.forward {
        Orientation::Reverse
    } else {
        Orientation::Undetermined
    }
}

/// Decide the orientation of one query sequence.
pub fn orient_one(index: &KmerIndex, uh: &mut UniqueKmerCounter, seq: &[u8]) -> Orientation {
    classify(strand_votes(index, uh, seq))
}
