use crate::search::db::Database;
use crate::search::hits::{align_trim, hit_compare, Hit, Strand};
use crate::search::kmerindex::KmerIndex;
use crate::search::linmem::LinearMemoryAligner;
use crate::search::mask::{dust, hardmask, MaskMode};
use crate::search::minheap::MinHeap;
use crate::search::policy::{acceptable_aligned, acceptable_unaligned, FilterParams, QueryInfo};
use crate::search::scorematrix::{GapModel, ScoreMatrix};
use crate::search::select::{detect_kernel, search_topscores, ScanKernel};
use crate::search::simd::{AlignerScratch, CHANNELS};
use crate::search::unique::UniqueKmerCounter;

/// How many candidates may wait in the alignment batch before the
/// width-parallel aligner is invoked on all of them at once.
pub const MAX_DELAYED: usize = CHANNELS;

/// Per-run search configuration shared by every worker.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub wordlength: usize,
    /// Search the reverse-complemented query as well.
    pub both_strands: bool,
    pub qmask: MaskMode,
    pub hardmask: bool,
    pub filters: FilterParams,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            wordlength: 8,
            both_strands: false,
            qmask: MaskMode::None,
            hardmask: false,
            filters: FilterParams::default(),
        }
    }
}

impl SearchParams {
    /// Heap capacity: every candidate we could possibly need to examine.
    pub fn tophits(&self, seqcount: usize) -> usize {
        let maxaccepts = clamp_budget(self.filters.maxaccepts, seqcount);
        let maxrejects = clamp_budget(self.filters.maxrejects, seqcount);
        (maxaccepts + maxrejects + MAX_DELAYED).min(seqcount)
    }
}

/// A budget of zero or beyond the database size means "everything".
pub fn clamp_budget(budget: usize, seqcount: usize) -> usize {
    if budget == 0 || budget > seqcount {
        seqcount
    } else {
        budget
    }
}

/// Per-worker scratch: everything a thread needs to search queries
/// without touching shared mutable state.
pub struct SearchState {
    pub uh: UniqueKmerCounter,
    pub counts: Vec<u16>,
    pub heap: MinHeap,
    pub scratch: AlignerScratch,
    pub lma: LinearMemoryAligner,
    pub kernel: ScanKernel,
    maxaccepts: usize,
    maxrejects: usize,
}

impl SearchState {
    pub fn new(
        matrix: &ScoreMatrix,
        gaps: &GapModel,
        params: &SearchParams,
        seqcount: usize,
    ) -> Self {
        SearchState {
            uh: UniqueKmerCounter::new(params.wordlength),
            counts: Vec::new(),
            heap: MinHeap::new(params.tophits(seqcount)),
            scratch: AlignerScratch::new(matrix, gaps),
            lma: LinearMemoryAligner::new(),
            kernel: detect_kernel(),
            maxaccepts: clamp_budget(params.filters.maxaccepts, seqcount),
            maxrejects: clamp_budget(params.filters.maxrejects, seqcount),
        }
    }
}

/// Apply the configured query masking in place.
pub fn mask_query(params: &SearchParams, seq: &mut Vec<u8>) {
    match params.qmask {
        MaskMode::Dust => dust(seq),
        MaskMode::Soft => {
            if params.hardmask {
                hardmask(seq);
            }
        }
        MaskMode::None => {}
    }
}

/// Search one query strand: extract unique k-mers, select candidates,
/// align them in delayed batches and classify every result.
#[allow(clippy::too_many_arguments)]
pub fn search_onequery(
    state: &mut SearchState,
    db: &Database,
    index: &KmerIndex,
    matrix: &ScoreMatrix,
    params: &SearchParams,
    query: &QueryInfo,
    strand: Strand,
    query_no: u64,
) -> Vec<Hit> {
    let mut hits: Vec<Hit> = Vec::new();

    state.scratch.qprep(query.sequence);

    // candidate selection by shared unique k-mers
    let kmers = state.uh.count(query.sequence).to_vec();
    search_topscores(
        index,
        db,
        state.kernel,
        &kmers,
        &mut state.counts,
        &mut state.heap,
    );

    let mut accepts = 0usize;
    let mut rejects = 0usize;
    let mut finalized = 0usize;
    let mut delayed = 0usize;

    while finalized + delayed < (state.maxaccepts + state.maxrejects).saturating_sub(1)
        && rejects < state.maxrejects
        && accepts < state.maxaccepts
    {
        let Some(elem) = state.heap.pop_best() else {
            break;
        };

        let mut hit = Hit {
            target: elem.seqno,
            count: elem.count,
            strand,
            ..Hit::default()
        };

        // cheap tests before any alignment work
        if acceptable_unaligned(&params.filters, db, query, elem.seqno) {
            delayed += 1;
        } else {
            hit.rejected = true;
        }
        hits.push(hit);

        if delayed == MAX_DELAYED {
            align_delayed(
                state, db, matrix, params, query, query_no, &mut hits, &mut finalized,
                &mut accepts, &mut rejects,
            );
            delayed = 0;
        }
    }
    if delayed > 0 {
        align_delayed(
            state, db, matrix, params, query, query_no, &mut hits, &mut finalized,
            &mut accepts, &mut rejects,
        );
    }

    hits
}

/// Run the width-parallel aligner over the batch of pending candidates,
/// falling back to the linear-memory aligner per pair on overflow, then
/// classify the results while the budgets hold.
#[allow(clippy::too_many_arguments)]
fn align_delayed(
    state: &mut SearchState,
    db: &Database,
    matrix: &ScoreMatrix,
    params: &SearchParams,
    query: &QueryInfo,
    query_no: u64,
    hits: &mut [Hit],
    finalized: &mut usize,
    accepts: &mut usize,
    rejects: &mut usize,
) {
    let targets: Vec<u32> = hits[*finalized..]
        .iter()
        .filter(|h| !h.rejected)
        .map(|h| h.target)
        .collect();

    let results = if targets.is_empty() {
        Vec::new()
    } else {
        state.scratch.align_batch(db, &targets)
    };

    let qseqlen = query.sequence.len();
    let gaps = *state.scratch.gaps();
    let mut i = 0usize;

    for x in *finalized..hits.len() {
        // budgets exhausted: remaining batch results are discarded
        if *rejects >= state.maxrejects || *accepts >= state.maxaccepts {
            break;
        }
        let hit = &mut hits[x];

        if hit.rejected {
            *rejects += 1;
            continue;
        }

        let target = hit.target as usize;
        let dlen = db.sequence_len(target);
        let res = &results[i];
        i += 1;

        if res.overflowed() {
            // 16-bit overflow or refused pair: redo in linear memory
            let lin = state.lma.align(
                query.sequence,
                db.sequence(target),
                matrix,
                &gaps,
                query_no,
                hit.target as u64,
            );
            hit.nw_score = lin.score;
            hit.nw_alen = lin.alen as u32;
            hit.matches = lin.matches as u32;
            hit.mismatches = lin.mismatches as u32;
            hit.nw_gaps = lin.gaps as u32;
            hit.nw_indels = lin.indels as u32;
            hit.cigar = lin.cigar;
        } else {
            hit.nw_score = res.score as i64;
            hit.nw_alen = res.alen as u32;
            hit.matches = res.matches as u32;
            hit.mismatches = res.mismatches as u32;
            hit.nw_gaps = res.gaps as u32;
            hit.nw_indels = res.alen as u32 - res.matches as u32 - res.mismatches as u32;
            hit.cigar = res.cigar.clone();
        }

        hit.aligned = true;
        hit.shortest = qseqlen.min(dlen) as u32;
        hit.longest = qseqlen.max(dlen) as u32;

        align_trim(hit, params.filters.iddef);

        if acceptable_aligned(&params.filters, db, qseqlen, hit) {
            *accepts += 1;
        } else {
            *rejects += 1;
        }
    }

    *finalized = hits.len();
}

/// Search one query on the plus strand and, when present, its reverse
/// complement; join the accepted hits and order them with the strict
/// comparator.
#[allow(clippy::too_many_arguments)]
pub fn search_query(
    state: &mut SearchState,
    db: &Database,
    index: &KmerIndex,
    matrix: &ScoreMatrix,
    params: &SearchParams,
    label: &[u8],
    sequence: &[u8],
    sequence_rc: Option<&[u8]>,
    abundance: u64,
    query_no: u64,
) -> Vec<Hit> {
    let mut all: Vec<Hit> = Vec::new();

    let info = QueryInfo {
        label,
        sequence,
        abundance,
    };
    all.extend(search_onequery(
        state,
        db,
        index,
        matrix,
        params,
        &info,
        Strand::Plus,
        query_no,
    ));

    if let Some(rc) = sequence_rc {
        let info = QueryInfo {
            label,
            sequence: rc,
            abundance,
        };
        all.extend(search_onequery(
            state,
            db,
            index,
            matrix,
            params,
            &info,
            Strand::Minus,
            query_no,
        ));
    }

    let mut joined: Vec<Hit> = all.into_iter().filter(|h| h.accepted).collect();
    joined.sort_by(hit_compare);
    joined
}
