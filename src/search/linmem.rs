//! Linear-memory global aligner: divide-and-conquer on the middle query
//! row, with forward and reverse score sweeps locating the optimal
//! crossing column. Used when the width-parallel aligner overflows its
//! 16-bit range or refuses a pair outright.
//!
//! The recursion only produces the alignment ops; scores and statistics
//! are recomputed from the ops under the full model afterwards, so the
//! caller gets the same tuple shape as from the other aligners.

use crate::search::nw::{self, AlignContext, NwResult};
use crate::search::scorematrix::{GapModel, ScoreMatrix};

const NEG: i64 = i64::MIN / 4;

/// Sub-problems at or below this area are solved by the full-matrix
/// aligner directly.
const BLOCK_AREA: usize = 4096;

/// Divide-and-conquer aligner; one instance per worker.
#[derive(Default)]
pub struct LinearMemoryAligner;

impl LinearMemoryAligner {
    pub fn new() -> Self {
        LinearMemoryAligner
    }

    /// Globally align `q` against `d`; returns score, statistics and the
    /// RLE CIGAR, identical in format to the width-parallel aligner's.
    ///
    /// The traced score is cross-checked against a score-only sweep; a
    /// disagreement is reported and the traced value kept for the
    /// statistics.
    pub fn align(
        &mut self,
        q: &[u8],
        d: &[u8],
        matrix: &ScoreMatrix,
        gaps: &GapModel,
        query_no: u64,
        target_no: u64,
    ) -> NwResult {
        let ctx = AlignContext {
            q,
            d,
            matrix,
            gaps,
        };
        let mut ops = Vec::new();
        self.diff(&ctx, 0, q.len(), 0, d.len(), None, None, &mut ops);
        let stats = nw::ops_stats(&ctx, &ops);

        let (cc, _) = forward_sweep(&ctx, 0, q.len(), 0, d.len(), None);
        let expected = cc[d.len()];
        if stats.score != expected {
            eprintln!(
                "WARNING: query no {} and db sequence no {}: initial and recomputed \
                 alignment score disagreement: {} {}",
                query_no, target_no, expected, stats.score
            );
            log::warn!(
                "linear-memory alignment score disagreement for query {} vs target {}: {} vs {}",
                query_no,
                target_no,
                expected,
                stats.score
            );
        }
        stats
    }

    /// Recompute statistics for an existing CIGAR under this model.
    pub fn align_stats(
        cigar: &str,
        q: &[u8],
        d: &[u8],
        matrix: &ScoreMatrix,
        gaps: &GapModel,
    ) -> NwResult {
        let ctx = AlignContext {
            q,
            d,
            matrix,
            gaps,
        };
        nw::ops_stats(&ctx, &nw::cigar_to_ops(cigar))
    }

    #[allow(clippy::too_many_arguments)]
    fn diff(
        &mut self,
        ctx: &AlignContext,
        i0: usize,
        i1: usize,
        j0: usize,
        j1: usize,
        tb: Option<i64>,
        te: Option<i64>,
        ops: &mut Vec<(u8, u32)>,
    ) {
        let m = i1 - i0;
        let n = j1 - j0;

        if m <= 2 || n <= 2 || m * n <= BLOCK_AREA {
            nw::align_block(ctx, i0, i1, j0, j1, tb, te, ops);
            return;
        }

        let imid = i0 + m / 2;
        let (cc, dd) = forward_sweep(ctx, i0, imid, j0, j1, tb);
        let (rr, ss) = reverse_sweep(ctx, imid, i1, j0, j1, te);

        // best crossing column: either a clean crossing or a target gap
        // spanning the cut (its open charged twice, one refunded)
        let mut best_j = 0usize;
        let mut best_score = NEG;
        let mut best_type2 = false;
        for j in 0..=n {
            let t1 = cc[j].saturating_add(rr[n - j]);
            let t2 = dd[j]
                .saturating_add(ss[n - j])
                .saturating_add(ctx.open_t(j0 + j));
            if t1 >= best_score {
                best_score = t1;
                best_j = j;
                best_type2 = false;
            }
            if t2 > best_score {
                best_score = t2;
                best_j = j;
                best_type2 = true;
            }
        }

        let jm = j0 + best_j;
        if best_type2 {
            // rows imid-1 and imid sit inside the crossing gap
            self.diff(ctx, i0, imid - 1, j0, jm, tb, Some(0), ops);
            nw::push_run(ops, b'D', 2);
            self.diff(ctx, imid + 1, i1, jm, j1, Some(0), te, ops);
        } else {
            self.diff(ctx, i0, imid, j0, jm, tb, None, ops);
            self.diff(ctx, imid, i1, jm, j1, None, te, ops);
        }
    }
}

/// Forward score sweep over rows `[i0, imid)`: `cc[j]` is the best score
/// of aligning those rows against `d[j0..j0+j]`, `dd[j]` the best ending
/// inside a target gap.
fn forward_sweep(
    ctx: &AlignContext,
    i0: usize,
    imid: usize,
    j0: usize,
    j1: usize,
    tb: Option<i64>,
) -> (Vec<i64>, Vec<i64>) {
    let n = j1 - j0;
    let mut cc = vec![0i64; n + 1];
    let mut dd = vec![NEG; n + 1];

    let oq0 = ctx.open_q(i0);
    let eq0 = ctx.ext_q(i0);
    for j in 1..=n {
        cc[j] = -(oq0 + j as i64 * eq0);
    }

    let ot0 = tb.unwrap_or_else(|| ctx.open_t(j0));
    let et0 = ctx.ext_t(j0);

    for r in 1..=(imid - i0) {
        let gi = i0 + r - 1;
        let qc = gi + 1;
        let oq = ctx.open_q(qc);
        let eq = ctx.ext_q(qc);

        let mut diag = cc[0];
        dd[0] = (dd[0] - et0).max(cc[0] - ot0 - et0);
        cc[0] = dd[0];
        let mut e = NEG;

        for j in 1..=n {
            let gj = j0 + j - 1;
            let tc = j0 + j;
            let ot = ctx.open_t(tc);
            let et = ctx.ext_t(tc);

            dd[j] = (dd[j] - et).max(cc[j] - ot - et);
            e = (e - eq).max(cc[j - 1] - oq - eq);
            let h = (diag + ctx.score(gi, gj)).max(dd[j]).max(e);
            diag = cc[j];
            cc[j] = h;
        }
    }
    (cc, dd)
}

/// Reverse sweep over rows `[imid, i1)`, columns counted from the right:
/// `rr[c]` covers `d[j1-c..j1]`, `ss[c]` additionally requires the path
/// to begin inside a target gap.
fn reverse_sweep(
    ctx: &AlignContext,
    imid: usize,
    i1: usize,
    j0: usize,
    j1: usize,
    te: Option<i64>,
) -> (Vec<i64>, Vec<i64>) {
    let n = j1 - j0;
    let mut rr = vec![0i64; n + 1];
    let mut ss = vec![NEG; n + 1];

    let oq0 = ctx.open_q(i1);
    let eq0 = ctx.ext_q(i1);
    for c in 1..=n {
        rr[c] = -(oq0 + c as i64 * eq0);
    }

    let ot0 = te.unwrap_or_else(|| ctx.open_t(j1));
    let et0 = ctx.ext_t(j1);

    for r in 1..=(i1 - imid) {
        let gi = i1 - r;
        let oq = ctx.open_q(gi);
        let eq = ctx.ext_q(gi);

        let mut diag = rr[0];
        ss[0] = (ss[0] - et0).max(rr[0] - ot0 - et0);
        rr[0] = ss[0];
        let mut e = NEG;

        for c in 1..=n {
            let gj = j1 - c;
            let tc = j1 - c;
            let ot = ctx.open_t(tc);
            let et = ctx.ext_t(tc);

            ss[c] = (ss[c] - et).max(rr[c] - ot - et);
            e = (e - eq).max(rr[c - 1] - oq - eq);
            let h = (diag + ctx.score(gi, gj)).max(ss[c]).max(e);
            diag = rr[c];
            rr[c] = h;
        }
    }
    (rr, ss)
}
