//! Width-parallel global aligner: eight targets aligned to one query in
//! lockstep, 16-bit signed arithmetic, four database columns per pass.
//!
//! Scores are maximised under per-end affine gap penalties; the gap
//! regimes (left / interior / right, per axis) allow e.g. free end gaps
//! on the query while penalising interior indels. Channels refill
//! greedily as their targets finish, with masked reinitialisation so the
//! other seven lanes keep streaming.

use crate::search::db::Database;
use crate::search::scorematrix::{GapModel, ScoreMatrix};
use smallvec::SmallVec;

pub const CHANNELS: usize = 8;
pub const CDEPTH: usize = 4;

/// Pairs whose length product exceeds this are not attempted here; the
/// direction buffer alone would pass 200 MB. They fall through to the
/// linear-memory aligner.
pub const MAX_SEQLEN_PRODUCT: u64 = 25_000_000;

/* ------------------------------------------------------------------ */
/*  portable 8-lane vector                                            */
/* ------------------------------------------------------------------ */

/// Eight 16-bit lanes, one per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct I16x8(pub [i16; CHANNELS]);

impl I16x8 {
    #[inline(always)]
    pub fn splat(v: i16) -> Self {
        I16x8([v; CHANNELS])
    }

    #[inline(always)]
    pub fn zero() -> Self {
        I16x8([0; CHANNELS])
    }

    #[inline(always)]
    fn adds(self, o: Self) -> Self {
        let mut r = [0i16; CHANNELS];
        for c in 0..CHANNELS {
            r[c] = self.0[c].saturating_add(o.0[c]);
        }
        I16x8(r)
    }

    #[inline(always)]
    fn subs(self, o: Self) -> Self {
        let mut r = [0i16; CHANNELS];
        for c in 0..CHANNELS {
            r[c] = self.0[c].saturating_sub(o.0[c]);
        }
        I16x8(r)
    }

    /// Lanewise saturating subtraction with both sides read as u16.
    /// Subtracting an all-ones mask forces a lane to zero, which is how
    /// restarted channels are cleared without disturbing the rest.
    #[inline(always)]
    fn subs_unsigned(self, o: Self) -> Self {
        let mut r = [0i16; CHANNELS];
        for c in 0..CHANNELS {
            r[c] = (self.0[c] as u16).saturating_sub(o.0[c] as u16) as i16;
        }
        I16x8(r)
    }

    #[inline(always)]
    fn max(self, o: Self) -> Self {
        let mut r = [0i16; CHANNELS];
        for c in 0..CHANNELS {
            r[c] = self.0[c].max(o.0[c]);
        }
        I16x8(r)
    }

    #[inline(always)]
    fn min(self, o: Self) -> Self {
        let mut r = [0i16; CHANNELS];
        for c in 0..CHANNELS {
            r[c] = self.0[c].min(o.0[c]);
        }
        I16x8(r)
    }

    #[inline(always)]
    fn bitand(self, o: Self) -> Self {
        let mut r = [0i16; CHANNELS];
        for c in 0..CHANNELS {
            r[c] = self.0[c] & o.0[c];
        }
        I16x8(r)
    }

    /// Two bits per lane, set where `self > o` (the epi16 compare /
    /// epi8 movemask pairing of the reference kernels).
    #[inline(always)]
    fn gt_mask(self, o: Self) -> u16 {
        let mut m = 0u16;
        for c in 0..CHANNELS {
            if self.0[c] > o.0[c] {
                m |= 0b11 << (2 * c);
            }
        }
        m
    }

    #[inline(always)]
    fn lane(&self, c: usize) -> i16 {
        self.0[c]
    }

    #[inline(always)]
    fn set_lane(&mut self, c: usize, v: i16) {
        self.0[c] = v;
    }
}

/* ------------------------------------------------------------------ */
/*  results                                                           */
/* ------------------------------------------------------------------ */

/// Outcome for one (query, target) pair of a batch. A score of
/// `i16::MAX` means the pair was refused (length product) or overflowed
/// 16 bits; the caller escalates those to the linear-memory aligner.
#[derive(Debug, Clone)]
pub struct SimdResult {
    pub score: i16,
    pub alen: u16,
    pub matches: u16,
    pub mismatches: u16,
    pub gaps: u16,
    pub cigar: String,
}

impl SimdResult {
    fn not_computed() -> Self {
        SimdResult {
            score: i16::MAX,
            alen: 0,
            matches: 0,
            mismatches: 0,
            gaps: 0,
            cigar: String::new(),
        }
    }

    pub fn overflowed(&self) -> bool {
        self.score == i16::MAX
    }
}

/* ------------------------------------------------------------------ */
/*  per-thread scratch                                                */
/* ------------------------------------------------------------------ */

struct Penalties {
    qr_q_interior: I16x8,
    r_q_interior: I16x8,
    qr_q_right: I16x8,
    r_q_right: I16x8,
    qr_t_left: I16x8,
    r_t_left: I16x8,
    qr_t_interior: I16x8,
    r_t_interior: I16x8,
    qr_t_right: I16x8,
    r_t_right: I16x8,
    r_q_left: I16x8,
    open_q_left: i16,
    extend_q_left: i16,
}

/// Per-worker aligner state: query profile, score profile, H/E strip,
/// direction ring buffer and CIGAR scratch. Never shared across threads.
pub struct AlignerScratch {
    dim: usize,
    matrix16: Vec<i16>,
    gaps: GapModel,
    pen: Penalties,
    score_min: i16,

    map: fn(u8) -> u8,
    qcodes: Vec<u8>,
    dprofile: Vec<i16>,
    hearray: Vec<I16x8>,
    dir: Vec<u64>,
    maxdlen: usize,
}

fn map_nt(b: u8) -> u8 {
    crate::search::alphabet::Alphabet::Nucleotide.map(b)
}

fn map_aa(b: u8) -> u8 {
    crate::search::alphabet::Alphabet::AminoAcid.map(b)
}

impl AlignerScratch {
    pub fn new(matrix: &ScoreMatrix, gaps: &GapModel) -> Self {
        let dim = matrix.dim();
        let mut matrix16 = Vec::with_capacity(dim * dim);
        for a in 0..dim {
            for b in 0..dim {
                matrix16.push(matrix.score16(a, b));
            }
        }
        let splat = |open: i64, extend: i64| I16x8::splat((open + extend) as i16);
        let pen = Penalties {
            qr_q_interior: splat(gaps.open_query_interior, gaps.extend_query_interior),
            r_q_interior: I16x8::splat(gaps.extend_query_interior as i16),
            qr_q_right: splat(gaps.open_query_right, gaps.extend_query_right),
            r_q_right: I16x8::splat(gaps.extend_query_right as i16),
            qr_t_left: splat(gaps.open_target_left, gaps.extend_target_left),
            r_t_left: I16x8::splat(gaps.extend_target_left as i16),
            qr_t_interior: splat(gaps.open_target_interior, gaps.extend_target_interior),
            r_t_interior: I16x8::splat(gaps.extend_target_interior as i16),
            qr_t_right: splat(gaps.open_target_right, gaps.extend_target_right),
            r_t_right: I16x8::splat(gaps.extend_target_right as i16),
            r_q_left: I16x8::splat(gaps.extend_query_left as i16),
            open_q_left: gaps.open_query_left as i16,
            extend_q_left: gaps.extend_query_left as i16,
        };
        let score_min = (i16::MIN as i64 + gaps.max_total_penalty()) as i16;
        let map = match matrix.alphabet() {
            crate::search::alphabet::Alphabet::Nucleotide => map_nt as fn(u8) -> u8,
            crate::search::alphabet::Alphabet::AminoAcid => map_aa as fn(u8) -> u8,
        };
        AlignerScratch {
            dim,
            matrix16,
            gaps: *gaps,
            pen,
            score_min,
            map,
            qcodes: Vec::new(),
            dprofile: vec![0i16; dim * CDEPTH * CHANNELS],
            hearray: Vec::new(),
            dir: Vec::new(),
            maxdlen: 0,
        }
    }

    pub fn gaps(&self) -> &GapModel {
        &self.gaps
    }

    /// Prepare the query profile. Must precede `align_batch`.
    pub fn qprep(&mut self, qseq: &[u8]) {
        self.qcodes.clear();
        self.qcodes.extend(qseq.iter().map(|&b| (self.map)(b)));
        self.hearray.clear();
        self.hearray.resize(2 * self.qcodes.len(), I16x8::zero());
    }

    pub fn qlen(&self) -> usize {
        self.qcodes.len()
    }

    /// Fill the score profile for the current 4×8 block of target
    /// symbols: `dprofile[s][j][c] = matrix[s][dseq[j][c]]`.
    fn dprofile_fill(&mut self, dseq: &[[u8; CHANNELS]; CDEPTH]) {
        for s in 0..self.dim {
            let row = &self.matrix16[s * self.dim..(s + 1) * self.dim];
            let out = &mut self.dprofile[s * CDEPTH * CHANNELS..(s + 1) * CDEPTH * CHANNELS];
            for j in 0..CDEPTH {
                for c in 0..CHANNELS {
                    out[j * CHANNELS + c] = row[dseq[j][c] as usize];
                }
            }
        }
    }

    #[inline(always)]
    fn profile(&self, qcode: u8, j: usize) -> I16x8 {
        let base = qcode as usize * CDEPTH * CHANNELS + j * CHANNELS;
        let mut r = [0i16; CHANNELS];
        r.copy_from_slice(&self.dprofile[base..base + CHANNELS]);
        I16x8(r)
    }

    /// Align up to eight (or more, multiplexed) targets against the
    /// prepared query. One result per target, in target order.
    pub fn align_batch(&mut self, db: &Database, targets: &[u32]) -> Vec<SimdResult> {
        let qlen = self.qcodes.len();
        let mut results: Vec<SimdResult> =
            (0..targets.len()).map(|_| SimdResult::not_computed()).collect();
        if targets.is_empty() || qlen == 0 {
            return results;
        }

        // longest in-range target decides the ring buffer geometry
        let mut maxdlen = 0usize;
        for &t in targets {
            let dlen = db.sequence_len(t as usize);
            if qlen as u64 * dlen as u64 <= MAX_SEQLEN_PRODUCT && dlen > maxdlen {
                maxdlen = dlen;
            }
        }
        if maxdlen == 0 {
            return results; // every pair refused up front
        }
        let maxdlen = CDEPTH * ((maxdlen + CDEPTH - 1) / CDEPTH);
        self.maxdlen = maxdlen;
        let ring = qlen * maxdlen;
        if self.dir.len() < ring {
            self.dir = vec![0u64; ring];
        }

        self.run_channels(db, targets, &mut results);
        results
    }

    fn run_channels(&mut self, db: &Database, targets: &[u32], results: &mut [SimdResult]) {
        let qlen = self.qcodes.len();
        let maxdlen = self.maxdlen;
        let ring = qlen * maxdlen;

        // per-channel target bookkeeping
        let mut cand: [Option<usize>; CHANNELS] = [None; CHANNELS];
        let mut d_pos = [0usize; CHANNELS];
        let mut d_len = [0usize; CHANNELS];
        let mut d_offset = [0usize; CHANNELS];
        let mut overflow = [false; CHANNELS];

        let mut dseq = [[0u8; CHANNELS]; CDEPTH];
        let mut s_out = [I16x8::zero(); CDEPTH];

        let mut h_in = [I16x8::zero(); CDEPTH];
        let mut f_in = [I16x8::zero(); CDEPTH];

        let mut next_id = 0usize;
        let mut done = 0usize;
        let mut cursor = 0usize; // dir ring position, in u64 cells
        let mut easy = false;

        loop {
            if easy {
                // all channels still streaming: just fetch 4 more symbols
                for c in 0..CHANNELS {
                    match cand[c] {
                        Some(idx) => {
                            let seq = db.sequence(targets[idx] as usize);
                            for j in 0..CDEPTH {
                                dseq[j][c] = if d_pos[c] < d_len[c] {
                                    let code = (self.map)(seq[d_pos[c]]);
                                    d_pos[c] += 1;
                                    code
                                } else {
                                    0
                                };
                            }
                            if d_pos[c] == d_len[c] {
                                easy = false;
                            }
                        }
                        None => {
                            for j in 0..CDEPTH {
                                dseq[j][c] = 0;
                            }
                            easy = false;
                        }
                    }
                }

                self.dprofile_fill(&dseq);
                let (qr_t, r_t) = self.target_penalties(easy, &d_pos, &d_len);

                let (h_min, h_max) = self.align_columns(
                    false,
                    &mut s_out,
                    &qr_t,
                    &r_t,
                    h_in,
                    f_in,
                    I16x8::zero(),
                    I16x8::zero(),
                    I16x8::zero(),
                    I16x8::zero(),
                    I16x8::zero(),
                    cursor,
                );
                self.check_overflows(&mut overflow, h_min, h_max);
            } else {
                // one or more channels ended: harvest and refill
                easy = true;
                let mut reset = I16x8::zero();

                for c in 0..CHANNELS {
                    if cand[c].is_some() && d_pos[c] < d_len[c] {
                        // channel still busy
                        let seq = db.sequence(targets[cand[c].unwrap()] as usize);
                        for j in 0..CDEPTH {
                            dseq[j][c] = if d_pos[c] < d_len[c] {
                                let code = (self.map)(seq[d_pos[c]]);
                                d_pos[c] += 1;
                                code
                            } else {
                                0
                            };
                        }
                        if d_pos[c] == d_len[c] {
                            easy = false;
                        }
                        continue;
                    }

                    reset.set_lane(c, -1i16);

                    if let Some(idx) = cand[c] {
                        // target in this channel is complete: extract score
                        done += 1;
                        if overflow[c] {
                            results[idx] = SimdResult::not_computed();
                        } else {
                            let z = (d_len[c] + 3) % CDEPTH;
                            let score = s_out[z].lane(c);
                            results[idx] = self.backtrack(
                                db.sequence(targets[idx] as usize),
                                d_len[c],
                                d_offset[c],
                                c,
                                score,
                            );
                        }
                        cand[c] = None;
                    }

                    // next target of acceptable size
                    let mut length = 0usize;
                    while length == 0 && next_id < targets.len() {
                        let idx = next_id;
                        next_id += 1;
                        let dlen = db.sequence_len(targets[idx] as usize);
                        if dlen == 0 || qlen as u64 * dlen as u64 > MAX_SEQLEN_PRODUCT {
                            results[idx] = SimdResult::not_computed();
                            done += 1;
                        } else {
                            cand[c] = Some(idx);
                            length = dlen;
                        }
                    }

                    if length > 0 {
                        d_len[c] = length;
                        d_pos[c] = 0;
                        d_offset[c] = cursor;
                        overflow[c] = false;

                        // boundary row and F column restart for this lane
                        let open = self.pen.open_q_left;
                        let ext = self.pen.extend_q_left;
                        h_in[0].set_lane(c, 0);
                        for j in 1..CDEPTH {
                            h_in[j].set_lane(c, -open - (j as i16) * ext);
                        }
                        for j in 0..CDEPTH {
                            f_in[j].set_lane(c, -open - (j as i16 + 1) * ext);
                        }

                        let seq = db.sequence(targets[cand[c].unwrap()] as usize);
                        for j in 0..CDEPTH {
                            dseq[j][c] = if d_pos[c] < d_len[c] {
                                let code = (self.map)(seq[d_pos[c]]);
                                d_pos[c] += 1;
                                code
                            } else {
                                0
                            };
                        }
                        if d_pos[c] == d_len[c] {
                            easy = false;
                        }
                    } else {
                        cand[c] = None;
                        d_len[c] = 0;
                        d_pos[c] = 0;
                        d_offset[c] = 0;
                        for j in 0..CDEPTH {
                            dseq[j][c] = 0;
                        }
                    }
                }

                if done == targets.len() {
                    break;
                }

                // masked penalty vectors for the restarted lanes
                let m_qr_t_left = reset.bitand(self.pen.qr_t_left);
                let m_r_t_left = reset.bitand(self.pen.r_t_left);
                let m_qr_q_interior = reset.bitand(self.pen.qr_q_interior);
                let m_qr_q_right = reset.bitand(self.pen.qr_q_right);

                self.dprofile_fill(&dseq);
                let (qr_t, r_t) = self.target_penalties(easy, &d_pos, &d_len);

                let (h_min, h_max) = self.align_columns(
                    true,
                    &mut s_out,
                    &qr_t,
                    &r_t,
                    h_in,
                    f_in,
                    reset,
                    m_qr_t_left,
                    m_r_t_left,
                    m_qr_q_interior,
                    m_qr_q_right,
                    cursor,
                );
                self.check_overflows(&mut overflow, h_min, h_max);
            }

            // boundary row continues left-end query gaps into the next stripe
            let r = self.pen.r_q_left;
            h_in[0] = h_in[3].subs(r);
            h_in[1] = h_in[0].subs(r);
            h_in[2] = h_in[1].subs(r);
            h_in[3] = h_in[2].subs(r);
            f_in[0] = f_in[3].subs(r);
            f_in[1] = f_in[0].subs(r);
            f_in[2] = f_in[1].subs(r);
            f_in[3] = f_in[2].subs(r);

            cursor += CDEPTH * qlen;
            if cursor >= ring {
                cursor -= ring;
            }
        }
    }

    /// Per-column target gap penalties: interior everywhere except the
    /// columns at or after a finishing target's last symbol, which get
    /// the right-end regime.
    fn target_penalties(
        &self,
        easy: bool,
        d_pos: &[usize; CHANNELS],
        d_len: &[usize; CHANNELS],
    ) -> ([I16x8; CDEPTH], [I16x8; CDEPTH]) {
        let mut qr = [self.pen.qr_t_interior; CDEPTH];
        let mut r = [self.pen.r_t_interior; CDEPTH];
        if !easy {
            let qr_diff = self.pen.qr_t_right.subs(self.pen.qr_t_interior);
            let r_diff = self.pen.r_t_right.subs(self.pen.r_t_interior);
            for j in 0..CDEPTH {
                let mut m = I16x8::zero();
                for c in 0..CHANNELS {
                    if d_pos[c] == d_len[c] && j >= (d_len[c] + 3) % CDEPTH {
                        m.set_lane(c, -1i16);
                    }
                }
                qr[j] = qr[j].adds(qr_diff.bitand(m));
                r[j] = r[j].adds(r_diff.bitand(m));
            }
        }
        (qr, r)
    }

    #[allow(clippy::too_many_arguments)]
    fn align_columns(
        &mut self,
        first: bool,
        s_out: &mut [I16x8; CDEPTH],
        qr_t: &[I16x8; CDEPTH],
        r_t: &[I16x8; CDEPTH],
        h_in: [I16x8; CDEPTH],
        f_in: [I16x8; CDEPTH],
        reset: I16x8,
        mut m_qr_t_left: I16x8,
        m_r_t_left: I16x8,
        m_qr_q_interior: I16x8,
        m_qr_q_right: I16x8,
        cursor: usize,
    ) -> (I16x8, I16x8) {
        let qlen = self.qcodes.len();
        let mut h_min = I16x8::zero();
        let mut h_max = I16x8::zero();

        let [mut h0, mut h1, mut h2, mut h3] = h_in;
        let mut f = f_in;
        for j in 0..CDEPTH {
            f[j] = f[j].subs(qr_t[j]);
        }

        for i in 0..qlen {
            let last_row = i == qlen - 1;
            let (qr_q, r_q) = if last_row {
                (self.pen.qr_q_right, self.pen.r_q_right)
            } else {
                (self.pen.qr_q_interior, self.pen.r_q_interior)
            };

            let mut h4 = self.hearray[2 * i];
            let mut e = self.hearray[2 * i + 1];

            if first {
                // lanes starting a new target restart from zero (the
                // unsigned saturated subtraction of the all-ones mask)
                // and re-enter on their own left-end target gap chain
                e = e.subs_unsigned(reset);
                e = e.subs(m_qr_t_left);
                e = e.subs(if last_row {
                    m_qr_q_right
                } else {
                    m_qr_q_interior
                });
                if !last_row {
                    h4 = h4.subs_unsigned(reset);
                    h4 = h4.subs(m_qr_t_left);
                    m_qr_t_left = m_qr_t_left.adds(m_r_t_left);
                }
            }

            let qcode = self.qcodes[i];
            let mut hrow = [h0, h1, h2, h3];
            let mut hnext = [I16x8::zero(); CDEPTH];
            let base = cursor + CDEPTH * i;

            for j in 0..CDEPTH {
                let v = self.profile(qcode, j);
                let mut h = hrow[j].adds(v);
                let d0 = f[j].gt_mask(h) as u64;
                h = h.max(f[j]);
                let d1 = e.gt_mask(h) as u64;
                h = h.max(e);
                h_min = h_min.min(h);
                h_max = h_max.max(h);
                hnext[j] = h;

                let hf = h.subs(qr_t[j]);
                f[j] = f[j].subs(r_t[j]);
                let d2 = f[j].gt_mask(hf) as u64;
                f[j] = f[j].max(hf);

                let he = h.subs(qr_q);
                e = e.subs(r_q);
                let d3 = e.gt_mask(he) as u64;
                e = e.max(he);

                self.dir[base + j] = d0 | (d1 << 16) | (d2 << 32) | (d3 << 48);
            }

            self.hearray[2 * i] = hnext[3];
            self.hearray[2 * i + 1] = e;

            if last_row {
                *s_out = hnext;
            } else {
                h0 = h4;
                h1 = hnext[0];
                h2 = hnext[1];
                h3 = hnext[2];
            }
        }

        (h_min, h_max)
    }

    fn check_overflows(&self, overflow: &mut [bool; CHANNELS], h_min: I16x8, h_max: I16x8) {
        for c in 0..CHANNELS {
            if !overflow[c]
                && (h_min.lane(c) <= self.score_min || h_max.lane(c) >= i16::MAX)
            {
                overflow[c] = true;
            }
        }
    }

    /* -------------------------------------------------------------- */
    /*  backtrace                                                     */
    /* -------------------------------------------------------------- */

    fn backtrack(
        &self,
        dseq: &[u8],
        dlen: usize,
        offset: usize,
        channel: usize,
        score: i16,
    ) -> SimdResult {
        let qlen = self.qcodes.len();
        let ring = qlen * self.maxdlen;

        let maskup: u64 = 3 << (2 * channel);
        let maskleft: u64 = 3 << (2 * channel + 16);
        let maskextup: u64 = 3 << (2 * channel + 32);
        let maskextleft: u64 = 3 << (2 * channel + 48);

        let mut aligned = 0u16;
        let mut matches = 0u16;
        let mut mismatches = 0u16;
        let mut gaps = 0u16;

        let mut ops: SmallVec<[(u8, u32); 64]> = SmallVec::new();
        let mut push = |ops: &mut SmallVec<[(u8, u32); 64]>, op: u8| match ops.last_mut() {
            Some((last, count)) if *last == op => *count += 1,
            _ => ops.push((op, 1)),
        };

        let mut i = qlen as i64 - 1;
        let mut j = dlen as i64 - 1;
        let mut op = 0u8;

        while i >= 0 && j >= 0 {
            aligned += 1;
            let cell =
                (offset + CDEPTH * qlen * (j as usize / CDEPTH) + CDEPTH * i as usize
                    + (j as usize & 3))
                    % ring;
            let d = self.dir[cell];

            if op == b'I' && d & maskextleft != 0 {
                j -= 1;
                push(&mut ops, b'I');
                op = b'I';
            } else if op == b'D' && d & maskextup != 0 {
                i -= 1;
                push(&mut ops, b'D');
                op = b'D';
            } else if d & maskleft != 0 {
                if op != b'I' {
                    gaps += 1;
                }
                j -= 1;
                push(&mut ops, b'I');
                op = b'I';
            } else if d & maskup != 0 {
                if op != b'D' {
                    gaps += 1;
                }
                i -= 1;
                push(&mut ops, b'D');
                op = b'D';
            } else {
                if self.qcodes[i as usize] == (self.map)(dseq[j as usize]) {
                    matches += 1;
                } else {
                    mismatches += 1;
                }
                i -= 1;
                j -= 1;
                push(&mut ops, b'M');
                op = b'M';
            }
        }

        while i >= 0 {
            aligned += 1;
            if op != b'D' {
                gaps += 1;
            }
            i -= 1;
            push(&mut ops, b'D');
            op = b'D';
        }
        while j >= 0 {
            aligned += 1;
            if op != b'I' {
                gaps += 1;
            }
            j -= 1;
            push(&mut ops, b'I');
            op = b'I';
        }

        // runs were collected walking backward
        let mut cigar = String::new();
        for &(op, count) in ops.iter().rev() {
            if count > 1 {
                cigar.push_str(&count.to_string());
            }
            cigar.push(op as char);
        }

        SimdResult {
            score,
            alen: aligned,
            matches,
            mismatches,
            gaps,
            cigar,
        }
    }
}
