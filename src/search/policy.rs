use crate::search::alphabet::{seq_identical, seqcmp};
use crate::search::db::Database;
use crate::search::hits::Hit;

/// All accept/reject thresholds of the two-phase hit policy.
#[derive(Debug, Clone)]
pub struct FilterParams {
    pub maxaccepts: usize,
    pub maxrejects: usize,
    /// Identity threshold separating accepted from weak hits, 0..=1.
    pub id: f64,
    /// Hits below this identity are rejected outright, 0..=1.
    pub weak_id: f64,
    /// Which of the five identity definitions applies.
    pub iddef: u8,

    // pre-alignment filters
    pub maxqsize: u64,
    pub mintsize: u64,
    pub minsizeratio: f64,
    pub maxsizeratio: f64,
    pub minqt: f64,
    pub maxqt: f64,
    pub minsl: f64,
    pub maxsl: f64,
    pub idprefix: usize,
    pub idsuffix: usize,
    pub exclude_self: bool,
    pub exclude_selfid: bool,

    // post-alignment filters
    pub maxsubs: u32,
    pub maxgaps: u32,
    pub mincols: u32,
    pub leftjust: bool,
    pub rightjust: bool,
    pub query_cov: f64,
    pub target_cov: f64,
    pub maxid: f64,
    pub mid: f64,
    pub maxdiffs: u32,
}

impl Default for FilterParams {
    fn default() -> Self {
        FilterParams {
            maxaccepts: 1,
            maxrejects: 32,
            id: 0.0,
            weak_id: 0.0,
            iddef: 2,
            maxqsize: u64::MAX,
            mintsize: 0,
            minsizeratio: 0.0,
            maxsizeratio: f64::INFINITY,
            minqt: 0.0,
            maxqt: f64::INFINITY,
            minsl: 0.0,
            maxsl: f64::INFINITY,
            idprefix: 0,
            idsuffix: 0,
            exclude_self: false,
            exclude_selfid: false,
            maxsubs: u32::MAX,
            maxgaps: u32::MAX,
            mincols: 0,
            leftjust: false,
            rightjust: false,
            query_cov: 0.0,
            target_cov: 0.0,
            maxid: 1.0,
            mid: 0.0,
            maxdiffs: u32::MAX,
        }
    }
}

/// The query-side facts the filters need.
pub struct QueryInfo<'a> {
    pub label: &'a [u8],
    pub sequence: &'a [u8],
    pub abundance: u64,
}

/// Pre-alignment accept test: the cheap checks a candidate must survive
/// before any alignment work is spent on it.
pub fn acceptable_unaligned(
    params: &FilterParams,
    db: &Database,
    query: &QueryInfo,
    target: u32,
) -> bool {
    let t = target as usize;
    let dseq = db.sequence(t);
    let dlen = dseq.len() as f64;
    let qlen = query.sequence.len() as f64;
    let qsize = query.abundance;
    let tsize = db.abundance(t);

    let length_ratio_ok = if (query.sequence.len()) < dseq.len() {
        qlen >= params.minsl * dlen && qlen <= params.maxsl * dlen
    } else {
        dlen >= params.minsl * qlen && dlen <= params.maxsl * qlen
    };

    qsize <= params.maxqsize
        && tsize >= params.mintsize
        && qsize as f64 >= params.minsizeratio * tsize as f64
        && qsize as f64 <= params.maxsizeratio * tsize as f64
        && qlen >= params.minqt * dlen
        && qlen <= params.maxqt * dlen
        && length_ratio_ok
        && (query.sequence.len() >= params.idprefix
            && dseq.len() >= params.idprefix
            && seq_identical(query.sequence, dseq, params.idprefix))
        && (query.sequence.len() >= params.idsuffix
            && dseq.len() >= params.idsuffix
            && seq_identical(
                &query.sequence[query.sequence.len() - params.idsuffix..],
                &dseq[dseq.len() - params.idsuffix..],
                params.idsuffix,
            ))
        && (!params.exclude_self || query.label != db.record(t).label())
        && (!params.exclude_selfid
            || query.sequence.len() != dseq.len()
            || seqcmp(query.sequence, dseq) != std::cmp::Ordering::Equal)
}

/// Post-alignment accept test. Marks the hit accepted, weak or rejected
/// and reports whether it was accepted.
pub fn acceptable_aligned(
    params: &FilterParams,
    db: &Database,
    qseqlen: usize,
    hit: &mut Hit,
) -> bool {
    let tlen = db.sequence_len(hit.target as usize) as f64;
    let survives = hit.id >= 100.0 * params.weak_id
        && hit.mismatches <= params.maxsubs
        && hit.internal_gaps <= params.maxgaps
        && hit.internal_alen >= params.mincols
        && (!params.leftjust || hit.trim_q_left + hit.trim_t_left == 0)
        && (!params.rightjust || hit.trim_q_right + hit.trim_t_right == 0)
        && hit.internal_alen as f64 >= params.query_cov * qseqlen as f64
        && hit.internal_alen as f64 >= params.target_cov * tlen
        && hit.id <= 100.0 * params.maxid
        && (hit.matches + hit.mismatches == 0
            || 100.0 * hit.matches as f64 / (hit.matches + hit.mismatches) as f64
                >= params.mid)
        && hit.mismatches + hit.internal_indels <= params.maxdiffs;

    if survives {
        if hit.id >= 100.0 * params.id {
            hit.accepted = true;
            hit.weak = false;
            true
        } else {
            hit.rejected = true;
            hit.weak = true;
            false
        }
    } else {
        hit.rejected = true;
        hit.weak = false;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::alphabet::Alphabet;
    use crate::search::db::Record;
    use crate::search::hits::align_trim;

    fn db_of(seqs: &[(&str, &[u8])]) -> Database {
        let mut db = Database::new(Alphabet::Nucleotide);
        for (h, s) in seqs {
            db.push(Record::new(h.as_bytes().to_vec(), s.to_vec(), None).unwrap());
        }
        db
    }

    #[test]
    fn self_exclusion_by_label_and_content() {
        let db = db_of(&[("q1", b"ACGT"), ("q2", b"ACGT")]);
        let q = QueryInfo {
            label: b"q1",
            sequence: b"ACGT",
            abundance: 1,
        };
        let mut p = FilterParams::default();
        assert!(acceptable_unaligned(&p, &db, &q, 0));
        p.exclude_self = true;
        assert!(!acceptable_unaligned(&p, &db, &q, 0));
        assert!(acceptable_unaligned(&p, &db, &q, 1)); // different label
        p.exclude_selfid = true;
        assert!(!acceptable_unaligned(&p, &db, &q, 1)); // same content
    }

    #[test]
    fn prefix_and_suffix_probes() {
        let db = db_of(&[("t", b"ACGTTT")]);
        let q = QueryInfo {
            label: b"q",
            sequence: b"ACGAAA",
            abundance: 1,
        };
        let mut p = FilterParams::default();
        p.idprefix = 3;
        assert!(acceptable_unaligned(&p, &db, &q, 0));
        p.idprefix = 4;
        assert!(!acceptable_unaligned(&p, &db, &q, 0));
        p.idprefix = 0;
        p.idsuffix = 2;
        assert!(!acceptable_unaligned(&p, &db, &q, 0));
    }

    #[test]
    fn weak_hits_are_rejected_but_flagged() {
        let db = db_of(&[("t", b"ACGTACGT")]);
        let mut p = FilterParams::default();
        p.id = 0.9;
        p.weak_id = 0.5;
        let mut hit = Hit {
            target: 0,
            cigar: "8M".into(),
            nw_alen: 8,
            matches: 6,
            mismatches: 2,
            shortest: 8,
            longest: 8,
            aligned: true,
            ..Hit::default()
        };
        align_trim(&mut hit, 2);
        assert_eq!(hit.id, 75.0);
        assert!(!acceptable_aligned(&p, &db, 8, &mut hit));
        assert!(hit.weak && hit.rejected && !hit.accepted);

        let mut strong = Hit {
            target: 0,
            cigar: "8M".into(),
            nw_alen: 8,
            matches: 8,
            mismatches: 0,
            shortest: 8,
            longest: 8,
            aligned: true,
            ..Hit::default()
        };
        align_trim(&mut strong, 2);
        assert!(acceptable_aligned(&p, &db, 8, &mut strong));
        assert!(strong.accepted && !strong.weak);
    }
}
