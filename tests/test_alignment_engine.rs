#[cfg(test)]
mod tests {
    use seqmatch::search::alphabet::Alphabet;
    use seqmatch::search::db::{Database, Record};
    use seqmatch::search::linmem::LinearMemoryAligner;
    use seqmatch::search::nw;
    use seqmatch::search::scorematrix::{GapModel, ScoreMatrix};
    use seqmatch::search::simd::{AlignerScratch, MAX_SEQLEN_PRODUCT};

    fn db_of(seqs: &[&[u8]]) -> Database {
        let mut db = Database::new(Alphabet::Nucleotide);
        for (i, s) in seqs.iter().enumerate() {
            db.push(Record::new(format!("t{}", i).into_bytes(), s.to_vec(), None).unwrap());
        }
        db
    }

    fn model(match_s: i64, mismatch_s: i64, open: i64, ext: i64) -> (ScoreMatrix, GapModel) {
        (
            ScoreMatrix::constant(Alphabet::Nucleotide, match_s, mismatch_s),
            GapModel::uniform(open, ext),
        )
    }

    /// Deterministic pseudo-random nucleotide sequence.
    fn synth(len: usize, seed: u64) -> Vec<u8> {
        let mut x = seed | 1;
        (0..len)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                b"ACGT"[(x % 4) as usize]
            })
            .collect()
    }

    /* ----------------------------------------------------------------- */
    /*  hand-computed fixtures (match 5, mismatch -4, open 5, extend 1)  */
    /* ----------------------------------------------------------------- */

    #[test]
    fn vectorised_scores_against_hand_computed_fixtures() {
        let (matrix, gaps) = model(5, -4, 5, 1);
        let db = db_of(&[
            b"ACAT",   // identical: 4 matches               = 20
            b"ACGT",   // one mismatch: 15 - 4               = 11
            b"AAGT",   // two mismatches: 10 - 8             =  2
            b"ACGGAT", // gap of 2 in query: 20 - (5 + 2)    = 13
            b"GGGG",   // four mismatches, no shared symbol  = -16
        ]);
        let mut s = AlignerScratch::new(&matrix, &gaps);
        s.qprep(b"ACAT");
        let results = s.align_batch(&db, &[0, 1, 2, 3, 4]);

        let expected: [(i16, &str); 5] = [
            (20, "4M"),
            (11, "4M"),
            (2, "4M"),
            (13, "2M2I2M"),
            (-16, "4M"),
        ];
        for (i, (score, cigar)) in expected.iter().enumerate() {
            assert!(!results[i].overflowed(), "target {} overflowed", i);
            assert_eq!(results[i].score, *score, "target {}", i);
            assert_eq!(results[i].cigar, *cigar, "target {}", i);
        }
        // spot-check the counted statistics on the gapped case
        assert_eq!(results[3].matches, 4);
        assert_eq!(results[3].mismatches, 0);
        assert_eq!(results[3].gaps, 1);
        assert_eq!(results[3].alen, 6);
    }

    /* ----------------------------------------------------------------- */
    /*  channel multiplexing vs the scalar aligner                       */
    /* ----------------------------------------------------------------- */

    #[test]
    fn batches_larger_than_the_channel_count_agree_with_scalar() {
        let (matrix, gaps) = model(5, -4, 5, 1);
        // twenty targets of very different lengths so channels refill
        // repeatedly and out of phase
        let seqs: Vec<Vec<u8>> = (0..20)
            .map(|i| synth(3 + (i * 13) % 60, 1000 + i as u64))
            .collect();
        let refs: Vec<&[u8]> = seqs.iter().map(|s| s.as_slice()).collect();
        let db = db_of(&refs);

        let query = synth(37, 99);
        let mut s = AlignerScratch::new(&matrix, &gaps);
        s.qprep(&query);
        let targets: Vec<u32> = (0..db.len() as u32).collect();
        let results = s.align_batch(&db, &targets);

        for (i, res) in results.iter().enumerate() {
            assert!(!res.overflowed(), "unexpected overflow for target {}", i);
            let scalar = nw::align(&query, db.sequence(i), &matrix, &gaps, 0, i as u64);
            assert_eq!(res.score as i64, scalar.score, "score target {}", i);
            // the traced alignment must rescore to the reported score
            let stats = LinearMemoryAligner::align_stats(
                &res.cigar,
                &query,
                db.sequence(i),
                &matrix,
                &gaps,
            );
            assert_eq!(stats.score, res.score as i64, "rescore target {}", i);
            assert_eq!(stats.alen as u16, res.alen, "alen target {}", i);
            assert_eq!(stats.matches as u16, res.matches, "matches target {}", i);
            assert_eq!(stats.gaps as u16, res.gaps, "gaps target {}", i);
        }
    }

    #[test]
    fn per_end_gap_regimes_agree_with_scalar() {
        let matrix = ScoreMatrix::constant(Alphabet::Nucleotide, 2, -4);
        let mut gaps = GapModel::uniform(20, 2);
        gaps.open_query_left = 0;
        gaps.extend_query_left = 0;
        gaps.open_query_right = 0;
        gaps.extend_query_right = 0;

        let db = db_of(&[b"AACCCAA", b"CCCAAAACCC", b"TTTCCCTTT"]);
        let mut s = AlignerScratch::new(&matrix, &gaps);
        s.qprep(b"CCC");
        let results = s.align_batch(&db, &[0, 1, 2]);

        for (i, res) in results.iter().enumerate() {
            let scalar = nw::align(b"CCC", db.sequence(i), &matrix, &gaps, 0, i as u64);
            assert_eq!(res.score as i64, scalar.score, "target {}", i);
        }
        // the query floats into the target for free
        assert_eq!(results[0].score, 6);
    }

    /* ----------------------------------------------------------------- */
    /*  overflow and the length-product tripwire                         */
    /* ----------------------------------------------------------------- */

    #[test]
    fn saturating_range_violations_are_flagged() {
        // scores far outside the 16-bit window force the fallback
        let (matrix, gaps) = model(30000, -4, 5, 1);
        let db = db_of(&[b"ACGTACGT"]);
        let mut s = AlignerScratch::new(&matrix, &gaps);
        s.qprep(b"ACGTACGT");
        let results = s.align_batch(&db, &[0]);
        assert!(results[0].overflowed());

        // the linear-memory aligner finishes the pair exactly
        let mut lma = LinearMemoryAligner::new();
        let lin = lma.align(b"ACGTACGT", db.sequence(0), &matrix, &gaps, 0, 0);
        assert_eq!(lin.score, 8 * 30000);
        assert_eq!(lin.cigar, "8M");
    }

    #[test]
    fn negative_overflow_from_harsh_mismatches() {
        let (matrix, gaps) = model(5, -30000, 30000, 1);
        let db = db_of(&[b"TT"]);
        let mut s = AlignerScratch::new(&matrix, &gaps);
        s.qprep(b"AA");
        let results = s.align_batch(&db, &[0]);
        assert!(results[0].overflowed());

        let mut lma = LinearMemoryAligner::new();
        let lin = lma.align(b"AA", db.sequence(0), &matrix, &gaps, 0, 0);
        assert_eq!(lin.score, -60000);
    }

    #[test]
    fn seqlen_product_cap_routes_to_fallback() {
        let (matrix, gaps) = model(5, -4, 5, 1);
        let long: Vec<u8> = synth(5001, 3);
        let refs: Vec<&[u8]> = vec![&long];
        let db = db_of(&refs);

        assert!(5001u64 * 5001 > MAX_SEQLEN_PRODUCT);
        let mut s = AlignerScratch::new(&matrix, &gaps);
        s.qprep(&long);
        let results = s.align_batch(&db, &[0]);
        assert!(results[0].overflowed(), "over-cap pair must be refused");

        // well under the cap is attempted and exact
        let shorter = synth(2000, 5);
        let refs: Vec<&[u8]> = vec![&shorter];
        let db = db_of(&refs);
        let mut s = AlignerScratch::new(&matrix, &gaps);
        s.qprep(&shorter);
        let results = s.align_batch(&db, &[0]);
        assert!(!results[0].overflowed());
        assert_eq!(results[0].score as i64, 5 * 2000);
    }

    /* ----------------------------------------------------------------- */
    /*  empty and degenerate targets                                     */
    /* ----------------------------------------------------------------- */

    #[test]
    fn single_symbol_pairs() {
        let (matrix, gaps) = model(5, -4, 5, 1);
        let db = db_of(&[b"A", b"T"]);
        let mut s = AlignerScratch::new(&matrix, &gaps);
        s.qprep(b"A");
        let results = s.align_batch(&db, &[0, 1]);
        assert_eq!(results[0].score, 5);
        assert_eq!(results[0].cigar, "M");
        assert_eq!(results[1].score, -4);
    }
}
