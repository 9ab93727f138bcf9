#[cfg(test)]
mod tests {
    use seqmatch::search::alphabet::{reverse_complement, Alphabet};
    use seqmatch::search::db::{Database, Record};
    use seqmatch::search::driver::{search_onequery, search_query, SearchParams, SearchState};
    use seqmatch::search::exact::SeqHash;
    use seqmatch::search::fastx::FastxReader;
    use seqmatch::search::hits::Strand;
    use seqmatch::search::kmerindex::KmerIndex;
    use seqmatch::search::mask::MaskMode;
    use seqmatch::search::policy::QueryInfo;
    use seqmatch::search::pool::run_search;
    use seqmatch::search::results::{OutputOptions, OutputSink, UserField};
    use seqmatch::search::scorematrix::{GapModel, ScoreMatrix};
    use std::io::Write;

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

    fn db_of(seqs: &[Vec<u8>]) -> Database {
        let mut db = Database::new(Alphabet::Nucleotide);
        for (i, s) in seqs.iter().enumerate() {
            db.push(Record::new(format!("t{}", i).into_bytes(), s.clone(), None).unwrap());
        }
        db
    }

    fn default_setup(seqs: &[Vec<u8>]) -> (Database, KmerIndex, ScoreMatrix, GapModel) {
        let db = db_of(seqs);
        let index = KmerIndex::build(&db, 4, true);
        (
            db,
            index,
            ScoreMatrix::constant(Alphabet::Nucleotide, 5, -4),
            GapModel::uniform(5, 1),
        )
    }

    fn params(id: f64, maxaccepts: usize, maxrejects: usize) -> SearchParams {
        let mut p = SearchParams {
            wordlength: 4,
            both_strands: false,
            qmask: MaskMode::None,
            hardmask: false,
            ..SearchParams::default()
        };
        p.filters.id = id;
        p.filters.maxaccepts = maxaccepts;
        p.filters.maxrejects = maxrejects;
        p
    }

    /* ----------------------------------------------------------------- */
    /*  basic driver behaviour                                           */
    /* ----------------------------------------------------------------- */

    #[test]
    fn every_record_is_its_own_best_hit() {
        let seqs: Vec<Vec<u8>> = (0..6).map(|i| synth(60, 10 + i)).collect();
        let (db, index, matrix, gaps) = default_setup(&seqs);
        let p = params(0.97, 1, 32);

        for (i, seq) in seqs.iter().enumerate() {
            let mut state = SearchState::new(&matrix, &gaps, &p, db.len());
            let hits = search_query(
                &mut state,
                &db,
                &index,
                &matrix,
                &p,
                format!("q{}", i).as_bytes(),
                seq,
                None,
                1,
                i as u64,
            );
            assert_eq!(hits.len(), 1, "query {}", i);
            assert_eq!(hits[0].target, i as u32);
            assert_eq!(hits[0].id, 100.0);
            assert_eq!(hits[0].cigar, "60M");
            assert!(hits[0].accepted);
            assert_eq!(hits[0].strand, Strand::Plus);
        }
    }

    #[test]
    fn accept_budget_is_never_exceeded() {
        // many nearly identical records
        let base = synth(80, 5);
        let mut seqs: Vec<Vec<u8>> = Vec::new();
        for i in 0..12 {
            let mut s = base.clone();
            s[i] = match s[i] {
                b'A' => b'C',
                _ => b'A',
            };
            seqs.push(s);
        }
        let (db, index, matrix, gaps) = default_setup(&seqs);

        for maxaccepts in [1usize, 2, 4] {
            let p = params(0.5, maxaccepts, 32);
            let mut state = SearchState::new(&matrix, &gaps, &p, db.len());
            let hits = search_query(
                &mut state, &db, &index, &matrix, &p, b"q", &base, None, 1, 0,
            );
            assert!(
                hits.len() <= maxaccepts,
                "maxaccepts {} produced {} hits",
                maxaccepts,
                hits.len()
            );
            assert!(!hits.is_empty());
        }
    }

    #[test]
    fn tight_budgets_limit_candidates_examined() {
        // six candidates all sharing the query's k-mers
        let base = synth(60, 5);
        let mut seqs: Vec<Vec<u8>> = vec![base.clone()];
        for i in 1..6 {
            let mut s = base.clone();
            s[i] = match s[i] {
                b'A' => b'C',
                _ => b'A',
            };
            seqs.push(s);
        }
        let (db, index, matrix, gaps) = default_setup(&seqs);

        // with both budgets at one, only a single candidate may be
        // pulled from the heap before the batch is flushed
        let p = params(0.5, 1, 1);
        let mut state = SearchState::new(&matrix, &gaps, &p, db.len());
        let info = QueryInfo {
            label: b"q",
            sequence: &base,
            abundance: 1,
        };
        let hits = search_onequery(
            &mut state,
            &db,
            &index,
            &matrix,
            &p,
            &info,
            Strand::Plus,
            0,
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].target, 0);
        assert!(hits[0].accepted);
    }

    #[test]
    fn reject_budget_stops_the_scan() {
        // targets share k-mers but are too diverged to pass the filter
        let base = synth(60, 5);
        let mut seqs: Vec<Vec<u8>> = Vec::new();
        for i in 0..10u64 {
            let mut s = base.clone();
            // heavy mutations keep identity low while k-mers survive
            for j in (0..30).step_by(3) {
                let idx = (j + i as usize) % s.len();
                s[idx] = match s[idx] {
                    b'A' => b'G',
                    b'G' => b'T',
                    b'T' => b'C',
                    _ => b'A',
                };
            }
            seqs.push(s);
        }
        let (db, index, matrix, gaps) = default_setup(&seqs);
        let p = params(0.99, 1, 3);
        let mut state = SearchState::new(&matrix, &gaps, &p, db.len());
        let hits = search_query(&mut state, &db, &index, &matrix, &p, b"q", &base, None, 1, 0);
        // nothing reaches 99% identity and the scan stops quietly
        assert!(hits.is_empty());
    }

    /* ----------------------------------------------------------------- */
    /*  degenerate queries                                               */
    /* ----------------------------------------------------------------- */

    #[test]
    fn short_and_ambiguous_queries_yield_no_hits() {
        let seqs: Vec<Vec<u8>> = (0..3).map(|i| synth(60, 20 + i)).collect();
        let (db, index, matrix, gaps) = default_setup(&seqs);
        let p = params(0.9, 1, 32);
        let mut state = SearchState::new(&matrix, &gaps, &p, db.len());

        // shorter than the word length
        let hits = search_query(&mut state, &db, &index, &matrix, &p, b"q", b"ACG", None, 1, 0);
        assert!(hits.is_empty());

        // all-ambiguous symbols produce no valid k-mers
        let hits = search_query(
            &mut state,
            &db,
            &index,
            &matrix,
            &p,
            b"q",
            &vec![b'N'; 60],
            None,
            1,
            0,
        );
        assert!(hits.is_empty());
    }

    #[test]
    fn single_record_database() {
        let seqs = vec![synth(60, 77)];
        let (db, index, matrix, gaps) = default_setup(&seqs);
        let p = params(0.9, 1, 32);
        let mut state = SearchState::new(&matrix, &gaps, &p, db.len());
        let hits = search_query(
            &mut state, &db, &index, &matrix, &p, b"q", &seqs[0], None, 1, 0,
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].target, 0);
    }

    /* ----------------------------------------------------------------- */
    /*  strands                                                          */
    /* ----------------------------------------------------------------- */

    #[test]
    fn palindromic_query_finds_the_same_targets_on_both_strands() {
        // S = X + rc(X) equals its own reverse complement
        let x = synth(30, 3);
        let mut pal = x.clone();
        pal.extend(reverse_complement(&x));
        assert_eq!(reverse_complement(&pal), pal);

        let mut seqs = vec![pal.clone()];
        seqs.push(synth(60, 8));
        let (db, index, matrix, gaps) = default_setup(&seqs);

        let p_plus = params(0.9, 4, 32);
        let mut state = SearchState::new(&matrix, &gaps, &p_plus, db.len());
        let plus_hits = search_query(
            &mut state, &db, &index, &matrix, &p_plus, b"q", &pal, None, 1, 0,
        );

        let mut p_both = params(0.9, 4, 32);
        p_both.both_strands = true;
        let rc = reverse_complement(&pal);
        let mut state = SearchState::new(&matrix, &gaps, &p_both, db.len());
        let both_hits = search_query(
            &mut state,
            &db,
            &index,
            &matrix,
            &p_both,
            b"q",
            &pal,
            Some(&rc),
            1,
            0,
        );

        let mut plus_targets: Vec<u32> = plus_hits.iter().map(|h| h.target).collect();
        let mut both_targets: Vec<u32> = both_hits.iter().map(|h| h.target).collect();
        plus_targets.sort_unstable();
        plus_targets.dedup();
        both_targets.sort_unstable();
        both_targets.dedup();
        assert_eq!(plus_targets, both_targets);
    }

    /* ----------------------------------------------------------------- */
    /*  exact search                                                     */
    /* ----------------------------------------------------------------- */

    #[test]
    fn exact_search_returns_each_record_for_its_own_sequence() {
        let seqs: Vec<Vec<u8>> = (0..8).map(|i| synth(40 + i, 30 + i as u64)).collect();
        let db = db_of(&seqs);
        let hash = SeqHash::build(&db);
        let matrix = ScoreMatrix::constant(Alphabet::Nucleotide, 5, -4);

        for (i, seq) in seqs.iter().enumerate() {
            let hits = hash.search_exact_query(&db, &matrix, seq, Strand::Plus, 0);
            assert_eq!(hits.len(), 1, "record {}", i);
            let hit = &hits[0];
            assert_eq!(hit.target, i as u32);
            assert_eq!(hit.id, 100.0);
            assert_eq!(hit.cigar, format!("{}M", seq.len()));
            assert!(hit.accepted);
        }
    }

    /* ----------------------------------------------------------------- */
    /*  the worker pool and deterministic output                         */
    /* ----------------------------------------------------------------- */

    fn write_fasta(path: &std::path::Path, records: &[(String, Vec<u8>)]) {
        let mut f = std::fs::File::create(path).unwrap();
        for (header, seq) in records {
            writeln!(f, ">{}", header).unwrap();
            f.write_all(seq).unwrap();
            writeln!(f).unwrap();
        }
    }

    fn run_to_file(
        db: &Database,
        index: &KmerIndex,
        matrix: &ScoreMatrix,
        gaps: &GapModel,
        p: &SearchParams,
        query_path: &std::path::Path,
        out_path: &std::path::Path,
        threads: usize,
    ) {
        let sink = OutputSink {
            opts: OutputOptions {
                output_no_hits: true,
                ..OutputOptions::default()
            },
            userfields: UserField::parse_list("query+target+id+caln").unwrap(),
            userout: Some(Box::new(std::io::BufWriter::new(
                std::fs::File::create(out_path).unwrap(),
            ))),
            ..OutputSink::default()
        };
        let reader = FastxReader::open(query_path).unwrap();
        let (summary, _sink) =
            run_search(db, index, matrix, gaps, p, reader, sink, threads).unwrap();
        assert!(summary.queries > 0);
    }

    #[test]
    fn single_threaded_runs_are_byte_identical() {
        let seqs: Vec<Vec<u8>> = (0..10).map(|i| synth(60, 50 + i)).collect();
        let (db, index, matrix, gaps) = default_setup(&seqs);
        let p = params(0.8, 2, 16);

        let dir = tempfile::tempdir().unwrap();
        let query_path = dir.path().join("queries.fa");
        let queries: Vec<(String, Vec<u8>)> = (0..10)
            .map(|i| (format!("q{}", i), seqs[i].clone()))
            .collect();
        write_fasta(&query_path, &queries);

        let out1 = dir.path().join("run1.tsv");
        let out2 = dir.path().join("run2.tsv");
        run_to_file(&db, &index, &matrix, &gaps, &p, &query_path, &out1, 1);
        run_to_file(&db, &index, &matrix, &gaps, &p, &query_path, &out2, 1);

        let a = std::fs::read(&out1).unwrap();
        let b = std::fs::read(&out2).unwrap();
        assert!(!a.is_empty());
        assert_eq!(a, b);
    }

    #[test]
    fn multi_threaded_run_covers_every_query() {
        let seqs: Vec<Vec<u8>> = (0..20).map(|i| synth(60, 90 + i)).collect();
        let (db, index, matrix, gaps) = default_setup(&seqs);
        let p = params(0.8, 1, 16);

        let dir = tempfile::tempdir().unwrap();
        let query_path = dir.path().join("queries.fa");
        let queries: Vec<(String, Vec<u8>)> = (0..20)
            .map(|i| (format!("q{}", i), seqs[i].clone()))
            .collect();
        write_fasta(&query_path, &queries);

        let out = dir.path().join("run.tsv");
        run_to_file(&db, &index, &matrix, &gaps, &p, &query_path, &out, 4);

        let text = std::fs::read_to_string(&out).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 20);
        // every query emitted exactly once, in some thread order
        lines.sort_unstable();
        for i in 0..20 {
            assert!(
                lines.iter().any(|l| l.starts_with(&format!("q{}\t", i))),
                "query {} missing",
                i
            );
        }
    }
}
