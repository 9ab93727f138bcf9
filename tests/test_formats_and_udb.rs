#[cfg(test)]
mod tests {
    use seqmatch::search::alphabet::Alphabet;
    use seqmatch::search::db::{Database, Record};
    use seqmatch::search::driver::{search_query, SearchParams, SearchState};
    use seqmatch::search::fastx::{FastxFormat, FastxReader, QualityParams};
    use seqmatch::search::kmerindex::KmerIndex;
    use seqmatch::search::mask::MaskMode;
    use seqmatch::search::scorematrix::{GapModel, ScoreMatrix};
    use seqmatch::search::udb::{detect_udb, read_udb, write_udb};
    use seqmatch::search::unique::UniqueKmerCounter;
    use std::io::Write;

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
    /*  fasta / fastq parsing                                            */
    /* ----------------------------------------------------------------- */

    #[test]
    fn plain_fasta_with_wrapping_and_stripped_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.fa");
        std::fs::write(
            &path,
            b">one description here\nACGT\nAC GT\n>two;size=12;\nacgtn\n-ACG.T\n",
        )
        .unwrap();

        let mut reader = FastxReader::open(&path).unwrap();
        assert_eq!(reader.format(), FastxFormat::Fasta);
        let records = reader.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].header, b"one description here");
        assert_eq!(records[0].label(), b"one");
        assert_eq!(records[0].sequence, b"ACGTACGT");
        assert_eq!(records[0].abundance, 1);
        // '-' and '.' stripped, case preserved
        assert_eq!(records[1].sequence, b"acgtnACGT");
        assert_eq!(records[1].abundance, 12);
    }

    #[test]
    fn fastq_quality_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.fq");
        std::fs::write(&path, b"@r1\nACGT\n+\nIIII\n").unwrap();
        let mut reader = FastxReader::open(&path).unwrap();
        assert_eq!(reader.format(), FastxFormat::Fastq);
        let records = reader.read_all().unwrap();
        assert_eq!(records[0].quality.as_deref().unwrap(), b"IIII");

        // 'I' is q40; a window of [0..20] must reject it
        let strict = QualityParams {
            ascii_offset: 33,
            qmin: 0,
            qmax: 20,
        };
        let mut reader = FastxReader::open_with(&path, strict).unwrap();
        assert!(reader.next_record().is_err());
    }

    #[test]
    fn fatal_bytes_abort_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.fa");
        std::fs::write(&path, b">x\nAC!T\n").unwrap();
        let mut reader = FastxReader::open(&path).unwrap();
        let err = reader.next_record().unwrap_err();
        assert!(format!("{}", err).contains("fatal character"));
    }

    #[test]
    fn gzip_and_bzip2_are_detected_by_magic() {
        let dir = tempfile::tempdir().unwrap();
        let content = b">z\nACGTACGT\n";

        let gz_path = dir.path().join("db.fa.gz");
        let f = std::fs::File::create(&gz_path).unwrap();
        let mut enc = flate2::write::GzEncoder::new(f, flate2::Compression::default());
        enc.write_all(content).unwrap();
        enc.finish().unwrap();

        let bz_path = dir.path().join("db.fa.bz2");
        let f = std::fs::File::create(&bz_path).unwrap();
        let mut enc = bzip2::write::BzEncoder::new(f, bzip2::Compression::default());
        enc.write_all(content).unwrap();
        enc.finish().unwrap();

        for path in [gz_path, bz_path] {
            let mut reader = FastxReader::open(&path).unwrap();
            let records = reader.read_all().unwrap();
            assert_eq!(records.len(), 1, "{:?}", path);
            assert_eq!(records[0].sequence, b"ACGTACGT");
        }
    }

    /* ----------------------------------------------------------------- */
    /*  index membership invariant at scale                              */
    /* ----------------------------------------------------------------- */

    #[test]
    fn index_membership_matches_unique_kmer_extraction() {
        let mut db = Database::new(Alphabet::Nucleotide);
        for i in 0..40u64 {
            // enough shared content to push common k-mers onto bitmaps
            let mut seq = synth(50, 500);
            seq.extend(synth(30, 600 + i));
            db.push(Record::new(format!("r{}", i).into_bytes(), seq, None).unwrap());
        }
        let index = KmerIndex::build(&db, 5, true);
        let mut uh = UniqueKmerCounter::new(5);

        let mut bitmap_backed = 0;
        for w in 0..index.hashsize() as u32 {
            if index.bitmap(w).is_some() {
                bitmap_backed += 1;
            }
        }
        assert!(bitmap_backed > 0, "test should exercise the bitmap path");

        for seqno in 0..db.len() {
            let kmers: std::collections::HashSet<u32> =
                uh.count(db.sequence(seqno)).iter().copied().collect();
            for w in 0..index.hashsize() as u32 {
                assert_eq!(
                    index.contains(w, seqno as u32),
                    kmers.contains(&w),
                    "kmer {} record {}",
                    w,
                    seqno
                );
            }
        }
    }

    /* ----------------------------------------------------------------- */
    /*  UDB round trip                                                   */
    /* ----------------------------------------------------------------- */

    #[test]
    fn udb_roundtrip_reproduces_hit_lists() {
        let seqs: Vec<Vec<u8>> = (0..8).map(|i| synth(60, 700 + i)).collect();
        let mut db = Database::new(Alphabet::Nucleotide);
        for (i, s) in seqs.iter().enumerate() {
            db.push(Record::new(format!("t{}", i).into_bytes(), s.clone(), None).unwrap());
        }
        let index = KmerIndex::build(&db, 4, true);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.udb");
        write_udb(&path, &db, &index).unwrap();
        assert!(detect_udb(&path).unwrap());
        let (db2, index2) = read_udb(&path).unwrap();

        let matrix = ScoreMatrix::constant(Alphabet::Nucleotide, 5, -4);
        let gaps = GapModel::uniform(5, 1);
        let mut p = SearchParams {
            wordlength: 4,
            qmask: MaskMode::None,
            ..SearchParams::default()
        };
        p.filters.id = 0.8;
        p.filters.maxaccepts = 2;

        for (i, query) in seqs.iter().enumerate() {
            let mut state = SearchState::new(&matrix, &gaps, &p, db.len());
            let before = search_query(
                &mut state, &db, &index, &matrix, &p, b"q", query, None, 1, i as u64,
            );
            let mut state = SearchState::new(&matrix, &gaps, &p, db2.len());
            let after = search_query(
                &mut state, &db2, &index2, &matrix, &p, b"q", query, None, 1, i as u64,
            );

            assert_eq!(before.len(), after.len(), "query {}", i);
            for (x, y) in before.iter().zip(after.iter()) {
                assert_eq!(x.target, y.target);
                assert_eq!(x.nw_score, y.nw_score);
                assert_eq!(x.cigar, y.cigar);
                assert_eq!(x.id, y.id);
            }
        }
    }
}
