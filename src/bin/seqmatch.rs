use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use seqmatch::cli::counters::{OrientCounters, SintaxCounters};
use seqmatch::cli::opts::{CoreArgs, FilterArgs, OutputArgs, ScoringArgs, StrandOpt};
use seqmatch::search::alphabet::{check_sequence, reverse_complement, Alphabet};
use seqmatch::search::db::Database;
use seqmatch::search::driver::SearchParams;
use seqmatch::search::exact::SeqHash;
use seqmatch::search::fastx::{FastxReader, QualityParams};
use seqmatch::search::hits::Strand;
use seqmatch::search::kmerindex::KmerIndex;
use seqmatch::search::mask::{dust, hardmask, MaskMode};
use seqmatch::search::orient::{orient_one, Orientation};
use seqmatch::search::pool::run_search;
use seqmatch::search::results::QueryView;
use seqmatch::search::select::detect_kernel;
use seqmatch::search::sff::{read_sff, SffParams};
use seqmatch::search::sintax::{format_tabbed, sintax_classify, SintaxState};
use seqmatch::search::udb::{detect_udb, read_udb, write_udb};
use seqmatch::search::unique::UniqueKmerCounter;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

/// Similarity search over large nucleotide sequence collections
#[derive(Parser)]
#[command(
    name = "seqmatch",
    about = "K-mer indexed global similarity search for sequence collections",
    version = "0.1.0"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Global similarity search of a query set against a database
    Search {
        /// Query sequences, FASTA or FASTQ [path]
        #[clap(short = 'q', long, value_parser, required = true, help_heading = "Core")]
        query: PathBuf,

        #[command(flatten)]
        core: CoreArgs,
        #[command(flatten)]
        scoring: ScoringArgs,
        #[command(flatten)]
        filters: FilterArgs,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Exact sequence match search; the identity threshold is fixed at 1.0
    SearchExact {
        /// Query sequences, FASTA or FASTQ [path]
        #[clap(short = 'q', long, value_parser, required = true, help_heading = "Core")]
        query: PathBuf,

        #[command(flatten)]
        core: CoreArgs,
        #[command(flatten)]
        scoring: ScoringArgs,

        /// Stop after this many accepted hits per query (0 = all) [integer]
        #[clap(long, default_value = "1", help_heading = "Acceptance")]
        maxaccepts: usize,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Assign query strands by comparing k-mer hits on both strands
    Orient {
        /// Query sequences, FASTA or FASTQ [path]
        #[clap(short = 'q', long, value_parser, required = true, help_heading = "Core")]
        query: PathBuf,

        #[command(flatten)]
        core: CoreArgs,

        /// Oriented sequences [path]
        #[clap(long, help_heading = "Output")]
        fastaout: Option<PathBuf>,

        /// Sequences with undetermined orientation [path]
        #[clap(long, help_heading = "Output")]
        notmatched: Option<PathBuf>,

        /// Per-query orientation and vote counts [path]
        #[clap(long, help_heading = "Output")]
        tabbedout: Option<PathBuf>,
    },

    /// Taxonomic classification by bootstrapped k-mer votes
    Sintax {
        /// Query sequences, FASTA or FASTQ [path]
        #[clap(short = 'q', long, value_parser, required = true, help_heading = "Core")]
        query: PathBuf,

        #[command(flatten)]
        core: CoreArgs,

        /// Classification output [path]
        #[clap(long, required = true, help_heading = "Output")]
        tabbedout: PathBuf,

        /// Minimum bootstrap support for a reported rank [fraction]
        #[clap(long, default_value = "0.0", help_heading = "Acceptance")]
        sintax_cutoff: f64,

        /// Break best-target ties randomly instead of deterministically
        #[clap(long, help_heading = "Core")]
        sintax_random: bool,

        /// Seed for the bootstrap subsampling [integer]
        #[clap(long, default_value = "1", help_heading = "Core")]
        randseed: u64,
    },

    /// Build a UDB index file from a FASTA database
    Makeudb {
        /// Database to index [path]
        #[clap(short = 'd', long, value_parser, required = true, help_heading = "Core")]
        db: PathBuf,

        /// UDB output [path]
        #[clap(short = 'o', long, value_parser, required = true, help_heading = "Core")]
        output: PathBuf,

        /// K-mer word length for the index [integer]
        #[clap(short = 'w', long, default_value = "8", help_heading = "Core")]
        wordlength: u8,
    },

    /// Convert an SFF flowgram file to FASTQ
    SffConvert {
        /// SFF input [path]
        #[clap(short = 'i', long, value_parser, required = true, help_heading = "Core")]
        input: PathBuf,

        /// FASTQ output [path]
        #[clap(short = 'o', long, value_parser, required = true, help_heading = "Core")]
        fastqout: PathBuf,

        /// Trim reads to their quality/adapter clip points [flag]
        #[clap(long, help_heading = "Core")]
        clip: bool,
    },
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("{:?}", e);
        std::process::exit(1);
    }
    std::process::exit(0);
}

fn run() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();

    match cli.command {
        Command::Search {
            query,
            core,
            scoring,
            filters,
            output,
        } => cmd_search(query, core, scoring, filters, output)?,
        Command::SearchExact {
            query,
            core,
            scoring,
            maxaccepts,
            output,
        } => cmd_search_exact(query, core, scoring, maxaccepts, output)?,
        Command::Orient {
            query,
            core,
            fastaout,
            notmatched,
            tabbedout,
        } => cmd_orient(query, core, fastaout, notmatched, tabbedout)?,
        Command::Sintax {
            query,
            core,
            tabbedout,
            sintax_cutoff,
            sintax_random,
            randseed,
        } => cmd_sintax(query, core, tabbedout, sintax_cutoff, sintax_random, randseed)?,
        Command::Makeudb {
            db,
            output,
            wordlength,
        } => cmd_makeudb(db, output, wordlength as usize)?,
        Command::SffConvert {
            input,
            fastqout,
            clip,
        } => cmd_sff_convert(input, fastqout, clip)?,
    }

    let elapsed = start_time.elapsed();
    println!("Elapsed time: {:.2?}", elapsed);
    Ok(())
}

/// Load the reference database, masked as configured, and its k-mer
/// index: from a UDB file directly, or from FASTA/FASTQ plus an index
/// build.
fn load_database(core: &CoreArgs) -> Result<(Database, KmerIndex)> {
    if detect_udb(&core.db)? {
        println!("Start: Loading UDB index");
        return read_udb(&core.db);
    }

    println!("Start: Reading database");
    let mut reader = FastxReader::open(&core.db)?;
    let mut db = Database::new(Alphabet::Nucleotide);
    while let Some(rec) = reader.next_record()? {
        check_sequence(Alphabet::Nucleotide, &rec.sequence, reader.line())?;
        db.push(rec);
    }
    if db.is_empty() {
        bail!("database {:?} holds no sequences", core.db);
    }

    match MaskMode::from(core.dbmask) {
        MaskMode::Dust => db.mask_sequences(|seq| dust(seq)),
        MaskMode::Soft => {
            if core.hardmask {
                db.mask_sequences(|seq| hardmask(seq));
            }
        }
        MaskMode::None => {}
    }

    println!("Start: Indexing unique k-mers");
    let index = KmerIndex::build(&db, core.wordlength as usize, true);
    Ok((db, index))
}

fn cmd_search(
    query: PathBuf,
    core: CoreArgs,
    scoring: ScoringArgs,
    filters: FilterArgs,
    output: OutputArgs,
) -> Result<()> {
    let (db, index) = load_database(&core)?;
    let matrix = scoring.matrix();
    let gaps = scoring.gap_model();
    let params = SearchParams {
        wordlength: index.wordlength(),
        both_strands: core.strand == StrandOpt::Both,
        qmask: core.qmask.into(),
        hardmask: core.hardmask,
        filters: filters.to_filter_params()?,
    };

    let reader = FastxReader::open_with(&query, QualityParams::default())?;
    let sink = output.to_sink()?;

    println!("Start: Searching");
    let (summary, _sink) = run_search(
        &db, &index, &matrix, &gaps, &params, reader, sink, core.threads,
    )?;

    println!(
        "Matching query sequences: {} of {} ({:.2}%)",
        summary.matched,
        summary.queries,
        if summary.queries > 0 {
            100.0 * summary.matched as f64 / summary.queries as f64
        } else {
            0.0
        }
    );
    Ok(())
}

fn cmd_search_exact(
    query: PathBuf,
    core: CoreArgs,
    scoring: ScoringArgs,
    maxaccepts: usize,
    output: OutputArgs,
) -> Result<()> {
    // masking would defeat exact matching, so the database loads as-is
    if detect_udb(&core.db)? {
        bail!("search-exact needs a FASTA/FASTQ database, not UDB");
    }
    println!("Start: Reading database");
    let mut reader = FastxReader::open(&core.db)?;
    let mut db = Database::new(Alphabet::Nucleotide);
    while let Some(rec) = reader.next_record()? {
        check_sequence(Alphabet::Nucleotide, &rec.sequence, reader.line())?;
        db.push(rec);
    }
    if db.is_empty() {
        bail!("database {:?} holds no sequences", core.db);
    }

    println!("Start: Hashing database sequences");
    let hash = SeqHash::build(&db);
    let matrix = scoring.matrix();

    let mut sink = output.to_sink()?;
    let mut reader = FastxReader::open(&query)?;
    let mut queries = 0u64;
    let mut matched = 0u64;

    println!("Start: Searching for exact matches");
    while let Some(rec) = reader.next_record()? {
        queries += 1;
        let mut hits = hash.search_exact_query(&db, &matrix, &rec.sequence, Strand::Plus, maxaccepts);
        let rc = (core.strand == StrandOpt::Both).then(|| reverse_complement(&rec.sequence));
        if let Some(rc) = rc.as_ref() {
            if hits.len() < maxaccepts || maxaccepts == 0 {
                let budget = if maxaccepts == 0 {
                    0
                } else {
                    maxaccepts - hits.len()
                };
                hits.extend(hash.search_exact_query(&db, &matrix, rc, Strand::Minus, budget));
            }
        }
        if !hits.is_empty() {
            matched += 1;
        }
        let view = QueryView {
            header: &rec.header,
            sequence: &rec.sequence,
            sequence_rc: rc.as_deref(),
        };
        sink.write_query(&db, &view, &hits)?;
    }
    sink.flush()?;

    println!(
        "Matching query sequences: {} of {} ({:.2}%)",
        matched,
        queries,
        if queries > 0 {
            100.0 * matched as f64 / queries as f64
        } else {
            0.0
        }
    );
    Ok(())
}

fn open_out(path: &Option<PathBuf>) -> Result<Option<BufWriter<File>>> {
    match path {
        None => Ok(None),
        Some(p) => Ok(Some(BufWriter::new(
            File::create(p).context(format!("creating output file {:?}", p))?,
        ))),
    }
}

fn cmd_orient(
    query: PathBuf,
    core: CoreArgs,
    fastaout: Option<PathBuf>,
    notmatched: Option<PathBuf>,
    tabbedout: Option<PathBuf>,
) -> Result<()> {
    if fastaout.is_none() && notmatched.is_none() && tabbedout.is_none() {
        bail!("orient needs at least one of --fastaout, --notmatched, --tabbedout");
    }
    let (_db, index) = load_database(&core)?;

    let mut fa = open_out(&fastaout)?;
    let mut nm = open_out(&notmatched)?;
    let mut tab = open_out(&tabbedout)?;

    let mut uh = UniqueKmerCounter::new(index.wordlength());
    let mut reader = FastxReader::open(&query)?;
    let mut counters = OrientCounters::default();

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("       {spinner} {pos} sequences oriented")
            .unwrap(),
    );

    println!("Start: Orienting sequences");
    while let Some(rec) = reader.next_record()? {
        counters.total += 1;
        let orientation = orient_one(&index, &mut uh, &rec.sequence);
        let header = String::from_utf8_lossy(&rec.header);

        match orientation {
            Orientation::Forward => {
                counters.forward += 1;
                if let Some(f) = fa.as_mut() {
                    writeln!(f, ">{}", header)?;
                    f.write_all(&rec.sequence)?;
                    writeln!(f)?;
                }
            }
            Orientation::Reverse => {
                counters.reverse += 1;
                if let Some(f) = fa.as_mut() {
                    writeln!(f, ">{}", header)?;
                    f.write_all(&reverse_complement(&rec.sequence))?;
                    writeln!(f)?;
                }
            }
            Orientation::Undetermined => {
                counters.undetermined += 1;
                if let Some(f) = nm.as_mut() {
                    writeln!(f, ">{}", header)?;
                    f.write_all(&rec.sequence)?;
                    writeln!(f)?;
                }
            }
        }
        if let Some(f) = tab.as_mut() {
            writeln!(f, "{}\t{}", header, orientation.symbol())?;
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!(
        "Forward oriented: {}, reverse oriented: {}, undetermined: {} (of {})",
        counters.forward, counters.reverse, counters.undetermined, counters.total
    );
    Ok(())
}

fn cmd_sintax(
    query: PathBuf,
    core: CoreArgs,
    tabbedout: PathBuf,
    cutoff: f64,
    random_ties: bool,
    seed: u64,
) -> Result<()> {
    let (db, index) = load_database(&core)?;

    let mut out = BufWriter::new(
        File::create(&tabbedout).context(format!("creating output file {:?}", tabbedout))?,
    );
    let mut state = SintaxState::new(index.wordlength(), detect_kernel(), seed, random_ties);
    let mut reader = FastxReader::open(&query)?;
    let mut counters = SintaxCounters::default();

    println!("Start: Classifying sequences");
    while let Some(rec) = reader.next_record()? {
        counters.total += 1;
        let result = sintax_classify(
            &mut state,
            &index,
            &db,
            &rec.sequence,
            core.strand == StrandOpt::Both,
        );
        if result.classified {
            counters.classified += 1;
        }
        writeln!(out, "{}", format_tabbed(&rec.header, &result, cutoff))?;
    }

    println!(
        "Classified {} of {} sequences ({:.2}%)",
        counters.classified,
        counters.total,
        if counters.total > 0 {
            100.0 * counters.classified as f64 / counters.total as f64
        } else {
            0.0
        }
    );
    Ok(())
}

fn cmd_makeudb(db_path: PathBuf, output: PathBuf, wordlength: usize) -> Result<()> {
    println!("Start: Reading database");
    let mut reader = FastxReader::open(&db_path)?;
    let mut db = Database::new(Alphabet::Nucleotide);
    while let Some(rec) = reader.next_record()? {
        check_sequence(Alphabet::Nucleotide, &rec.sequence, reader.line())?;
        db.push(rec);
    }
    if db.is_empty() {
        bail!("database {:?} holds no sequences", db_path);
    }

    println!("Start: Indexing unique k-mers");
    let index = KmerIndex::build(&db, wordlength, true);

    println!("Start: Writing UDB file");
    write_udb(&output, &db, &index)?;
    println!(
        "Wrote {} sequences, {} symbols",
        db.len(),
        db.total_symbols()
    );
    Ok(())
}

fn cmd_sff_convert(input: PathBuf, fastqout: PathBuf, clip: bool) -> Result<()> {
    println!("Start: Reading SFF file");
    let records = read_sff(
        &input,
        SffParams {
            clip,
            ..SffParams::default()
        },
    )?;

    let mut out = BufWriter::new(
        File::create(&fastqout).context(format!("creating output file {:?}", fastqout))?,
    );
    for rec in &records {
        writeln!(out, "@{}", String::from_utf8_lossy(&rec.header))?;
        out.write_all(&rec.sequence)?;
        writeln!(out)?;
        writeln!(out, "+")?;
        out.write_all(rec.quality.as_deref().unwrap_or(&[]))?;
        writeln!(out)?;
    }
    println!("Converted {} reads", records.len());
    Ok(())
}
