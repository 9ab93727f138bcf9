use crate::search::alphabet::Alphabet;
use crate::search::mask::MaskMode;
use crate::search::policy::FilterParams;
use crate::search::results::{OutputOptions, OutputSink, UserField};
use crate::search::scorematrix::{GapModel, ScoreMatrix};
use anyhow::{bail, Context, Result};
use clap::{value_parser, Args, ValueEnum};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrandOpt {
    Plus,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MaskOpt {
    None,
    Dust,
    Soft,
}

impl From<MaskOpt> for MaskMode {
    fn from(value: MaskOpt) -> Self {
        match value {
            MaskOpt::None => MaskMode::None,
            MaskOpt::Dust => MaskMode::Dust,
            MaskOpt::Soft => MaskMode::Soft,
        }
    }
}

#[derive(Debug, Args)]
pub struct CoreArgs {
    /// Reference database, FASTA/FASTQ or UDB [path]
    #[clap(short = 'd', long, value_parser, required = true, help_heading = "Core")]
    pub db: PathBuf,

    /// Number of worker threads [integer]
    #[clap(short = 't', long, default_value = "1", help_heading = "Core")]
    pub threads: usize,

    /// K-mer word length for the index [integer]
    #[clap(short = 'w', long, default_value = "8", value_parser = value_parser!(u8).range(3..16), help_heading = "Core")]
    pub wordlength: u8,

    /// Query strand(s) to search
    #[clap(long, value_enum, default_value = "plus", help_heading = "Core")]
    pub strand: StrandOpt,

    /// Low-complexity masking applied to queries
    #[clap(long, value_enum, default_value = "dust", help_heading = "Masking")]
    pub qmask: MaskOpt,

    /// Low-complexity masking applied to the database
    #[clap(long, value_enum, default_value = "dust", help_heading = "Masking")]
    pub dbmask: MaskOpt,

    /// Convert soft-masked (lowercase) symbols to N
    #[clap(long, help_heading = "Masking")]
    pub hardmask: bool,
}

#[derive(Debug, Args)]
pub struct ScoringArgs {
    /// Score for a symbol match [integer]
    #[clap(long = "match", default_value = "2", allow_hyphen_values = true, help_heading = "Scoring")]
    pub match_score: i64,

    /// Score for a symbol mismatch [integer]
    #[clap(long = "mismatch", default_value = "-4", allow_hyphen_values = true, help_heading = "Scoring")]
    pub mismatch_score: i64,

    /// Gap open penalty, all regimes unless overridden [integer]
    #[clap(long, default_value = "20", help_heading = "Scoring")]
    pub gap_open: i64,

    /// Gap extension penalty, all regimes unless overridden [integer]
    #[clap(long, default_value = "2", help_heading = "Scoring")]
    pub gap_extend: i64,

    /// Override: gap open at the query ends [integer]
    #[clap(long, help_heading = "Scoring")]
    pub gap_open_query_ends: Option<i64>,

    /// Override: gap open at the target ends [integer]
    #[clap(long, help_heading = "Scoring")]
    pub gap_open_target_ends: Option<i64>,

    /// Override: gap extension at the query ends [integer]
    #[clap(long, help_heading = "Scoring")]
    pub gap_extend_query_ends: Option<i64>,

    /// Override: gap extension at the target ends [integer]
    #[clap(long, help_heading = "Scoring")]
    pub gap_extend_target_ends: Option<i64>,
}

impl ScoringArgs {
    pub fn matrix(&self) -> ScoreMatrix {
        ScoreMatrix::constant(Alphabet::Nucleotide, self.match_score, self.mismatch_score)
    }

    pub fn gap_model(&self) -> GapModel {
        let mut g = GapModel::uniform(self.gap_open, self.gap_extend);
        if let Some(v) = self.gap_open_query_ends {
            g.open_query_left = v;
            g.open_query_right = v;
        }
        if let Some(v) = self.gap_open_target_ends {
            g.open_target_left = v;
            g.open_target_right = v;
        }
        if let Some(v) = self.gap_extend_query_ends {
            g.extend_query_left = v;
            g.extend_query_right = v;
        }
        if let Some(v) = self.gap_extend_target_ends {
            g.extend_target_left = v;
            g.extend_target_right = v;
        }
        g
    }
}

#[derive(Debug, Args)]
pub struct FilterArgs {
    /// Minimum identity for an accepted hit, 0..1 [fraction]
    #[clap(long, required = true, help_heading = "Acceptance")]
    pub id: f64,

    /// Identity below which a hit is rejected outright [fraction]
    #[clap(long, default_value = "0.0", help_heading = "Acceptance")]
    pub weak_id: f64,

    /// Identity definition (0 CD-HIT, 1 all diffs, 2 internal diffs, 3 MBL, 4 BLAST)
    #[clap(long, default_value = "2", value_parser = value_parser!(u8).range(0..5), help_heading = "Acceptance")]
    pub iddef: u8,

    /// Stop after this many accepted hits per query (0 = all) [integer]
    #[clap(long, default_value = "1", help_heading = "Acceptance")]
    pub maxaccepts: usize,

    /// Stop after this many rejected candidates per query (0 = all) [integer]
    #[clap(long, default_value = "32", help_heading = "Acceptance")]
    pub maxrejects: usize,

    /// Maximum substitutions in an accepted alignment [integer]
    #[clap(long, help_heading = "Filtering")]
    pub maxsubs: Option<u32>,

    /// Maximum interior gap opens [integer]
    #[clap(long, help_heading = "Filtering")]
    pub maxgaps: Option<u32>,

    /// Minimum interior alignment length [integer]
    #[clap(long, default_value = "0", help_heading = "Filtering")]
    pub mincols: u32,

    /// Reject hits with terminal gaps on the left [flag]
    #[clap(long, help_heading = "Filtering")]
    pub leftjust: bool,

    /// Reject hits with terminal gaps on the right [flag]
    #[clap(long, help_heading = "Filtering")]
    pub rightjust: bool,

    /// Minimum fraction of the query covered by the alignment [fraction]
    #[clap(long, default_value = "0.0", help_heading = "Filtering")]
    pub query_cov: f64,

    /// Minimum fraction of the target covered by the alignment [fraction]
    #[clap(long, default_value = "0.0", help_heading = "Filtering")]
    pub target_cov: f64,

    /// Maximum identity for an accepted hit [fraction]
    #[clap(long, default_value = "1.0", help_heading = "Filtering")]
    pub maxid: f64,

    /// Minimum percentage of matches among alignment pairs [percent]
    #[clap(long, default_value = "0.0", help_heading = "Filtering")]
    pub mid: f64,

    /// Maximum mismatches plus interior indels [integer]
    #[clap(long, help_heading = "Filtering")]
    pub maxdiffs: Option<u32>,

    /// Required identical prefix length [integer]
    #[clap(long, default_value = "0", help_heading = "Filtering")]
    pub idprefix: usize,

    /// Required identical suffix length [integer]
    #[clap(long, default_value = "0", help_heading = "Filtering")]
    pub idsuffix: usize,

    /// Skip targets with the same label as the query [flag]
    #[clap(long = "self", help_heading = "Filtering")]
    pub exclude_self: bool,

    /// Skip targets with the same sequence as the query [flag]
    #[clap(long = "selfid", help_heading = "Filtering")]
    pub exclude_selfid: bool,

    /// Minimum shorter/longer length ratio [fraction]
    #[clap(long, default_value = "0.0", help_heading = "Filtering")]
    pub minsl: f64,

    /// Maximum shorter/longer length ratio [fraction]
    #[clap(long, help_heading = "Filtering")]
    pub maxsl: Option<f64>,

    /// Minimum query/target length ratio [fraction]
    #[clap(long, default_value = "0.0", help_heading = "Filtering")]
    pub minqt: f64,

    /// Maximum query/target length ratio [fraction]
    #[clap(long, help_heading = "Filtering")]
    pub maxqt: Option<f64>,

    /// Maximum query abundance [integer]
    #[clap(long, help_heading = "Filtering")]
    pub maxqsize: Option<u64>,

    /// Minimum target abundance [integer]
    #[clap(long, default_value = "0", help_heading = "Filtering")]
    pub mintsize: u64,

    /// Minimum query/target abundance ratio [fraction]
    #[clap(long, default_value = "0.0", help_heading = "Filtering")]
    pub minsizeratio: f64,

    /// Maximum query/target abundance ratio [fraction]
    #[clap(long, help_heading = "Filtering")]
    pub maxsizeratio: Option<f64>,
}

impl FilterArgs {
    pub fn to_filter_params(&self) -> Result<FilterParams> {
        if !(0.0..=1.0).contains(&self.id) {
            bail!("--id must be within 0..1");
        }
        Ok(FilterParams {
            maxaccepts: self.maxaccepts,
            maxrejects: self.maxrejects,
            id: self.id,
            weak_id: self.weak_id,
            iddef: self.iddef,
            maxqsize: self.maxqsize.unwrap_or(u64::MAX),
            mintsize: self.mintsize,
            minsizeratio: self.minsizeratio,
            maxsizeratio: self.maxsizeratio.unwrap_or(f64::INFINITY),
            minqt: self.minqt,
            maxqt: self.maxqt.unwrap_or(f64::INFINITY),
            minsl: self.minsl,
            maxsl: self.maxsl.unwrap_or(f64::INFINITY),
            idprefix: self.idprefix,
            idsuffix: self.idsuffix,
            exclude_self: self.exclude_self,
            exclude_selfid: self.exclude_selfid,
            maxsubs: self.maxsubs.unwrap_or(u32::MAX),
            maxgaps: self.maxgaps.unwrap_or(u32::MAX),
            mincols: self.mincols,
            leftjust: self.leftjust,
            rightjust: self.rightjust,
            query_cov: self.query_cov,
            target_cov: self.target_cov,
            maxid: self.maxid,
            mid: self.mid,
            maxdiffs: self.maxdiffs.unwrap_or(u32::MAX),
        })
    }
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    /// BLAST-like tab-separated output [path]
    #[clap(long, help_heading = "Output")]
    pub blast6out: Option<PathBuf>,

    /// Cluster-format output [path]
    #[clap(long, help_heading = "Output")]
    pub uc: Option<PathBuf>,

    /// Human-readable alignment output [path]
    #[clap(long, help_heading = "Output")]
    pub alnout: Option<PathBuf>,

    /// User-defined tab-separated output [path]
    #[clap(long, help_heading = "Output")]
    pub userout: Option<PathBuf>,

    /// Fields for --userout, joined with '+' (e.g. query+target+id)
    #[clap(long, default_value = "query+target+id", help_heading = "Output")]
    pub userfields: String,

    /// Aligned query/target pairs as FASTA [path]
    #[clap(long, help_heading = "Output")]
    pub fastapairs: Option<PathBuf>,

    /// Queries with at least one hit [path]
    #[clap(long, help_heading = "Output")]
    pub matched: Option<PathBuf>,

    /// Queries without any hit [path]
    #[clap(long, help_heading = "Output")]
    pub notmatched: Option<PathBuf>,

    /// Report at most this many hits per query (0 = all) [integer]
    #[clap(long, default_value = "0", help_heading = "Output")]
    pub maxhits: usize,

    /// Only report hits tying the best identity [flag]
    #[clap(long, help_heading = "Output")]
    pub top_hits_only: bool,

    /// Write every hit to the uc file, not just the best [flag]
    #[clap(long, help_heading = "Output")]
    pub uc_allhits: bool,

    /// Emit a sentinel record for queries without hits [flag]
    #[clap(long, help_heading = "Output")]
    pub output_no_hits: bool,
}

fn open_out(path: &Option<PathBuf>) -> Result<Option<Box<dyn std::io::Write + Send>>> {
    match path {
        None => Ok(None),
        Some(p) => {
            let f = File::create(p).context(format!("creating output file {:?}", p))?;
            Ok(Some(Box::new(BufWriter::new(f))))
        }
    }
}

impl OutputArgs {
    pub fn to_sink(&self) -> Result<OutputSink> {
        Ok(OutputSink {
            opts: OutputOptions {
                maxhits: self.maxhits,
                top_hits_only: self.top_hits_only,
                uc_allhits: self.uc_allhits,
                output_no_hits: self.output_no_hits,
            },
            userfields: UserField::parse_list(&self.userfields)?,
            blast6: open_out(&self.blast6out)?,
            uc: open_out(&self.uc)?,
            alnout: open_out(&self.alnout)?,
            userout: open_out(&self.userout)?,
            fastapairs: open_out(&self.fastapairs)?,
            matched: open_out(&self.matched)?,
            notmatched: open_out(&self.notmatched)?,
        })
    }
}
