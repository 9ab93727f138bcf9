use crate::search::db::Database;
use crate::search::hits::Hit;
use crate::search::nw::cigar_to_ops;
use anyhow::{bail, Result};
use std::io::Write;

/// Width of the sequence rows in the human-readable alignment output.
const ALN_ROWLEN: usize = 64;

/// One column of the user-defined tabular output. Names follow the
/// published vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserField {
    Query,
    Target,
    Evalue,
    Id,
    Pctpv,
    Pctgaps,
    Pairs,
    Gaps,
    Qlo,
    Qhi,
    Tlo,
    Thi,
    Pv,
    Ql,
    Tl,
    Qs,
    Ts,
    Alnlen,
    Opens,
    Exts,
    Raw,
    Bits,
    Aln,
    Caln,
    Qstrand,
    Tstrand,
    Qrow,
    Trow,
    Qframe,
    Tframe,
    Mism,
    Ids,
    Qcov,
    Tcov,
}

impl UserField {
    pub fn parse_list(spec: &str) -> Result<Vec<UserField>> {
        spec.split('+')
            .map(|name| match name {
                "query" => Ok(UserField::Query),
                "target" => Ok(UserField::Target),
                "evalue" => Ok(UserField::Evalue),
                "id" => Ok(UserField::Id),
                "pctpv" => Ok(UserField::Pctpv),
                "pctgaps" => Ok(UserField::Pctgaps),
                "pairs" => Ok(UserField::Pairs),
                "gaps" => Ok(UserField::Gaps),
                "qlo" => Ok(UserField::Qlo),
                "qhi" => Ok(UserField::Qhi),
                "tlo" => Ok(UserField::Tlo),
                "thi" => Ok(UserField::Thi),
                "pv" => Ok(UserField::Pv),
                "ql" => Ok(UserField::Ql),
                "tl" => Ok(UserField::Tl),
                "qs" => Ok(UserField::Qs),
                "ts" => Ok(UserField::Ts),
                "alnlen" => Ok(UserField::Alnlen),
                "opens" => Ok(UserField::Opens),
                "exts" => Ok(UserField::Exts),
                "raw" => Ok(UserField::Raw),
                "bits" => Ok(UserField::Bits),
                "aln" => Ok(UserField::Aln),
                "caln" => Ok(UserField::Caln),
                "qstrand" => Ok(UserField::Qstrand),
                "tstrand" => Ok(UserField::Tstrand),
                "qrow" => Ok(UserField::Qrow),
                "trow" => Ok(UserField::Trow),
                "qframe" => Ok(UserField::Qframe),
                "tframe" => Ok(UserField::Tframe),
                "mism" => Ok(UserField::Mism),
                "ids" => Ok(UserField::Ids),
                "qcov" => Ok(UserField::Qcov),
                "tcov" => Ok(UserField::Tcov),
                other => bail!("unknown userout field '{}'", other),
            })
            .collect()
    }
}

/// Build one gapped alignment row. `target_row` selects which sequence
/// the gaps are punched into.
pub fn align_getrow(seq: &[u8], cigar: &str, target_row: bool) -> Vec<u8> {
    let mut row = Vec::new();
    let mut pos = 0usize;
    for (op, count) in cigar_to_ops(cigar) {
        let consumes = match op {
            b'M' => true,
            b'I' => target_row,
            b'D' => !target_row,
            _ => true,
        };
        for _ in 0..count {
            if consumes {
                row.push(seq[pos]);
                pos += 1;
            } else {
                row.push(b'-');
            }
        }
    }
    row
}

/// Expand an RLE CIGAR into its letter-per-column form.
pub fn uncompressed_alignment(cigar: &str) -> String {
    let mut s = String::new();
    for (op, count) in cigar_to_ops(cigar) {
        for _ in 0..count {
            s.push(op as char);
        }
    }
    s
}

/// Behavioural switches for the output writers.
#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    /// Report at most this many hits per query; 0 means all.
    pub maxhits: usize,
    /// Only hits tying the best identity.
    pub top_hits_only: bool,
    /// Every hit in the uc file rather than just the best.
    pub uc_allhits: bool,
    /// Emit a no-hit sentinel record for empty results.
    pub output_no_hits: bool,
}

pub type Out = Box<dyn Write + Send>;

/// All configured output streams, written under the output mutex.
#[derive(Default)]
pub struct OutputSink {
    pub opts: OutputOptions,
    pub userfields: Vec<UserField>,
    pub blast6: Option<Out>,
    pub uc: Option<Out>,
    pub alnout: Option<Out>,
    pub userout: Option<Out>,
    pub fastapairs: Option<Out>,
    pub matched: Option<Out>,
    pub notmatched: Option<Out>,
}

/// Everything about the query the writers need.
pub struct QueryView<'a> {
    pub header: &'a [u8],
    pub sequence: &'a [u8],
    /// Reverse-complemented sequence, present when minus-strand hits
    /// can occur.
    pub sequence_rc: Option<&'a [u8]>,
}

impl<'a> QueryView<'a> {
    fn seq_for(&self, hit: &Hit) -> &'a [u8] {
        match hit.strand {
            crate::search::hits::Strand::Plus => self.sequence,
            crate::search::hits::Strand::Minus => self.sequence_rc.unwrap_or(self.sequence),
        }
    }
}

impl OutputSink {
    /// Flush every configured stream.
    pub fn flush(&mut self) -> Result<()> {
        for stream in [
            self.blast6.as_mut(),
            self.uc.as_mut(),
            self.alnout.as_mut(),
            self.userout.as_mut(),
            self.fastapairs.as_mut(),
            self.matched.as_mut(),
            self.notmatched.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            stream.flush()?;
        }
        Ok(())
    }

    /// Write every record this query produces. Callers hold the output
    /// mutex for the whole call, so one query's records never interleave
    /// with another's.
    pub fn write_query(&mut self, db: &Database, query: &QueryView, hits: &[Hit]) -> Result<()> {
        let toreport = if self.opts.maxhits > 0 {
            hits.len().min(self.opts.maxhits)
        } else {
            hits.len()
        };
        let top_id = hits.first().map(|h| h.id).unwrap_or(0.0);

        if let Some(f) = self.alnout.as_mut() {
            write_alnout(f, db, query, &hits[..toreport])?;
        }

        if toreport > 0 {
            for (t, hit) in hits[..toreport].iter().enumerate() {
                if self.opts.top_hits_only && hit.id < top_id {
                    break;
                }
                if let Some(f) = self.fastapairs.as_mut() {
                    write_fastapairs_one(f, db, query, hit)?;
                }
                if let Some(f) = self.uc.as_mut() {
                    if t == 0 || self.opts.uc_allhits {
                        write_uc_one(f, db, query, hit)?;
                    }
                }
                if let Some(f) = self.userout.as_mut() {
                    write_userout_one(f, &self.userfields, db, query, Some(hit))?;
                }
                if let Some(f) = self.blast6.as_mut() {
                    write_blast6_one(f, db, query, Some(hit))?;
                }
            }
        } else if self.opts.output_no_hits {
            if let Some(f) = self.uc.as_mut() {
                writeln!(
                    f,
                    "N\t*\t*\t*\t.\t*\t*\t*\t{}\t*",
                    String::from_utf8_lossy(query.header)
                )?;
            }
            if let Some(f) = self.userout.as_mut() {
                write_userout_one(f, &self.userfields, db, query, None)?;
            }
            if let Some(f) = self.blast6.as_mut() {
                write_blast6_one(f, db, query, None)?;
            }
        }

        if !hits.is_empty() {
            if let Some(f) = self.matched.as_mut() {
                write_fasta(f, query.header, query.sequence)?;
            }
        } else if let Some(f) = self.notmatched.as_mut() {
            write_fasta(f, query.header, query.sequence)?;
        }

        Ok(())
    }
}

fn write_fasta(f: &mut Out, header: &[u8], seq: &[u8]) -> Result<()> {
    writeln!(f, ">{}", String::from_utf8_lossy(header))?;
    for chunk in seq.chunks(80) {
        f.write_all(chunk)?;
        writeln!(f)?;
    }
    Ok(())
}

fn write_blast6_one(
    f: &mut Out,
    db: &Database,
    query: &QueryView,
    hit: Option<&Hit>,
) -> Result<()> {
    let qh = String::from_utf8_lossy(query.header);
    match hit {
        None => writeln!(f, "{}\t*\t0.0\t0\t0\t0\t0\t0\t0\t0\t*\t*", qh)?,
        Some(hit) => {
            let qlen = query.seq_for(hit).len() as u32;
            let tlen = db.sequence_len(hit.target as usize) as u32;
            writeln!(
                f,
                "{}\t{}\t{:.1}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t*\t*",
                qh,
                String::from_utf8_lossy(db.header(hit.target as usize)),
                hit.id,
                hit.internal_alen,
                hit.mismatches,
                hit.internal_gaps,
                hit.trim_q_left + 1,
                qlen - hit.trim_q_right,
                hit.trim_t_left + 1,
                tlen - hit.trim_t_right,
            )?;
        }
    }
    Ok(())
}

fn write_uc_one(f: &mut Out, db: &Database, query: &QueryView, hit: &Hit) -> Result<()> {
    let qseq = query.seq_for(hit);
    let tlen = db.sequence_len(hit.target as usize);
    let compressed = if hit.matches as usize == qseq.len() && qseq.len() == tlen {
        "=".to_string()
    } else {
        hit.cigar.clone()
    };
    writeln!(
        f,
        "H\t{}\t{}\t{:.1}\t{}\t0\t0\t{}\t{}\t{}",
        hit.target,
        qseq.len(),
        hit.id,
        hit.strand.symbol(),
        compressed,
        String::from_utf8_lossy(query.header),
        String::from_utf8_lossy(db.header(hit.target as usize)),
    )?;
    Ok(())
}

fn write_fastapairs_one(f: &mut Out, db: &Database, query: &QueryView, hit: &Hit) -> Result<()> {
    let qseq = query.seq_for(hit);
    let tseq = db.sequence(hit.target as usize);
    let qrow = align_getrow(qseq, &hit.cigar, false);
    let trow = align_getrow(tseq, &hit.cigar, true);
    writeln!(f, ">{}", String::from_utf8_lossy(query.header))?;
    f.write_all(&qrow)?;
    writeln!(f)?;
    writeln!(f, ">{}", String::from_utf8_lossy(db.header(hit.target as usize)))?;
    f.write_all(&trow)?;
    writeln!(f)?;
    writeln!(f)?;
    Ok(())
}

fn write_userout_one(
    f: &mut Out,
    fields: &[UserField],
    db: &Database,
    query: &QueryView,
    hit: Option<&Hit>,
) -> Result<()> {
    for (c, field) in fields.iter().enumerate() {
        if c > 0 {
            write!(f, "\t")?;
        }
        let Some(hit) = hit else {
            match field {
                UserField::Query => write!(f, "{}", String::from_utf8_lossy(query.header))?,
                _ => write!(f, "*")?,
            }
            continue;
        };

        let qseq = query.seq_for(hit);
        let qlen = qseq.len();
        let tlen = db.sequence_len(hit.target as usize);
        let alen = hit.internal_alen.max(1);
        match field {
            UserField::Query => write!(f, "{}", String::from_utf8_lossy(query.header))?,
            UserField::Target => write!(
                f,
                "{}",
                String::from_utf8_lossy(db.header(hit.target as usize))
            )?,
            UserField::Evalue => write!(f, "-1")?,
            UserField::Id => write!(f, "{:.1}", hit.id)?,
            UserField::Pctpv => write!(
                f,
                "{:.1}",
                100.0 * hit.matches as f64 / alen as f64
            )?,
            UserField::Pctgaps => write!(
                f,
                "{:.1}",
                100.0 * hit.internal_indels as f64 / alen as f64
            )?,
            UserField::Pairs => write!(f, "{}", hit.matches + hit.mismatches)?,
            UserField::Gaps => write!(f, "{}", hit.internal_indels)?,
            UserField::Qlo => write!(f, "1")?,
            UserField::Qhi => write!(f, "{}", qlen)?,
            UserField::Tlo => write!(f, "1")?,
            UserField::Thi => write!(f, "{}", tlen)?,
            UserField::Pv => write!(f, "{}", hit.matches)?,
            UserField::Ql => write!(f, "{}", qlen)?,
            UserField::Tl => write!(f, "{}", tlen)?,
            UserField::Qs => write!(f, "{}", qlen)?,
            UserField::Ts => write!(f, "{}", tlen)?,
            UserField::Alnlen => write!(f, "{}", hit.internal_alen)?,
            UserField::Opens => write!(f, "{}", hit.internal_gaps)?,
            UserField::Exts => write!(f, "{}", hit.internal_indels - hit.internal_gaps)?,
            UserField::Raw => write!(f, "0")?,
            UserField::Bits => write!(f, "0")?,
            UserField::Aln => write!(f, "{}", uncompressed_alignment(&hit.cigar))?,
            UserField::Caln => write!(f, "{}", hit.cigar)?,
            UserField::Qstrand => write!(f, "{}", hit.strand.symbol())?,
            UserField::Tstrand => write!(f, "+")?,
            UserField::Qrow => {
                let row = align_getrow(qseq, &hit.cigar, false);
                let from = (hit.trim_q_left + hit.trim_t_left) as usize;
                f.write_all(&row[from..from + hit.internal_alen as usize])?;
            }
            UserField::Trow => {
                let tseq = db.sequence(hit.target as usize);
                let row = align_getrow(tseq, &hit.cigar, true);
                let from = (hit.trim_q_left + hit.trim_t_left) as usize;
                f.write_all(&row[from..from + hit.internal_alen as usize])?;
            }
            UserField::Qframe => write!(f, "+0")?,
            UserField::Tframe => write!(f, "+0")?,
            UserField::Mism => write!(f, "{}", hit.mismatches)?,
            UserField::Ids => write!(f, "{}", hit.matches)?,
            UserField::Qcov => write!(
                f,
                "{:.0}",
                100.0 * (hit.matches + hit.mismatches) as f64 / qlen as f64
            )?,
            UserField::Tcov => write!(
                f,
                "{:.0}",
                100.0 * (hit.matches + hit.mismatches) as f64 / tlen as f64
            )?,
        }
    }
    writeln!(f)?;
    Ok(())
}

fn write_alnout(f: &mut Out, db: &Database, query: &QueryView, hits: &[Hit]) -> Result<()> {
    if hits.is_empty() {
        return Ok(());
    }
    writeln!(f, "Query >{}", String::from_utf8_lossy(query.header))?;
    writeln!(f, " %Id   TLen  Target")?;
    for hit in hits {
        writeln!(
            f,
            "{:3.0}% {:6}  {}",
            hit.id,
            db.sequence_len(hit.target as usize),
            String::from_utf8_lossy(db.header(hit.target as usize))
        )?;
    }
    writeln!(f)?;

    for hit in hits {
        let qseq = query.seq_for(hit);
        let tseq = db.sequence(hit.target as usize);
        writeln!(
            f,
            " Query {}nt >{}",
            qseq.len(),
            String::from_utf8_lossy(query.header)
        )?;
        writeln!(
            f,
            "Target {}nt >{}",
            tseq.len(),
            String::from_utf8_lossy(db.header(hit.target as usize))
        )?;
        writeln!(f)?;

        let qrow = align_getrow(qseq, &hit.cigar, false);
        let trow = align_getrow(tseq, &hit.cigar, true);
        let mut qpos = 1usize;
        let mut tpos = 1usize;
        for start in (0..qrow.len()).step_by(ALN_ROWLEN) {
            let end = (start + ALN_ROWLEN).min(qrow.len());
            let qchunk = &qrow[start..end];
            let tchunk = &trow[start..end];
            let qconsumed = qchunk.iter().filter(|&&b| b != b'-').count();
            let tconsumed = tchunk.iter().filter(|&&b| b != b'-').count();

            let midline: String = qchunk
                .iter()
                .zip(tchunk.iter())
                .map(|(&a, &b)| {
                    if a != b'-' && b != b'-' && a.eq_ignore_ascii_case(&b) {
                        '|'
                    } else {
                        ' '
                    }
                })
                .collect();

            writeln!(
                f,
                "Qry {:>6} {} {}",
                qpos,
                hit.strand.symbol(),
                String::from_utf8_lossy(qchunk)
            )?;
            writeln!(f, "         {}", midline)?;
            writeln!(
                f,
                "Tgt {:>6} + {}",
                tpos,
                String::from_utf8_lossy(tchunk)
            )?;
            writeln!(f)?;
            qpos += qconsumed;
            tpos += tconsumed;
        }

        writeln!(
            f,
            "{} cols, {} ids ({:.1}%), {} gaps ({:.1}%)",
            hit.nw_alen,
            hit.matches,
            hit.id1,
            hit.nw_indels,
            if hit.nw_alen > 0 {
                100.0 * hit.nw_indels as f64 / hit.nw_alen as f64
            } else {
                0.0
            }
        )?;
        writeln!(f, " [{} kmers, {} costs, {} gap opens]", hit.count, hit.nw_score, hit.nw_gaps)?;
        writeln!(f)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gapped_rows_from_cigar() {
        // query ACAT vs target ACGGAT through 2M2I2M
        let qrow = align_getrow(b"ACAT", "2M2I2M", false);
        let trow = align_getrow(b"ACGGAT", "2M2I2M", true);
        assert_eq!(qrow, b"AC--AT");
        assert_eq!(trow, b"ACGGAT");
    }

    #[test]
    fn field_list_parses_and_rejects() {
        let fields = UserField::parse_list("query+target+id+caln").unwrap();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[3], UserField::Caln);
        assert!(UserField::parse_list("query+bogus").is_err());
    }

    #[test]
    fn uncompressed_expansion() {
        assert_eq!(uncompressed_alignment("2M2I2M"), "MMIIMM");
        assert_eq!(uncompressed_alignment("M"), "M");
    }
}
