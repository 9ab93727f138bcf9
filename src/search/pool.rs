use crate::search::alphabet::reverse_complement;
use crate::search::db::Database;
use crate::search::driver::{mask_query, search_query, SearchParams, SearchState};
use crate::search::fastx::FastxReader;
use crate::search::kmerindex::KmerIndex;
use crate::search::results::{OutputSink, QueryView};
use crate::search::scorematrix::{GapModel, ScoreMatrix};
use anyhow::{anyhow, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;

/// Shared end-of-run accounting.
#[derive(Debug, Default)]
pub struct SearchSummary {
    pub queries: u64,
    pub matched: u64,
    /// Per-database-record accepted-hit counts.
    pub dbmatched: Vec<u32>,
}

struct InputShared {
    reader: FastxReader,
    next_query_no: u64,
}

struct OutputShared {
    sink: OutputSink,
    summary: SearchSummary,
    progress: ProgressBar,
}

/// Drive the search over a query stream with a fixed pool of workers.
///
/// Two mutexes carry all synchronisation: `input` guards the record
/// reader and the query counter, `output` guards result emission, the
/// shared counters and the progress bar. A worker takes `input`, pulls
/// one query, releases it, computes the hit list on private scratch,
/// then takes `output` to emit. Queries are consumed in input order;
/// emission order across queries follows thread scheduling.
#[allow(clippy::too_many_arguments)]
pub fn run_search(
    db: &Database,
    index: &KmerIndex,
    matrix: &ScoreMatrix,
    gaps: &GapModel,
    params: &SearchParams,
    reader: FastxReader,
    sink: OutputSink,
    threads: usize,
) -> Result<(SearchSummary, OutputSink)> {
    let threads = threads.max(1);

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("       {spinner} {pos} queries {msg}")
            .unwrap(),
    );

    let input = Mutex::new(InputShared {
        reader,
        next_query_no: 0,
    });
    let output = Mutex::new(OutputShared {
        sink,
        summary: SearchSummary {
            dbmatched: vec![0u32; db.len()],
            ..SearchSummary::default()
        },
        progress,
    });
    let failure: Mutex<Option<anyhow::Error>> = Mutex::new(None);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()?;

    pool.scope(|scope| {
        for _ in 0..threads {
            scope.spawn(|_| {
                let mut state = SearchState::new(matrix, gaps, params, db.len());
                loop {
                    // input mutex: one record and its ordinal
                    let (record, query_no) = {
                        let mut guard = input.lock().unwrap();
                        match guard.reader.next_record() {
                            Ok(Some(rec)) => {
                                let no = guard.next_query_no;
                                guard.next_query_no += 1;
                                (rec, no)
                            }
                            Ok(None) => break,
                            Err(e) => {
                                let mut slot = failure.lock().unwrap();
                                if slot.is_none() {
                                    *slot = Some(e);
                                }
                                break;
                            }
                        }
                    };

                    let mut masked = record.sequence.clone();
                    mask_query(params, &mut masked);
                    let rc = params
                        .both_strands
                        .then(|| reverse_complement(&masked));

                    let hits = search_query(
                        &mut state,
                        db,
                        index,
                        matrix,
                        params,
                        record.label(),
                        &masked,
                        rc.as_deref(),
                        record.abundance,
                        query_no,
                    );

                    // output mutex: emission, counters, progress
                    let mut out = output.lock().unwrap();
                    let view = QueryView {
                        header: &record.header,
                        sequence: &masked,
                        sequence_rc: rc.as_deref(),
                    };
                    if let Err(e) = out.sink.write_query(db, &view, &hits) {
                        let mut slot = failure.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                        break;
                    }
                    out.summary.queries += 1;
                    if !hits.is_empty() {
                        out.summary.matched += 1;
                    }
                    for hit in &hits {
                        out.summary.dbmatched[hit.target as usize] += 1;
                    }
                    out.progress.inc(1);
                }
            });
        }
    });

    if let Some(e) = failure.into_inner().unwrap() {
        return Err(e);
    }

    let mut out = output
        .into_inner()
        .map_err(|_| anyhow!("output state poisoned"))?;
    out.progress.finish_and_clear();
    out.sink.flush()?;
    Ok((out.summary, out.sink))
}
