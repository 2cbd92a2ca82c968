//! The streaming orchestrator: a single-threaded pull loop from a record
//! iterator into a format writer.

use crate::batch::{BatchAssembler, Tables};
use crate::config::FlattenConfig;
use crate::error::FlattenError;
use crate::flatten::Flattener;
use crate::input::Records;
use crate::writer::Writer;

/// Drive `records` through the flattener and into `writer` in flush groups of
/// up to `batch_size` rows per table. The writer is finalized on success; any
/// error aborts the run and leaves already-flushed files in place.
pub(crate) fn run(
    records: Records,
    entity: &str,
    config: &FlattenConfig,
    batch_size: usize,
    writer: &mut dyn Writer,
) -> Result<(), FlattenError> {
    let mut flattener = Flattener::new(entity, config)?;
    let mut assembler = BatchAssembler::new(batch_size);
    let mut record_count = 0u64;
    let mut row_count = 0u64;

    for record in records {
        let mut tables = Tables::new();
        flattener.flatten_record(record?, &mut tables)?;
        record_count += 1;
        row_count += tables.values().map(|rows| rows.len() as u64).sum::<u64>();
        assembler.absorb(tables);

        if assembler.ready() {
            writer.append(assembler.take())?;
        }
    }
    if !assembler.is_empty() {
        writer.append(assembler.take())?;
    }
    writer.finalize()?;

    tracing::info!(
        record_count,
        row_count,
        truncated = flattener.truncated(),
        "finished streaming flatten run"
    );
    Ok(())
}
