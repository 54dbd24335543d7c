//! Chunk planning
//!
//! Splits a measurement frame into bounded, order-preserving chunks. The
//! partition depends only on the rows and the limits, so replanning the same
//! files always yields the same chunks and a failed chunk can be resubmitted
//! by index.

use chrono::SecondsFormat;
use std::collections::BTreeSet;
use std::sync::Arc;
use upstream_common::types::measurement::MEASUREMENT_BASE_COLUMNS;
use upstream_common::types::{MeasurementFrame, MeasurementRow};
use upstream_common::{Result, UpstreamError};

/// Default rows per chunk
pub const DEFAULT_MAX_ROWS: usize = 1000;

/// Default serialized bytes per chunk (50 MiB)
pub const DEFAULT_MAX_BYTES: usize = 50 * 1024 * 1024;

/// Ceilings applied while planning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    pub max_rows: usize,
    pub max_bytes: usize,
}

impl ChunkLimits {
    pub fn new(max_rows: usize, max_bytes: usize) -> Result<Self> {
        if max_rows == 0 {
            return Err(UpstreamError::invalid_field("chunk_size", "must be greater than zero"));
        }
        if max_bytes == 0 {
            return Err(UpstreamError::invalid_field(
                "max_chunk_size_mb",
                "must be greater than zero",
            ));
        }
        Ok(Self { max_rows, max_bytes })
    }
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// A contiguous run of measurement rows uploaded in one request
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    sequence_index: usize,
    aliases: Arc<[String]>,
    rows: Vec<MeasurementRow>,
    byte_size_estimate: usize,
}

impl Chunk {
    pub fn sequence_index(&self) -> usize {
        self.sequence_index
    }

    pub fn rows(&self) -> &[MeasurementRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Serialized size including the header line
    pub fn byte_size_estimate(&self) -> usize {
        self.byte_size_estimate
    }

    /// Upload file name, 1-based: `measurements_1.csv`, `measurements_2.csv`, ...
    pub fn file_name(&self) -> String {
        format!("measurements_{}.csv", self.sequence_index + 1)
    }

    /// Serialize as a standalone measurements CSV with its own header
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::with_capacity(self.byte_size_estimate));
        writer.write_record(header_fields(&self.aliases)).map_err(csv_write_error)?;
        for row in &self.rows {
            writer.write_record(row_fields(row)).map_err(csv_write_error)?;
        }
        writer
            .into_inner()
            .map_err(|e| UpstreamError::Io(e.into_error()))
    }
}

/// Partition a frame into chunks.
///
/// Rows are accumulated greedily until adding the next one would exceed
/// either ceiling. A row that alone exceeds `max_bytes` gets a chunk of its
/// own and is never split. An empty frame yields no chunks.
pub fn plan(frame: MeasurementFrame, limits: ChunkLimits) -> Vec<Chunk> {
    let (aliases, rows) = frame.into_parts();
    let header_bytes = header_len(&aliases);

    let mut chunks = Vec::new();
    let mut current: Vec<MeasurementRow> = Vec::new();
    let mut current_bytes = header_bytes;

    for row in rows {
        let row_bytes = row_len(&row);
        let full = current.len() >= limits.max_rows
            || current_bytes + row_bytes > limits.max_bytes;

        if !current.is_empty() && full {
            chunks.push(Chunk {
                sequence_index: chunks.len(),
                aliases: Arc::clone(&aliases),
                rows: std::mem::take(&mut current),
                byte_size_estimate: current_bytes,
            });
            current_bytes = header_bytes;
        }

        current_bytes += row_bytes;
        current.push(row);
    }

    if !current.is_empty() {
        chunks.push(Chunk {
            sequence_index: chunks.len(),
            aliases,
            rows: current,
            byte_size_estimate: current_bytes,
        });
    }

    tracing::debug!(
        chunks = chunks.len(),
        max_rows = limits.max_rows,
        max_bytes = limits.max_bytes,
        "Planned upload chunks"
    );

    chunks
}

/// Keep only the chunks whose sequence index is listed
pub fn select(chunks: Vec<Chunk>, indices: &BTreeSet<usize>) -> Result<Vec<Chunk>> {
    if let Some(missing) = indices.iter().find(|&&i| i >= chunks.len()) {
        return Err(UpstreamError::invalid_field(
            "only_chunks",
            format!(
                "chunk {} does not exist; the files plan into {} chunks",
                missing,
                chunks.len()
            ),
        ));
    }

    Ok(chunks
        .into_iter()
        .filter(|c| indices.contains(&c.sequence_index))
        .collect())
}

fn header_fields(aliases: &[String]) -> Vec<&str> {
    MEASUREMENT_BASE_COLUMNS
        .iter()
        .copied()
        .chain(aliases.iter().map(String::as_str))
        .collect()
}

fn row_fields(row: &MeasurementRow) -> Vec<String> {
    let mut fields = Vec::with_capacity(3 + row.values().len());
    fields.push(row.collection_time().to_rfc3339_opts(SecondsFormat::AutoSi, true));
    fields.push(row.latitude().to_string());
    fields.push(row.longitude().to_string());
    fields.extend(
        row.values()
            .iter()
            .map(|v| v.map(|v| v.to_string()).unwrap_or_default()),
    );
    fields
}

/// Timestamps and numbers never need quoting, so the joined length is exact
fn row_len(row: &MeasurementRow) -> usize {
    let fields = row_fields(row);
    fields.iter().map(String::len).sum::<usize>() + fields.len().saturating_sub(1) + 1
}

fn header_len(aliases: &[String]) -> usize {
    let mut writer = csv::Writer::from_writer(Vec::new());
    match writer.write_record(header_fields(aliases)) {
        Ok(()) => writer.into_inner().map(|bytes| bytes.len()).unwrap_or(0),
        Err(_) => 0,
    }
}

fn csv_write_error(err: csv::Error) -> UpstreamError {
    UpstreamError::Io(std::io::Error::other(err.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn frame(n: usize, aliases: &[&str]) -> MeasurementFrame {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let rows = (0..n)
            .map(|i| {
                let values = (0..aliases.len()).map(|j| Some((i * 10 + j) as f64 / 4.0)).collect();
                MeasurementRow::new(start + Duration::minutes(i as i64), 30.25, -97.75, values).unwrap()
            })
            .collect();
        MeasurementFrame::new(aliases.iter().map(|a| a.to_string()).collect(), rows).unwrap()
    }

    fn row_times(chunks: &[Chunk]) -> Vec<i64> {
        chunks
            .iter()
            .flat_map(|c| c.rows().iter().map(|r| r.collection_time().timestamp()))
            .collect()
    }

    #[test]
    fn test_three_rows_by_two() {
        let limits = ChunkLimits::new(2, DEFAULT_MAX_BYTES).unwrap();
        let chunks = plan(frame(3, &["temp", "rh"]), limits);
        let sizes: Vec<usize> = chunks.iter().map(Chunk::len).collect();
        assert_eq!(sizes, vec![2, 1]);
        assert_eq!(chunks[0].sequence_index(), 0);
        assert_eq!(chunks[1].sequence_index(), 1);
    }

    #[test]
    fn test_empty_frame_has_no_chunks() {
        assert!(plan(frame(0, &["temp"]), ChunkLimits::default()).is_empty());
    }

    #[test]
    fn test_limits_reject_zero() {
        assert!(ChunkLimits::new(0, 10).is_err());
        assert!(ChunkLimits::new(10, 0).is_err());
    }

    #[test]
    fn test_oversized_row_gets_own_chunk() {
        let limits = ChunkLimits::new(100, 10).unwrap();
        let chunks = plan(frame(3, &["temp"]), limits);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() == 1));
        assert!(chunks[0].byte_size_estimate() > 10);
    }

    #[test]
    fn test_byte_estimate_matches_csv() {
        let chunks = plan(frame(7, &["temp", "rh", "wind"]), ChunkLimits::new(3, 1 << 20).unwrap());
        for chunk in &chunks {
            assert_eq!(chunk.to_csv().unwrap().len(), chunk.byte_size_estimate());
        }
    }

    #[test]
    fn test_to_csv_repeats_header() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let rows = vec![
            MeasurementRow::new(start, 30.5, -97.25, vec![Some(22.5), None]).unwrap(),
        ];
        let frame = MeasurementFrame::new(vec!["temp".into(), "rh".into()], rows).unwrap();
        let chunks = plan(frame, ChunkLimits::default());

        let text = String::from_utf8(chunks[0].to_csv().unwrap()).unwrap();
        assert_eq!(
            text,
            "collectiontime,Lat_deg,Lon_deg,temp,rh\n2024-01-01T10:00:00Z,30.5,-97.25,22.5,\n"
        );
        assert_eq!(chunks[0].file_name(), "measurements_1.csv");
    }

    #[test]
    fn test_select_indices() {
        let chunks = plan(frame(10, &["t"]), ChunkLimits::new(2, 1 << 20).unwrap());
        let picked = select(chunks.clone(), &BTreeSet::from([1, 4])).unwrap();
        let indices: Vec<usize> = picked.iter().map(Chunk::sequence_index).collect();
        assert_eq!(indices, vec![1, 4]);

        let err = select(chunks, &BTreeSet::from([5])).unwrap_err();
        assert!(err.to_string().contains("chunk 5 does not exist"));
    }

    proptest! {
        #[test]
        fn prop_plan_partitions_in_order(
            n in 0usize..150,
            max_rows in 1usize..25,
            max_bytes in 1usize..600,
        ) {
            let limits = ChunkLimits::new(max_rows, max_bytes).unwrap();
            let input = frame(n, &["a", "b"]);
            let expected: Vec<i64> = input.rows().iter().map(|r| r.collection_time().timestamp()).collect();

            let chunks = plan(input.clone(), limits);

            prop_assert_eq!(row_times(&chunks), expected);
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.sequence_index(), i);
                prop_assert!(!chunk.is_empty());
                prop_assert!(chunk.len() <= max_rows);
                prop_assert!(chunk.len() == 1 || chunk.byte_size_estimate() <= max_bytes);
            }

            prop_assert_eq!(plan(input, limits), chunks);
        }
    }
}
