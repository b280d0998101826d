//! CSV reading and writing for every pipeline stage.
//!
//! Output is UTF-8 with a byte-order mark so spreadsheet tools pick the
//! right encoding; readers accept files with or without it.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::{
    AdminLevel, AggregatedRow, Dataset, ElectionRow, LevelSummary, RowSet, VoteCounts,
    coerce_count, columns,
};

const BOM: &[u8] = b"\xEF\xBB\xBF";

fn create_writer(path: &Path) -> Result<csv::Writer<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(BOM)?;
    Ok(csv::Writer::from_writer(file))
}

fn count_fields(counts: &VoteCounts, candidates: &[String]) -> Vec<String> {
    columns::LEADING_COUNTS
        .iter()
        .map(|c| counts.fixed(c).unwrap_or(0).to_string())
        .chain(candidates.iter().map(|c| counts.candidate(c).to_string()))
        .chain(
            columns::TRAILING_COUNTS
                .iter()
                .map(|c| counts.fixed(c).unwrap_or(0).to_string()),
        )
        .collect()
}

fn count_header(candidates: &[String]) -> impl Iterator<Item = String> + '_ {
    columns::LEADING_COUNTS
        .iter()
        .map(|c| c.to_string())
        .chain(candidates.iter().cloned())
        .chain(columns::TRAILING_COUNTS.iter().map(|c| c.to_string()))
}

/// Write precinct rows with the canonical column order.
pub fn write_rows(path: &Path, candidates: &[String], rows: &[ElectionRow]) -> Result<()> {
    let mut writer = create_writer(path)?;
    let header: Vec<String> = columns::ADMINISTRATIVE
        .iter()
        .map(|c| c.to_string())
        .chain(count_header(candidates))
        .collect();
    writer.write_record(&header)?;

    for row in rows {
        let record: Vec<String> = columns::ADMINISTRATIVE
            .iter()
            .map(|c| row.admin(c).unwrap_or_default().to_string())
            .chain(count_fields(&row.counts, candidates))
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_dataset(path: &Path, dataset: &Dataset) -> Result<()> {
    write_rows(path, &dataset.candidates, &dataset.rows)
}

/// Write aggregated rows of a single `level`, or of several levels when
/// `level` is `None` (adds the level column and blank admin cells).
pub fn write_aggregated(
    path: &Path,
    candidates: &[String],
    rows: &[AggregatedRow],
    level: Option<AdminLevel>,
) -> Result<()> {
    let key_columns: &[&str] = match level {
        Some(level) => level.key_columns(),
        None => AdminLevel::Town.key_columns(),
    };
    let tagged = level.is_none();

    let mut writer = create_writer(path)?;
    let header: Vec<String> = tagged
        .then_some(columns::LEVEL)
        .into_iter()
        .chain(key_columns.iter().copied())
        .map(str::to_string)
        .chain(count_header(candidates))
        .collect();
    writer.write_record(&header)?;

    for row in rows {
        let record: Vec<String> = tagged
            .then(|| row.level.tag().to_string())
            .into_iter()
            .chain(
                key_columns
                    .iter()
                    .map(|c| row.key_value(c).unwrap_or_default().to_string()),
            )
            .chain(count_fields(&row.counts, candidates))
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the per-level summary table.
pub fn write_level_summaries(path: &Path, summaries: &[LevelSummary]) -> Result<()> {
    let mut writer = create_writer(path)?;
    writer.write_record([columns::LEVEL, "행수", "선거인수", "투표수", "투표율"])?;
    for summary in summaries {
        writer.write_record([
            summary.level.tag().to_string(),
            summary.row_count.to_string(),
            summary.eligible_voters.to_string(),
            summary.votes_cast.to_string(),
            format!("{:.2}", summary.turnout_pct),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write arbitrary string records under `header`.
pub fn write_records(path: &Path, header: &[&str], records: &[Vec<String>]) -> Result<()> {
    let mut writer = create_writer(path)?;
    writer.write_record(header)?;
    for record in records {
        writer.write_record(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a precinct-level CSV written by [`write_rows`] or by an earlier
/// version of the pipeline.
///
/// Every header that is neither administrative nor a fixed count is a
/// candidate. Missing administrative columns are a schema error.
pub fn read_row_set(path: &Path) -> Result<RowSet> {
    read_row_set_with(path, &columns::ADMINISTRATIVE)
}

/// Like [`read_row_set`], but only the `required` columns must be present.
///
/// Absent administrative columns outside `required` read as empty strings.
pub fn read_row_set_with(path: &Path, required: &[&str]) -> Result<RowSet> {
    let context = path.display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)?;

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { h };
            h.trim().to_string()
        })
        .collect();
    let index: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.as_str(), i))
        .collect();

    let missing: Vec<String> = required
        .iter()
        .filter(|c| !index.contains_key(*c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(AppError::schema(context, missing));
    }

    let candidates: Vec<String> = headers
        .iter()
        .filter(|h| {
            !h.is_empty()
                && !columns::ADMINISTRATIVE.contains(&h.as_str())
                && !columns::LEADING_COUNTS.contains(&h.as_str())
                && !columns::TRAILING_COUNTS.contains(&h.as_str())
                && h.as_str() != columns::LEVEL
        })
        .cloned()
        .collect();

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = |name: &str| {
            index
                .get(name)
                .and_then(|&i| record.get(i))
                .unwrap_or_default()
                .trim()
        };
        let cell_context = |name: &str| format!("{context} row {} column {name}", line + 2);

        let mut row = ElectionRow::default();
        for column in columns::ADMINISTRATIVE {
            if let Some(slot) = row.admin_mut(column) {
                *slot = field(column).to_string();
            }
        }
        for column in columns::LEADING_COUNTS
            .iter()
            .chain(columns::TRAILING_COUNTS.iter())
            .copied()
        {
            if index.contains_key(column) {
                let value = coerce_count(field(column), &cell_context(column));
                if let Some(slot) = row.counts.fixed_mut(column) {
                    *slot = value;
                }
            }
        }
        for candidate in &candidates {
            let value = coerce_count(field(candidate), &cell_context(candidate));
            row.counts.candidate_votes.insert(candidate.clone(), value);
        }
        rows.push(row);
    }

    Ok(RowSet {
        source: context,
        location: None,
        candidates,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(town: &str, precinct: &str, eligible: u64, cast: u64, votes: &[(&str, u64)]) -> ElectionRow {
        ElectionRow {
            province_name: "서울특별시".into(),
            district_name: "종로구".into(),
            town_name: town.into(),
            precinct_name: precinct.into(),
            counts: VoteCounts {
                eligible_voters: eligible,
                votes_cast: cast,
                candidate_votes: votes.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
                total_valid_votes: cast,
                ..VoteCounts::default()
            },
        }
    }

    #[test]
    fn test_written_file_starts_with_bom_and_reads_back() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("out.csv");
        let candidates = vec!["가".to_string(), "나".to_string()];
        let rows = vec![
            row("청운효자동", "청운효자동제1투", 148, 140, &[("가", 100), ("나", 40)]),
            row("사직동", "사직동제1투", 13110, 13108, &[("가", 13000)]),
        ];
        write_rows(&path, &candidates, &rows).unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert!(raw.starts_with(BOM));

        let back = read_row_set(&path).unwrap();
        assert_eq!(back.candidates, candidates);
        assert_eq!(back.rows.len(), 2);
        assert_eq!(back.rows[0].town_name, "청운효자동");
        assert_eq!(back.rows[1].counts.candidate("나"), 0);
        assert_eq!(back.rows[1].counts.eligible_voters, 13110);
    }

    #[test]
    fn test_missing_admin_columns_is_schema_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.csv");
        std::fs::write(&path, "\u{feff}시도명,시군구명,선거인수\n서울특별시,종로구,10\n").unwrap();

        match read_row_set(&path) {
            Err(AppError::Schema { missing, .. }) => {
                assert_eq!(missing, vec!["읍면동명".to_string(), "투표구명".to_string()]);
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_reader_accepts_thousands_separators() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sep.csv");
        std::fs::write(
            &path,
            "시도명,시군구명,읍면동명,투표구명,선거인수,투표수,후보,계\n서울특별시,종로구,사직동,제1투,\"1,234\",,5,5\n",
        )
        .unwrap();

        let set = read_row_set(&path).unwrap();
        assert_eq!(set.candidates, vec!["후보".to_string()]);
        assert_eq!(set.rows[0].counts.eligible_voters, 1234);
        assert_eq!(set.rows[0].counts.votes_cast, 0);
    }

    #[test]
    fn test_combined_report_has_level_column() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("combined.csv");
        let rows = vec![
            AggregatedRow {
                level: AdminLevel::Province,
                key: vec!["서울특별시".into()],
                counts: VoteCounts::default(),
            },
            AggregatedRow {
                level: AdminLevel::District,
                key: vec!["서울특별시".into(), "종로구".into()],
                counts: VoteCounts::default(),
            },
        ];
        write_aggregated(&path, &[], &rows, None).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.trim_start_matches('\u{feff}').lines();
        assert!(lines.next().unwrap().starts_with("집계수준,시도명,시군구명,읍면동명,선거인수"));
        assert!(lines.next().unwrap().starts_with("시도,서울특별시,,,0"));
        assert!(lines.next().unwrap().starts_with("시군구,서울특별시,종로구,,0"));
    }
}
