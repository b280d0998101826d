// src/pipeline/parse.rs

//! Parse stage: downloaded reports to per-location CSV files.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::Result;
use crate::models::{LocationInfo, LocationNode, ProvinceEntry, RowSet, turnout_pct};
use crate::services::TableExtractor;
use crate::storage::{LocalStorage, Manifest, csv};
use crate::utils::fs::PayloadKind;
use crate::utils::report;

/// Per-file grand totals, written next to the per-location CSVs.
pub const SUMMARY_FILE: &str = "election_summary.csv";

const GRAND_TOTAL: &str = "합계";

/// Outcome of a parse run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    pub processed: usize,
    pub errors: usize,
    pub total_rows: usize,
}

/// Extract every report under `download_dir` into `csv_dir`.
///
/// Unreadable or unparseable reports are counted and skipped. Locations come
/// from the crawl manifest, or from the file name when the manifest has no
/// entry.
pub async fn run_parse(
    download_dir: &Path,
    csv_dir: &Path,
    canonical: &[ProvinceEntry],
    write_summary: bool,
) -> Result<ParseStats> {
    report::header(&format!("Parsing reports in {}", download_dir.display()));

    let manifest = Manifest::load(&LocalStorage::new(download_dir)).await?;
    let files = report_files(download_dir).await?;
    log::info!(
        "{} report files, {} manifest entries",
        files.len(),
        manifest.len()
    );

    let extractor = TableExtractor::new()?;
    let mut stats = ParseStats::default();
    let mut summary = Vec::new();

    for path in files {
        let relative = path.strip_prefix(download_dir).unwrap_or(&path).to_path_buf();
        let source = Manifest::key_for(&relative);
        let location = manifest
            .get(&relative)
            .cloned()
            .or_else(|| infer_location(&relative, canonical));
        if location.is_none() {
            log::warn!("No location known for {source}");
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Failed to read {source}: {e}");
                stats.errors += 1;
                continue;
            }
        };
        let set = match extractor.extract_named(&bytes, &source, location.as_ref()) {
            Ok(set) => set,
            Err(e) => {
                log::error!("Failed to parse {source}: {e}");
                stats.errors += 1;
                continue;
            }
        };
        if set.rows.is_empty() {
            log::warn!("No rows in {source}");
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.replace('/', "_"));
        let output = csv_dir.join(format!("{stem}.csv"));
        csv::write_rows(&output, &set.candidates, &set.rows)?;
        log::debug!("{source} -> {} ({} rows)", output.display(), set.rows.len());

        stats.processed += 1;
        stats.total_rows += set.rows.len();
        if let Some(record) = summary_record(&format!("{stem}.csv"), &set) {
            summary.push(record);
        }
    }

    if write_summary && !summary.is_empty() {
        csv::write_records(
            &csv_dir.join(SUMMARY_FILE),
            &[
                "파일",
                "시도명",
                "시군구명",
                "선거인수",
                "투표수",
                "무효투표수",
                "기권자수",
                "투표율",
            ],
            &summary,
        )?;
    }

    report::summary(
        "Parse",
        &[
            ("Processed", stats.processed.to_string()),
            ("Errors", stats.errors.to_string()),
            ("Rows", stats.total_rows.to_string()),
        ],
    );
    Ok(stats)
}

/// Report files below `root`, sorted by path.
async fn report_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if PayloadKind::from_extension(&path).is_some() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

static FALLBACK_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^election_report_(\d+)_(\d+)(?:_(\w+))?$").ok());
static LEAF_CODE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"_(\d+[A-Za-z]?)$").ok());

/// Location encoded in a stored report's path.
///
/// Handles `election_report_<province>_<district>[_<sub>]` names and
/// `<province>/<name>_<leaf>` names. District names are unknown here and
/// come from the table when it has them.
pub fn infer_location(relative: &Path, canonical: &[ProvinceEntry]) -> Option<LocationNode> {
    let stem = relative.file_stem()?.to_str()?;
    let province_name = |code: &str| {
        canonical
            .iter()
            .find(|p| p.code == code)
            .map(|p| p.name.clone())
            .unwrap_or_default()
    };

    if let Some(caps) = FALLBACK_NAME.as_ref()?.captures(stem) {
        let province = &caps[1];
        let node = LocationNode::new(
            &LocationInfo::new(province, province_name(province)),
            &LocationInfo::new(&caps[2], ""),
        );
        return Some(match caps.get(3) {
            Some(sub) => node.with_subdistrict(&LocationInfo::new(sub.as_str(), "")),
            None => node,
        });
    }

    let province = relative.parent()?.file_name()?.to_str()?;
    let caps = LEAF_CODE.as_ref()?.captures(stem)?;
    Some(LocationNode::new(
        &LocationInfo::new(province, province_name(province)),
        &LocationInfo::new(&caps[1], ""),
    ))
}

fn summary_record(file: &str, set: &RowSet) -> Option<Vec<String>> {
    let total = set
        .rows
        .iter()
        .find(|r| r.town_name.trim() == GRAND_TOTAL || r.precinct_name.trim() == GRAND_TOTAL)?;
    let location = set.location.as_ref();
    let province = location
        .map(|l| l.province_name.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| total.province_name.clone());
    let district = location
        .map(|l| l.district_name.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| total.district_name.clone());
    let counts = &total.counts;

    Some(vec![
        file.to_string(),
        province,
        district,
        counts.eligible_voters.to_string(),
        counts.votes_cast.to_string(),
        counts.invalid_votes.to_string(),
        counts.abstentions.to_string(),
        format!("{:.2}", turnout_pct(counts.eligible_voters, counts.votes_cast)),
    ])
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::models::HierarchyConfig;

    const REPORT: &str = r#"<table id="table01">
        <tr><th>읍면동명</th><th>투표구명</th><th>선거인수</th><th>투표수</th>
            <th>가후보</th><th>나후보</th><th>계</th><th>무효투표수</th><th>기권자수</th></tr>
        <tr><td>합계</td><td></td><td>1,000</td><td>800</td><td>500</td><td>290</td><td>790</td><td>10</td><td>200</td></tr>
        <tr><td>청운효자동</td><td>제1투</td><td>1,000</td><td>800</td><td>500</td><td>290</td><td>790</td><td>10</td><td>200</td></tr>
    </table>"#;

    #[test]
    fn infers_fallback_and_server_names() {
        let canonical = HierarchyConfig::default().provinces;

        let node = infer_location(
            Path::new("1100/election_report_1100_1101.html"),
            &canonical,
        )
        .unwrap();
        assert_eq!(node.province_name, "서울특별시");
        assert_eq!(node.district_code, "1101");

        let node = infer_location(
            Path::new("2600/election_report_2600_2601_5260101.xls"),
            &canonical,
        )
        .unwrap();
        assert_eq!(node.subdistrict_code.as_deref(), Some("5260101"));

        let node = infer_location(Path::new("1100/개표단위별 개표결과_1101.html"), &canonical).unwrap();
        assert_eq!(node.province_code, "1100");
        assert_eq!(node.district_code, "1101");

        assert!(infer_location(Path::new("notes.html"), &canonical).is_none());
    }

    #[test]
    fn infers_many_paths_across_threads() {
        let canonical = HierarchyConfig::default().provinces;
        std::thread::scope(|scope| {
            for district in 1101..1109 {
                let canonical = &canonical;
                scope.spawn(move || {
                    for sub in 0..50 {
                        let name = format!("1100/election_report_1100_{district}_{sub}.html");
                        let node = infer_location(Path::new(&name), canonical).unwrap();
                        assert_eq!(node.district_code, district.to_string());
                        assert_eq!(node.subdistrict_code, Some(sub.to_string()));
                    }
                });
            }
        });
    }

    #[tokio::test]
    async fn test_parse_writes_csv_and_summary() {
        let downloads = TempDir::new().unwrap();
        let csv_dir = TempDir::new().unwrap();

        let storage = LocalStorage::new(downloads.path());
        let relative = Path::new("1100/개표결과_1101.html");
        storage.write_bytes(relative, REPORT.as_bytes()).await.unwrap();
        let mut manifest = Manifest::default();
        manifest.insert(
            relative,
            LocationNode::new(
                &LocationInfo::new("1100", "서울특별시"),
                &LocationInfo::new("1101", "종로구"),
            ),
        );
        manifest.merge_into(&storage).await.unwrap();
        storage
            .write_bytes("1100/broken_1102.html", b"<html>no table</html>")
            .await
            .unwrap();

        let stats = run_parse(
            downloads.path(),
            csv_dir.path(),
            &HierarchyConfig::default().provinces,
            true,
        )
        .await
        .unwrap();
        assert_eq!(
            stats,
            ParseStats {
                processed: 1,
                errors: 1,
                total_rows: 2
            }
        );

        let set = csv::read_row_set(&csv_dir.path().join("개표결과_1101.csv")).unwrap();
        assert_eq!(set.candidates, vec!["가후보", "나후보"]);
        assert_eq!(set.rows[1].district_name, "종로구");

        let summary = std::fs::read_to_string(csv_dir.path().join(SUMMARY_FILE)).unwrap();
        let last = summary.lines().last().unwrap();
        assert_eq!(last, "개표결과_1101.csv,서울특별시,종로구,1000,800,10,200,80.00");
    }
}
