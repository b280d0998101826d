// src/services/extractor.rs

//! Result table extraction from downloaded reports.
//!
//! Reports arrive either as HTML (the common case, even when served as
//! `.xls`) or as real spreadsheets. Both are flattened into a grid of text
//! cells with spans expanded, then mapped onto [`ElectionRow`]s by header
//! label. Header labels other than the fixed administrative and count
//! columns are candidates.

use std::collections::HashSet;
use std::io::Cursor;

use calamine::{Reader, open_workbook_auto_from_rs};
use scraper::{ElementRef, Html, Selector};

use crate::error::{AppError, Result};
use crate::models::{ElectionRow, LocationNode, RowSet, coerce_count, columns, parse_count};
use crate::utils::fs::PayloadKind;
use crate::utils::http::decode_body;

/// Tables tried in order; the first match wins.
const TABLE_SELECTORS: [&str; 3] = ["table#table01", "table.table01", "table"];

/// Group header spanning the candidate columns.
const CANDIDATE_GROUP: &str = "후보자별득표수";

/// Header rows considered below the first one.
const MAX_EXTRA_HEADER_ROWS: usize = 2;

#[derive(Debug, Clone, Default)]
struct GridCell {
    text: String,
    header: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ColumnRole {
    Admin(&'static str),
    Count(&'static str),
    Candidate(String),
    Ignored,
}

impl ColumnRole {
    fn from_label(label: &str) -> Self {
        match label {
            "" | CANDIDATE_GROUP | "선거구명" => Self::Ignored,
            "시도명" => Self::Admin(columns::PROVINCE),
            "시군구명" | "구시군명" => Self::Admin(columns::DISTRICT),
            "읍면동명" => Self::Admin(columns::TOWN),
            "투표구명" => Self::Admin(columns::PRECINCT),
            "선거인수" => Self::Count(columns::ELIGIBLE_VOTERS),
            "투표수" => Self::Count(columns::VOTES_CAST),
            "계" => Self::Count(columns::TOTAL_VALID),
            "무효투표수" => Self::Count(columns::INVALID),
            "기권자수" => Self::Count(columns::ABSTENTIONS),
            other => Self::Candidate(other.to_string()),
        }
    }
}

/// Turns raw report bytes into rows.
pub struct TableExtractor {
    tables: Vec<Selector>,
    rows: Selector,
}

impl TableExtractor {
    pub fn new() -> Result<Self> {
        let tables = TABLE_SELECTORS
            .iter()
            .map(|s| Self::parse_selector(s))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            tables,
            rows: Self::parse_selector("tr")?,
        })
    }

    /// Extract the rows of one report; `location` fills in the province and
    /// district names when the table does not carry them.
    pub fn extract(&self, raw_bytes: &[u8], location: Option<&LocationNode>) -> Result<RowSet> {
        let source = location
            .map(LocationNode::display_name)
            .unwrap_or_else(|| "report".to_string());
        self.extract_named(raw_bytes, &source, location)
    }

    /// Same as [`TableExtractor::extract`] with an explicit source label for
    /// logs and errors.
    pub fn extract_named(
        &self,
        raw_bytes: &[u8],
        source: &str,
        location: Option<&LocationNode>,
    ) -> Result<RowSet> {
        let grid = match PayloadKind::sniff(raw_bytes) {
            Some(kind) if kind.is_spreadsheet() => spreadsheet_grid(raw_bytes)?,
            _ => self.html_grid(raw_bytes, source)?,
        };
        rows_from_grid(&grid, source, location)
    }

    fn html_grid(&self, raw_bytes: &[u8], source: &str) -> Result<Vec<Vec<GridCell>>> {
        let document = Html::parse_document(&decode_body(raw_bytes));
        let table = self
            .tables
            .iter()
            .find_map(|selector| document.select(selector).next())
            .ok_or_else(|| AppError::parse(source, "no table found"))?;

        let mut grid = Vec::new();
        // (rows still covered, text, is header) per column
        let mut carry: Vec<Option<(usize, String, bool)>> = Vec::new();

        for tr in table.select(&self.rows) {
            let mut cells = tr
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|e| matches!(e.value().name(), "td" | "th"));
            let mut row = Vec::new();
            let mut col = 0;

            loop {
                if let Some(slot) = carry.get_mut(col) {
                    if let Some((remaining, text, header)) = slot.as_mut() {
                        row.push(GridCell {
                            text: text.clone(),
                            header: *header,
                        });
                        *remaining -= 1;
                        if *remaining == 0 {
                            *slot = None;
                        }
                        col += 1;
                        continue;
                    }
                }

                let Some(cell) = cells.next() else {
                    if carry.iter().skip(col).any(Option::is_some) {
                        row.push(GridCell::default());
                        col += 1;
                        continue;
                    }
                    break;
                };

                let text = cell_text(cell);
                let header = cell.value().name() == "th";
                let colspan = span(cell, "colspan");
                let rowspan = span(cell, "rowspan");
                for _ in 0..colspan {
                    if carry.len() <= col {
                        carry.resize(col + 1, None);
                    }
                    if rowspan > 1 {
                        carry[col] = Some((rowspan - 1, text.clone(), header));
                    }
                    row.push(GridCell {
                        text: text.clone(),
                        header,
                    });
                    col += 1;
                }
            }

            if !row.is_empty() {
                grid.push(row);
            }
        }
        Ok(grid)
    }

    fn parse_selector(s: &str) -> Result<Selector> {
        Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
    }
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn span(cell: ElementRef<'_>, attr: &str) -> usize {
    cell.value()
        .attr(attr)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(1)
        .clamp(1, 1000)
}

fn spreadsheet_grid(raw_bytes: &[u8]) -> Result<Vec<Vec<GridCell>>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(raw_bytes.to_vec()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::parse("spreadsheet", "workbook has no sheets"))??;

    Ok(range
        .rows()
        .map(|row| {
            row.iter()
                .map(|data| GridCell {
                    text: data.to_string().split_whitespace().collect::<Vec<_>>().join(" "),
                    header: false,
                })
                .collect()
        })
        .collect())
}

fn header_label(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn cell(row: &[GridCell], col: usize) -> &str {
    row.get(col).map(|c| c.text.as_str()).unwrap_or("")
}

fn rows_from_grid(
    grid: &[Vec<GridCell>],
    source: &str,
    location: Option<&LocationNode>,
) -> Result<RowSet> {

    let header_start = grid
        .iter()
        .position(|row| row.iter().any(|c| header_label(&c.text) == "선거인수"))
        .ok_or_else(|| AppError::parse(source, "no header row with 선거인수"))?;
    let eligible_col = grid[header_start]
        .iter()
        .position(|c| header_label(&c.text) == "선거인수")
        .unwrap_or(0);

    let mut header_end = header_start + 1;
    while header_end < grid.len() && header_end <= header_start + MAX_EXTRA_HEADER_ROWS {
        let row = &grid[header_end];
        let all_header = row.iter().all(|c| c.header);
        let has_numbers = parse_count(cell(row, eligible_col)).is_some()
            || row.iter().any(|c| parse_count(&c.text).is_some());
        if all_header || !has_numbers {
            header_end += 1;
        } else {
            break;
        }
    }

    let width = grid[header_start..header_end]
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(0);
    let mut seen = HashSet::new();
    let roles: Vec<ColumnRole> = (0..width)
        .map(|col| {
            let label = grid[header_start..header_end]
                .iter()
                .rev()
                .map(|row| header_label(cell(row, col)))
                .find(|label| !label.is_empty())
                .unwrap_or_default();
            let role = ColumnRole::from_label(&label);
            if !seen.insert(role.clone()) && role != ColumnRole::Ignored {
                log::warn!("Duplicate column '{label}' in {source}, keeping the first");
                return ColumnRole::Ignored;
            }
            role
        })
        .collect();

    let candidates: Vec<String> = roles
        .iter()
        .filter_map(|role| match role {
            ColumnRole::Candidate(name) => Some(name.clone()),
            _ => None,
        })
        .collect();
    if !roles.iter().any(|r| *r == ColumnRole::Admin(columns::TOWN))
        && !roles.iter().any(|r| *r == ColumnRole::Admin(columns::PRECINCT))
    {
        return Err(AppError::parse(source, "no 읍면동명 or 투표구명 column"));
    }

    let mut rows = Vec::new();
    let mut last_town = String::new();
    for (index, grid_row) in grid.iter().enumerate().skip(header_end) {
        if grid_row.iter().all(|c| c.text.is_empty()) {
            continue;
        }

        let mut row = ElectionRow::default();
        for (col, role) in roles.iter().enumerate() {
            let text = cell(grid_row, col);
            match role {
                ColumnRole::Admin(name) => {
                    if let Some(slot) = row.admin_mut(name) {
                        *slot = text.to_string();
                    }
                }
                ColumnRole::Count(name) => {
                    let value = coerce_count(text, &format!("{source} row {} column {name}", index + 1));
                    if let Some(slot) = row.counts.fixed_mut(name) {
                        *slot = value;
                    }
                }
                ColumnRole::Candidate(name) => {
                    let value = coerce_count(text, &format!("{source} row {} column {name}", index + 1));
                    row.counts.candidate_votes.insert(name.clone(), value);
                }
                ColumnRole::Ignored => {}
            }
        }

        if row.town_name.is_empty() && !row.precinct_name.is_empty() && !last_town.is_empty() {
            row.town_name = last_town.clone();
        }
        if row.town_name.is_empty() && row.precinct_name.is_empty() {
            log::warn!("Dropping row {} of {source}: no 읍면동명 or 투표구명", index + 1);
            continue;
        }
        last_town = row.town_name.clone();

        if let Some(location) = location {
            if row.province_name.is_empty() {
                row.province_name = location.province_name.clone();
            }
            if row.district_name.is_empty() {
                row.district_name = location.district_name.clone();
            }
        }
        rows.push(row);
    }

    log::debug!(
        "Extracted {} rows and {} candidates from {source}",
        rows.len(),
        candidates.len()
    );
    Ok(RowSet {
        source: source.to_string(),
        location: location.cloned(),
        candidates,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocationInfo;

    const REPORT: &str = r#"
<html><head><meta charset="euc-kr"></head><body>
<table id="table01" class="table01">
  <thead>
    <tr>
      <th rowspan="2">읍면동명</th><th rowspan="2">투표구명</th>
      <th rowspan="2">선거인수</th><th rowspan="2">투표수</th>
      <th colspan="3">후보자별 득표수</th>
      <th rowspan="2">무효<br>투표수</th><th rowspan="2">기권자수</th>
    </tr>
    <tr>
      <th>더불어민주당<br>이재명</th><th>국민의힘<br>김문수</th><th>계</th>
    </tr>
  </thead>
  <tbody>
    <tr><td>합계</td><td></td><td>13,258</td><td>13,248</td><td>8,000</td><td>5,100</td><td>13,100</td><td>148</td><td>10</td></tr>
    <tr><td rowspan="2">청운효자동</td><td>관내사전투표</td><td>148</td><td>140</td><td>80</td><td>58</td><td>138</td><td>2</td><td>8</td></tr>
    <tr><td>청운효자동제1투</td><td>13,110</td><td>13,108</td><td>7,920</td><td>5,042</td><td>12,962</td><td>146</td><td>2</td></tr>
    <tr><td></td><td>사직동제1투</td><td>1,000</td><td></td><td>-</td><td>0</td><td>0</td><td>0</td><td>0</td></tr>
    <tr><td></td><td></td><td>9</td><td>9</td><td>9</td><td>0</td><td>9</td><td>0</td><td>0</td></tr>
  </tbody>
</table>
</body></html>"#;

    fn jongno() -> LocationNode {
        LocationNode::new(
            &LocationInfo::new("1100", "서울특별시"),
            &LocationInfo::new("1101", "종로구"),
        )
    }

    #[test]
    fn discovers_candidates_from_multi_row_header() {
        let extractor = TableExtractor::new().unwrap();
        let set = extractor.extract(REPORT.as_bytes(), Some(&jongno())).unwrap();

        assert_eq!(set.candidates, vec!["더불어민주당이재명", "국민의힘김문수"]);
        assert_eq!(set.source, "서울특별시 종로구");
        // 합계, 2 청운효자동 rows, 사직동; the nameless row is dropped
        assert_eq!(set.rows.len(), 4);

        let total = &set.rows[0];
        assert_eq!(total.town_name, "합계");
        assert_eq!(total.counts.eligible_voters, 13258);
        assert_eq!(total.counts.invalid_votes, 148);

        let first = &set.rows[1];
        assert_eq!(first.province_name, "서울특별시");
        assert_eq!(first.district_name, "종로구");
        assert_eq!(first.counts.candidate("더불어민주당이재명"), 80);
        assert_eq!(first.counts.total_valid_votes, 138);
        assert!(first.is_consistent());
    }

    #[test]
    fn expands_rowspan_and_fills_town_names() {
        let extractor = TableExtractor::new().unwrap();
        let set = extractor.extract(REPORT.as_bytes(), None).unwrap();

        assert_eq!(set.rows[2].town_name, "청운효자동");
        assert_eq!(set.rows[2].precinct_name, "청운효자동제1투");
        assert_eq!(set.rows[2].counts.eligible_voters, 13110);
        // blank town cell takes the previous town
        assert_eq!(set.rows[3].town_name, "청운효자동");
        assert_eq!(set.rows[3].province_name, "");
    }

    #[test]
    fn empty_and_dash_cells_become_zero() {
        let extractor = TableExtractor::new().unwrap();
        let set = extractor.extract(REPORT.as_bytes(), None).unwrap();
        let row = &set.rows[3];
        assert_eq!(row.counts.eligible_voters, 1000);
        assert_eq!(row.counts.votes_cast, 0);
        assert_eq!(row.counts.candidate("더불어민주당이재명"), 0);
    }

    #[test]
    fn decodes_euc_kr_reports() {
        let (encoded, _, _) = encoding_rs::EUC_KR.encode(REPORT);
        let extractor = TableExtractor::new().unwrap();
        let set = extractor.extract(&encoded, None).unwrap();
        assert_eq!(set.candidates[1], "국민의힘김문수");
        assert_eq!(set.rows[1].town_name, "청운효자동");
    }

    #[test]
    fn single_row_header_with_province_columns() {
        let html = r#"<table>
            <tr><th>시도명</th><th>구시군명</th><th>읍면동명</th><th>투표구명</th>
                <th>선거인수</th><th>투표수</th><th>가후보</th><th>계</th></tr>
            <tr><td>부산광역시</td><td>중구</td><td>중앙동</td><td>제1투</td>
                <td>1,234</td><td>1,000</td><td>990</td><td>990</td></tr>
        </table>"#;
        let extractor = TableExtractor::new().unwrap();
        let set = extractor.extract(html.as_bytes(), Some(&jongno())).unwrap();

        assert_eq!(set.candidates, vec!["가후보"]);
        let row = &set.rows[0];
        assert_eq!(row.province_name, "부산광역시");
        assert_eq!(row.district_name, "중구");
        assert_eq!(row.counts.eligible_voters, 1234);
    }

    #[test]
    fn missing_table_is_a_parse_error() {
        let extractor = TableExtractor::new().unwrap();
        let err = extractor
            .extract(b"<html><body>error</body></html>", None)
            .unwrap_err();
        assert!(matches!(err, AppError::Parse { .. }));
    }
}
