// src/services/portal.rs

//! Client for the election statistics portal.
//!
//! Three catalogs describe the administrative tree (provinces in an HTML
//! `<select>`, districts and constituencies as JSON) and one form endpoint
//! exports the per-location result report.

use async_trait::async_trait;
use reqwest::header;
use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

use crate::error::{FetchError, FetchErrorKind, FetchResult, Result};
use crate::models::{Config, ElectionType, LocationInfo, LocationNode};
use crate::utils::{http, join_url};

/// Raw report as returned by the portal.
#[derive(Debug, Clone)]
pub struct ReportPayload {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// Filename from `Content-Disposition`, already decoded
    pub filename: Option<String>,
}

/// Remote source of catalogs and reports.
#[async_trait]
pub trait ElectionPortal: Send + Sync {
    /// Top-level provinces, in portal order.
    async fn provinces(&self, election: ElectionType) -> FetchResult<Vec<LocationInfo>>;

    /// Districts of one province, in portal order.
    async fn districts(
        &self,
        election: ElectionType,
        province: &LocationInfo,
    ) -> FetchResult<Vec<LocationInfo>>;

    /// Council constituencies of one district.
    async fn constituencies(
        &self,
        election: ElectionType,
        province: &LocationInfo,
        district: &LocationInfo,
    ) -> FetchResult<Vec<LocationInfo>>;

    /// Export the result report of one leaf location.
    async fn download_report(
        &self,
        election: ElectionType,
        location: &LocationNode,
    ) -> FetchResult<ReportPayload>;

    /// Endpoint reports are requested from.
    fn report_url(&self) -> String;
}

/// HTTP implementation against the NEC portal.
pub struct NecPortal {
    client: reqwest::Client,
    election_id: String,
    document_url: Url,
    town_catalog_url: Url,
    constituency_catalog_url: Url,
    report_url: Url,
}

impl NecPortal {
    pub fn new(config: &Config) -> Result<Self> {
        let portal = &config.portal;
        let election_id = config.election.id.clone();

        let mut document_url = join_url(&portal.base_url, &portal.document_path)?;
        document_url
            .query_pairs_mut()
            .append_pair("electionId", &election_id)
            .append_pair("topMenuId", "VC")
            .append_pair("secondMenuId", "VCCP08");

        let client = http::create_async_client(&config.crawler, document_url.as_str())?;

        Ok(Self {
            client,
            election_id,
            town_catalog_url: join_url(&portal.base_url, &portal.town_catalog_path)?,
            constituency_catalog_url: join_url(&portal.base_url, &portal.constituency_catalog_path)?,
            report_url: join_url(&portal.base_url, &portal.report_path)?,
            document_url,
        })
    }

    async fn get_bytes(&self, url: Url, query: &[(&str, &str)]) -> FetchResult<Vec<u8>> {
        let response = self.client.get(url).query(query).send().await?;
        http::check_status(&response)?;
        Ok(response.bytes().await?.to_vec())
    }

    fn report_form(&self, election: ElectionType, location: &LocationNode) -> Vec<(&'static str, String)> {
        let mut title = format!(
            "[{}] [{}] [{}]",
            election.label(),
            location.province_name,
            location.district_name
        );
        if let Some(sub) = &location.subdistrict_name {
            title.push_str(&format!(" [{sub}]"));
        }

        let mut form = vec![
            ("electionId", self.election_id.clone()),
            (
                "requestURI",
                format!("/electioninfo/{}/vc/vccp08.jsp", self.election_id),
            ),
            ("topMenuId", "VC".to_string()),
            ("secondMenuId", "VCCP08".to_string()),
            ("menuId", "VCCP08".to_string()),
            ("statementId", election.statement_id().to_string()),
            ("electionCode", election.code().to_string()),
            ("cityCode", location.province_code.clone()),
            ("townCode", location.district_code.clone()),
        ];
        if let Some(code) = &location.subdistrict_code {
            form.push(("sggCityCode", code.clone()));
        }
        form.push(("reportType", "XLS".to_string()));
        form.push(("fTitle", title));
        form
    }
}

#[async_trait]
impl ElectionPortal for NecPortal {
    async fn provinces(&self, _election: ElectionType) -> FetchResult<Vec<LocationInfo>> {
        let bytes = self.get_bytes(self.document_url.clone(), &[]).await?;
        parse_select_options(&http::decode_body(&bytes), "cityCode")
    }

    async fn districts(
        &self,
        _election: ElectionType,
        province: &LocationInfo,
    ) -> FetchResult<Vec<LocationInfo>> {
        let bytes = self
            .get_bytes(
                self.town_catalog_url.clone(),
                &[
                    ("electionId", self.election_id.as_str()),
                    ("cityCode", province.code.as_str()),
                ],
            )
            .await?;
        parse_catalog_json(&bytes)
    }

    async fn constituencies(
        &self,
        election: ElectionType,
        province: &LocationInfo,
        district: &LocationInfo,
    ) -> FetchResult<Vec<LocationInfo>> {
        let code = election.code().to_string();
        let bytes = self
            .get_bytes(
                self.constituency_catalog_url.clone(),
                &[
                    ("electionId", self.election_id.as_str()),
                    ("electionCode", code.as_str()),
                    ("cityCode", province.code.as_str()),
                    ("townCode", district.code.as_str()),
                ],
            )
            .await?;
        parse_catalog_json(&bytes)
    }

    async fn download_report(
        &self,
        election: ElectionType,
        location: &LocationNode,
    ) -> FetchResult<ReportPayload> {
        let form = self.report_form(election, location);
        let response = self
            .client
            .post(self.report_url.clone())
            .form(&form)
            .send()
            .await?;
        http::check_status(&response)?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let filename = http::content_disposition_filename(response.headers());
        let bytes = response.bytes().await?.to_vec();

        Ok(ReportPayload {
            bytes,
            content_type,
            filename,
        })
    }

    fn report_url(&self) -> String {
        self.report_url.to_string()
    }
}

/// Options of `<select id="{select_id}">`, skipping the `-1` placeholder.
pub fn parse_select_options(html: &str, select_id: &str) -> FetchResult<Vec<LocationInfo>> {
    let css = format!("select#{select_id} option");
    let selector = Selector::parse(&css)
        .map_err(|e| FetchError::new(FetchErrorKind::InvalidRequest, format!("{css}: {e:?}")))?;

    let document = Html::parse_document(html);
    let options: Vec<LocationInfo> = document
        .select(&selector)
        .filter_map(|option| {
            let value = option.value().attr("value")?.trim();
            if value.is_empty() || value == "-1" {
                return None;
            }
            let name = option.text().collect::<String>().trim().to_string();
            Some(LocationInfo::new(value, name))
        })
        .collect();

    if options.is_empty() {
        return Err(FetchError::new(
            FetchErrorKind::InvalidPayload,
            format!("no options found in select#{select_id}"),
        ));
    }
    Ok(options)
}

/// Parse a code catalog, either `{"jsonResult":{"body":[...]}}` or a bare
/// array of `{"CODE":..,"NAME":..}` objects.
pub fn parse_catalog_json(bytes: &[u8]) -> FetchResult<Vec<LocationInfo>> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| FetchError::new(FetchErrorKind::InvalidPayload, format!("catalog JSON: {e}")))?;

    let items = value
        .pointer("/jsonResult/body")
        .unwrap_or(&value)
        .as_array()
        .ok_or_else(|| {
            FetchError::new(FetchErrorKind::InvalidPayload, "catalog is not an array")
        })?;

    Ok(items
        .iter()
        .filter_map(|item| {
            let code = match item.get("CODE")? {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            if code.is_empty() || code == "-1" {
                return None;
            }
            let name = item.get("NAME")?.as_str()?.trim().to_string();
            Some(LocationInfo::new(code, name))
        })
        .collect())
}
