// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};

use crate::error::{AppError, FetchError, FetchErrorKind, Result};
use crate::models::CrawlerConfig;

/// Create a configured asynchronous HTTP client.
///
/// The portal rejects bare clients, so every request carries browser-like
/// `Accept`/`Accept-Language` headers and a `Referer` pointing at `referer`.
pub fn create_async_client(config: &CrawlerConfig, referer: &str) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,application/vnd.ms-excel,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    headers.insert(
        header::REFERER,
        HeaderValue::from_str(referer)
            .map_err(|e| AppError::config(format!("Invalid referer '{referer}': {e}")))?,
    );

    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Turn a non-success status into a classified [`FetchError`].
pub fn check_status(response: &reqwest::Response) -> std::result::Result<(), FetchError> {
    let status = response.status();
    match FetchErrorKind::from_status(status.as_u16()) {
        None => Ok(()),
        Some(kind) => Err(FetchError::new(
            kind,
            format!("{} returned {}", response.url(), status),
        )),
    }
}

/// Decode an HTML body as UTF-8, falling back to EUC-KR.
///
/// Valid UTF-8 wins even when the page declares `euc-kr`: saved reports
/// keep the portal's meta tag after being re-encoded.
pub fn decode_body(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, had_errors) = encoding_rs::EUC_KR.decode(bytes);
            if had_errors {
                log::warn!("Body is neither valid UTF-8 nor EUC-KR; some characters were replaced");
            }
            text.into_owned()
        }
    }
}

/// Filename announced by a `Content-Disposition` header, percent-decoded.
///
/// Prefers the RFC 5987 `filename*=` form over plain `filename=`.
pub fn content_disposition_filename(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::CONTENT_DISPOSITION)?;
    let value = String::from_utf8_lossy(raw.as_bytes()).into_owned();
    parse_content_disposition(&value)
}

fn parse_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for part in value.split(';').map(str::trim) {
        let Some((key, val)) = part.split_once('=') else {
            continue;
        };
        let val = val.trim().trim_matches('"');
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                // charset'language'encoded-value
                let encoded = val.splitn(3, '\'').nth(2).unwrap_or(val);
                extended = Some(decode_filename(encoded));
            }
            "filename" => plain = Some(decode_filename(val)),
            _ => {}
        }
    }

    extended
        .or(plain)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

fn decode_filename(value: &str) -> String {
    let spaced = value.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes()))
            .into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_encoded_filename() {
        let value = "attachment; filename=\"%EA%B0%9C%ED%91%9C%EB%8B%A8%EC%9C%84.xls\"";
        assert_eq!(parse_content_disposition(value).as_deref(), Some("개표단위.xls"));
    }

    #[test]
    fn test_extended_filename_wins() {
        let value = "attachment; filename=\"fallback.xls\"; filename*=UTF-8''%EC%A2%85%EB%A1%9C%EA%B5%AC.xls";
        assert_eq!(parse_content_disposition(value).as_deref(), Some("종로구.xls"));
    }

    #[test]
    fn test_missing_filename() {
        assert_eq!(parse_content_disposition("inline"), None);
        assert_eq!(parse_content_disposition("attachment; filename=\"\""), None);
    }

    #[test]
    fn test_decode_euc_kr_body() {
        let (encoded, _, _) = encoding_rs::EUC_KR.encode("<td>종로구</td>");
        assert_eq!(decode_body(&encoded), "<td>종로구</td>");
        assert_eq!(decode_body("<td>사직동</td>".as_bytes()), "<td>사직동</td>");
    }

    #[test]
    fn test_client_rejects_bad_referer() {
        let config = CrawlerConfig::default();
        assert!(create_async_client(&config, "http://info.nec.go.kr/").is_ok());
        assert!(create_async_client(&config, "bad\nreferer").is_err());
    }
}
