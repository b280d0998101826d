//! Utility functions and helpers.

pub mod fs;
pub mod http;
pub mod report;

use url::Url;

/// Join `path` onto `base`, keeping any query string in `path`.
pub fn join_url(base: &str, path: &str) -> crate::error::Result<Url> {
    Ok(Url::parse(base)?.join(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        let url = join_url("http://info.nec.go.kr", "/main/showDocument.xhtml").unwrap();
        assert_eq!(url.as_str(), "http://info.nec.go.kr/main/showDocument.xhtml");

        let url = join_url("http://127.0.0.1:8080/", "/a/b.json").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/a/b.json");
    }
}
