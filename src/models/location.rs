// src/models/location.rs

//! Administrative locations visited by the crawler.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A code/name pair as listed by the portal catalogs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub code: String,
    pub name: String,
}

impl LocationInfo {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

/// One leaf of the crawl: a district, or a constituency inside a district
/// for council elections. Identity is the code tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationNode {
    pub province_code: String,
    pub province_name: String,
    pub district_code: String,
    pub district_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdistrict_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdistrict_name: Option<String>,
}

impl LocationNode {
    pub fn new(province: &LocationInfo, district: &LocationInfo) -> Self {
        Self {
            province_code: province.code.clone(),
            province_name: province.name.clone(),
            district_code: district.code.clone(),
            district_name: district.name.clone(),
            subdistrict_code: None,
            subdistrict_name: None,
        }
    }

    pub fn with_subdistrict(mut self, subdistrict: &LocationInfo) -> Self {
        self.subdistrict_code = Some(subdistrict.code.clone());
        self.subdistrict_name = Some(subdistrict.name.clone());
        self
    }

    /// Code tuple identifying this node.
    pub fn key(&self) -> (&str, &str, Option<&str>) {
        (
            &self.province_code,
            &self.district_code,
            self.subdistrict_code.as_deref(),
        )
    }

    /// Code of the finest level present.
    pub fn leaf_code(&self) -> &str {
        self.subdistrict_code
            .as_deref()
            .unwrap_or(&self.district_code)
    }

    /// Human readable path, e.g. "서울특별시 종로구".
    pub fn display_name(&self) -> String {
        match &self.subdistrict_name {
            Some(sub) => format!("{} {} {}", self.province_name, self.district_name, sub),
            None => format!("{} {}", self.province_name, self.district_name),
        }
    }
}

impl PartialEq for LocationNode {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for LocationNode {}

impl Hash for LocationNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ignores_names() {
        let seoul = LocationInfo::new("1100", "서울특별시");
        let a = LocationNode::new(&seoul, &LocationInfo::new("1101", "종로구"));
        let b = LocationNode::new(
            &LocationInfo::new("1100", "서울"),
            &LocationInfo::new("1101", "종로"),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn leaf_code_prefers_subdistrict() {
        let node = LocationNode::new(
            &LocationInfo::new("1100", "서울특별시"),
            &LocationInfo::new("1101", "종로구"),
        );
        assert_eq!(node.leaf_code(), "1101");
        assert_eq!(node.display_name(), "서울특별시 종로구");

        let node = node.with_subdistrict(&LocationInfo::new("2110101", "종로구가선거구"));
        assert_eq!(node.leaf_code(), "2110101");
        assert_eq!(node.display_name(), "서울특별시 종로구 종로구가선거구");
    }
}
