//! Output files of a finished run and the proxied URLs the browser loads them
//! through.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::error::DomainError;
use crate::ids::NodeId;

/// Backend storage area a file lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageArea {
    Input,
    #[default]
    Output,
    Temp,
}

impl StorageArea {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Temp => "temp",
        }
    }
}

impl fmt::Display for StorageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageArea {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(Self::Input),
            "output" => Ok(Self::Output),
            "temp" => Ok(Self::Temp),
            other => Err(DomainError::parse(format!(
                "unknown storage area '{other}' (expected input, output or temp)"
            ))),
        }
    }
}

/// A file reference as reported in backend history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: StorageArea,
}

impl OutputFile {
    pub fn new(filename: impl Into<String>, subfolder: impl Into<String>, kind: StorageArea) -> Self {
        Self {
            filename: filename.into(),
            subfolder: subfolder.into(),
            kind,
        }
    }

    /// `/{prefix}/image?filename=..&subfolder=..&type=..`, without `subfolder`
    /// when it is empty.
    pub fn proxy_url(&self, prefix: &str) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("filename", &self.filename);
        if !self.subfolder.is_empty() {
            query.append_pair("subfolder", &self.subfolder);
        }
        query.append_pair("type", self.kind.as_str());

        format!("/{}/image?{}", prefix.trim_matches('/'), query.finish())
    }
}

/// Node id to proxied URLs of everything that node produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputImageMap(BTreeMap<NodeId, Vec<String>>);

impl OutputImageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `urls` to the entry of `node`. Empty lists create no entry.
    pub fn extend_node(&mut self, node: impl Into<NodeId>, urls: impl IntoIterator<Item = String>) {
        let urls: Vec<String> = urls.into_iter().collect();
        if urls.is_empty() {
            return;
        }
        self.0.entry(node.into()).or_default().extend(urls);
    }

    pub fn get(&self, node: &str) -> Option<&[String]> {
        self.0.get(node).map(Vec::as_slice)
    }

    /// Number of URLs across all nodes.
    pub fn total_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_count() == 0
    }

    pub fn node_count(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Vec<String>)> {
        self.0.iter()
    }

    pub fn into_inner(self) -> BTreeMap<NodeId, Vec<String>> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_url_omits_empty_subfolder() {
        let file = OutputFile::new("ComfyUI_00001_.png", "", StorageArea::Output);
        assert_eq!(
            file.proxy_url("comfyui"),
            "/comfyui/image?filename=ComfyUI_00001_.png&type=output"
        );
    }

    #[test]
    fn proxy_url_encodes_components() {
        let file = OutputFile::new("my image&1.png", "portraits/set a", StorageArea::Temp);
        assert_eq!(
            file.proxy_url("/comfyui/"),
            "/comfyui/image?filename=my+image%261.png&subfolder=portraits%2Fset+a&type=temp"
        );
    }

    #[test]
    fn storage_area_parses_known_values_only() {
        assert_eq!("input".parse::<StorageArea>().unwrap(), StorageArea::Input);
        assert_eq!("temp".parse::<StorageArea>().unwrap(), StorageArea::Temp);
        assert!("../etc".parse::<StorageArea>().is_err());
    }

    #[test]
    fn output_file_reads_backend_shape() {
        let file: OutputFile = serde_json::from_value(serde_json::json!({
            "filename": "a.png",
            "type": "temp"
        }))
        .unwrap();
        assert_eq!(file.subfolder, "");
        assert_eq!(file.kind, StorageArea::Temp);
    }

    #[test]
    fn map_counts_urls_and_serializes_as_object() {
        let mut map = OutputImageMap::new();
        map.extend_node("9", vec!["/a".to_string(), "/b".to_string()]);
        map.extend_node("12", vec!["/c".to_string()]);
        map.extend_node("13", Vec::new());

        assert_eq!(map.total_count(), 3);
        assert_eq!(map.node_count(), 2);
        assert_eq!(map.get("9").unwrap(), ["/a", "/b"]);
        assert_eq!(
            serde_json::to_value(&map).unwrap(),
            serde_json::json!({"12": ["/c"], "9": ["/a", "/b"]})
        );
        assert!(OutputImageMap::new().is_empty());
    }
}
