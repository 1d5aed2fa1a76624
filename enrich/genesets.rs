//! # Reference Gene-Set Collections
//!
//! Gene sets come from MSigDB in the GMT format: one set per line, tab separated,
//! `name`, `description`, then the member gene symbols. A collection is either read
//! from a local GMT file or fetched once from the MSigDB release server and cached.

use crate::enrich::download;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MSIGDB_BASE_URL: &str =
    "https://data.broadinstitute.org/gsea-msigdb/msigdb/release";
pub const DEFAULT_MSIGDB_RELEASE: &str = "2023.2";
/// GO biological process, the ontology sub-collection the classifier was built on.
pub const DEFAULT_MSIGDB_COLLECTION: &str = "c5.go.bp";
pub const DEFAULT_CACHE_DIR: &str = "virpred_geneset_cache";

#[derive(Error, Debug)]
pub enum GeneSetError {
    #[error("I/O error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Gene-set source '{0}' could not be reached: {1}")]
    Unreachable(String, String),
    #[error("Gene-set download from '{url}' did not finish within {timeout:?}")]
    TimedOut { url: String, timeout: Duration },
    #[error("Malformed GMT line {line} in '{path}': expected a name, a description and at least one gene")]
    MalformedLine { path: PathBuf, line: usize },
    #[error("Gene-set collection '{0}' contains no gene sets")]
    EmptyCollection(String),
}

/// Species naming used by MSigDB release files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Species {
    #[default]
    #[serde(rename = "Homo sapiens", alias = "human", alias = "Hs")]
    Human,
    #[serde(rename = "Mus musculus", alias = "mouse", alias = "Mm")]
    Mouse,
}

impl Species {
    pub fn code(self) -> &'static str {
        match self {
            Self::Human => "Hs",
            Self::Mouse => "Mm",
        }
    }
}

/// A versioned MSigDB collection on the release server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MsigdbRelease {
    pub species: Species,
    pub collection: String,
    pub release: String,
    pub base_url: String,
    pub cache_dir: PathBuf,
}

impl Default for MsigdbRelease {
    fn default() -> Self {
        Self {
            species: Species::Human,
            collection: DEFAULT_MSIGDB_COLLECTION.to_string(),
            release: DEFAULT_MSIGDB_RELEASE.to_string(),
            base_url: DEFAULT_MSIGDB_BASE_URL.to_string(),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
        }
    }
}

impl MsigdbRelease {
    pub fn file_name(&self) -> String {
        format!(
            "{}.v{}.{}.symbols.gmt",
            self.collection,
            self.release,
            self.species.code()
        )
    }

    pub fn url(&self) -> String {
        format!(
            "{}/{}.{}/{}",
            self.base_url.trim_end_matches('/'),
            self.release,
            self.species.code(),
            self.file_name()
        )
    }
}

/// Where the reference gene sets come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneSetSource {
    /// A GMT file on disk; never touches the network.
    Local { path: PathBuf },
    /// An MSigDB release, downloaded into the cache directory on first use.
    Msigdb(MsigdbRelease),
}

impl Default for GeneSetSource {
    fn default() -> Self {
        Self::Msigdb(MsigdbRelease::default())
    }
}

impl GeneSetSource {
    pub fn describe(&self) -> String {
        match self {
            Self::Local { path } => path.display().to_string(),
            Self::Msigdb(release) => release.url(),
        }
    }
}

/// An immutable mapping from gene-set name to member genes, ordered by name.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneSetCollection {
    sets: BTreeMap<String, Vec<String>>,
}

impl GeneSetCollection {
    /// Builds a collection, merging repeated set names and dropping repeated genes.
    pub fn from_sets<I, S, G>(sets: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<G>)>,
        S: Into<String>,
        G: Into<String>,
    {
        let mut merged: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (name, genes) in sets {
            merged
                .entry(name.into())
                .or_default()
                .extend(genes.into_iter().map(Into::into));
        }
        Self {
            sets: merged
                .into_iter()
                .map(|(name, genes)| (name, genes.into_iter().collect()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.sets.get(name).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.sets.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Parses a GMT file into a collection.
pub fn read_gmt(path: &Path) -> Result<GeneSetCollection, GeneSetError> {
    let text = fs::read_to_string(path).map_err(|source| GeneSetError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut sets = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let name = fields.next().map(str::trim).unwrap_or_default();
        // The description column is present but unused.
        let description = fields.next();
        let genes: Vec<&str> = fields.map(str::trim).filter(|g| !g.is_empty()).collect();
        if name.is_empty() || description.is_none() || genes.is_empty() {
            return Err(GeneSetError::MalformedLine {
                path: path.to_path_buf(),
                line: idx + 1,
            });
        }
        sets.push((name, genes));
    }

    let collection = GeneSetCollection::from_sets(sets);
    if collection.is_empty() {
        return Err(GeneSetError::EmptyCollection(path.display().to_string()));
    }
    Ok(collection)
}

/// Resolves a source to a parsed collection, downloading it if necessary.
pub fn load_collection(
    source: &GeneSetSource,
    timeout: Duration,
) -> Result<GeneSetCollection, GeneSetError> {
    let path = match source {
        GeneSetSource::Local { path } => path.clone(),
        GeneSetSource::Msigdb(release) => download::fetch_release(release, timeout)?,
    };
    let collection = read_gmt(&path)?;
    log::info!(
        "Loaded {} gene sets from {}",
        collection.len(),
        source.describe()
    );
    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_gmt(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn msigdb_url_follows_release_layout() {
        let release = MsigdbRelease::default();
        assert_eq!(
            release.url(),
            "https://data.broadinstitute.org/gsea-msigdb/msigdb/release/2023.2.Hs/c5.go.bp.v2023.2.Hs.symbols.gmt"
        );

        let mouse = MsigdbRelease {
            species: Species::Mouse,
            collection: "m5.go.bp".to_string(),
            base_url: "https://mirror.example.org/msigdb/".to_string(),
            ..MsigdbRelease::default()
        };
        assert_eq!(
            mouse.url(),
            "https://mirror.example.org/msigdb/2023.2.Mm/m5.go.bp.v2023.2.Mm.symbols.gmt"
        );
    }

    #[test]
    fn read_gmt_parses_and_sorts_sets() {
        let file = write_gmt(
            "GOBP_VIRAL_RESPONSE\thttp://x\tMX1\tIFIT1\tISG15\n\n\
             GOBP_APOPTOSIS\tdesc\tCASP3\tBAX\tBAX\n",
        );
        let collection = read_gmt(file.path()).unwrap();
        assert_eq!(collection.len(), 2);
        let names: Vec<&str> = collection.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["GOBP_APOPTOSIS", "GOBP_VIRAL_RESPONSE"]);
        assert_eq!(collection.get("GOBP_APOPTOSIS").unwrap(), ["BAX", "CASP3"]);
    }

    #[test]
    fn read_gmt_reports_malformed_line_number() {
        let file = write_gmt("SET_A\tdesc\tG1\nSET_B\tdesc_only\n");
        match read_gmt(file.path()) {
            Err(GeneSetError::MalformedLine { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected MalformedLine, got {other:?}"),
        }
    }

    #[test]
    fn empty_gmt_is_an_error() {
        let file = write_gmt("\n\n");
        assert!(matches!(
            read_gmt(file.path()),
            Err(GeneSetError::EmptyCollection(_))
        ));
    }

    #[test]
    fn local_source_round_trips_through_toml() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            gene_sets: GeneSetSource,
        }
        let parsed: Wrapper =
            toml::from_str("[gene_sets]\nkind = \"local\"\npath = \"sets.gmt\"\n").unwrap();
        assert_eq!(
            parsed.gene_sets,
            GeneSetSource::Local {
                path: PathBuf::from("sets.gmt")
            }
        );
    }
}
