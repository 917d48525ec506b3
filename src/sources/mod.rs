//! Data sources - upstream medical APIs exposed as tool sets
//!
//! Each source is a [`ToolBox`] whose tools fetch through the shared
//! retrying [`Fetcher`]. A source can run in-process behind a router
//! (`builtin:` backends) or standalone via `toolmux backend <kind>`.

pub mod icd10;
pub mod pubmed;

use serde::{Deserialize, Serialize};

use crate::fetch::Fetcher;
use crate::tools::ToolBox;

/// Available data sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// NIH clinical tables ICD-10-CM search
    Icd10,
    /// NCBI E-utilities PubMed search
    Pubmed,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Icd10 => "icd10",
            Self::Pubmed => "pubmed",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tool set for a source
pub fn toolbox(kind: SourceKind, fetcher: Fetcher) -> ToolBox {
    match kind {
        SourceKind::Icd10 => icd10::toolbox(fetcher),
        SourceKind::Pubmed => pubmed::toolbox(fetcher),
    }
}
