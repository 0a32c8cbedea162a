/// Page kind labels attached to frontier entries
use serde::Deserialize;
use std::fmt;

/// The kind of page a frontier entry points at
///
/// The label decides which extraction rules apply to the fetched content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageLabel {
    /// A page whose primary content is links to further pages
    /// (category listings, search results)
    Index,

    /// A page whose primary content is the data to extract
    /// (a single article or listing)
    Detail,
}

impl PageLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Detail => "detail",
        }
    }
}

impl fmt::Display for PageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
