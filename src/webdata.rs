//! The `UnityWebData` asset bundle.
//!
//! WebGL builds ship all non-code assets, including `global-metadata.dat`, in a single
//! `*.data` file: a null-terminated signature, the header length, and a list of
//! `(offset, size, name)` node records, followed by the node contents.

use std::path::Path;

use log::{debug, warn};

use crate::{
    config::ResolvableNode,
    file::{parser::Parser, Input},
    Error, Result,
};

/// Offset of the version string in the head of `data.unity3d`.
const UNITY_VERSION_OFFSET: usize = 18;

/// A resolved node of the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebDataNode {
    /// Offset of the node contents in the bundle
    pub offset: u32,
    /// Size of the node contents, possibly truncated by a [`ResolvableNode`]
    pub size: u32,
    /// Node path
    pub name: String,
    /// Node contents
    pub data: Vec<u8>,
}

/// A parsed web data bundle, holding only the resolvable nodes.
#[derive(Debug, Clone)]
pub struct WebData {
    /// Bundle signature, `UnityWebData1.0`
    pub signature: String,
    /// Length of the header including the node records
    pub head_len: u32,
    /// Resolved nodes, in header order
    pub nodes: Vec<WebDataNode>,
    /// Unity version from the head of `data.unity3d`, if that node was resolved
    pub unity_version: Option<String>,
}

impl WebData {
    /// Parse a bundle, keeping the nodes named in `resolvable`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if the header or a resolved node is truncated.
    pub fn parse(data: &[u8], resolvable: &[ResolvableNode]) -> Result<WebData> {
        let mut parser = Parser::new(data);
        let signature = parser.read_string_null()?;
        let head_len = parser.read_le::<u32>()?;

        let mut nodes = Vec::new();
        while parser.pos() < head_len as usize {
            let offset = parser.read_le::<u32>()?;
            let size = parser.read_le::<u32>()?;
            let name = parser.read_prefixed_string()?;

            let Some(wanted) = resolvable.iter().find(|node| node.name == name) else {
                continue;
            };
            let size = wanted.size.unwrap_or(size);

            let mut contents = Parser::new(data);
            contents.seek(offset as usize)?;
            nodes.push(WebDataNode {
                offset,
                size,
                name,
                data: contents.read_bytes(size as usize)?.to_vec(),
            });
        }
        debug!("Parsed web data into {} node(s)", nodes.len());

        let unity_version = nodes
            .iter()
            .find(|node| node.name == "data.unity3d")
            .and_then(|node| {
                let mut parser = Parser::new(&node.data);
                parser.seek(UNITY_VERSION_OFFSET).ok()?;
                parser.read_string_null().ok()
            });
        match &unity_version {
            Some(version) => debug!("Unity version {version}"),
            None => warn!("Unable to determine the Unity version from web data"),
        }

        Ok(WebData {
            signature,
            head_len,
            nodes,
            unity_version,
        })
    }

    /// Memory-map and parse the bundle at `path`.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the file cannot be read, otherwise the errors of
    /// [`WebData::parse`].
    pub fn from_file(path: impl AsRef<Path>, resolvable: &[ResolvableNode]) -> Result<WebData> {
        let input = Input::from_file(path)?;
        WebData::parse(input.data(), resolvable)
    }

    /// The node named `name`.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&WebDataNode> {
        self.nodes.iter().find(|node| node.name == name)
    }

    /// Contents of the metadata node `name`.
    ///
    /// # Errors
    /// Returns [`Error::UnresolvedReference`] if the node is missing, which typically means the
    /// game is encrypted or packaged differently.
    pub fn metadata(&self, name: &str) -> Result<&[u8]> {
        self.node(name)
            .map(|node| node.data.as_slice())
            .ok_or_else(|| {
                Error::UnresolvedReference(format!(
                    "{name} not found; the game may be encrypted, corrupt or unsupported"
                ))
            })
    }
}
