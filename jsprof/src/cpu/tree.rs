//! Call-path sensitive call tree.
//!
//! A node is identified by its parent and its frame (function name, url,
//! script id, line, column), so the same function reached through two
//! different callers gets two nodes, while repeated samples through the same
//! path share one.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::borrow::Cow;
use std::collections::HashMap;

use super::samples::CapturedFrame;

/// Id of the synthetic `(root)` node.
pub const ROOT_ID: u32 = 1;

/// Bytes escaped when turning a filesystem path into a `file://` URL.
const PATH_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// A source location a frame should be attributed to instead of its raw
/// position, typically looked up from a source map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub url: String,
    pub line_number: i64,
    pub column_number: i64,
}

/// Optional enrichment step applied to every frame before it is keyed.
pub trait FrameResolver {
    fn resolve(&self, frame: &CapturedFrame) -> Option<SourceLocation>;
}

/// Keeps every frame's own location.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSourceMaps;

impl FrameResolver for NoSourceMaps {
    fn resolve(&self, _frame: &CapturedFrame) -> Option<SourceLocation> {
        None
    }
}

impl<F> FrameResolver for F
where
    F: Fn(&CapturedFrame) -> Option<SourceLocation>,
{
    fn resolve(&self, frame: &CapturedFrame) -> Option<SourceLocation> {
        self(frame)
    }
}

/// Canonicalize absolute filesystem paths to `file://` URLs.
///
/// Handles Unix paths (`/a/b.js`), drive-letter paths (`C:\a\b.js`) and UNC
/// paths (`\\server\share\b.js`). Anything else, including existing URLs
/// and the empty string, is returned unchanged.
pub fn to_file_url(path: &str) -> Cow<'_, str> {
    let bytes = path.as_bytes();

    if let Some(rest) = path.strip_prefix("\\\\") {
        let rest = rest.replace('\\', "/");
        return Cow::Owned(format!("file://{}", utf8_percent_encode(&rest, PATH_SET)));
    }

    if bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
    {
        let normalized = path.replace('\\', "/");
        return Cow::Owned(format!("file:///{}", utf8_percent_encode(&normalized, PATH_SET)));
    }

    if path.starts_with('/') {
        return Cow::Owned(format!("file://{}", utf8_percent_encode(path, PATH_SET)));
    }

    Cow::Borrowed(path)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NodeKey {
    parent: u32,
    function_name: String,
    url: String,
    script_id: u64,
    line_number: i64,
    column_number: i64,
}

/// A call tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub id: u32,
    pub function_name: String,
    pub url: String,
    pub script_id: u64,
    pub line_number: i64,
    pub column_number: i64,
    /// Samples whose innermost frame is this node.
    pub hit_count: u32,
    /// Child ids in creation order.
    pub children: Vec<u32>,
}

/// Interned call tree. Node ids are assigned sequentially from [`ROOT_ID`].
#[derive(Debug)]
pub struct CallTree {
    nodes: Vec<TreeNode>,
    index: HashMap<NodeKey, u32>,
}

impl Default for CallTree {
    fn default() -> Self {
        Self::new()
    }
}

impl CallTree {
    pub fn new() -> Self {
        let root = TreeNode {
            id: ROOT_ID,
            function_name: "(root)".to_string(),
            url: String::new(),
            script_id: 0,
            line_number: -1,
            column_number: -1,
            hit_count: 0,
            children: Vec::new(),
        };
        CallTree {
            nodes: vec![root],
            index: HashMap::new(),
        }
    }

    /// Add one sample, frames outermost first, and return the id it is
    /// attributed to.
    ///
    /// An empty stack is attributed to the root without touching any hit
    /// count.
    pub fn add_sample<R: FrameResolver + ?Sized>(
        &mut self,
        frames: &[CapturedFrame],
        resolver: &R,
    ) -> u32 {
        if frames.is_empty() {
            return ROOT_ID;
        }

        let mut parent = ROOT_ID;
        for frame in frames {
            parent = self.intern(parent, frame, resolver);
        }
        self.node_mut(parent).hit_count += 1;
        parent
    }

    fn intern<R: FrameResolver + ?Sized>(
        &mut self,
        parent: u32,
        frame: &CapturedFrame,
        resolver: &R,
    ) -> u32 {
        let (url, line_number, column_number) = match resolver.resolve(frame) {
            Some(location) => (location.url, location.line_number, location.column_number),
            None => (frame.url.clone(), frame.line_number, frame.column_number),
        };

        let key = NodeKey {
            parent,
            function_name: frame.function_name.clone(),
            url: to_file_url(&url).into_owned(),
            script_id: frame.script_id,
            line_number,
            column_number,
        };
        if let Some(&id) = self.index.get(&key) {
            return id;
        }

        let id = self.nodes.len() as u32 + 1;
        self.nodes.push(TreeNode {
            id,
            function_name: key.function_name.clone(),
            url: key.url.clone(),
            script_id: key.script_id,
            line_number: key.line_number,
            column_number: key.column_number,
            hit_count: 0,
            children: Vec::new(),
        });
        self.node_mut(parent).children.push(id);
        self.index.insert(key, id);
        id
    }

    fn node_mut(&mut self, id: u32) -> &mut TreeNode {
        &mut self.nodes[(id - ROOT_ID) as usize]
    }

    pub fn node(&self, id: u32) -> Option<&TreeNode> {
        let slot = id.checked_sub(ROOT_ID)?;
        self.nodes.get(slot as usize)
    }

    /// All nodes, root first, in id order.
    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root exists from construction.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
