//! Markdown and NDJSON rendering of a [`HeapAnalysis`].
//!
//! The markdown report is meant to be grepped as much as read: every object
//! and edge is listed with raw byte counts inside collapsible sections, and
//! the human-facing tables above them use [`format_bytes`].

use serde::Serialize;
use serde_json::{Value, json};
use std::borrow::Cow;
use std::io::{self, Write};

use super::retainers::RetainerChain;
use super::{HeapAnalysis, Result};

const GC_ROOT_LABEL_CHARS: usize = 50;
const OBJECT_LABEL_CHARS: usize = 40;
const STRING_VALUE_CHARS: usize = 100;

/// Section sizes for the rendered report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOptions {
    pub top_types: usize,
    pub top_objects: usize,
    pub retainer_chains: usize,
    pub gc_roots: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        ReportOptions {
            top_types: 50,
            top_objects: 50,
            retainer_chains: 20,
            gc_roots: 100,
        }
    }
}

/// Escape text for embedding in a markdown table cell or code span.
///
/// ASCII control characters other than newline, carriage return and tab are
/// written as `\u{XX}`. [`unescape`] reverses this exactly.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '|' => out.push_str("\\|"),
            '`' => out.push_str("\\`"),
            c if c.is_ascii_control() => out.push_str(&format!("\\u{{{:02x}}}", u32::from(c))),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape`]. Unrecognized escapes are kept verbatim.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(c @ ('\\' | '"' | '|' | '`')) => out.push(c),
            Some('u') => {
                let rest = chars.as_str();
                match decode_code_point(rest) {
                    Some((decoded, consumed)) => {
                        out.push(decoded);
                        chars = rest[consumed..].chars();
                    }
                    None => out.push_str("\\u"),
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Parse `{hex}` at the start of `rest`, returning the char and bytes used.
fn decode_code_point(rest: &str) -> Option<(char, usize)> {
    let body = rest.strip_prefix('{')?;
    let end = body.find('}')?;
    let code = u32::from_str_radix(&body[..end], 16).ok()?;
    Some((char::from_u32(code)?, end + 2))
}

/// Human-readable size with one truncated decimal: `1536` is `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{bytes} B")
    } else if bytes < MB {
        format!("{}.{} KB", bytes / KB, bytes % KB * 10 / KB)
    } else if bytes < GB {
        format!("{}.{} MB", bytes / MB, bytes % MB * 10 / MB)
    } else {
        format!("{}.{} GB", bytes / GB, bytes % GB * 10 / GB)
    }
}

/// First `max` characters of `text`.
fn prefix_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// `text` if it fits in `max` characters, otherwise its first `max - 3`
/// characters followed by `...`.
fn ellipsize(text: &str, max: usize) -> Cow<'_, str> {
    if text.chars().count() <= max {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(format!("{}...", prefix_chars(text, max.saturating_sub(3))))
    }
}

fn write_record<W: Write, T: Serialize>(writer: &mut W, record_type: &str, data: &T) -> Result<()> {
    let mut map = serde_json::to_value(data)?;
    if let Value::Object(ref mut obj) = map {
        obj.insert("type".to_string(), Value::String(record_type.to_string()));
    }
    writeln!(writer, "{}", serde_json::to_string(&map)?)?;
    Ok(())
}

impl HeapAnalysis {
    /// Render the full markdown report.
    pub fn write_markdown<W: Write>(&self, mut writer: W, options: &ReportOptions) -> Result<()> {
        if self.is_empty() {
            writeln!(writer, "# Heap Profile\n")?;
            writeln!(
                writer,
                "Error: No heap profile nodes found. The heap snapshot may be empty or malformed."
            )?;
            writer.flush()?;
            return Ok(());
        }

        let w = &mut writer;
        self.write_header(w)?;
        self.write_summary(w)?;
        self.write_top_types(w, options.top_types)?;
        self.write_largest_objects(w, options.top_objects)?;
        self.write_retainer_chains(w, options.retainer_chains)?;
        self.write_gc_roots(w, options.gc_roots)?;
        self.write_all_objects(w)?;
        self.write_all_edges(w)?;
        self.write_string_values(w)?;
        self.write_type_statistics(w)?;
        self.write_property_names(w)?;

        writeln!(w, "---\n")?;
        writeln!(w, "*End of heap profile*")?;
        writer.flush()?;
        Ok(())
    }

    /// Render the retainer chain of a single object as a markdown section.
    pub fn write_retainer_chain<W: Write>(&self, mut writer: W, id: u64) -> Result<()> {
        if let Some((ordinal, _)) = self.node_by_id(id) {
            writeln!(
                writer,
                "### Object #{} - `{}` ({} retained)\n",
                id,
                escape(self.class_name(ordinal)),
                format_bytes(self.tree.retained_size(ordinal))
            )?;
        }
        self.write_chain_block(&mut writer, id)?;
        writer.flush()?;
        Ok(())
    }

    /// Render the analysis as one JSON record per line.
    pub fn write_ndjson<W: Write>(&self, mut writer: W, options: &ReportOptions) -> Result<()> {
        let w = &mut writer;
        write_record(w, "header", &json!({ "format": "heap-report", "version": "0.1" }))?;
        write_record(
            w,
            "summary",
            &json!({
                "total_size": self.total_size,
                "objects": self.snapshot.nodes.len(),
                "edges": self.snapshot.edges.len(),
                "types": self.types.len(),
                "gc_roots": self.tree.gc_root_ids().len(),
            }),
        )?;

        for stats in self.types.iter().take(options.top_types) {
            write_record(w, "type", stats)?;
        }

        for (rank, &ordinal) in self.largest.iter().take(options.top_objects).enumerate() {
            let node = &self.snapshot.nodes[ordinal];
            write_record(
                w,
                "object",
                &json!({
                    "rank": rank + 1,
                    "id": node.id,
                    "class_name": self.class_name(ordinal),
                    "size": node.size,
                    "retained_size": self.tree.retained_size(ordinal),
                    "out_edges": self.index.outgoing(node.id).len(),
                    "in_edges": self.index.incoming(node.id).len(),
                    "gc_root": self.tree.is_gc_root(ordinal),
                    "internal": node.is_internal(),
                    "label": self.snapshot.label(node),
                }),
            )?;
        }

        for &ordinal in self.largest.iter().take(options.retainer_chains) {
            let id = self.snapshot.nodes[ordinal].id;
            write_record(w, "retainers", &self.chain_record(id))?;
        }

        writer.flush()?;
        Ok(())
    }

    fn chain_record(&self, id: u64) -> Value {
        let (status, path) = match self.retainer_chain(id) {
            RetainerChain::Path(hops) => {
                let path: Vec<Value> = hops
                    .iter()
                    .filter_map(|hop| {
                        let (ordinal, node) = self.node_by_id(hop.id)?;
                        let edge = hop
                            .edge
                            .map(|e| self.snapshot.edge_name(&self.snapshot.edges[e]).into_owned());
                        Some(json!({
                            "id": hop.id,
                            "class_name": self.class_name(ordinal),
                            "size": node.size,
                            "gc_root": self.tree.is_gc_root(ordinal),
                            "edge": edge,
                        }))
                    })
                    .collect();
                ("path", path)
            }
            RetainerChain::TargetIsRoot => ("target_is_root", Vec::new()),
            RetainerChain::NoPath => ("no_path", Vec::new()),
            RetainerChain::UnknownTarget => ("unknown_target", Vec::new()),
        };
        json!({ "id": id, "status": status, "path": path })
    }

    fn write_header<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "# Heap Profile\n")?;
        writeln!(
            w,
            "Generated by `heap_report`. This profile contains complete heap data in markdown format.\n"
        )?;
        writeln!(w, "**Quick Search Commands:**")?;
        writeln!(w, "```bash")?;
        writeln!(w, "grep '| `Function`' file.md            # Find all Function objects")?;
        writeln!(w, "grep 'gcroot=1' file.md               # Find all GC roots")?;
        writeln!(w, "grep '| 12345 |' file.md              # Find object #12345 or edges involving it")?;
        writeln!(w, "```\n")?;
        writeln!(w, "---\n")
    }

    fn write_summary<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "## Summary\n")?;
        writeln!(w, "| Metric | Value |")?;
        writeln!(w, "|--------|------:|")?;
        writeln!(
            w,
            "| Total Heap Size | {} ({} bytes) |",
            format_bytes(self.total_size),
            self.total_size
        )?;
        writeln!(w, "| Total Objects | {} |", self.snapshot.nodes.len())?;
        writeln!(w, "| Total Edges | {} |", self.snapshot.edges.len())?;
        writeln!(w, "| Unique Types | {} |", self.types.len())?;
        writeln!(w, "| GC Roots | {} |\n", self.tree.gc_root_ids().len())
    }

    fn write_top_types<W: Write>(&self, w: &mut W, limit: usize) -> io::Result<()> {
        writeln!(w, "## Top {limit} Types by Retained Size\n")?;
        writeln!(w, "| Rank | Type | Count | Self Size | Retained Size | Largest Instance |")?;
        writeln!(w, "|-----:|------|------:|----------:|--------------:|-----------------:|")?;
        for (rank, stats) in self.types.iter().take(limit).enumerate() {
            writeln!(
                w,
                "| {} | `{}` | {} | {} | {} | {} |",
                rank + 1,
                escape(&stats.name),
                stats.count,
                format_bytes(stats.total_size),
                format_bytes(stats.total_retained_size),
                format_bytes(stats.largest_retained)
            )?;
        }
        writeln!(w)
    }

    fn write_largest_objects<W: Write>(&self, w: &mut W, limit: usize) -> io::Result<()> {
        writeln!(w, "## Top {limit} Largest Objects\n")?;
        writeln!(w, "Objects that retain the most memory (potential memory leak sources):\n")?;
        writeln!(w, "| Rank | ID | Type | Self Size | Retained Size | Out-Edges | In-Edges |")?;
        writeln!(w, "|-----:|---:|------|----------:|--------------:|----------:|---------:|")?;
        for (rank, &ordinal) in self.largest.iter().take(limit).enumerate() {
            let node = &self.snapshot.nodes[ordinal];
            writeln!(
                w,
                "| {} | {} | `{}` | {} | {} | {} | {} |",
                rank + 1,
                node.id,
                escape(self.class_name(ordinal)),
                format_bytes(node.size),
                format_bytes(self.tree.retained_size(ordinal)),
                self.index.outgoing(node.id).len(),
                self.index.incoming(node.id).len()
            )?;
        }
        writeln!(w)
    }

    fn write_retainer_chains<W: Write>(&self, w: &mut W, limit: usize) -> io::Result<()> {
        writeln!(w, "## Retainer Chains\n")?;
        writeln!(
            w,
            "How the top {limit} largest objects are kept alive (path from GC root to object):\n"
        )?;
        for (rank, &ordinal) in self.largest.iter().take(limit).enumerate() {
            let node = &self.snapshot.nodes[ordinal];
            writeln!(
                w,
                "### {}. Object #{} - `{}` ({} retained)\n",
                rank + 1,
                node.id,
                escape(self.class_name(ordinal)),
                format_bytes(self.tree.retained_size(ordinal))
            )?;
            self.write_chain_block(w, node.id)?;
        }
        Ok(())
    }

    /// A fenced block with one line per hop, indented four spaces per level.
    fn write_chain_block<W: Write>(&self, w: &mut W, id: u64) -> io::Result<()> {
        writeln!(w, "```")?;
        match self.retainer_chain(id) {
            RetainerChain::Path(hops) => {
                for (depth, hop) in hops.iter().enumerate() {
                    let Some((ordinal, node)) = self.node_by_id(hop.id) else {
                        continue;
                    };
                    write!(
                        w,
                        "{}{}#{}",
                        "    ".repeat(depth),
                        escape(self.class_name(ordinal)),
                        hop.id
                    )?;
                    if self.tree.is_gc_root(ordinal) {
                        write!(w, " [ROOT]")?;
                    }
                    write!(w, " ({})", format_bytes(node.size))?;
                    if let Some(edge_idx) = hop.edge {
                        let name = self.snapshot.edge_name(&self.snapshot.edges[edge_idx]);
                        if !name.is_empty() {
                            write!(w, " .{}", escape(&name))?;
                        }
                        write!(w, " -> ")?;
                    }
                    writeln!(w)?;
                }
            }
            RetainerChain::TargetIsRoot => {
                let class = self
                    .node_by_id(id)
                    .map(|(ordinal, _)| self.class_name(ordinal))
                    .unwrap_or(super::stats::UNKNOWN_CLASS);
                writeln!(w, "{}#{} [ROOT] (this object is a GC root)", escape(class), id)?;
            }
            RetainerChain::NoPath => writeln!(w, "(no path to GC root found)")?,
            RetainerChain::UnknownTarget => writeln!(w, "(no object with id {id})")?,
        }
        writeln!(w, "```\n")
    }

    fn write_gc_roots<W: Write>(&self, w: &mut W, limit: usize) -> io::Result<()> {
        writeln!(w, "## GC Roots\n")?;
        writeln!(w, "Objects directly held by the runtime (prevent garbage collection):\n")?;
        writeln!(w, "| ID | Type | Size | Retained | Label |")?;
        writeln!(w, "|---:|------|-----:|---------:|-------|")?;

        let roots = self
            .snapshot
            .nodes
            .iter()
            .enumerate()
            .filter(|&(ordinal, _)| self.tree.is_gc_root(ordinal));
        for (ordinal, node) in roots.take(limit) {
            writeln!(
                w,
                "| {} | `{}` | {} | {} | {} |",
                node.id,
                escape(self.class_name(ordinal)),
                format_bytes(node.size),
                format_bytes(self.tree.retained_size(ordinal)),
                escape(prefix_chars(self.snapshot.label(node), GC_ROOT_LABEL_CHARS))
            )?;
        }

        let total = self.tree.gc_root_ids().len();
        if total > limit {
            writeln!(w, "\n*... and {} more GC roots*", total - limit)?;
        }
        writeln!(w)
    }

    fn write_all_objects<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "## All Objects\n")?;
        writeln!(
            w,
            "<details>\n<summary>Click to expand {} objects (searchable with grep)</summary>\n",
            self.snapshot.nodes.len()
        )?;
        writeln!(w, "| ID | Type | Size | Retained | Flags | Label |")?;
        writeln!(w, "|---:|------|-----:|---------:|-------|-------|")?;
        for (ordinal, node) in self.snapshot.nodes.iter().enumerate() {
            let mut flags = String::new();
            if self.tree.is_gc_root(ordinal) {
                flags.push_str("gcroot=1 ");
            }
            if node.is_internal() {
                flags.push_str("internal=1");
            }
            writeln!(
                w,
                "| {} | `{}` | {} | {} | {} | {} |",
                node.id,
                escape(self.class_name(ordinal)),
                node.size,
                self.tree.retained_size(ordinal),
                flags,
                escape(&ellipsize(self.snapshot.label(node), OBJECT_LABEL_CHARS))
            )?;
        }
        writeln!(w, "\n</details>\n")
    }

    fn write_all_edges<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "## All Edges\n")?;
        writeln!(
            w,
            "<details>\n<summary>Click to expand {} edges (object reference graph)</summary>\n",
            self.snapshot.edges.len()
        )?;
        writeln!(w, "| From | To | Type | Name |")?;
        writeln!(w, "|-----:|---:|------|------|")?;
        for edge in &self.snapshot.edges {
            writeln!(
                w,
                "| {} | {} | {} | {} |",
                edge.from_id,
                edge.to_id,
                escape(self.snapshot.edge_type(edge).unwrap_or("?")),
                escape(&self.snapshot.edge_name(edge))
            )?;
        }
        writeln!(w, "\n</details>\n")
    }

    fn write_string_values<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "## String Values\n")?;
        writeln!(w, "String objects (useful for identifying leak sources by content):\n")?;
        writeln!(w, "<details>\n<summary>Click to expand string values</summary>\n")?;
        writeln!(w, "| ID | Size | Value |")?;
        writeln!(w, "|---:|-----:|-------|")?;
        for (ordinal, node) in self.snapshot.nodes.iter().enumerate() {
            if !matches!(self.class_name(ordinal), "string" | "String") {
                continue;
            }
            let label = self.snapshot.label(node);
            if label.is_empty() {
                writeln!(w, "| {} | {} |  |", node.id, node.size)?;
            } else {
                writeln!(
                    w,
                    "| {} | {} | `{}` |",
                    node.id,
                    node.size,
                    escape(&ellipsize(label, STRING_VALUE_CHARS))
                )?;
            }
        }
        writeln!(w, "\n</details>\n")
    }

    fn write_type_statistics<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "## Complete Type Statistics\n")?;
        writeln!(
            w,
            "<details>\n<summary>Click to expand all {} types</summary>\n",
            self.types.len()
        )?;
        writeln!(w, "| Type | Count | Self Size | Retained Size | Largest ID |")?;
        writeln!(w, "|------|------:|----------:|--------------:|-----------:|")?;
        for stats in &self.types {
            writeln!(
                w,
                "| `{}` | {} | {} | {} | {} |",
                escape(&stats.name),
                stats.count,
                stats.total_size,
                stats.total_retained_size,
                stats.largest_instance_id
            )?;
        }
        writeln!(w, "\n</details>\n")
    }

    fn write_property_names<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let names = &self.snapshot.edge_names;
        writeln!(w, "## Property Names\n")?;
        writeln!(
            w,
            "<details>\n<summary>Click to expand all {} property/variable names</summary>\n",
            names.len()
        )?;
        writeln!(w, "| Index | Name |")?;
        writeln!(w, "|------:|------|")?;
        for (index, name) in names.iter().enumerate() {
            if !name.is_empty() {
                writeln!(w, "| {} | `{}` |", index, escape(name))?;
            }
        }
        writeln!(w, "\n</details>\n")
    }
}
