//! # tree: in-memory model of a parsed description page
//!
//! A [`ParsedItem`] is an ordered sequence of segments: free text, comments and
//! template invocations ([`TemplateNode`]). Parameter values are either plain
//! text or a nested [`ParsedItem`] when the value itself contains templates.
//!
//! Nodes do not point back at their parent. The owning [`ParsedItem`] removes a
//! node by its [`NodeId`], which stays valid (and becomes a no-op) after the
//! node is gone.

use std::fmt;
use std::ops::Range;

/// Stands in for a template or comment in [`ParsedItem::skeleton`].
pub const OBJECT_MARK: char = '\u{FFFC}';

/// Identifies a template node inside the [`ParsedItem`] that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// A parameter value: plain text, or a sub-tree when the value holds templates.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Tree(ParsedItem),
}

impl ParamValue {
    pub fn is_blank(&self) -> bool {
        match self {
            ParamValue::Text(text) => text.trim().is_empty(),
            ParamValue::Tree(tree) => tree.to_wikitext().trim().is_empty(),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(text: &str) -> Self {
        ParamValue::Text(text.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(text: String) -> Self {
        ParamValue::Text(text)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Text(text) => f.write_str(text),
            ParamValue::Tree(tree) => f.write_str(&tree.to_wikitext()),
        }
    }
}

/// Parameter keys compare case-insensitively, with `_` equal to a space.
pub fn normalize_key(key: &str) -> String {
    key.trim().replace('_', " ").to_lowercase()
}

/// One template invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateNode {
    id: NodeId,
    pub title: String,
    params: Vec<(String, ParamValue)>,
}

impl TemplateNode {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: NodeId(0),
            title: title.into(),
            params: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.position(key).map(|i| &self.params[i].1)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut ParamValue> {
        self.position(key).map(move |i| &mut self.params[i].1)
    }

    pub fn has(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Set `key`, replacing the value under any equivalent key in place.
    pub fn put(&mut self, key: &str, value: impl Into<ParamValue>) {
        let value = value.into();
        match self.position(key) {
            Some(i) => self.params[i].1 = value,
            None => self.params.push((key.trim().to_string(), value)),
        }
    }

    /// Append `text` to the value under `key`, creating it when absent.
    ///
    /// Text values are concatenated; sub-tree values gain a content segment.
    pub fn append(&mut self, key: &str, text: &str) {
        match self.get_mut(key) {
            Some(ParamValue::Text(existing)) => existing.push_str(text),
            Some(ParamValue::Tree(tree)) => tree.push_text(text),
            None => self.put(key, text),
        }
    }

    /// Insert `value` as positional parameter 1, shifting existing positional keys up.
    pub fn prepend_positional(&mut self, value: impl Into<ParamValue>) {
        for (key, _) in self.params.iter_mut() {
            if let Ok(index) = key.trim().parse::<usize>() {
                *key = (index + 1).to_string();
            }
        }
        self.params.insert(0, ("1".to_string(), value.into()));
    }

    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        self.position(key).map(|i| self.params.remove(i).1)
    }

    /// Parameters in insertion order.
    pub fn params(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn params_mut(&mut self) -> impl Iterator<Item = &mut ParamValue> {
        self.params.iter_mut().map(|(_, v)| v)
    }

    /// Render the invocation, one parameter per line when `pretty`.
    pub fn render(&self, pretty: bool) -> String {
        let mut out = format!("{{{{{}", self.title);
        let mut next_positional = 1usize;
        for (key, value) in &self.params {
            let value = value.to_string();
            if pretty {
                out.push('\n');
            }
            out.push('|');
            let bare = key.parse::<usize>().ok() == Some(next_positional) && !value.contains('=');
            if key.parse::<usize>().is_ok() {
                next_positional += 1;
            }
            if bare {
                out.push_str(&value);
            } else {
                out.push_str(key);
                out.push('=');
                out.push_str(&value);
            }
        }
        if pretty {
            out.push('\n');
        }
        out.push_str("}}");
        out
    }

    fn position(&self, key: &str) -> Option<usize> {
        let wanted = normalize_key(key);
        self.params.iter().position(|(k, _)| normalize_key(k) == wanted)
    }
}

impl fmt::Display for TemplateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(f.alternate()))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Comment(String),
    Template(TemplateNode),
}

/// Root parse result for a page or a parameter value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedItem {
    segments: Vec<Segment>,
    next_id: u32,
}

impl ParsedItem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template at the end and return its id within this tree.
    pub fn push_template(&mut self, mut node: TemplateNode) -> NodeId {
        self.next_id += 1;
        node.id = NodeId(self.next_id);
        let id = node.id;
        self.segments.push(Segment::Template(node));
        id
    }

    /// Add free text, merging with a preceding text segment.
    pub fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Segment::Text(last)) = self.segments.last_mut() {
            last.push_str(text);
        } else {
            self.segments.push(Segment::Text(text.to_string()));
        }
    }

    pub fn push_comment(&mut self, comment: &str) {
        self.segments.push(Segment::Comment(comment.to_string()));
    }

    /// Top-level templates in document order.
    pub fn templates(&self) -> impl Iterator<Item = &TemplateNode> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Template(node) => Some(node),
            _ => None,
        })
    }

    pub fn templates_mut(&mut self) -> impl Iterator<Item = &mut TemplateNode> {
        self.segments.iter_mut().filter_map(|s| match s {
            Segment::Template(node) => Some(node),
            _ => None,
        })
    }

    /// Free-text segments not captured by any template.
    pub fn contents(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Text(text) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn comments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Comment(text) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn has_templates(&self) -> bool {
        self.templates().next().is_some()
    }

    /// Top-level templates whose title matches `title` (first letter and
    /// underscores insensitive).
    pub fn find_all(&self, title: &str) -> Vec<&TemplateNode> {
        let wanted = normalize_title(title);
        self.templates()
            .filter(|node| normalize_title(&node.title) == wanted)
            .collect()
    }

    pub fn template_mut(&mut self, id: NodeId) -> Option<&mut TemplateNode> {
        self.templates_mut().find(|node| node.id == id)
    }

    /// Remove a top-level template. Removing an id twice is a no-op.
    pub fn drop_template(&mut self, id: NodeId) -> Option<TemplateNode> {
        let position = self
            .segments
            .iter()
            .position(|s| matches!(s, Segment::Template(node) if node.id == id))?;
        match self.segments.remove(position) {
            Segment::Template(node) => Some(node),
            _ => None,
        }
    }

    /// Remove and return all free text, concatenated in document order.
    pub fn take_contents(&mut self) -> String {
        let mut taken = String::new();
        self.segments.retain(|s| match s {
            Segment::Text(text) => {
                taken.push_str(text);
                false
            }
            _ => true,
        });
        taken
    }

    /// The page as wikitext with every template and comment reduced to a
    /// single [`OBJECT_MARK`]. Byte offsets into it are what [`Self::splice`] takes.
    pub fn skeleton(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Comment(_) | Segment::Template(_) => out.push(OBJECT_MARK),
            }
        }
        out
    }

    /// Cut `range` of [`Self::skeleton`] out of the tree and put `replacement`
    /// text in its place. Returns the removed part as wikitext, templates and
    /// comments included. Templates outside the range keep their ids.
    pub fn splice(&mut self, range: Range<usize>, replacement: &str) -> String {
        let mut removed = String::new();
        let mut kept = Vec::with_capacity(self.segments.len() + 2);
        let mut inserted = false;
        let mut offset = 0usize;
        for segment in std::mem::take(&mut self.segments) {
            let start = offset;
            offset += match &segment {
                Segment::Text(text) => text.len(),
                Segment::Comment(_) | Segment::Template(_) => OBJECT_MARK.len_utf8(),
            };
            if offset <= range.start || start >= range.end {
                kept.push(segment);
                continue;
            }
            match segment {
                Segment::Text(text) => {
                    let from = range.start.saturating_sub(start);
                    let to = (range.end - start).min(text.len());
                    kept.push(Segment::Text(text[..from].to_string()));
                    if !inserted {
                        kept.push(Segment::Text(replacement.to_string()));
                        inserted = true;
                    }
                    removed.push_str(&text[from..to]);
                    kept.push(Segment::Text(text[to..].to_string()));
                }
                Segment::Comment(text) => {
                    if !inserted {
                        kept.push(Segment::Text(replacement.to_string()));
                        inserted = true;
                    }
                    removed.push_str(&text);
                }
                Segment::Template(node) => {
                    if !inserted {
                        kept.push(Segment::Text(replacement.to_string()));
                        inserted = true;
                    }
                    removed.push_str(&node.render(false));
                }
            }
        }
        for segment in kept {
            match segment {
                Segment::Text(text) => self.push_text(&text),
                other => self.segments.push(other),
            }
        }
        removed
    }

    /// Call `f` on every template in the tree, nested parameter values included.
    pub fn visit_templates_mut(&mut self, f: &mut impl FnMut(&mut TemplateNode)) {
        for node in self.templates_mut() {
            f(node);
            for value in node.params_mut() {
                if let ParamValue::Tree(inner) = value {
                    inner.visit_templates_mut(f);
                }
            }
        }
    }

    /// Serialise back to wikitext, templates inline.
    pub fn to_wikitext(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) | Segment::Comment(text) => out.push_str(text),
                Segment::Template(node) => out.push_str(&node.render(false)),
            }
        }
        out
    }
}

impl fmt::Display for ParsedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wikitext())
    }
}

/// Template titles: namespace-free, `_` as space, first letter case-insensitive.
pub fn normalize_title(title: &str) -> String {
    let spaced = title.trim().replace('_', " ");
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
