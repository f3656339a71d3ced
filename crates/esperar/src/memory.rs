//! In-memory document for driving the engine without a browser.
//!
//! [`MemoryDocument`] is a small element tree behind an `RwLock`. Tests
//! mutate it from one thread while a dispatcher polls it from another,
//! which is exactly the "asynchronously changing remote document" the
//! engine is built for.
//!
//! Supported selectors: CSS compound selectors (`tag#id.class[attr=value]`)
//! joined by descendant or `>` combinators, [`Selector::Text`] (own text
//! contains) and [`Selector::TestId`]. XPath is reported as unsupported.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use crate::locator::Selector;
use crate::result::{EsperarError, EsperarResult};
use crate::session::{ElementHandle, ResolutionContext};

type NodeId = u64;

/// Script handler registered with [`MemoryDocument::register_script`]
pub type ScriptHandler = Arc<dyn Fn(&[Value]) -> EsperarResult<Value> + Send + Sync>;

/// Description of a node to insert
#[derive(Debug, Clone)]
pub struct NodeSpec {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    visible: bool,
}

impl NodeSpec {
    /// Create a visible node with the given tag
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_lowercase(),
            attributes: BTreeMap::new(),
            text: String::new(),
            visible: true,
        }
    }

    /// Set the `id` attribute
    #[must_use]
    pub fn id(self, id: impl Into<String>) -> Self {
        self.attr("id", id)
    }

    /// Add a CSS class
    #[must_use]
    pub fn class(mut self, class: impl Into<String>) -> Self {
        let class = class.into();
        let classes = self.attributes.entry("class".into()).or_default();
        if !classes.is_empty() {
            classes.push(' ');
        }
        classes.push_str(&class);
        self
    }

    /// Set an attribute
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set the node's own text
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Mark the node as hidden
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

#[derive(Debug)]
struct Node {
    spec: NodeSpec,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    clicks: usize,
}

impl Node {
    fn has_class(&self, class: &str) -> bool {
        self.spec
            .attributes
            .get("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }
}

#[derive(Debug, Default)]
struct DocumentState {
    nodes: HashMap<NodeId, Node>,
    roots: Vec<NodeId>,
    next_id: NodeId,
}

impl DocumentState {
    fn node(&self, handle: &ElementHandle) -> EsperarResult<(NodeId, &Node)> {
        let stale = || EsperarError::StaleElement {
            handle: handle.id().to_string(),
        };
        let id: NodeId = handle.id().parse().map_err(|_| stale())?;
        self.nodes.get(&id).map(|node| (id, node)).ok_or_else(stale)
    }

    fn is_displayed(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current.and_then(|id| self.nodes.get(&id)) {
            if !node.spec.visible {
                return false;
            }
            current = node.parent;
        }
        true
    }

    /// Pre-order traversal below `scope` (or of the whole document)
    fn descendants(&self, scope: Option<NodeId>) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = match scope {
            Some(id) => self.nodes[&id].children.iter().rev().copied().collect(),
            None => self.roots.iter().rev().copied().collect(),
        };
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[&id].children.iter().rev().copied());
        }
        out
    }

    fn rendered_text(&self, id: NodeId) -> String {
        let node = &self.nodes[&id];
        let mut parts = Vec::new();
        if !node.spec.text.is_empty() {
            parts.push(node.spec.text.clone());
        }
        for &child in &node.children {
            if self.nodes[&child].spec.visible {
                let text = self.rendered_text(child);
                if !text.is_empty() {
                    parts.push(text);
                }
            }
        }
        parts.join(" ")
    }

    fn render(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = &self.nodes[&id];
        let indent = "  ".repeat(depth);
        out.push_str(&indent);
        out.push('<');
        out.push_str(&node.spec.tag);
        for (name, value) in &node.spec.attributes {
            out.push_str(&format!(" {name}=\"{value}\""));
        }
        if !node.spec.visible {
            out.push_str(" hidden");
        }
        out.push('>');
        out.push_str(&node.spec.text);
        if node.children.is_empty() {
            out.push_str(&format!("</{}>\n", node.spec.tag));
            return;
        }
        out.push('\n');
        for &child in &node.children {
            self.render(child, depth + 1, out);
        }
        out.push_str(&format!("{indent}</{}>\n", node.spec.tag));
    }
}

/// Thread-safe in-memory document
pub struct MemoryDocument {
    state: RwLock<DocumentState>,
    scripts: RwLock<HashMap<String, ScriptHandler>>,
    screenshot: RwLock<Option<Vec<u8>>>,
    lookups: AtomicUsize,
}

impl std::fmt::Debug for MemoryDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDocument")
            .field("lookups", &self.lookups())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocument {
    /// Create an empty document
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(DocumentState::default()),
            scripts: RwLock::new(HashMap::new()),
            screenshot: RwLock::new(None),
            lookups: AtomicUsize::new(0),
        }
    }

    fn read(&self) -> EsperarResult<RwLockReadGuard<'_, DocumentState>> {
        self.state.read().map_err(|_| EsperarError::Session {
            message: "document lock poisoned".into(),
        })
    }

    fn write(&self) -> EsperarResult<RwLockWriteGuard<'_, DocumentState>> {
        self.state.write().map_err(|_| EsperarError::Session {
            message: "document lock poisoned".into(),
        })
    }

    /// Append a node under `parent` (or at the root) and return its handle
    pub fn append(
        &self,
        parent: Option<&ElementHandle>,
        spec: NodeSpec,
    ) -> EsperarResult<ElementHandle> {
        let mut state = self.write()?;
        let parent_id = match parent {
            Some(handle) => Some(state.node(handle)?.0),
            None => None,
        };
        let id = state.next_id;
        state.next_id += 1;
        let _ = state.nodes.insert(
            id,
            Node {
                spec,
                parent: parent_id,
                children: Vec::new(),
                clicks: 0,
            },
        );
        match parent_id {
            Some(parent_id) => {
                if let Some(parent) = state.nodes.get_mut(&parent_id) {
                    parent.children.push(id);
                }
            }
            None => state.roots.push(id),
        }
        Ok(ElementHandle::new(id.to_string()))
    }

    /// Remove a node and its subtree
    pub fn remove(&self, handle: &ElementHandle) -> EsperarResult<()> {
        let mut state = self.write()?;
        let (id, parent) = {
            let (id, node) = state.node(handle)?;
            (id, node.parent)
        };
        match parent {
            Some(parent) => {
                if let Some(parent) = state.nodes.get_mut(&parent) {
                    parent.children.retain(|&child| child != id);
                }
            }
            None => state.roots.retain(|&root| root != id),
        }
        let mut doomed = vec![id];
        while let Some(next) = doomed.pop() {
            if let Some(node) = state.nodes.remove(&next) {
                doomed.extend(node.children);
            }
        }
        Ok(())
    }

    /// Replace the node's own text
    pub fn set_text(&self, handle: &ElementHandle, text: impl Into<String>) -> EsperarResult<()> {
        self.update(handle, |node| node.spec.text = text.into())
    }

    /// Show or hide the node
    pub fn set_visible(&self, handle: &ElementHandle, visible: bool) -> EsperarResult<()> {
        self.update(handle, |node| node.spec.visible = visible)
    }

    /// Set an attribute on the node
    pub fn set_attribute(
        &self,
        handle: &ElementHandle,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> EsperarResult<()> {
        self.update(handle, |node| {
            let _ = node.spec.attributes.insert(name.into(), value.into());
        })
    }

    fn update(&self, handle: &ElementHandle, apply: impl FnOnce(&mut Node)) -> EsperarResult<()> {
        let mut state = self.write()?;
        let (id, _) = state.node(handle)?;
        if let Some(node) = state.nodes.get_mut(&id) {
            apply(node);
        }
        Ok(())
    }

    /// Number of clicks the node has received
    pub fn click_count(&self, handle: &ElementHandle) -> EsperarResult<usize> {
        Ok(self.read()?.node(handle)?.1.clicks)
    }

    /// Number of `find_all` calls served so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Register a script the document knows how to evaluate
    pub fn register_script<F>(&self, script: impl Into<String>, handler: F)
    where
        F: Fn(&[Value]) -> EsperarResult<Value> + Send + Sync + 'static,
    {
        let mut scripts = self.scripts.write().unwrap_or_else(PoisonError::into_inner);
        let _ = scripts.insert(script.into(), Arc::new(handler));
    }

    /// Bytes returned by [`ResolutionContext::screenshot`]
    pub fn set_screenshot(&self, png: Vec<u8>) {
        *self.screenshot.write().unwrap_or_else(PoisonError::into_inner) = Some(png);
    }

    fn ensure_interactable(state: &DocumentState, id: NodeId, action: &str) -> EsperarResult<()> {
        if state.is_displayed(id) {
            Ok(())
        } else {
            Err(EsperarError::Session {
                message: format!("element not interactable: cannot {action} hidden element"),
            })
        }
    }
}

impl ResolutionContext for MemoryDocument {
    fn find_all(
        &self,
        scope: Option<&ElementHandle>,
        selector: &Selector,
    ) -> EsperarResult<Vec<ElementHandle>> {
        let _ = self.lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.read()?;
        let scope = match scope {
            Some(handle) => Some(state.node(handle)?.0),
            None => None,
        };
        let candidates = state.descendants(scope);
        let matched: Vec<NodeId> = match selector {
            Selector::Css(css) => {
                let query = CssQuery::parse(css)?;
                candidates
                    .into_iter()
                    .filter(|&id| query.matches(&state, id))
                    .collect()
            }
            Selector::Text(text) => candidates
                .into_iter()
                .filter(|id| state.nodes[id].spec.text.contains(text.as_str()))
                .collect(),
            Selector::TestId(test_id) => candidates
                .into_iter()
                .filter(|id| {
                    state.nodes[id].spec.attributes.get("data-testid") == Some(test_id)
                })
                .collect(),
            Selector::XPath(_) => {
                return Err(EsperarError::Unsupported {
                    feature: "xpath selectors".into(),
                })
            }
        };
        Ok(matched
            .into_iter()
            .map(|id| ElementHandle::new(id.to_string()))
            .collect())
    }

    fn text(&self, element: &ElementHandle) -> EsperarResult<String> {
        let state = self.read()?;
        let (id, _) = state.node(element)?;
        Ok(state.rendered_text(id))
    }

    fn is_displayed(&self, element: &ElementHandle) -> EsperarResult<bool> {
        let state = self.read()?;
        let (id, _) = state.node(element)?;
        Ok(state.is_displayed(id))
    }

    fn attribute(&self, element: &ElementHandle, name: &str) -> EsperarResult<Option<String>> {
        let state = self.read()?;
        Ok(state.node(element)?.1.spec.attributes.get(name).cloned())
    }

    fn click(&self, element: &ElementHandle) -> EsperarResult<()> {
        let mut state = self.write()?;
        let (id, _) = state.node(element)?;
        Self::ensure_interactable(&state, id, "click")?;
        if let Some(node) = state.nodes.get_mut(&id) {
            node.clicks += 1;
        }
        Ok(())
    }

    fn set_value(&self, element: &ElementHandle, value: &str) -> EsperarResult<()> {
        let mut state = self.write()?;
        let (id, _) = state.node(element)?;
        Self::ensure_interactable(&state, id, "type into")?;
        if let Some(node) = state.nodes.get_mut(&id) {
            let _ = node.spec.attributes.insert("value".into(), value.to_string());
        }
        Ok(())
    }

    fn evaluate(&self, script: &str, args: &[Value]) -> EsperarResult<Value> {
        let handler = self
            .scripts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(script)
            .cloned();
        match handler {
            Some(handler) => handler(args),
            None => Err(EsperarError::RemoteEvaluation {
                message: format!("ReferenceError: {script} is not defined"),
            }),
        }
    }

    fn screenshot(&self) -> EsperarResult<Vec<u8>> {
        let png = self.screenshot.read().unwrap_or_else(PoisonError::into_inner);
        Option::clone(&png).ok_or_else(|| EsperarError::Unsupported {
            feature: "screenshot".into(),
        })
    }

    fn page_source(&self) -> EsperarResult<String> {
        let state = self.read()?;
        let mut out = String::from("<html>\n");
        for &root in &state.roots {
            state.render(root, 1, &mut out);
        }
        out.push_str("</html>\n");
        Ok(out)
    }
}

// =============================================================================
// CSS SUBSET
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, Option<String>)>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none() && self.id.is_none() && self.classes.is_empty() && self.attributes.is_empty()
    }

    fn matches(&self, node: &Node) -> bool {
        self.tag.as_ref().map_or(true, |tag| *tag == node.spec.tag)
            && self
                .id
                .as_ref()
                .map_or(true, |id| node.spec.attributes.get("id") == Some(id))
            && self.classes.iter().all(|class| node.has_class(class))
            && self.attributes.iter().all(|(name, expected)| {
                match (node.spec.attributes.get(name), expected) {
                    (Some(actual), Some(expected)) => actual == expected,
                    (Some(_), None) => true,
                    (None, _) => false,
                }
            })
    }
}

#[derive(Debug)]
struct CssQuery {
    parts: Vec<(Combinator, Compound)>,
}

impl CssQuery {
    fn parse(selector: &str) -> EsperarResult<Self> {
        let chars: Vec<char> = selector.chars().collect();
        let mut parts = Vec::new();
        let mut pending = Combinator::Descendant;
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                c if c.is_whitespace() => i += 1,
                '>' => {
                    pending = Combinator::Child;
                    i += 1;
                }
                _ => {
                    let (compound, next) = parse_compound(selector, &chars, i)?;
                    parts.push((pending, compound));
                    pending = Combinator::Descendant;
                    i = next;
                }
            }
        }
        if parts.is_empty() {
            return Err(EsperarError::invalid_argument(format!(
                "invalid selector syntax: {selector:?}"
            )));
        }
        Ok(Self { parts })
    }

    fn matches(&self, state: &DocumentState, id: NodeId) -> bool {
        Self::matches_parts(&self.parts, state, id)
    }

    fn matches_parts(parts: &[(Combinator, Compound)], state: &DocumentState, id: NodeId) -> bool {
        let Some(((combinator, compound), rest)) = parts.split_last() else {
            return true;
        };
        let node = &state.nodes[&id];
        if !compound.matches(node) {
            return false;
        }
        if rest.is_empty() {
            return true;
        }
        match combinator {
            Combinator::Child => node
                .parent
                .is_some_and(|parent| Self::matches_parts(rest, state, parent)),
            Combinator::Descendant => {
                let mut ancestor = node.parent;
                while let Some(candidate) = ancestor {
                    if Self::matches_parts(rest, state, candidate) {
                        return true;
                    }
                    ancestor = state.nodes[&candidate].parent;
                }
                false
            }
        }
    }
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn parse_ident(selector: &str, chars: &[char], start: usize) -> EsperarResult<(String, usize)> {
    let end = chars[start..]
        .iter()
        .position(|&c| !is_ident(c))
        .map_or(chars.len(), |offset| start + offset);
    if end == start {
        return Err(EsperarError::invalid_argument(format!(
            "invalid selector syntax: expected identifier at {start} in {selector:?}"
        )));
    }
    Ok((chars[start..end].iter().collect(), end))
}

fn parse_compound(selector: &str, chars: &[char], start: usize) -> EsperarResult<(Compound, usize)> {
    let mut compound = Compound::default();
    let mut i = start;
    if chars[i] == '*' {
        i += 1;
    } else if is_ident(chars[i]) {
        let (tag, next) = parse_ident(selector, chars, i)?;
        compound.tag = Some(tag.to_lowercase());
        i = next;
    }
    while i < chars.len() {
        match chars[i] {
            '#' => {
                let (id, next) = parse_ident(selector, chars, i + 1)?;
                compound.id = Some(id);
                i = next;
            }
            '.' => {
                let (class, next) = parse_ident(selector, chars, i + 1)?;
                compound.classes.push(class);
                i = next;
            }
            '[' => {
                let close = find_closing_bracket(chars, i + 1).ok_or_else(|| {
                    EsperarError::invalid_argument(format!(
                        "invalid selector syntax: unterminated '[' in {selector:?}"
                    ))
                })?;
                let body: String = chars[i + 1..close].iter().collect();
                compound.attributes.push(parse_attribute(selector, &body)?);
                i = close + 1;
            }
            c if c.is_whitespace() || c == '>' => break,
            other => {
                return Err(EsperarError::Unsupported {
                    feature: format!("css syntax '{other}' in {selector:?}"),
                })
            }
        }
    }
    if compound.is_empty() && i == start + 1 && chars[start] == '*' {
        return Ok((compound, i));
    }
    if compound.is_empty() {
        return Err(EsperarError::invalid_argument(format!(
            "invalid selector syntax: {selector:?}"
        )));
    }
    Ok((compound, i))
}

fn find_closing_bracket(chars: &[char], start: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (offset, &c) in chars[start..].iter().enumerate() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, ']') => return Some(start + offset),
            (None, _) => {}
        }
    }
    None
}

fn parse_attribute(selector: &str, body: &str) -> EsperarResult<(String, Option<String>)> {
    let (name, value) = match body.split_once('=') {
        Some((name, value)) => {
            let value = value.trim();
            let unquoted = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (name.trim(), Some(unquoted.to_string()))
        }
        None => (body.trim(), None),
    };
    if name.is_empty() || !name.chars().all(is_ident) {
        return Err(EsperarError::invalid_argument(format!(
            "invalid selector syntax: bad attribute [{body}] in {selector:?}"
        )));
    }
    Ok((name.to_string(), value))
}
