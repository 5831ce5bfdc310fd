/// Accessibility-tree helpers: flattening, structural probes, and the surface
/// allow-list applied before any other work happens.
use crate::config::SurfaceConfig;
use crate::perception::types::{DialogSnapshot, NodePath, UiNode, UiTree};

/// Depth guard; dialogs are shallow, a runaway tree is a host bug.
const MAX_DEPTH: usize = 32;

// ── Walking ─────────────────────────────────────────────────────────────────

/// Depth-first, pre-order search for the first node accepted by `pred`.
pub fn find_first<F>(tree: &UiTree, pred: F) -> Option<NodePath>
where
    F: Fn(&UiNode) -> bool,
{
    fn walk<F: Fn(&UiNode) -> bool>(
        node: &UiNode,
        path: NodePath,
        depth: usize,
        pred: &F,
    ) -> Option<NodePath> {
        if depth > MAX_DEPTH {
            return None;
        }
        if pred(node) {
            return Some(path);
        }
        node.children
            .iter()
            .enumerate()
            .find_map(|(i, child)| walk(child, path.child(i), depth + 1, pred))
    }

    walk(&tree.root, NodePath::root(), 0, &pred)
}

/// Text and descriptions of every node, each followed by a space, lowercased.
pub fn flatten_text(tree: &UiTree) -> String {
    fn walk(node: &UiNode, depth: usize, out: &mut String) {
        if depth > MAX_DEPTH {
            return;
        }
        if let Some(t) = node.text.as_deref() {
            out.push_str(t);
            out.push(' ');
        }
        if let Some(d) = node.content_description.as_deref() {
            out.push_str(d);
            out.push(' ');
        }
        for child in &node.children {
            walk(child, depth + 1, out);
        }
    }

    let mut out = String::new();
    walk(&tree.root, 0, &mut out);
    out.to_lowercase()
}

pub fn has_input_field(tree: &UiTree) -> bool {
    find_first(tree, UiNode::is_text_field).is_some()
}

/// Any button-like node whose label contains one of `labels`.
pub fn has_ack_button(tree: &UiTree, labels: &[String]) -> bool {
    find_first(tree, |n| {
        if !n.is_button_like() {
            return false;
        }
        let text = n.lower_text();
        let desc = n.lower_description();
        labels
            .iter()
            .any(|l| text.contains(l.as_str()) || desc.contains(l.as_str()))
    })
    .is_some()
}

pub fn snapshot(tree: &UiTree, ack_labels: &[String]) -> DialogSnapshot {
    DialogSnapshot {
        surface: tree.surface.clone(),
        text: flatten_text(tree),
        has_input: has_input_field(tree),
        has_ack_button: has_ack_button(tree, ack_labels),
    }
}

// ── Surface filter ──────────────────────────────────────────────────────────

/// Allow-list of surfaces (package names) whose dialogs belong to the flow.
#[derive(Debug, Clone)]
pub struct SurfaceFilter {
    allow: Vec<String>,
    fragments: Vec<String>,
}

impl SurfaceFilter {
    pub fn from_config(cfg: &SurfaceConfig) -> Self {
        Self {
            allow: cfg.allow.iter().map(|s| s.to_lowercase()).collect(),
            fragments: cfg.allow_fragments.iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    pub fn allows(&self, surface: &str) -> bool {
        let s = surface.trim().to_lowercase();
        if s.is_empty() {
            return false;
        }
        self.allow
            .iter()
            .any(|a| s.contains(a.as_str()) || a.contains(s.as_str()))
            || self.fragments.iter().any(|f| s.contains(f.as_str()))
    }
}
