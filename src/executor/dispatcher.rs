// Keyword-driven button lookup.
use crate::perception::types::{NodePath, UiNode, UiTree};
use crate::perception::ui_tree;

/// What a clickable node must look like to be chosen.
#[derive(Debug, Clone, Copy)]
pub struct ClickTarget<'a> {
    /// Matched against visible text and accessible description.
    pub labels: &'a [String],
    /// Matched against the structural view id.
    pub ids: &'a [String],
    /// View-id fragments that make a node count as a button even when the
    /// host does not flag it clickable.
    pub button_ids: &'a [String],
}

impl<'a> ClickTarget<'a> {
    pub fn labels(labels: &'a [String]) -> Self {
        Self {
            labels,
            ids: &[],
            button_ids: &[],
        }
    }

    pub fn with_ids(mut self, ids: &'a [String]) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_button_ids(mut self, button_ids: &'a [String]) -> Self {
        self.button_ids = button_ids;
        self
    }

    pub fn matches(&self, node: &UiNode) -> bool {
        let view_id = node.lower_view_id();
        let button_like = node.is_button_like()
            || (!view_id.is_empty()
                && self.button_ids.iter().any(|b| view_id.contains(b.as_str())));
        if !button_like {
            return false;
        }

        let text = node.lower_text();
        let desc = node.lower_description();
        let label_hit = self
            .labels
            .iter()
            .any(|l| text.contains(l.as_str()) || desc.contains(l.as_str()));
        let id_hit = !view_id.is_empty() && self.ids.iter().any(|i| view_id.contains(i.as_str()));
        label_hit || id_hit
    }
}

/// First node, depth-first, that `target` accepts.
pub fn locate(tree: &UiTree, target: &ClickTarget<'_>) -> Option<NodePath> {
    ui_tree::find_first(tree, |n| target.matches(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn label_match_is_case_insensitive() {
        let tree = UiTree::new(
            "com.android.phone",
            UiNode::container(vec![
                UiNode::text("OK"),
                UiNode::button("ENVOYER", "android:id/button1"),
            ]),
        );
        let labels = kw(&["envoyer"]);
        let path = locate(&tree, &ClickTarget::labels(&labels)).unwrap();
        assert_eq!(path, NodePath(vec![1]));
    }

    #[test]
    fn unlabeled_button_found_by_structural_id() {
        let mut unlabeled = UiNode::button("", "android:id/button1");
        unlabeled.text = None;
        let tree = UiTree::new("com.android.phone", UiNode::container(vec![unlabeled]));
        let labels = kw(&["send"]);
        let ids = kw(&["button1"]);
        assert!(locate(&tree, &ClickTarget::labels(&labels)).is_none());
        assert!(locate(&tree, &ClickTarget::labels(&labels).with_ids(&ids)).is_some());
    }

    #[test]
    fn view_id_hint_makes_non_clickable_node_a_button() {
        let node = UiNode {
            text: Some("Valider".into()),
            view_id: Some("com.android.phone:id/submit".into()),
            ..Default::default()
        };
        let tree = UiTree::new("com.android.phone", UiNode::container(vec![node]));
        let labels = kw(&["valider"]);
        let hints = kw(&["submit"]);
        assert!(locate(&tree, &ClickTarget::labels(&labels)).is_none());
        assert!(locate(&tree, &ClickTarget::labels(&labels).with_button_ids(&hints)).is_some());
    }
}
