use serde::{Deserialize, Serialize};

/// Screen-space rectangle in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }
}

/// One node of an accessibility tree as reported by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiNode {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content_description: Option<String>,
    /// Widget class, e.g. `android.widget.EditText`.
    #[serde(default)]
    pub class_name: Option<String>,
    /// Structural resource identifier, e.g. `android:id/button1`.
    #[serde(default)]
    pub view_id: Option<String>,
    #[serde(default)]
    pub editable: bool,
    #[serde(default)]
    pub focusable: bool,
    #[serde(default)]
    pub clickable: bool,
    #[serde(default)]
    pub bounds: Bounds,
    #[serde(default)]
    pub children: Vec<UiNode>,
}

impl UiNode {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            class_name: Some("android.widget.TextView".into()),
            ..Default::default()
        }
    }

    pub fn input() -> Self {
        Self {
            class_name: Some("android.widget.EditText".into()),
            editable: true,
            focusable: true,
            clickable: true,
            bounds: Bounds::new(40, 600, 680, 680),
            ..Default::default()
        }
    }

    pub fn button(label: impl Into<String>, view_id: impl Into<String>) -> Self {
        Self {
            text: Some(label.into()),
            class_name: Some("android.widget.Button".into()),
            view_id: Some(view_id.into()),
            clickable: true,
            focusable: true,
            bounds: Bounds::new(400, 720, 680, 800),
            ..Default::default()
        }
    }

    pub fn container(children: Vec<UiNode>) -> Self {
        Self {
            class_name: Some("android.widget.FrameLayout".into()),
            children,
            ..Default::default()
        }
    }

    pub fn lower_text(&self) -> String {
        self.text.as_deref().unwrap_or_default().to_lowercase()
    }

    pub fn lower_description(&self) -> String {
        self.content_description
            .as_deref()
            .unwrap_or_default()
            .to_lowercase()
    }

    pub fn lower_class(&self) -> String {
        self.class_name.as_deref().unwrap_or_default().to_lowercase()
    }

    pub fn lower_view_id(&self) -> String {
        self.view_id.as_deref().unwrap_or_default().to_lowercase()
    }

    /// Editable, or a widget class that reads like a text field.
    pub fn is_text_field(&self) -> bool {
        let class = self.lower_class();
        self.editable || class.contains("edittext") || class.contains("edit")
    }

    pub fn is_button_like(&self) -> bool {
        self.clickable || self.lower_class().contains("button")
    }
}

/// Child-index path from the root to a node; the empty path is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NodePath(pub Vec<usize>);

impl NodePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, index: usize) -> Self {
        let mut v = self.0.clone();
        v.push(index);
        Self(v)
    }
}

impl std::fmt::Display for NodePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for i in &self.0 {
            write!(f, "/{i}")?;
        }
        Ok(())
    }
}

/// The active window's tree plus the surface (package) it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiTree {
    pub surface: String,
    pub root: UiNode,
}

impl UiTree {
    pub fn new(surface: impl Into<String>, root: UiNode) -> Self {
        Self {
            surface: surface.into(),
            root,
        }
    }

    pub fn node(&self, path: &NodePath) -> Option<&UiNode> {
        let mut cur = &self.root;
        for &i in &path.0 {
            cur = cur.children.get(i)?;
        }
        Some(cur)
    }
}

/// Kind of change reported by the event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    WindowContentChanged,
    WindowStateChanged,
    ViewTextChanged,
}

impl ChangeKind {
    /// Only structural changes of the dialog are worth a look; text edits are
    /// usually our own fills echoing back.
    pub fn is_relevant(&self) -> bool {
        matches!(
            self,
            ChangeKind::WindowContentChanged | ChangeKind::WindowStateChanged
        )
    }
}

/// Notification delivered by the UI-tree event source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeChange {
    pub surface: String,
    pub kind: ChangeKind,
}

impl TreeChange {
    pub fn new(surface: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            surface: surface.into(),
            kind,
        }
    }
}

/// Read-only view of the dialog at one observation instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogSnapshot {
    pub surface: String,
    /// Lowercased concatenation of every text and description in the tree.
    pub text: String,
    pub has_input: bool,
    pub has_ack_button: bool,
}
