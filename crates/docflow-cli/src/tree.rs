//! Text tree view of a [`ProjectState`].
//!
//! The tree is built as a plain node model first and rendered second, so
//! watch mode can rebuild it on every `state-update` without touching any
//! rendering state.
//!
//! ```text
//! my-app
//! ├── > Epic 1: Setup [active] (current)
//! │   ├── > Story 1: Scaffold [P1] 1/2
//! │   │   ├── [x] Create repo
//! │   │   └── [ ] Add CI
//! │   └── - Story 2: Docs [P2] 0/0
//! └── - Epic 2: Launch [planned]
//! ```

use docflow_core::{EntityStatus, Epic, ProjectState, Story, Ticket, TicketStatus, INIT_PROJECT_COMMAND};

/// Longest description shown next to a node.
const MAX_DESCRIPTION_LEN: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Project,
    Epic,
    Story,
    Ticket,
    /// Informational leaf (empty project, missing documents).
    Notice,
}

/// One line of the tree and its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub kind: NodeKind,
    pub label: String,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    fn leaf(kind: NodeKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            children: Vec::new(),
        }
    }
}

// ============================================================================
// Icons
// ============================================================================

pub fn status_icon(status: EntityStatus) -> &'static str {
    match status {
        EntityStatus::Active => ">",
        EntityStatus::Completed => "+",
        EntityStatus::Planned => "-",
    }
}

pub fn ticket_icon(status: TicketStatus) -> &'static str {
    match status {
        TicketStatus::Completed => "[x]",
        TicketStatus::InProgress => "[~]",
        TicketStatus::Planned => "[ ]",
    }
}

// ============================================================================
// Model
// ============================================================================

/// Builds the node model for `state`.
///
/// Epics come from the epic list; the current epic's stories fill in the
/// listed epic (the state manager already merges them). An epic only known
/// from the current-epic document is appended at the end.
pub fn build_tree(state: &ProjectState) -> TreeNode {
    let name = state.name.clone().unwrap_or_else(|| "project".to_string());
    let mut root = TreeNode::leaf(NodeKind::Project, name);

    if !state.initialized {
        root.children.push(TreeNode::leaf(
            NodeKind::Notice,
            format!("Not initialized. Run `docflow run {INIT_PROJECT_COMMAND}`"),
        ));
        return root;
    }

    let current_epic = state.current_epic.as_ref().map(|e| e.id.as_str());
    let current_story = state.current_story.as_ref().map(|s| s.id.as_str());

    for epic in &state.epics {
        root.children
            .push(epic_node(epic, current_epic == Some(epic.id.as_str()), current_story));
    }
    if let Some(epic) = &state.current_epic {
        if !state.epics.iter().any(|e| e.id == epic.id) {
            root.children.push(epic_node(epic, true, current_story));
        }
    }

    if root.children.is_empty() {
        root.children
            .push(TreeNode::leaf(NodeKind::Notice, "No epics yet"));
    }

    let flags: Vec<&str> = [
        (state.has_feedback, "feedback"),
        (state.has_challenge, "challenge"),
        (state.has_status, "status"),
    ]
    .into_iter()
    .filter_map(|(present, name)| present.then_some(name))
    .collect();
    if !flags.is_empty() {
        root.children.push(TreeNode::leaf(
            NodeKind::Notice,
            format!("Documents: {}", flags.join(", ")),
        ));
    }

    root
}

fn epic_node(epic: &Epic, is_current: bool, current_story: Option<&str>) -> TreeNode {
    let mut label = format!(
        "{} Epic {}: {} [{}]",
        status_icon(epic.status),
        epic.id,
        epic.title,
        epic.status
    );
    if is_current {
        label.push_str(" (current)");
    }
    append_description(&mut label, epic.description.as_deref());

    TreeNode {
        kind: NodeKind::Epic,
        label,
        children: epic
            .stories
            .iter()
            .map(|s| story_node(s, is_current && current_story == Some(s.id.as_str())))
            .collect(),
    }
}

fn story_node(story: &Story, is_current: bool) -> TreeNode {
    let (done, total) = story.progress();
    let mut label = format!(
        "{} Story {}: {} [{}] {done}/{total}",
        status_icon(story.status),
        story.id,
        story.title,
        story.priority
    );
    if is_current {
        label.push_str(" (current)");
    }

    TreeNode {
        kind: NodeKind::Story,
        label,
        children: story.tickets.iter().map(ticket_node).collect(),
    }
}

fn ticket_node(ticket: &Ticket) -> TreeNode {
    TreeNode::leaf(
        NodeKind::Ticket,
        format!("{} {}", ticket_icon(ticket.status), ticket.title),
    )
}

fn append_description(label: &mut String, description: Option<&str>) {
    let Some(first_line) = description.and_then(|d| d.lines().find(|l| !l.trim().is_empty()))
    else {
        return;
    };
    label.push_str(" - ");
    label.push_str(&truncate_string(first_line.trim(), MAX_DESCRIPTION_LEN));
}

/// Truncates on a character boundary, adding "..." when shortened.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return s.chars().take(max_len).collect();
    }
    let truncated: String = s.chars().take(max_len - 3).collect();
    format!("{truncated}...")
}

// ============================================================================
// Rendering
// ============================================================================

/// Renders the tree with box-drawing guides, one node per line.
pub fn render(root: &TreeNode) -> String {
    let mut out = String::new();
    out.push_str(&root.label);
    out.push('\n');
    render_children(&root.children, "", &mut out);
    out
}

fn render_children(children: &[TreeNode], prefix: &str, out: &mut String) {
    let count = children.len();
    for (i, child) in children.iter().enumerate() {
        let last = i + 1 == count;
        out.push_str(prefix);
        out.push_str(if last { "└── " } else { "├── " });
        out.push_str(&child.label);
        out.push('\n');

        let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
        render_children(&child.children, &child_prefix, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_core::Priority;

    fn ticket(id: &str, title: &str, status: TicketStatus) -> Ticket {
        Ticket {
            id: id.to_string(),
            title: title.to_string(),
            status,
            description: None,
            story_id: "1".to_string(),
        }
    }

    fn story(id: &str, tickets: Vec<Ticket>) -> Story {
        Story {
            id: id.to_string(),
            title: format!("Story {id}"),
            priority: Priority::P1,
            status: Story::status_from_tickets(&tickets),
            description: None,
            tickets,
            epic_id: "1".to_string(),
        }
    }

    fn epic(id: &str, status: EntityStatus, stories: Vec<Story>) -> Epic {
        Epic {
            id: id.to_string(),
            title: format!("Epic {id}"),
            status,
            description: None,
            stories,
        }
    }

    #[test]
    fn test_uninitialized_project_shows_hint() {
        let state = ProjectState {
            name: Some("demo".to_string()),
            ..ProjectState::default()
        };
        let text = render(&build_tree(&state));
        assert!(text.starts_with("demo\n"));
        assert!(text.contains("Not initialized"));
        assert!(text.contains(INIT_PROJECT_COMMAND));
    }

    #[test]
    fn test_initialized_without_epics() {
        let state = ProjectState {
            initialized: true,
            ..ProjectState::default()
        };
        let tree = build_tree(&state);
        assert_eq!(tree.label, "project");
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].kind, NodeKind::Notice);
    }

    #[test]
    fn test_full_tree_rendering() {
        let stories = vec![
            story(
                "1",
                vec![
                    ticket("1-1", "Create repo", TicketStatus::Completed),
                    ticket("1-2", "Add CI", TicketStatus::Planned),
                ],
            ),
            story("2", Vec::new()),
        ];
        let current = epic("1", EntityStatus::Active, stories.clone());
        let state = ProjectState {
            initialized: true,
            name: Some("my-app".to_string()),
            current_story: Some(stories[0].clone()),
            epics: vec![current.clone(), epic("2", EntityStatus::Planned, Vec::new())],
            current_epic: Some(current),
            ..ProjectState::default()
        };

        let text = render(&build_tree(&state));
        let expected = "\
my-app
├── > Epic 1: Epic 1 [active] (current)
│   ├── > Story 1: Story 1 [P1] 1/2 (current)
│   │   ├── [x] Create repo
│   │   └── [ ] Add CI
│   └── - Story 2: Story 2 [P1] 0/0
└── - Epic 2: Epic 2 [planned]
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_current_epic_not_listed_is_appended() {
        let state = ProjectState {
            initialized: true,
            current_epic: Some(epic("9", EntityStatus::Active, Vec::new())),
            epics: vec![epic("1", EntityStatus::Completed, Vec::new())],
            ..ProjectState::default()
        };
        let tree = build_tree(&state);
        assert_eq!(tree.children.len(), 2);
        assert!(tree.children[0].label.starts_with("+ Epic 1"));
        assert!(tree.children[1].label.ends_with("(current)"));
    }

    #[test]
    fn test_document_flags_listed() {
        let state = ProjectState {
            initialized: true,
            has_feedback: true,
            has_status: true,
            epics: vec![epic("1", EntityStatus::Planned, Vec::new())],
            ..ProjectState::default()
        };
        let text = render(&build_tree(&state));
        assert!(text.contains("└── Documents: feedback, status"));
    }

    #[test]
    fn test_description_is_truncated() {
        let mut e = epic("1", EntityStatus::Planned, Vec::new());
        e.description = Some(format!("\n{}\nsecond line", "x".repeat(80)));
        let node = epic_node(&e, false, None);
        assert!(node.label.ends_with("..."));
        assert!(!node.label.contains("second line"));
    }

    #[test]
    fn test_truncate_string_utf8() {
        assert_eq!(truncate_string("héllo wörld", 8), "héllo...");
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("abcdef", 2), "ab");
    }
}
