//! Keyboard shortcut registry.

use collabcanvas_core::ToolKind;

/// What a shortcut does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutAction {
    Undo,
    Redo,
    SelectTool(ToolKind),
}

/// A keyboard shortcut definition.
#[derive(Debug, Clone)]
pub struct Shortcut {
    pub key: char,
    pub ctrl: bool,
    pub action: ShortcutAction,
    pub description: &'static str,
}

impl Shortcut {
    pub const fn new(key: char, ctrl: bool, action: ShortcutAction, description: &'static str) -> Self {
        Self {
            key,
            ctrl,
            action,
            description,
        }
    }

    /// Format the shortcut for display (e.g., "Ctrl+Z").
    pub fn format(&self) -> String {
        if self.ctrl {
            format!("Ctrl+{}", self.key.to_ascii_uppercase())
        } else {
            self.key.to_ascii_uppercase().to_string()
        }
    }
}

/// Registry of all keyboard shortcuts.
pub struct ShortcutRegistry;

impl ShortcutRegistry {
    pub fn all() -> Vec<Shortcut> {
        let mut shortcuts = vec![
            Shortcut::new('z', true, ShortcutAction::Undo, "Undo"),
            Shortcut::new('y', true, ShortcutAction::Redo, "Redo"),
        ];
        for (key, tool, description) in [
            ('b', ToolKind::Brush, "Brush"),
            ('e', ToolKind::Eraser, "Eraser"),
            ('l', ToolKind::Line, "Line"),
            ('r', ToolKind::Rect, "Rectangle"),
            ('c', ToolKind::Circle, "Circle"),
            ('t', ToolKind::Text, "Text"),
        ] {
            debug_assert_eq!(ToolKind::from_shortcut(key), Some(tool));
            shortcuts.push(Shortcut::new(key, false, ShortcutAction::SelectTool(tool), description));
        }
        shortcuts
    }

    /// Action bound to `key`, with Ctrl (or Cmd) held if `ctrl`.
    pub fn resolve(key: char, ctrl: bool) -> Option<ShortcutAction> {
        let key = key.to_ascii_lowercase();
        Self::all()
            .into_iter()
            .find(|s| s.key == key && s.ctrl == ctrl)
            .map(|s| s.action)
    }

    /// Print all shortcuts to the console.
    pub fn print_all() {
        println!("\n=== Keyboard Shortcuts ===");
        for shortcut in Self::all() {
            println!("  {:10} {}", shortcut.format(), shortcut.description);
        }
        println!();
    }
}
