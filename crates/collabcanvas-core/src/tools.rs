//! Tool system: turns pointer gestures into operations.

use kurbo::Point;
use serde::{Deserialize, Serialize};

use crate::ops::{
    new_op_id, ImageOp, Operation, ShapeGeometry, ShapeKind, ShapeOp, StrokeOp, StrokePoint, StrokeTool, TextOp,
};

/// Pressure assumed when the input device reports none.
pub const DEFAULT_PRESSURE: f64 = 0.5;

/// Available tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    #[default]
    Brush,
    Eraser,
    Line,
    Rect,
    Circle,
    Text,
    Image,
}

impl ToolKind {
    /// Single-key shortcut for the tool, if any.
    pub fn from_shortcut(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            'b' => Some(ToolKind::Brush),
            'e' => Some(ToolKind::Eraser),
            'l' => Some(ToolKind::Line),
            'r' => Some(ToolKind::Rect),
            'c' => Some(ToolKind::Circle),
            't' => Some(ToolKind::Text),
            _ => None,
        }
    }

    pub fn stroke_tool(self) -> Option<StrokeTool> {
        match self {
            ToolKind::Brush => Some(StrokeTool::Brush),
            ToolKind::Eraser => Some(StrokeTool::Eraser),
            _ => None,
        }
    }

    pub fn shape_kind(self) -> Option<ShapeKind> {
        match self {
            ToolKind::Line => Some(ShapeKind::Line),
            ToolKind::Rect => Some(ShapeKind::Rect),
            ToolKind::Circle => Some(ShapeKind::Circle),
            _ => None,
        }
    }
}

/// State of a tool interaction.
#[derive(Debug, Clone, Default)]
pub enum ToolState {
    /// Waiting for interaction.
    #[default]
    Idle,
    /// Capturing a freehand stroke.
    Stroking { id: String, points: Vec<StrokePoint> },
    /// Dragging out a shape from an anchor.
    Dragging { anchor: Point, current: Point },
}

/// What the host must do after a pointer press.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerDown {
    /// A gesture started; frames should be requested while it runs.
    Gesture,
    /// The text tool was used: prompt for text, then call [`ToolManager::text_op`].
    PromptText(Point),
    /// The image tool was used: pick a file, then call [`ToolManager::image_op`].
    PickImage(Point),
}

/// Transient visual feedback for the gesture in progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Preview<'a> {
    Stroke {
        tool: StrokeTool,
        color: &'a str,
        size: f64,
        points: &'a [StrokePoint],
    },
    Shape {
        color: &'a str,
        size: f64,
        geometry: ShapeGeometry,
    },
}

/// Manages the current tool, its style and the gesture in progress.
#[derive(Debug, Clone)]
pub struct ToolManager {
    user_id: String,
    /// Currently selected tool.
    pub current_tool: ToolKind,
    /// Colour applied to new operations.
    pub color: String,
    /// Base size applied to new operations.
    pub size: f64,
    /// Current state of the tool.
    pub state: ToolState,
}

impl ToolManager {
    pub fn new(user_id: impl Into<String>, color: impl Into<String>, size: f64) -> Self {
        Self {
            user_id: user_id.into(),
            current_tool: ToolKind::default(),
            color: color.into(),
            size,
            state: ToolState::Idle,
        }
    }

    /// Switch tools. A gesture in progress is abandoned.
    pub fn set_tool(&mut self, tool: ToolKind) {
        self.current_tool = tool;
        self.state = ToolState::Idle;
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, ToolState::Idle)
    }

    /// Effective width of a freehand point for the given pressure.
    pub fn point_width(&self, tool: StrokeTool, pressure: Option<f64>) -> f64 {
        match tool {
            StrokeTool::Eraser => self.size,
            StrokeTool::Brush => {
                let pressure = pressure.filter(|p| *p > 0.0).unwrap_or(DEFAULT_PRESSURE);
                (self.size * (0.7 + pressure * 0.6)).max(1.0)
            }
        }
    }

    /// Begin a gesture at `position`.
    pub fn pointer_down(&mut self, position: Point, pressure: Option<f64>) -> PointerDown {
        if let Some(tool) = self.current_tool.stroke_tool() {
            let width = self.point_width(tool, pressure);
            self.state = ToolState::Stroking {
                id: new_op_id(),
                points: vec![StrokePoint::new(position.x, position.y, width)],
            };
            return PointerDown::Gesture;
        }
        match self.current_tool {
            ToolKind::Text => PointerDown::PromptText(position),
            ToolKind::Image => PointerDown::PickImage(position),
            _ => {
                self.state = ToolState::Dragging {
                    anchor: position,
                    current: position,
                };
                PointerDown::Gesture
            }
        }
    }

    /// Track the pointer. Returns true if the preview changed.
    pub fn pointer_move(&mut self, position: Point, pressure: Option<f64>) -> bool {
        let width = self
            .current_tool
            .stroke_tool()
            .map(|tool| self.point_width(tool, pressure));
        match &mut self.state {
            ToolState::Idle => false,
            ToolState::Stroking { points, .. } => {
                if let Some(width) = width {
                    points.push(StrokePoint::new(position.x, position.y, width));
                }
                true
            }
            ToolState::Dragging { current, .. } => {
                *current = position;
                true
            }
        }
    }

    /// Finish the gesture, producing the operation to commit.
    pub fn pointer_up(&mut self) -> Option<Operation> {
        match std::mem::take(&mut self.state) {
            ToolState::Idle => None,
            ToolState::Stroking { id, points } => {
                let tool = self.current_tool.stroke_tool()?;
                Some(Operation::Stroke(StrokeOp {
                    id,
                    user_id: self.user_id.clone(),
                    tool,
                    color: self.color.clone(),
                    size: self.size,
                    path: points,
                }))
            }
            ToolState::Dragging { anchor, current } => {
                let kind = self.current_tool.shape_kind()?;
                Some(Operation::Shape(ShapeOp {
                    id: new_op_id(),
                    user_id: self.user_id.clone(),
                    color: self.color.clone(),
                    size: self.size,
                    geometry: ShapeGeometry::from_drag(kind, anchor, current),
                }))
            }
        }
    }

    /// Build a text operation. Empty text produces nothing.
    pub fn text_op(&self, position: Point, text: &str) -> Option<Operation> {
        if text.is_empty() {
            return None;
        }
        Some(Operation::Text(TextOp {
            id: new_op_id(),
            user_id: self.user_id.clone(),
            color: self.color.clone(),
            size: self.size,
            x: position.x,
            y: position.y,
            text: text.to_string(),
        }))
    }

    /// Build an image operation whose width is capped at `max_width`.
    pub fn image_op(
        &self,
        position: Point,
        src_data: String,
        natural_width: u32,
        natural_height: u32,
        max_width: f64,
    ) -> Operation {
        let (w, h) = ImageOp::fitted_size(natural_width as f64, natural_height as f64, max_width);
        Operation::Image(ImageOp {
            id: new_op_id(),
            user_id: self.user_id.clone(),
            x: position.x,
            y: position.y,
            w,
            h,
            src_data,
        })
    }

    /// Preview of the gesture in progress.
    pub fn preview(&self) -> Option<Preview<'_>> {
        match &self.state {
            ToolState::Idle => None,
            ToolState::Stroking { points, .. } => Some(Preview::Stroke {
                tool: self.current_tool.stroke_tool()?,
                color: &self.color,
                size: self.size,
                points,
            }),
            ToolState::Dragging { anchor, current } => Some(Preview::Shape {
                color: &self.color,
                size: self.size,
                geometry: ShapeGeometry::from_drag(self.current_tool.shape_kind()?, *anchor, *current),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ToolManager {
        ToolManager::new("u1", "#ff0000", 10.0)
    }

    #[test]
    fn test_pressure_scales_brush_width() {
        let tools = manager();
        assert!((tools.point_width(StrokeTool::Brush, Some(1.0)) - 13.0).abs() < 1e-9);
        assert!((tools.point_width(StrokeTool::Brush, None) - 10.0).abs() < 1e-9);
        assert!((tools.point_width(StrokeTool::Brush, Some(0.0)) - 10.0).abs() < 1e-9);
        assert!((tools.point_width(StrokeTool::Eraser, Some(1.0)) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_width_clamped_to_one() {
        let tools = ToolManager::new("u1", "#000", 0.5);
        assert_eq!(tools.point_width(StrokeTool::Brush, Some(0.1)), 1.0);
    }

    #[test]
    fn test_freehand_gesture_commits_stroke() {
        let mut tools = manager();
        assert_eq!(tools.pointer_down(Point::new(0.0, 0.0), None), PointerDown::Gesture);
        assert!(tools.pointer_move(Point::new(5.0, 5.0), Some(1.0)));
        assert!(matches!(tools.preview(), Some(Preview::Stroke { points, .. }) if points.len() == 2));

        let op = tools.pointer_up().unwrap();
        match op {
            Operation::Stroke(stroke) => {
                assert_eq!(stroke.user_id, "u1");
                assert_eq!(stroke.path.len(), 2);
                assert_eq!(stroke.tool, StrokeTool::Brush);
            }
            other => panic!("expected stroke, got {other:?}"),
        }
        assert!(!tools.is_active());
        assert!(tools.preview().is_none());
    }

    #[test]
    fn test_rect_gesture_normalizes() {
        let mut tools = manager();
        tools.set_tool(ToolKind::Rect);
        tools.pointer_down(Point::new(20.0, 20.0), None);
        tools.pointer_move(Point::new(5.0, 10.0), None);
        let op = tools.pointer_up().unwrap();
        match op {
            Operation::Shape(shape) => {
                assert_eq!(shape.geometry, ShapeGeometry::Rect { x: 5.0, y: 10.0, w: 15.0, h: 10.0 });
            }
            other => panic!("expected shape, got {other:?}"),
        }
    }

    #[test]
    fn test_text_and_image_prompt_host() {
        let mut tools = manager();
        tools.set_tool(ToolKind::Text);
        let p = Point::new(3.0, 4.0);
        assert_eq!(tools.pointer_down(p, None), PointerDown::PromptText(p));
        assert!(tools.text_op(p, "").is_none());
        assert!(tools.text_op(p, "hello").is_some());

        tools.set_tool(ToolKind::Image);
        assert_eq!(tools.pointer_down(p, None), PointerDown::PickImage(p));
        let op = tools.image_op(p, "data:image/png;base64,".into(), 1600, 800, 800.0);
        assert_eq!(op.bounds().width(), 800.0);
        assert_eq!(op.bounds().height(), 400.0);
    }

    #[test]
    fn test_move_without_gesture_is_ignored() {
        let mut tools = manager();
        assert!(!tools.pointer_move(Point::new(1.0, 1.0), None));
        assert!(tools.pointer_up().is_none());
    }

    #[test]
    fn test_switching_tool_drops_gesture() {
        let mut tools = manager();
        tools.set_tool(ToolKind::Line);
        tools.pointer_down(Point::new(0.0, 0.0), None);
        tools.pointer_move(Point::new(10.0, 0.0), None);
        tools.set_tool(ToolKind::Rect);
        assert!(tools.pointer_up().is_none());
    }

    #[test]
    fn test_shortcuts() {
        assert_eq!(ToolKind::from_shortcut('R'), Some(ToolKind::Rect));
        assert_eq!(ToolKind::from_shortcut('x'), None);
    }
}
