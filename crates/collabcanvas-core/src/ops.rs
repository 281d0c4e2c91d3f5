//! Drawing operations: the immutable entries of the shared history.

use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a fresh globally unique operation id.
pub fn new_op_id() -> String {
    Uuid::new_v4().to_string()
}

/// A single committed drawing action.
///
/// Serialized as a JSON object tagged by `kind`, which is also the format of
/// exported histories and of `op:commit` payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Operation {
    Stroke(StrokeOp),
    Shape(ShapeOp),
    Text(TextOp),
    Image(ImageOp),
}

impl Operation {
    /// The operation's unique id.
    pub fn id(&self) -> &str {
        match self {
            Operation::Stroke(op) => &op.id,
            Operation::Shape(op) => &op.id,
            Operation::Text(op) => &op.id,
            Operation::Image(op) => &op.id,
        }
    }

    /// Id of the participant that created the operation.
    pub fn user_id(&self) -> &str {
        match self {
            Operation::Stroke(op) => &op.user_id,
            Operation::Shape(op) => &op.user_id,
            Operation::Text(op) => &op.user_id,
            Operation::Image(op) => &op.user_id,
        }
    }

    /// Whether painting this operation depends only on its own fields.
    ///
    /// Image operations reference an encoded source that may fail to decode,
    /// so they are excluded.
    pub fn is_deterministic(&self) -> bool {
        !matches!(self, Operation::Image(_))
    }

    /// Approximate area touched by the operation, ignoring text extents.
    pub fn bounds(&self) -> Rect {
        match self {
            Operation::Stroke(op) => op.bounds(),
            Operation::Shape(op) => op.geometry.bounds().inflate(op.size / 2.0, op.size / 2.0),
            Operation::Text(op) => Rect::from_points((op.x, op.y), (op.x, op.y)),
            Operation::Image(op) => Rect::new(op.x, op.y, op.x + op.w, op.y + op.h),
        }
    }
}

/// Freehand tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeTool {
    Brush,
    Eraser,
}

/// One captured point of a freehand stroke, with its effective width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokePoint {
    pub x: f64,
    pub y: f64,
    pub size: f64,
}

impl StrokePoint {
    pub fn new(x: f64, y: f64, size: f64) -> Self {
        Self { x, y, size }
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A freehand brush or eraser stroke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeOp {
    pub id: String,
    pub user_id: String,
    pub tool: StrokeTool,
    pub color: String,
    pub size: f64,
    pub path: Vec<StrokePoint>,
}

impl StrokeOp {
    fn bounds(&self) -> Rect {
        let Some(first) = self.path.first() else {
            return Rect::ZERO;
        };
        let mut rect = Rect::from_points(first.point(), first.point());
        let mut widest = first.size;
        for p in &self.path[1..] {
            rect = rect.union_pt(p.point());
            widest = widest.max(p.size);
        }
        let pad = widest.max(self.size) / 2.0;
        rect.inflate(pad, pad)
    }
}

/// Geometric primitives drawn by the shape tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Line,
    Rect,
    Circle,
}

/// Resolved geometry of a shape, tagged by the tool that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "lowercase")]
pub enum ShapeGeometry {
    Line { x1: f64, y1: f64, x2: f64, y2: f64 },
    Rect { x: f64, y: f64, w: f64, h: f64 },
    Circle { cx: f64, cy: f64, r: f64 },
}

impl ShapeGeometry {
    /// Resolve the geometry spanned by a drag from `a` to `b`.
    ///
    /// Rectangles are normalized to non-negative width and height; circles
    /// are centered on the midpoint with half the drag distance as radius.
    pub fn from_drag(kind: ShapeKind, a: Point, b: Point) -> Self {
        match kind {
            ShapeKind::Line => ShapeGeometry::Line {
                x1: a.x,
                y1: a.y,
                x2: b.x,
                y2: b.y,
            },
            ShapeKind::Rect => ShapeGeometry::Rect {
                x: a.x.min(b.x),
                y: a.y.min(b.y),
                w: (b.x - a.x).abs(),
                h: (b.y - a.y).abs(),
            },
            ShapeKind::Circle => {
                let center = a.midpoint(b);
                ShapeGeometry::Circle {
                    cx: center.x,
                    cy: center.y,
                    r: a.distance(b) / 2.0,
                }
            }
        }
    }

    pub fn kind(&self) -> ShapeKind {
        match self {
            ShapeGeometry::Line { .. } => ShapeKind::Line,
            ShapeGeometry::Rect { .. } => ShapeKind::Rect,
            ShapeGeometry::Circle { .. } => ShapeKind::Circle,
        }
    }

    pub fn bounds(&self) -> Rect {
        match *self {
            ShapeGeometry::Line { x1, y1, x2, y2 } => Rect::from_points((x1, y1), (x2, y2)),
            ShapeGeometry::Rect { x, y, w, h } => Rect::new(x, y, x + w, y + h),
            ShapeGeometry::Circle { cx, cy, r } => Rect::new(cx - r, cy - r, cx + r, cy + r),
        }
    }
}

/// A line, rectangle or circle outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeOp {
    pub id: String,
    pub user_id: String,
    pub color: String,
    pub size: f64,
    #[serde(flatten)]
    pub geometry: ShapeGeometry,
}

/// A text label anchored at its baseline origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOp {
    pub id: String,
    pub user_id: String,
    pub color: String,
    pub size: f64,
    pub x: f64,
    pub y: f64,
    pub text: String,
}

impl TextOp {
    /// Font size in pixels for a given brush size.
    pub fn font_size(&self) -> f64 {
        (self.size * 3.0).max(12.0)
    }
}

/// A placed raster image, carried as a data URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOp {
    pub id: String,
    pub user_id: String,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    #[serde(rename = "src")]
    pub src_data: String,
}

impl ImageOp {
    /// Display size for an image of `natural` pixel dimensions, with the
    /// width capped at `max_width` and the aspect ratio preserved.
    pub fn fitted_size(natural_width: f64, natural_height: f64, max_width: f64) -> (f64, f64) {
        if natural_width <= 0.0 || natural_height <= 0.0 {
            return (0.0, 0.0);
        }
        let w = natural_width.min(max_width);
        (w, w * (natural_height / natural_width))
    }
}
