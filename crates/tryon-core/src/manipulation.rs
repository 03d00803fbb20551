//! Manipulation state machine for the overlay transform.
//!
//! Translation follows the pointer in container pixel space; scale and
//! rotation are written directly by slider-style controls. Mouse and touch
//! input share one anchor/update path; only the position extraction
//! differs per event kind.

use serde::{Deserialize, Serialize};

use crate::geometry::{ContainerSize, PlacementTransform, Point};

/// Drag state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging {
        /// Pointer position when the drag began.
        pointer_start: Point,
        /// Transform pivot when the drag began.
        anchor: Point,
    },
}

/// Raw pointer input from the interactive surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PointerEvent {
    MouseDown { x: f32, y: f32 },
    MouseMove { x: f32, y: f32 },
    MouseUp { x: f32, y: f32 },
    MouseLeave { x: f32, y: f32 },
    TouchStart { touches: Vec<Point> },
    TouchMove { touches: Vec<Point> },
    TouchEnd { touches: Vec<Point> },
    TouchCancel { touches: Vec<Point> },
}

/// What a pointer event means to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerPhase {
    Start,
    Move,
    End,
}

impl PointerEvent {
    /// Client position of the event: the mouse position, or the first
    /// active touch point.
    pub fn position(&self) -> Option<Point> {
        match self {
            Self::MouseDown { x, y }
            | Self::MouseMove { x, y }
            | Self::MouseUp { x, y }
            | Self::MouseLeave { x, y } => Some(Point::new(*x, *y)),
            Self::TouchStart { touches }
            | Self::TouchMove { touches }
            | Self::TouchEnd { touches }
            | Self::TouchCancel { touches } => touches.first().copied(),
        }
    }

    pub fn phase(&self) -> PointerPhase {
        match self {
            Self::MouseDown { .. } | Self::TouchStart { .. } => PointerPhase::Start,
            Self::MouseMove { .. } | Self::TouchMove { .. } => PointerPhase::Move,
            Self::MouseUp { .. }
            | Self::MouseLeave { .. }
            | Self::TouchEnd { .. }
            | Self::TouchCancel { .. } => PointerPhase::End,
        }
    }
}

/// Owns the current [`PlacementTransform`] and the drag state.
#[derive(Debug, Clone)]
pub struct Manipulator {
    transform: PlacementTransform,
    state: DragState,
}

impl Manipulator {
    pub fn new(transform: PlacementTransform) -> Self {
        Self {
            transform,
            state: DragState::Idle,
        }
    }

    pub fn transform(&self) -> PlacementTransform {
        self.transform
    }

    pub fn state(&self) -> DragState {
        self.state
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging { .. })
    }

    /// Records drag anchors and enters the dragging state.
    ///
    /// Calling this while already dragging re-anchors at the new pointer.
    pub fn begin_drag(&mut self, pointer_x: f32, pointer_y: f32) {
        self.state = DragState::Dragging {
            pointer_start: Point::new(pointer_x, pointer_y),
            anchor: self.transform.pivot(),
        };
        tracing::debug!("[manipulation] drag begin at ({pointer_x}, {pointer_y})");
    }

    /// Moves the pivot by the pointer delta since `begin_drag`.
    ///
    /// No-op when idle. Returns whether the transform changed.
    pub fn update_drag(&mut self, pointer_x: f32, pointer_y: f32) -> bool {
        let DragState::Dragging {
            pointer_start,
            anchor,
        } = self.state
        else {
            return false;
        };

        let x = anchor.x + (pointer_x - pointer_start.x);
        let y = anchor.y + (pointer_y - pointer_start.y);
        let changed = x != self.transform.x || y != self.transform.y;
        self.transform.x = x;
        self.transform.y = y;
        changed
    }

    /// Leaves the dragging state. Idempotent.
    pub fn end_drag(&mut self) {
        if self.is_dragging() {
            tracing::debug!("[manipulation] drag end");
        }
        self.state = DragState::Idle;
    }

    /// Routes a mouse or touch event through the drag logic.
    ///
    /// Any end-phase event (up, leave, touch end, touch cancel) ends the
    /// gesture regardless of which input started it. Returns whether the
    /// transform changed.
    pub fn handle_pointer(&mut self, event: &PointerEvent) -> bool {
        match event.phase() {
            PointerPhase::Start => {
                if let Some(p) = event.position() {
                    self.begin_drag(p.x, p.y);
                }
                false
            }
            PointerPhase::Move => event
                .position()
                .is_some_and(|p| self.update_drag(p.x, p.y)),
            PointerPhase::End => {
                self.end_drag();
                false
            }
        }
    }

    /// Overwrites the scale. Non-positive or non-finite values are rejected
    /// and leave the transform untouched.
    pub fn set_scale(&mut self, value: f32) -> bool {
        if !(value.is_finite() && value > 0.0) {
            tracing::warn!("[manipulation] rejected scale {value}");
            return false;
        }
        self.transform.scale = value;
        true
    }

    /// Overwrites the rotation in degrees.
    pub fn set_rotation(&mut self, value: f32) -> bool {
        if !value.is_finite() {
            tracing::warn!("[manipulation] rejected rotation {value}");
            return false;
        }
        self.transform.rotation_degrees = value;
        true
    }

    /// Replaces the whole transform (auto-alignment). Ends any drag in
    /// progress so stale anchors cannot pull the overlay back.
    pub fn set_transform(&mut self, transform: PlacementTransform) {
        self.state = DragState::Idle;
        self.transform = transform;
    }

    /// Centers the overlay in the container at unit scale and no rotation.
    pub fn reset(&mut self, container_width: f32, container_height: f32) {
        self.set_transform(PlacementTransform::centered(ContainerSize::new(
            container_width,
            container_height,
        )));
    }
}
