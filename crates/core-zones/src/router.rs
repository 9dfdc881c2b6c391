//! Pointer routing: raw press/release/move events → zone-scoped
//! `UserInteraction`s.
//!
//! The router owns the transient pointer state (armed drag, current hover
//! zone) and toggles zone activation on hover enter/leave. It produces
//! interactions; dispatching them on the bus is the caller's job.

use kurbo::Point;

use core_events::{
    InteractionKind, PointerButton, PointerEvent, PointerPhase, UserInteraction,
};

use crate::ZoneRegistry;

/// Zone id reported when a drag ends on a release outside every zone.
pub const NO_ZONE_RELEASE: &str = "no_zone_release";

#[derive(Debug, Default)]
pub struct PointerRouter {
    dragging: bool,
    drag_zone: Option<String>,
    press_pos: Option<Point>,
    hover_zone: Option<String>,
}

impl PointerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn hover_zone(&self) -> Option<&str> {
        self.hover_zone.as_deref()
    }

    /// Route one raw pointer event through the registry. Returns the
    /// interactions to publish, possibly empty.
    pub fn route(&mut self, registry: &mut ZoneRegistry, event: PointerEvent) -> Vec<UserInteraction> {
        let pos = Point::new(event.x, event.y);
        match event.phase {
            PointerPhase::Press => self.on_press(registry, pos, event.button),
            PointerPhase::Release => self.on_release(registry, pos),
            PointerPhase::Move => self.on_move(registry, pos),
            PointerPhase::DoubleClick => self.on_double_click(registry, pos),
        }
    }

    fn on_press(
        &mut self,
        registry: &ZoneRegistry,
        pos: Point,
        button: PointerButton,
    ) -> Vec<UserInteraction> {
        let kind = if button == PointerButton::Right {
            InteractionKind::RightClick
        } else {
            InteractionKind::Click
        };

        for zone in registry.zones_at(pos) {
            if !zone.supports(kind) {
                continue;
            }
            self.press_pos = Some(pos);
            if button == PointerButton::Left && zone.supports(InteractionKind::Drag) {
                self.dragging = true;
                self.drag_zone = Some(zone.id.clone());
                tracing::debug!(target: "zones.router", zone = %zone.id, "drag armed");
            }
            return vec![
                UserInteraction::new(kind, zone.id.clone())
                    .with_phase(PointerPhase::Press)
                    .with_position(pos.x, pos.y),
            ];
        }
        Vec::new()
    }

    fn on_release(&mut self, registry: &ZoneRegistry, pos: Point) -> Vec<UserInteraction> {
        let was_dragging = self.dragging;
        if was_dragging {
            tracing::debug!(target: "zones.router", zone = ?self.drag_zone, "drag finished");
        }
        self.dragging = false;
        self.drag_zone = None;
        self.press_pos = None;

        let zones = registry.zones_at(pos);
        let mut out = Vec::new();
        for zone in &zones {
            if zone.supports(InteractionKind::Click) {
                out.push(
                    UserInteraction::new(InteractionKind::Click, zone.id.clone())
                        .with_phase(PointerPhase::Release)
                        .with_position(pos.x, pos.y),
                );
            }
        }

        if was_dragging && zones.is_empty() {
            tracing::debug!(target: "zones.router", "drag released outside every zone");
            out.push(
                UserInteraction::new(InteractionKind::Drop, NO_ZONE_RELEASE)
                    .with_phase(PointerPhase::Release)
                    .with_position(pos.x, pos.y),
            );
        }
        out
    }

    fn on_move(&mut self, registry: &mut ZoneRegistry, pos: Point) -> Vec<UserInteraction> {
        if self.dragging {
            let zone_id = self.drag_zone.clone().unwrap_or_else(|| "body".to_string());
            return vec![
                UserInteraction::new(InteractionKind::Drag, zone_id)
                    .with_phase(PointerPhase::Move)
                    .with_position(pos.x, pos.y),
            ];
        }

        let current_ids = registry.zone_ids_at(pos);

        // Leaving the tracked hover zone drops the activation marker; the
        // interaction-state timeout handles the visible state decay.
        if let Some(hovered) = self.hover_zone.clone()
            && !current_ids.contains(&hovered)
        {
            if let Some(zone) = registry.get_mut(&hovered) {
                zone.deactivate();
            }
            self.hover_zone = None;
        }

        // Still inside the tracked hover zone: nothing to do.
        if self.hover_zone.is_some() {
            return Vec::new();
        }

        // Entering a new hover-supporting zone (first hit in insertion order).
        for id in &current_ids {
            let Some(zone) = registry.get_mut(id) else {
                continue;
            };
            if !zone.supports(InteractionKind::Hover) {
                continue;
            }
            zone.activate();
            self.hover_zone = Some(id.clone());
            return vec![
                UserInteraction::new(InteractionKind::Hover, id.clone())
                    .with_phase(PointerPhase::Move)
                    .with_position(pos.x, pos.y),
            ];
        }
        Vec::new()
    }

    fn on_double_click(&mut self, registry: &ZoneRegistry, pos: Point) -> Vec<UserInteraction> {
        for zone in registry.zones_at(pos) {
            if zone.supports(InteractionKind::DoubleClick) {
                return vec![
                    UserInteraction::new(InteractionKind::DoubleClick, zone.id.clone())
                        .with_phase(PointerPhase::DoubleClick)
                        .with_position(pos.x, pos.y),
                ];
            }
        }
        Vec::new()
    }
}
