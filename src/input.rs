//! Per-frame input (spec.md §4.K, §6): the embedding application fills this
//! in once per frame (pointer world position via `camera::OrbitCamera`'s ray
//! unprojection, pull/push button state) rather than this crate owning DOM
//! event listeners the way the teacher's `setup_input_handlers` does —
//! resize glue, keyboard state, and `wasm_bindgen` event wiring are exactly
//! the "GUI panels"/"resize glue" external collaborators spec.md's
//! Non-goals name.

use glam::Vec3;

/// One frame's worth of pointer input, already resolved to world space by
/// the embedding application.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameInput {
    pub pointer_world_position: Vec3,
    pub pull: bool,
    pub push: bool,
}

impl FrameInput {
    pub fn idle() -> Self {
        Self::default()
    }

    /// Maps this frame's input into the SPH solver's interaction input
    /// shape (`physics::InteractionInput`).
    pub fn to_interaction(&self) -> crate::physics::InteractionInput {
        crate::physics::InteractionInput {
            world_point: self.pointer_world_position,
            pull: self.pull,
            push: self.push,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_input_has_no_active_interaction() {
        let input = FrameInput::idle();
        assert!(!input.pull && !input.push);
    }

    #[test]
    fn to_interaction_carries_pointer_position_through() {
        let input = FrameInput {
            pointer_world_position: Vec3::new(1.0, 2.0, 3.0),
            pull: true,
            push: false,
        };
        let interaction = input.to_interaction();
        assert_eq!(interaction.world_point, Vec3::new(1.0, 2.0, 3.0));
        assert!(interaction.pull);
    }
}
