//! Theme transition coordinator

mod flavor;
mod transition;

pub use flavor::{FlavorGenerator, ThemeTagFlavor, DEFAULT_FLAVOR_FIELDS};
pub use transition::{
    plan_transition, EquipmentStrategy, EquipmentTransition, ItemOutcome, PlannedItem,
    ThemeTransition, ThemeTransitionRequest, TransitionPlan, TransitionReport, TransitionState,
};
