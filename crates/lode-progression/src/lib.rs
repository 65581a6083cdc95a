//! Progression coordination for the Lode idle-game engine.
//!
//! The [`ProgressionCoordinator`] is the only component allowed to flip
//! progression booleans and counters: it evaluates every condition gate
//! each step (unlocks, visibility, prestige availability, achievement
//! tracks), applies generator production, fires automations, and owns
//! the purchase/prestige/transform evaluators. Command handlers call
//! into it; nothing else mutates progression state.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod coordinator;
pub mod events;
pub mod prd;
pub mod prestige;
pub mod purchase;
pub mod transform;

pub use coordinator::{BoolHook, HostHooks, ProgressionCoordinator, StepUpdate, Stores};
pub use events::ProgressionEvent;
pub use prd::{PrdState, SerializedPrd};
pub use prestige::{PrestigeQuote, PrestigeStatus};
pub use purchase::PurchaseQuote;
pub use transform::SerializedTransforms;
