//! Source adapters: the translators between bus events and state-machine
//! updates.
//!
//! Each adapter is constructed against an explicit bus reference and a shared
//! state machine handle, registers its handlers on attach, and can detach
//! cleanly. Adapters hold the machine; the machine never holds an adapter.
//! None of them propagate errors upward; bad input is logged and dropped.

use std::cell::RefCell;
use std::rc::Rc;

use core_state::PetStateMachine;

pub mod interaction;
pub mod system;
pub mod time_bridge;

pub use interaction::{InteractionStateAdapter, InteractionTimeouts};
pub use system::SystemStateAdapter;
pub use time_bridge::TimeStateBridge;

/// The state machine as shared by every adapter on the arbitration thread.
pub type SharedMachine = Rc<RefCell<PetStateMachine>>;
