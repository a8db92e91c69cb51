//! One phone-style call with the live assistant.

pub mod controller;
pub mod instruction;
pub mod session;
pub mod state;
pub mod turn;

pub use controller::{
    CallCommand, CallControl, CallController, CallEnd, CallHandle, CallOptions, CallOutcome,
    CallUpdate,
};
pub use instruction::{KnowledgeBase, KnowledgeEntry, Service, build_system_instruction, greeting};
pub use session::CallSession;
pub use state::{CallAction, CallInput, CallMachine, CallStatus, RetryPolicy};
pub use turn::{PendingTurn, Speaker, Transcript, TranscriptEntry, TurnReconciler};
