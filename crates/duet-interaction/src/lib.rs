//! Cross-identity dual-trigger interaction orchestrator.
//!
//! Two independently-running bot identities observe the same channel stream
//! and cannot call each other; when one user message mentions both of them,
//! this crate coordinates an ordered, paced, multi-line scripted exchange
//! between the two — the lead speaks first, the follow answers after
//! observing the lead's message.

mod dual_mention;
mod hook;
mod script;
mod task_registry;

pub use dual_mention::{is_joint_mention_trigger, PendingHandoff, PendingHandoffTable};
pub use hook::{DualMentionHook, DualMentionHookConfig, InteractionRole, SequencePacing};
pub use script::{
    expand_lines, extract_material_words, parse_script_lines, GeneratedScriptConfig,
    GeneratedScriptProvider, LineScriptProvider, RolePairedScriptProvider, ScriptContext,
    ScriptError, StaticScriptProvider,
};
pub use task_registry::SequenceTaskRegistry;
