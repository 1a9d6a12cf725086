// ABOUTME: Reasoning oracle implementations shipped with conductor
// ABOUTME: Exports the scripted oracle used to drive playbook runs

pub mod scripted;

pub use scripted::{ScriptedOracle, ScriptedReply};
