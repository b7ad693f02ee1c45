//! JurAI — a Nostr agent that answers NIP-04 encrypted direct messages and
//! public notes mentioning it with replies generated by a local Ollama model.
//!
//! The crate is organized around the intake→dispatch cycle:
//! [`relay`] maintains the relay connections and feeds the [`intake`] queue,
//! [`dispatch`] turns each deduplicated event into at most one outbound
//! reply via [`classify`], [`generate`] and [`reply`], and [`supervisor`]
//! drives the whole cycle with crash-only recovery.

pub mod classify;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod generate;
pub mod intake;
pub mod relay;
pub mod reply;
pub mod supervisor;
