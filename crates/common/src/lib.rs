//! Protocol library for Anova sous-vide immersion circulators.
//!
//! The cookers speak an ASCII command language over a framed, per-byte
//! rotated binary transport. This crate holds everything that is independent
//! of any particular transport: the wire [`codec`], the [`commands`] catalog
//! with its render/parse pairs, and the grammar of unsolicited device
//! [`event`]s.

pub mod codec;
pub mod commands;
pub mod event;
