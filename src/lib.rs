//! Mokosh: Discord and Telegram moderation bots backed by a remote content
//! classifier.
//!
//! Both bots share one core. [`pipeline::Moderator`] classifies inbound
//! content, [`escalation`] turns verdicts into decisions and
//! [`enforcement::EnforcementDispatcher`] carries them out through a
//! platform's [`enforcement::PlatformAdapter`].

pub mod classifier;
pub mod commands;
pub mod config;
pub mod database;
pub mod discord;
pub mod editor;
pub mod enforcement;
pub mod error;
pub mod escalation;
pub mod health;
pub mod models;
pub mod pipeline;
pub mod settings;
pub mod telegram;
pub mod telegram_handlers;

#[cfg(test)]
mod testing;
