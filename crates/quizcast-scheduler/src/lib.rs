//! # Quizcast Scheduler
//!
//! Timer-driven quiz pushes to chat groups with pluggable selection
//! strategies.
//!
//! ## Design Principles
//! - SQLite persistence: progress survives restarts
//! - Tokio timers only, no external queue
//! - One job per (group, domain) pair; a group is either on the shared
//!   weekly schedule or on its own per-domain settings
//! - Progress moves in one transaction per push
//!
//! ## Architecture
//! ```text
//! Scheduler (tokio interval)
//!   ├── default_<group>_<weekday>_<domain>: "0 8 * * 1"
//!   ├── manual_<group>_<domain>:            "30 17 * * *"
//!   ├── every reload_interval → refresh (config file + task table)
//!   └── on fire → Pusher
//!                   ├── strategy.select   (batch | counter | daterem)
//!                   ├── Dispatcher        (Telegram → Webhook → ...)
//!                   └── strategy.advance  → QuizDb
//!
//! Admin (command layer)
//!   └── mutate task rows / weekly membership → reload group
//! ```

pub mod admin;
pub mod cron;
pub mod dispatch;
pub mod engine;
pub mod jobs;
pub mod persistence;
pub mod push;
pub mod status;
pub mod strategy;

pub use admin::Admin;
pub use cron::CronSchedule;
pub use dispatch::{Dispatcher, TelegramTransport, WebhookTransport};
pub use engine::{Scheduler, spawn_scheduler};
pub use jobs::{Job, JobId, JobSource, derive_group_jobs};
pub use persistence::QuizDb;
pub use push::{PushOutcome, Pusher};
pub use strategy::{PushStrategy, strategy_for, strategy_for_task};
