//! `basilisk-messages`: message lifecycle on top of the store and the
//! publish scheduler, plus the hourly auto-poster.
//!
//! Every create / update / delete keeps the queue in step with the stored
//! status:
//!
//! | Old status  | New status  | Queue action                                  |
//! |-------------|-------------|-----------------------------------------------|
//! | (new)       | `Scheduled` | schedule                                      |
//! | `Draft`     | `Scheduled` | schedule                                      |
//! | `Scheduled` | `Draft`     | cancel                                        |
//! | `Scheduled` | `Scheduled` | reschedule if time or snapshot fields changed |
//! | any         | (deleted)   | cancel                                        |
//!
//! Store write and queue write are two steps; [`MessageService::reconcile`]
//! repairs drift at startup.

pub mod autopost;
pub mod service;

pub use autopost::AutoPoster;
pub use service::{MessageDraft, MessagePatch, MessageService, ReconcileReport};
