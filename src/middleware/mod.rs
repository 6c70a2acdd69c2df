// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Middleware between detection and output - privacy, token accounting, sessions

mod privacy;
mod session;
mod token_stats;

pub use privacy::{PrivacyFilter, PrivacyLevel};
pub use session::{Session, SessionEvent, SessionManager, SessionStatus};
pub use token_stats::{TokenSnapshot, TokenStats, TokenTotals, TokenUsage};
