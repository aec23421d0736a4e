//! Reading history and alert rules.
//!
//! ## Submodules
//!
//! - [`duration`]: Parsing and formatting of duration strings (e.g., "2.5m", "30s")
//! - [`window`]: The bounded per-channel [`Window`] and capacity derivation
//! - [`rule`]: Drop and stall [`AlertRule`]s
//!
//! ## Data Flow
//!
//! ```text
//! payload (bytes)
//!        │
//!        ▼
//! Reading::parse()
//!        │
//!        ▼
//! Window::push() ──▶ evicted Reading (dropped)
//!        │
//!        ▼
//! AlertRule::evaluate(oldest, newest) ──▶ Option<AlertEvent>
//! ```

pub mod duration;
pub mod rule;
pub mod window;

pub use rule::{AlertRule, RuleKind, DROP_DELTA_DECIMALS, STALL_DELTA_DECIMALS};
pub use window::{capacity_for, Window};
