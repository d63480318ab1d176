//! # Franchise Quota
//!
//! Admission control for mutating requests:
//! - Plan tier resolution per organization (`free`, `pro`, `enterprise`)
//! - Per-subject quota that scales with the plan
//! - Per-source-address ceiling independent of the plan
//! - Fail-open when the counter store is unavailable
//!
//! ## Example
//!
//! ```rust,ignore
//! use franchise_quota::{Decision, QuotaGuard, Subject};
//!
//! let guard = QuotaGuard::new(store, resolver);
//! let subject = Subject::new("user-42").with_org("org-7");
//!
//! match guard.admit(Some(&subject), "203.0.113.9", "/orders").await? {
//!     Decision::Allow(_) => { /* run the handler */ }
//!     Decision::Deny(denial) => { /* 429 with denial.retry_after */ }
//! }
//! ```

mod config;
mod error;
mod guard;
mod plan;

pub use config::QuotaConfig;
pub use error::{QuotaError, QuotaResult};
pub use guard::{Admission, Decision, Denial, LimitKind, QuotaGuard, Subject};
pub use plan::{PlanLookupError, PlanResolver, PlanTier, StaticPlanResolver};
