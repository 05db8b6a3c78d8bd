//! Data models for the ordering portal.
//!
//! Wire names are camelCase to match the portal's client-side DTOs.

mod cart;
mod company;
mod order;
mod page;
mod product;
mod report;
mod store;
mod user;

pub use cart::*;
pub use company::*;
pub use order::*;
pub use page::*;
pub use product::*;
pub use report::*;
pub use store::*;
pub use user::*;

use serde::{Deserialize, Serialize};

/// Revision information for change detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionInfo {
    pub revision_id: i64,
    pub generated_at: String,
}
