#![deny(rust_2018_idioms)]
#![deny(clippy::all)]
//! Domain model of the ad and counter selection engine: targeting conditions,
//! the page view context, capping state and the page/slot/creative catalogue,
//! together with their binary form.

pub mod canonical_url;
pub mod caps;
pub mod codec;
pub mod condition;
pub mod context;
pub mod creative;
pub mod ip_mask;
pub mod locale;
pub mod page;
pub mod selection;
pub mod util {
    pub mod logging;
}

pub use self::caps::{CapMinTimeMap, GroupCap, GroupCapMap, GroupCaps};
pub use self::codec::{Decode, Encode, Error as CodecError};
pub use self::condition::{CapScope, Condition, ConditionMap, QueryTypes};
pub use self::context::SelectionContext;
pub use self::creative::{Counter, Creative, Injection};
pub use self::ip_mask::IpMask;
pub use self::locale::{Country, Lang};
pub use self::page::{AdvMaxAdNum, AdvRestriction, AdvRestrictionMap, Page, PageKind, Slot};
pub use self::selection::{SelectedCounter, Selection, SelectionResult};

pub type GroupId = u64;
pub type ConditionId = u64;
pub type CounterId = u64;
pub type CreativeId = u64;
pub type AdvertiserId = u64;
pub type PageId = u32;
pub type SlotId = u32;
/// Version of the selector configuration, growing with every publication.
pub type UpdateNumber = u64;
