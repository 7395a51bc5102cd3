//! Membership resolution for one inbound request.
//!
//! ```text
//! guard ──► MembershipResolver<R>
//!              │ 1. GlobalAdminBypass (superuser memo + tenant existence)
//!              │ 2. MembershipCache   (principal → tenant → row | absent)
//!              │ 3. MembershipStore   (only on a cache miss)
//!              ▼
//!           validate_record::<R>  ──► Membership<R> | IntegrityError
//! ```
//!
//! A cache lives exactly as long as the request that created it; nothing here
//! is shared between requests.

pub mod cache;
pub mod resolver;

pub use cache::{LookupSource, MembershipCache};
pub use resolver::MembershipResolver;
