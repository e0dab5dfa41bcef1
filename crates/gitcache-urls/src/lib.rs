//! Detection and canonicalization of Git dependency URLs.
//!
//! npm lockfiles record Git sources in several spellings: `git+https://`,
//! `git+ssh://`, scp-style `git@host:owner/repo.git`, and the hosted
//! shorthands (`github:owner/repo`). Comparing or fetching them requires a
//! single canonical form. Canonicalization rewrites every spelling to HTTPS
//! and is idempotent, so a canonical URL survives a second pass unchanged.

pub use crate::canonical::{
    bare_url, canonicalize, extract_ref, is_git_url, preferred_url, strip_ref,
};
pub use crate::package_id::{PackageId, PackageIdError};

mod canonical;
mod package_id;
