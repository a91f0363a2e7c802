// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of conduit.
//
// conduit is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// conduit is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with conduit.  If not,
// see <http://www.gnu.org/licenses/>.

//! # identity
//!
//! Resolving bearer credentials to users.
//!
//! conduit doesn't mint credentials, hash passwords, or manage signup-- that's another service's
//! problem. What the article API needs is narrow: given the credential a request carried, who is
//! this (if anyone)? Given a username, what does their profile look like *to this viewer*? And,
//! for the feed, whom does a user follow? [Provider] is exactly that and nothing more.

use crate::entities::Username;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identity-layer error type
///
/// Nb. a missing or unknown credential is *not* an error-- [Provider::authenticate] returns
/// `Ok(None)` for those; requests proceed anonymously. This type covers genuine lookup failures
/// (the backing store is down, a record wouldn't deserialize), which are opaque to callers.
#[derive(Debug)]
pub struct Error {
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error {
            source: Box::new(err),
        }
    }
}

/// The authenticated caller, as resolved from a bearer credential
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Identity {
    pub username: Username,
    pub bio: String,
    pub image: String,
}

/// A user as seen by a particular viewer
///
/// `following` is viewer-relative: it reports whether the *requesting* user follows this one, and
/// is always false for anonymous viewers.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Profile {
    pub username: Username,
    pub bio: String,
    pub image: String,
    pub following: bool,
}

impl Profile {
    /// The forgiving default served for users we have no record of
    pub fn unknown(username: &Username) -> Profile {
        Profile {
            username: username.clone(),
            bio: String::new(),
            image: String::new(),
            following: false,
        }
    }
}

/// The stored user record behind [Identity] & [Profile]
///
/// Both the DynamoDB- and memory-backed providers persist exactly this shape; it lives here so
/// they agree on it. The `token` attribute is the opaque bearer credential as issued by whatever
/// service owns signup, carried verbatim.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UserRecord {
    pub username: Username,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub image: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub following: Vec<Username>,
}

impl UserRecord {
    pub fn identity(&self) -> Identity {
        Identity {
            username: self.username.clone(),
            bio: self.bio.clone(),
            image: self.image.clone(),
        }
    }
}

#[async_trait]
pub trait Provider {
    /// Resolve a request's bearer credential to an [Identity]
    ///
    /// `None` in means an anonymous request; `Ok(None)` out means anonymous *or* unrecognized--
    /// this method must never fail just because a credential is missing or bogus.
    async fn authenticate(&self, credential: Option<&str>) -> Result<Option<Identity>, Error>;
    /// Resolve `username` to a [Profile] as seen by `viewer`
    ///
    /// Unknown usernames resolve to [Profile::unknown] rather than erroring; a dangling author
    /// reference shouldn't take down an article listing.
    async fn profile(
        &self,
        username: &Username,
        viewer: Option<&Identity>,
    ) -> Result<Profile, Error>;
    /// The usernames `username` follows (for the feed)
    async fn following(&self, username: &Username) -> Result<Vec<Username>, Error>;
}
