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

//! # conduit models
//!
//! The foundational types: a few refined newtypes ([Slug], [Username], [Tagname]) and the stored
//! [Article] record itself. The newtypes are correct-by-construction; their hand-written
//! `Deserialize` implementations reject invalid serialized values rather than smuggling them into
//! the rest of the crate.

use std::{collections::HashSet, fmt::Display, ops::Deref, str::FromStr};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{prelude::*, Backtrace};
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{text} is not a valid article slug"))]
    BadSlug { text: String, backtrace: Backtrace },
    #[snafu(display("{text} is not a valid tag name"))]
    BadTagname { text: String, backtrace: Backtrace },
    #[snafu(display("{name} is not a valid conduit username"))]
    BadUsername { name: String },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

fn mk_serde_de_err<'de, D: serde::Deserializer<'de>>(err: impl std::error::Error) -> D::Error {
    <D::Error as serde::de::Error>::custom(format!("{:?}", err))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Username                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

// conduit usernames must be ASCII, may be from one to sixty-four characters in length, and must
// match the regex "^[a-zA-Z0-9][-_.a-zA-Z0-9]*$".
const MAX_USERNAME_LENGTH: usize = 64;

lazy_static! {
    static ref USERNAME: Regex = Regex::new("^[a-zA-Z0-9][-_.a-zA-Z0-9]*$").unwrap(/* known good */);
}

fn check_username(s: &str) -> bool {
    s.is_ascii() && !s.is_empty() && s.len() <= MAX_USERNAME_LENGTH && USERNAME.is_match(s)
}

/// A refined type representing a conduit username
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    /// Construct a [Username] from a `&str`, copying. To *move* a [String] into a [Username]
    /// (with validity checking) use [TryFrom::try_from()].
    pub fn new(name: &str) -> Result<Username> {
        check_username(name)
            .then_some(Username(name.to_owned()))
            .ok_or(
                BadUsernameSnafu {
                    name: name.to_owned(),
                }
                .build(),
            )
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Deref for Username {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Implement `Deserialize` by hand to fail if the serialized value isn't a legit `Username`
impl<'de> Deserialize<'de> for Username {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Username::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Username {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Username::new(s)
    }
}

impl TryFrom<String> for Username {
    type Error = Error;

    fn try_from(name: String) -> std::result::Result<Self, Self::Error> {
        if check_username(&name) {
            Ok(Username(name))
        } else {
            BadUsernameSnafu { name }.fail()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Slug                                               //
////////////////////////////////////////////////////////////////////////////////////////////////////

lazy_static! {
    static ref SLUG: Regex = Regex::new("^[a-z0-9][-a-z0-9]*$").unwrap(/* known good */);
}

fn check_slug(s: &str) -> bool {
    SLUG.is_match(s)
}

/// URL-safe unique article identifier
///
/// A [Slug] is derived from the article's title (lower-cased, non-alphanumerics collapsed to
/// hyphens) plus a random eight-hex-character suffix to disambiguate articles with identical
/// titles. Once assigned it never changes; it serves as the article table's primary key.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Slug(String);

impl Slug {
    /// Mint a fresh [Slug] for `title`
    ///
    /// Repeated calls with the same title produce distinct slugs (modulo an astronomically
    /// unlikely collision in the eight-character suffix, which the caller guards against with a
    /// conditional write).
    pub fn mint(title: &str) -> Slug {
        let suffix = Uuid::new_v4().simple().to_string();
        let stem = slug::slugify(title);
        if stem.is_empty() {
            Slug(suffix[..8].to_string())
        } else {
            Slug(format!("{}-{}", stem, &suffix[..8]))
        }
    }
    /// Construct a [Slug] from a `&str`, validating
    pub fn new(text: &str) -> Result<Slug> {
        check_slug(text).then_some(Slug(text.to_owned())).ok_or(
            BadSlugSnafu {
                text: text.to_owned(),
            }
            .build(),
        )
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Deref for Slug {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Implement `Deserialize` by hand to fail if the serialized value isn't a legit `Slug`
impl<'de> Deserialize<'de> for Slug {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Slug::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl Display for Slug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Slug {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Slug::new(s)
    }
}

impl TryFrom<String> for Slug {
    type Error = Error;

    fn try_from(text: String) -> std::result::Result<Self, Self::Error> {
        if check_slug(&text) {
            Ok(Slug(text))
        } else {
            BadSlugSnafu { text }.fail()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Tagname                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

const MAX_TAGNAME_LENGTH: usize = 255;

fn check_tagname(s: &str) -> bool {
    !s.is_empty()
        && UnicodeSegmentation::graphemes(s, true).count() <= MAX_TAGNAME_LENGTH
        && !s.contains(char::is_whitespace)
        && !s.contains(',')
}

/// Tags may be up to 255 graphemes in length, and may contain neither whitespace nor commas
/// (commas being the conventional tag separator in query strings).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Tagname(String);

impl Tagname {
    /// Correct-by-construction [Tagname] constructor
    pub fn new(text: &str) -> Result<Tagname> {
        check_tagname(text)
            .then_some(Tagname(text.to_string()))
            .ok_or(
                BadTagnameSnafu {
                    text: text.to_string(),
                }
                .build(),
            )
    }
}

impl AsRef<str> for Tagname {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Deref for Tagname {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Implement `Deserialize` by hand to fail if the serialized value isn't a legit `Tagname`
impl<'de> Deserialize<'de> for Tagname {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Tagname::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl std::fmt::Display for Tagname {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Tagname {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Tagname::new(s)
    }
}

impl TryFrom<String> for Tagname {
    type Error = Error;

    fn try_from(name: String) -> std::result::Result<Self, Self::Error> {
        if check_tagname(&name) {
            Ok(Tagname(name))
        } else {
            BadTagnameSnafu { text: name }.fail()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Article                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The constant partition-discriminator value shared by every article record; it exists solely so
/// that a single global secondary index (partitioned on this attribute, ranged on `createdAt`)
/// can order the whole table by creation time.
pub const PARTITION: &str = "partition";

/// Represents a stored article record
///
/// This is the record as it sits in the table, *not* the API-facing representation (for which see
/// [ArticleView]). Timestamps are epoch seconds; `favorited_by` is absent-- never empty-- when no
/// one has favorited the article, and `favorites_count` always equals its cardinality.
///
/// [ArticleView]: crate::views::ArticleView
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    slug: Slug,
    title: String,
    description: String,
    body: String,
    author: Username,
    created_at: i64,
    updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag_list: Option<Vec<Tagname>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    favorited_by: Option<Vec<Username>>,
    favorites_count: u64,
    dummy: String,
}

/// The author-mutable portion of an [Article]
#[derive(Clone, Debug, Default)]
pub struct ArticleChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub body: Option<String>,
}

impl ArticleChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.body.is_none()
    }
}

impl Article {
    pub fn new(
        slug: Slug,
        author: &Username,
        title: &str,
        description: &str,
        body: &str,
        tag_list: Option<Vec<Tagname>>,
        now: i64,
    ) -> Article {
        Article {
            slug,
            title: title.to_string(),
            description: description.to_string(),
            body: body.to_string(),
            author: author.clone(),
            created_at: now,
            updated_at: now,
            tag_list,
            favorited_by: None,
            favorites_count: 0,
            dummy: PARTITION.to_string(),
        }
    }
    /// Apply an author's edit; `updated_at` moves to `now`
    pub fn apply(&mut self, changes: &ArticleChanges, now: i64) {
        if let Some(title) = &changes.title {
            self.title = title.clone();
        }
        if let Some(description) = &changes.description {
            self.description = description.clone();
        }
        if let Some(body) = &changes.body {
            self.body = body.clone();
        }
        self.updated_at = std::cmp::max(now, self.created_at);
    }
    pub fn author(&self) -> &Username {
        &self.author
    }
    pub fn body(&self) -> &str {
        &self.body
    }
    pub fn created_at(&self) -> i64 {
        self.created_at
    }
    pub fn description(&self) -> &str {
        &self.description
    }
    /// Add `user` to the favorited-by set; true if the record changed
    pub fn favorite(&mut self, user: &Username) -> bool {
        if self.is_favorited_by(user) {
            return false;
        }
        self.favorited_by.get_or_insert_with(Vec::new).push(user.clone());
        self.favorites_count += 1;
        true
    }
    pub fn favorited_by(&self) -> &[Username] {
        self.favorited_by.as_deref().unwrap_or(&[])
    }
    pub fn favorites_count(&self) -> u64 {
        self.favorites_count
    }
    pub fn is_favorited_by(&self, user: &Username) -> bool {
        self.favorited_by().contains(user)
    }
    pub fn slug(&self) -> &Slug {
        &self.slug
    }
    pub fn tag_list(&self) -> &[Tagname] {
        self.tag_list.as_deref().unwrap_or(&[])
    }
    pub fn tags(&self) -> HashSet<Tagname> {
        self.tag_list().iter().cloned().collect()
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    /// Remove `user` from the favorited-by set; true if the record changed
    ///
    /// Maintains the invariant that `favorited_by` is deleted-- not kept empty-- when the last
    /// favorite is removed, with `favorites_count` reset to zero.
    pub fn unfavorite(&mut self, user: &Username) -> bool {
        let Some(favorited_by) = self.favorited_by.as_mut() else {
            return false;
        };
        let Some(idx) = favorited_by.iter().position(|u| u == user) else {
            return false;
        };
        favorited_by.remove(idx);
        self.favorites_count -= 1;
        if favorited_by.is_empty() {
            self.favorited_by = None;
            self.favorites_count = 0;
        }
        true
    }
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tagname() {
        assert!(Tagname::new("").is_err());
        assert!(Tagname::new("foo bar").is_err());
        assert!(Tagname::new("foo,bar").is_err());
        assert!(Tagname::new("aws").is_ok());
        assert!(Tagname::new("так-себе-тег").is_ok());
    }

    #[test]
    fn username() {
        assert!(Username::new("").is_err());
        assert!(Username::new("-leading-dash").is_err());
        assert!(Username::new("has space").is_err());
        assert!(Username::new("alice").is_ok());
        assert!(Username::new("bob").is_ok());
    }

    #[test]
    fn slug_shape() {
        let slug = Slug::mint("My Post");
        let text = slug.to_string();
        assert!(text.starts_with("my-post-"));
        let suffix = &text["my-post-".len()..];
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        // And it round-trips through the validating constructor:
        assert!(Slug::new(&text).is_ok());
    }

    #[test]
    fn slugs_are_unique() {
        assert_ne!(Slug::mint("My Post"), Slug::mint("My Post"));
    }

    #[test]
    fn favorites_invariant() {
        let alice = Username::new("alice").unwrap();
        let bob = Username::new("bob").unwrap();
        let mut article = Article::new(
            Slug::mint("t"),
            &alice,
            "t",
            "d",
            "b",
            None,
            1_700_000_000,
        );
        assert!(article.favorite(&bob));
        assert!(!article.favorite(&bob)); // redundant toggle is a no-op
        assert_eq!(article.favorites_count(), 1);
        assert_eq!(article.favorited_by().len(), 1);
        assert!(article.unfavorite(&bob));
        assert!(!article.unfavorite(&bob)); // ditto
        assert_eq!(article.favorites_count(), 0);
        // The attribute is dropped outright when the set empties:
        assert!(article.favorited_by.is_none());
    }

    #[test]
    fn apply_preserves_timestamp_order() {
        let alice = Username::new("alice").unwrap();
        let mut article = Article::new(Slug::mint("t"), &alice, "t", "d", "b", None, 100);
        article.apply(
            &ArticleChanges {
                title: Some("t2".to_string()),
                ..Default::default()
            },
            99, // clock skew: never move updated_at before created_at
        );
        assert!(article.created_at() <= article.updated_at());
        assert_eq!(article.title(), "t2");
        assert_eq!(article.description(), "d");
    }
}
