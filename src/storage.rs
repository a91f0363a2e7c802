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

//! # storage
//!
//! Abstractions for the conduit storage layer.
//!
//! The contract here is deliberately that of a key-value store with secondary indexes, nothing
//! more: point lookups by primary key, full-record conditional writes, and ordered index queries
//! returning one page at a time with an opaque continuation token. The query-shaping that makes a
//! blog out of those primitives (offset pagination, filter amplification, global merges) belongs
//! to [Articles], not to implementations of this trait.
//!
//! [Articles]: crate::repository::Articles

use crate::entities::{Article, Slug, Tagname, Username};

use async_trait::async_trait;

/// Storage-layer error type
///
/// Almost all failures here are opaque to callers-- there's nothing the caller can do about a
/// failed network hop or a throttled table other than report it. The one failure mode callers
/// *do* react to is a failed write precondition (the record changed underneath a read-modify-write,
/// or a freshly-minted slug collided), so that gets its own variant.
#[derive(Debug)]
pub enum Error {
    Backend {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    PreconditionFailed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Backend { source } => write!(f, "{}", source),
            Error::PreconditionFailed => {
                write!(f, "the stored record changed since it was read")
            }
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::Backend {
            source: Box::new(err),
        }
    }
}

/// Opaque continuation token carried from one page's response to the next page's request
///
/// Implementations are free to put whatever they like in here (DynamoDB's `LastEvaluatedKey`
/// serialized to JSON, a plain offset, ...); callers only ever hand it back verbatim.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Token(pub String);

/// One page of an index query or scan
#[derive(Clone, Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Absent when the index is exhausted
    pub next: Option<Token>,
}

/// The server-side post-filter predicates a listing query may carry
///
/// At most one filter is ever active; the enum makes requesting more than one unrepresentable at
/// this layer (the HTTP layer rejects such requests before they get here).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ListFilter {
    /// Tag-list membership
    Tag(Tagname),
    /// Exact author match
    Author(Username),
    /// Favorited-by membership
    FavoritedBy(Username),
}

impl ListFilter {
    /// The predicate itself-- the in-memory store evaluates this directly; the DynamoDB store
    /// compiles it to an equivalent `FilterExpression`
    pub fn matches(&self, article: &Article) -> bool {
        match self {
            ListFilter::Tag(tag) => article.tag_list().contains(tag),
            ListFilter::Author(author) => article.author() == author,
            ListFilter::FavoritedBy(user) => article.is_favorited_by(user),
        }
    }
}

/// What was true of the record when it was read; compared on write
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Precondition {
    pub updated_at: i64,
    pub favorites_count: u64,
}

impl From<&Article> for Precondition {
    fn from(article: &Article) -> Self {
        Precondition {
            updated_at: article.updated_at(),
            favorites_count: article.favorites_count(),
        }
    }
}

/// Write discipline for [Backend::put_article]
#[derive(Clone, Copy, Debug)]
pub enum Put {
    /// Unconditional upsert
    Always,
    /// The slug must not already exist (guards slug minting)
    IfAbsent,
    /// The record must be unchanged since it was read (guards read-modify-write)
    IfUnchanged(Precondition),
}

#[async_trait]
pub trait Backend {
    /// Point lookup by primary key; `None` means no such article
    async fn get_article(&self, slug: &Slug) -> Result<Option<Article>, Error>;
    /// Full-record write (the whole record is rewritten on every mutation, never a partial
    /// patch). A violated [Put] discipline is [Error::PreconditionFailed].
    async fn put_article(&self, article: &Article, put: Put) -> Result<(), Error>;
    /// Point delete by primary key; deleting an absent record is not an error
    async fn delete_article(&self, slug: &Slug) -> Result<(), Error>;
    /// One page of the global creation-time-ordered index, newest first, with `filter` applied
    /// server-side *after* the index scan-- a page may therefore carry fewer matches than the
    /// store read, including none, while still carrying a continuation token.
    async fn query_created(
        &self,
        filter: Option<&ListFilter>,
        start: Option<Token>,
    ) -> Result<Page<Article>, Error>;
    /// One page of the author-ordered index, newest first
    async fn query_author(
        &self,
        author: &Username,
        start: Option<Token>,
    ) -> Result<Page<Article>, Error>;
    /// One page of a full-table scan projecting only the tag-list attribute; articles with no
    /// tags yield an empty vector
    async fn scan_tags(&self, start: Option<Token>) -> Result<Page<Vec<Tagname>>, Error>;
}
