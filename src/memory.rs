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

//! # memory
//!
//! In-memory [storage::Backend] & [identity::Provider] implementations.
//!
//! This exists for two reasons: the test suites need a store they can drive without a live (or
//! emulated) DynamoDB, and `conduitd --memory` gives you a self-contained server to poke at. It
//! deliberately reproduces the *shape* of the DynamoDB adapter's behavior-- in particular its
//! paging: index queries hand back a fixed-size window of the raw index per call and apply any
//! filter to that window afterwards, so a selective filter yields near-empty pages with a
//! continuation token, exactly the amplification the repository's accumulation loop exists to
//! absorb. Keep the page size small in tests & that loop actually loops.

use crate::{
    entities::{Article, Slug, Tagname, Username},
    identity::{self, Identity, Profile, Provider, UserRecord},
    storage::{self, Backend, ListFilter, Page, Precondition, Put, Token},
};

use async_trait::async_trait;

use std::{
    collections::HashMap,
    num::ParseIntError,
    sync::{PoisonError, RwLock},
};

const DEFAULT_PAGE_SIZE: usize = 32;

/// In-memory article & user tables
pub struct Store {
    articles: RwLock<HashMap<Slug, Article>>,
    users: RwLock<HashMap<Username, UserRecord>>,
    page_size: usize,
}

impl Default for Store {
    fn default() -> Self {
        Store::new()
    }
}

impl Store {
    pub fn new() -> Store {
        Store::with_page_size(DEFAULT_PAGE_SIZE)
    }
    /// A store whose index queries return at most `page_size` raw records per page
    pub fn with_page_size(page_size: usize) -> Store {
        Store {
            articles: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            page_size: page_size.max(1),
        }
    }
    /// Install (or replace) a user record; the in-memory stand-in for whatever service owns
    /// signup
    pub fn add_user(&self, record: UserRecord) {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.username.clone(), record);
    }

    /// Snapshot of the whole table in global index order (creation time descending, slug
    /// descending as the tie-break)
    fn snapshot(&self) -> Vec<Article> {
        let mut articles: Vec<Article> = self
            .articles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        articles.sort_unstable_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.slug().cmp(a.slug()))
        });
        articles
    }

    /// One raw window of `all`, starting at the position `start` encodes
    fn window(
        &self,
        all: Vec<Article>,
        start: Option<Token>,
    ) -> Result<(Vec<Article>, Option<Token>), storage::Error> {
        let from = match start {
            Some(Token(text)) => text
                .parse::<usize>()
                .map_err(|err: ParseIntError| storage::Error::new(err))?,
            None => 0,
        };
        let to = from.saturating_add(self.page_size).min(all.len());
        let next = (to < all.len()).then(|| Token(to.to_string()));
        Ok((all.into_iter().take(to).skip(from).collect(), next))
    }
}

#[async_trait]
impl Backend for Store {
    async fn get_article(&self, slug: &Slug) -> Result<Option<Article>, storage::Error> {
        Ok(self
            .articles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(slug)
            .cloned())
    }

    async fn put_article(&self, article: &Article, put: Put) -> Result<(), storage::Error> {
        let mut articles = self.articles.write().unwrap_or_else(PoisonError::into_inner);
        match put {
            Put::Always => {}
            Put::IfAbsent => {
                if articles.contains_key(article.slug()) {
                    return Err(storage::Error::PreconditionFailed);
                }
            }
            Put::IfUnchanged(seen) => match articles.get(article.slug()) {
                Some(current) if Precondition::from(current) == seen => {}
                _ => return Err(storage::Error::PreconditionFailed),
            },
        }
        articles.insert(article.slug().clone(), article.clone());
        Ok(())
    }

    async fn delete_article(&self, slug: &Slug) -> Result<(), storage::Error> {
        self.articles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(slug);
        Ok(())
    }

    async fn query_created(
        &self,
        filter: Option<&ListFilter>,
        start: Option<Token>,
    ) -> Result<Page<Article>, storage::Error> {
        let (raw, next) = self.window(self.snapshot(), start)?;
        let items = match filter {
            Some(filter) => raw.into_iter().filter(|a| filter.matches(a)).collect(),
            None => raw,
        };
        Ok(Page { items, next })
    }

    async fn query_author(
        &self,
        author: &Username,
        start: Option<Token>,
    ) -> Result<Page<Article>, storage::Error> {
        // The author index partitions on the author attribute: only that author's records are in
        // the partition, already range-ordered; no post-filtering happens here.
        let partition: Vec<Article> = self
            .snapshot()
            .into_iter()
            .filter(|a| a.author() == author)
            .collect();
        let (items, next) = self.window(partition, start)?;
        Ok(Page { items, next })
    }

    async fn scan_tags(&self, start: Option<Token>) -> Result<Page<Vec<Tagname>>, storage::Error> {
        let (raw, next) = self.window(self.snapshot(), start)?;
        Ok(Page {
            items: raw.into_iter().map(|a| a.tag_list().to_vec()).collect(),
            next,
        })
    }
}

#[async_trait]
impl Provider for Store {
    async fn authenticate(
        &self,
        credential: Option<&str>,
    ) -> Result<Option<Identity>, identity::Error> {
        let Some(credential) = credential else {
            return Ok(None);
        };
        Ok(self
            .users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|record| record.token == credential)
            .map(UserRecord::identity))
    }

    async fn profile(
        &self,
        username: &Username,
        viewer: Option<&Identity>,
    ) -> Result<Profile, identity::Error> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        let following = viewer
            .and_then(|viewer| users.get(&viewer.username))
            .map(|viewer| viewer.following.contains(username))
            .unwrap_or(false);
        Ok(match users.get(username) {
            Some(record) => Profile {
                username: record.username.clone(),
                bio: record.bio.clone(),
                image: record.image.clone(),
                following,
            },
            None => Profile {
                following,
                ..Profile::unknown(username)
            },
        })
    }

    async fn following(&self, username: &Username) -> Result<Vec<Username>, identity::Error> {
        Ok(self
            .users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(username)
            .map(|record| record.following.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn article(slug: &str, created_at: i64) -> Article {
        Article::new(
            Slug::new(slug).unwrap(),
            &Username::new("alice").unwrap(),
            slug,
            "d",
            "b",
            None,
            created_at,
        )
    }

    #[tokio::test]
    async fn paging_walks_the_whole_index() {
        let store = Store::with_page_size(2);
        for i in 0..5 {
            store
                .put_article(&article(&format!("a-{}", i), i), Put::Always)
                .await
                .unwrap();
        }
        let mut seen = Vec::new();
        let mut start = None;
        let mut pages = 0;
        loop {
            let page = store.query_created(None, start).await.unwrap();
            seen.extend(page.items.into_iter().map(|a| a.slug().to_string()));
            pages += 1;
            start = page.next;
            if start.is_none() {
                break;
            }
        }
        assert_eq!(pages, 3);
        assert_eq!(seen, vec!["a-4", "a-3", "a-2", "a-1", "a-0"]);
    }

    #[tokio::test]
    async fn conditional_puts() {
        let store = Store::new();
        let a = article("the-post", 1);
        store.put_article(&a, Put::IfAbsent).await.unwrap();
        assert!(matches!(
            store.put_article(&a, Put::IfAbsent).await,
            Err(storage::Error::PreconditionFailed)
        ));

        // A stale precondition is refused...
        let stale = Precondition {
            updated_at: 0,
            favorites_count: 7,
        };
        assert!(matches!(
            store.put_article(&a, Put::IfUnchanged(stale)).await,
            Err(storage::Error::PreconditionFailed)
        ));
        // ...a current one accepted
        store
            .put_article(&a, Put::IfUnchanged(Precondition::from(&a)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn anonymous_and_bogus_credentials_are_not_errors() {
        let store = Store::new();
        assert!(store.authenticate(None).await.unwrap().is_none());
        assert!(store.authenticate(Some("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn profiles_are_viewer_relative() {
        let store = Store::new();
        let alice = Username::new("alice").unwrap();
        let bob = Username::new("bob").unwrap();
        store.add_user(UserRecord {
            username: alice.clone(),
            bio: "bio".to_string(),
            image: String::new(),
            token: "alice-token".to_string(),
            following: vec![],
        });
        store.add_user(UserRecord {
            username: bob.clone(),
            bio: String::new(),
            image: String::new(),
            token: "bob-token".to_string(),
            following: vec![alice.clone()],
        });

        let as_bob = store.authenticate(Some("bob-token")).await.unwrap().unwrap();
        assert!(store.profile(&alice, Some(&as_bob)).await.unwrap().following);
        assert!(!store.profile(&alice, None).await.unwrap().following);
        // Unknown users project to the forgiving default
        let ghost = Username::new("ghost").unwrap();
        assert_eq!(
            store.profile(&ghost, None).await.unwrap(),
            Profile::unknown(&ghost)
        );
    }
}
