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

//! # repository
//!
//! The article retrieval & mutation algorithms-- the part of conduit that actually has to think.
//!
//! A key-value store gives us point lookups and ordered index pages; the API promises relational
//! niceties: filtering, global newest-first ordering, offset pagination. The gap is bridged here.
//! The central subtlety is filter amplification: the store applies a listing's filter *after* its
//! index scan, so a page may carry arbitrarily few matches (including zero) while the index still
//! has more to give. The accumulation loop in [Articles::list] therefore keeps following
//! continuation tokens while the running *matched* count-- never the raw scanned count-- is short
//! of `offset + limit`.
//!
//! Mutations are read-modify-write: fetch the record, rewrite it in full, put it back with a
//! precondition that it hasn't changed in between. A failed precondition just means we lost a
//! race; re-read & retry, a bounded number of times.

use crate::{
    entities::{Article, ArticleChanges, Slug, Tagname, Username},
    storage::{self, Backend, ListFilter, Precondition, Put, Token},
};

use chrono::Utc;
use futures::future;
use snafu::prelude::*;
use tracing::debug;

use std::{collections::HashSet, sync::Arc};

/// How many times a read-modify-write will re-read after losing a race before giving up. Under
/// any plausible contention this is generous; hitting it suggests something is systematically
/// rewriting the record and the caller deserves an error.
const MAX_WRITE_ATTEMPTS: usize = 4;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to delete article {slug}: {source}"))]
    Delete {
        slug: Slug,
        source: storage::Error,
    },
    #[snafu(display("Failed to fetch article {slug}: {source}"))]
    Fetch {
        slug: Slug,
        source: storage::Error,
    },
    #[snafu(display("Article can only be modified by its author {author}"))]
    NotAuthor { slug: Slug, author: Username },
    #[snafu(display("Article not found: {slug}"))]
    NotFound { slug: Slug },
    #[snafu(display("Failed to query the article index: {source}"))]
    Query { source: storage::Error },
    #[snafu(display("Gave up writing article {slug}: the record kept changing underneath us"))]
    RetriesExhausted { slug: Slug },
    #[snafu(display("Failed to scan the article table: {source}"))]
    Scan { source: storage::Error },
    #[snafu(display("Failed to write article {slug}: {source}"))]
    Write {
        slug: Slug,
        source: storage::Error,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// Newest-first with slug descending as the stable tie-break; stored timestamps are
/// second-granularity, so ties are routine
fn newest_first(a: &Article, b: &Article) -> std::cmp::Ordering {
    b.created_at()
        .cmp(&a.created_at())
        .then_with(|| b.slug().cmp(a.slug()))
}

/// The article repository
///
/// Owns no state beyond the injected store adapter; constructing one is free, and every operation
/// is a pure function of the request & the table.
#[derive(Clone)]
pub struct Articles {
    storage: Arc<dyn Backend + Send + Sync>,
}

impl Articles {
    pub fn new(storage: Arc<dyn Backend + Send + Sync>) -> Articles {
        Articles { storage }
    }

    /// Point lookup; an unknown slug is [Error::NotFound]
    pub async fn get(&self, slug: &Slug) -> Result<Article> {
        self.storage
            .get_article(slug)
            .await
            .context(FetchSnafu { slug: slug.clone() })?
            .context(NotFoundSnafu { slug: slug.clone() })
    }

    /// All of one author's articles, newest first
    ///
    /// Unpaginated by contract: the author index is followed to exhaustion. Callers aggregating
    /// several authors (i.e. the feed) bound their result size themselves, after the merge.
    pub async fn by_author(&self, author: &Username) -> Result<Vec<Article>> {
        let mut articles = Vec::new();
        let mut start: Option<Token> = None;
        loop {
            let page = self
                .storage
                .query_author(author, start)
                .await
                .context(QuerySnafu)?;
            articles.extend(page.items);
            start = page.next;
            if start.is_none() {
                break;
            }
        }
        Ok(articles)
    }

    /// The paginated, filtered, globally-ordered listing
    ///
    /// Queries the creation-time-ordered index newest first, following continuation tokens until
    /// at least `offset + limit` *matched* records have accumulated or the index is exhausted,
    /// then returns the `[offset, offset + limit)` slice. With a selective filter the store may
    /// return many near-empty pages before the target is met; that amplification is inherent to
    /// post-filtering an index scan and is exactly why the loop counts matches rather than pages.
    pub async fn list(
        &self,
        filter: Option<&ListFilter>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Article>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let want = offset.saturating_add(limit);
        let mut matched: Vec<Article> = Vec::new();
        let mut start: Option<Token> = None;
        let mut pages = 0usize;
        loop {
            let page = self
                .storage
                .query_created(filter, start)
                .await
                .context(QuerySnafu)?;
            pages += 1;
            matched.extend(page.items);
            start = page.next;
            if matched.len() >= want || start.is_none() {
                break;
            }
        }
        debug!(
            "listing: {} matches over {} page(s) for want={}",
            matched.len(),
            pages,
            want
        );
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    /// The feed: the union of [Articles::by_author] across `followed`, globally re-sorted newest
    /// first, then sliced `[offset, offset + limit)`
    pub async fn feed(
        &self,
        followed: &[Username],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Article>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut articles: Vec<Article> =
            future::try_join_all(followed.iter().map(|author| self.by_author(author)))
                .await?
                .into_iter()
                .flatten()
                .collect();
        articles.sort_unstable_by(newest_first);
        Ok(articles.into_iter().skip(offset).take(limit).collect())
    }

    /// The deduplicated union of every article's tag list, via a projected full-table scan
    pub async fn tags(&self) -> Result<HashSet<Tagname>> {
        let mut tags = HashSet::new();
        let mut start: Option<Token> = None;
        loop {
            let page = self.storage.scan_tags(start).await.context(ScanSnafu)?;
            for tag_list in page.items {
                tags.extend(tag_list);
            }
            start = page.next;
            if start.is_none() {
                break;
            }
        }
        Ok(tags)
    }

    /// Create an article, minting its slug
    ///
    /// The slug's random suffix makes a collision with an existing record vanishingly unlikely,
    /// but "vanishingly unlikely" isn't "impossible": the write carries a must-not-exist
    /// precondition and re-mints on failure.
    pub async fn create(
        &self,
        author: &Username,
        title: &str,
        description: &str,
        body: &str,
        tag_list: Option<Vec<Tagname>>,
    ) -> Result<Article> {
        let now = Utc::now().timestamp();
        let mut slug = Slug::mint(title);
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let article = Article::new(
                slug.clone(),
                author,
                title,
                description,
                body,
                tag_list.clone(),
                now,
            );
            match self.storage.put_article(&article, Put::IfAbsent).await {
                Ok(()) => return Ok(article),
                Err(storage::Error::PreconditionFailed) => {
                    debug!("slug {} already taken; re-minting", slug);
                    slug = Slug::mint(title);
                }
                Err(source) => {
                    return Err(source).context(WriteSnafu {
                        slug: article.slug().clone(),
                    })
                }
            }
        }
        RetriesExhaustedSnafu { slug }.fail()
    }

    /// Author-only edit of title/description/body; full-record rewrite with `updated_at`
    /// refreshed & an unchanged-since-read precondition
    pub async fn update(
        &self,
        slug: &Slug,
        author: &Username,
        changes: &ArticleChanges,
    ) -> Result<Article> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut article = self.get(slug).await?;
            ensure!(
                article.author() == author,
                NotAuthorSnafu {
                    slug: slug.clone(),
                    author: article.author().clone(),
                }
            );
            let seen = Precondition::from(&article);
            article.apply(changes, Utc::now().timestamp());
            match self
                .storage
                .put_article(&article, Put::IfUnchanged(seen))
                .await
            {
                Ok(()) => return Ok(article),
                Err(storage::Error::PreconditionFailed) => {
                    debug!("article {} changed while updating; retrying", slug);
                }
                Err(source) => return Err(source).context(WriteSnafu { slug: slug.clone() }),
            }
        }
        RetriesExhaustedSnafu { slug: slug.clone() }.fail()
    }

    /// Author-only delete
    pub async fn delete(&self, slug: &Slug, author: &Username) -> Result<()> {
        let article = self.get(slug).await?;
        ensure!(
            article.author() == author,
            NotAuthorSnafu {
                slug: slug.clone(),
                author: article.author().clone(),
            }
        );
        self.storage
            .delete_article(slug)
            .await
            .context(DeleteSnafu { slug: slug.clone() })
    }

    /// Favorite (`on == true`) or unfavorite (`on == false`) an article for `user`
    ///
    /// Redundant toggles are no-ops that skip the write & just return the current record. The
    /// favorites invariant (`favorites_count == |favorited_by|`, attribute absent when empty)
    /// is maintained by [Article] itself; this method supplies the concurrency discipline.
    pub async fn set_favorite(&self, slug: &Slug, user: &Username, on: bool) -> Result<Article> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut article = self.get(slug).await?;
            let seen = Precondition::from(&article);
            let changed = if on {
                article.favorite(user)
            } else {
                article.unfavorite(user)
            };
            if !changed {
                return Ok(article);
            }
            match self
                .storage
                .put_article(&article, Put::IfUnchanged(seen))
                .await
            {
                Ok(()) => return Ok(article),
                Err(storage::Error::PreconditionFailed) => {
                    debug!("article {} changed while toggling favorite; retrying", slug);
                }
                Err(source) => return Err(source).context(WriteSnafu { slug: slug.clone() }),
            }
        }
        RetriesExhaustedSnafu { slug: slug.clone() }.fail()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::memory::Store;

    fn username(s: &str) -> Username {
        Username::new(s).unwrap()
    }

    fn tag(s: &str) -> Tagname {
        Tagname::new(s).unwrap()
    }

    /// Seed an article directly through the store adapter, with a controlled creation time
    async fn seed(
        store: &Store,
        slug: &str,
        author: &str,
        created_at: i64,
        tags: &[&str],
        favorited_by: &[&str],
    ) {
        let mut article = Article::new(
            Slug::new(slug).unwrap(),
            &username(author),
            slug,
            "description",
            "body",
            (!tags.is_empty()).then(|| tags.iter().map(|t| tag(t)).collect()),
            created_at,
        );
        for user in favorited_by {
            article.favorite(&username(user));
        }
        store.put_article(&article, Put::Always).await.unwrap();
    }

    fn slugs(articles: &[Article]) -> Vec<String> {
        articles.iter().map(|a| a.slug().to_string()).collect()
    }

    #[tokio::test]
    async fn get_unknown_slug_is_not_found() {
        let repo = Articles::new(Arc::new(Store::new()));
        let err = repo.get(&Slug::new("no-such").unwrap()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_is_newest_first_and_sliced() {
        let store = Arc::new(Store::with_page_size(3));
        for i in 0..10 {
            seed(&store, &format!("a-{:02}", i), "alice", i, &[], &[]).await;
        }
        let repo = Articles::new(store);
        let page = repo.list(None, 4, 3).await.unwrap();
        // Newest first is a-09, a-08, ...; offset 3 starts at a-06
        assert_eq!(slugs(&page), vec!["a-06", "a-05", "a-04", "a-03"]);
    }

    #[tokio::test]
    async fn list_edge_cases() {
        let store = Arc::new(Store::with_page_size(2));
        for i in 0..3 {
            seed(&store, &format!("a-{}", i), "alice", i, &[], &[]).await;
        }
        let repo = Articles::new(store);
        assert!(repo.list(None, 0, 0).await.unwrap().is_empty());
        assert!(repo.list(None, 20, 100).await.unwrap().is_empty());
        // limit overshooting the table is fine
        assert_eq!(repo.list(None, 20, 0).await.unwrap().len(), 3);
    }

    /// A selective filter must keep the loop fetching until `offset + limit` *matches* have
    /// accumulated-- stopping on the raw scanned count would come up short here, since only
    /// every fifth record matches & pages hold two records
    #[tokio::test]
    async fn selective_filter_does_not_under_fetch() {
        let store = Arc::new(Store::with_page_size(2));
        for i in 0..30 {
            let tags: &[&str] = if i % 5 == 0 { &["rare"] } else { &["common"] };
            seed(&store, &format!("a-{:02}", i), "alice", i, tags, &[]).await;
        }
        let repo = Articles::new(store);
        let matched = repo
            .list(Some(&ListFilter::Tag(tag("rare"))), 4, 1)
            .await
            .unwrap();
        // Matches, newest first: a-25, a-20, a-15, a-10, a-05, a-00; [1..5] of those:
        assert_eq!(slugs(&matched), vec!["a-20", "a-15", "a-10", "a-05"]);
    }

    #[tokio::test]
    async fn filter_modes() {
        let store = Arc::new(Store::with_page_size(2));
        seed(&store, "by-alice", "alice", 3, &["rust"], &["carol"]).await;
        seed(&store, "by-bob-1", "bob", 2, &["rust", "aws"], &[]).await;
        seed(&store, "by-bob-2", "bob", 1, &[], &["carol"]).await;
        let repo = Articles::new(store);

        let by_author = repo
            .list(Some(&ListFilter::Author(username("bob"))), 20, 0)
            .await
            .unwrap();
        assert_eq!(slugs(&by_author), vec!["by-bob-1", "by-bob-2"]);

        let by_tag = repo
            .list(Some(&ListFilter::Tag(tag("rust"))), 20, 0)
            .await
            .unwrap();
        assert_eq!(slugs(&by_tag), vec!["by-alice", "by-bob-1"]);

        let by_favorite = repo
            .list(Some(&ListFilter::FavoritedBy(username("carol"))), 20, 0)
            .await
            .unwrap();
        assert_eq!(slugs(&by_favorite), vec!["by-alice", "by-bob-2"]);
    }

    #[tokio::test]
    async fn feed_merges_follows_globally() {
        let store = Arc::new(Store::with_page_size(2));
        seed(&store, "alice-1", "alice", 1, &[], &[]).await;
        seed(&store, "alice-2", "alice", 4, &[], &[]).await;
        seed(&store, "bob-1", "bob", 2, &[], &[]).await;
        seed(&store, "bob-2", "bob", 3, &[], &[]).await;
        seed(&store, "carol-1", "carol", 5, &[], &[]).await; // not followed
        let repo = Articles::new(store);

        let followed = vec![username("alice"), username("bob")];
        let feed = repo.feed(&followed, 3, 1).await.unwrap();
        // Global order alice-2, bob-2, bob-1, alice-1; offset 1, limit 3:
        assert_eq!(slugs(&feed), vec!["bob-2", "bob-1", "alice-1"]);

        // And the feed is exactly the author-in-set filter, merged & sliced
        let mut manual = Vec::new();
        for author in &followed {
            manual.extend(
                repo.list(Some(&ListFilter::Author(author.clone())), 100, 0)
                    .await
                    .unwrap(),
            );
        }
        manual.sort_unstable_by(newest_first);
        assert_eq!(
            slugs(&feed),
            slugs(&manual.into_iter().skip(1).take(3).collect::<Vec<_>>())
        );
    }

    #[tokio::test]
    async fn equal_timestamps_tie_break_deterministically() {
        let store = Arc::new(Store::with_page_size(2));
        seed(&store, "tie-a", "alice", 7, &[], &[]).await;
        seed(&store, "tie-b", "alice", 7, &[], &[]).await;
        seed(&store, "tie-c", "alice", 7, &[], &[]).await;
        let repo = Articles::new(store);
        // Slug descending within the shared timestamp
        assert_eq!(
            slugs(&repo.list(None, 20, 0).await.unwrap()),
            vec!["tie-c", "tie-b", "tie-a"]
        );
    }

    #[tokio::test]
    async fn tags_deduplicate_across_pages() {
        let store = Arc::new(Store::with_page_size(2));
        seed(&store, "a-1", "alice", 1, &["rust", "aws"], &[]).await;
        seed(&store, "a-2", "alice", 2, &["rust"], &[]).await;
        seed(&store, "a-3", "alice", 3, &[], &[]).await;
        seed(&store, "a-4", "alice", 4, &["serde"], &[]).await;
        seed(&store, "a-5", "alice", 5, &["aws"], &[]).await;
        let repo = Articles::new(store);
        let tags = repo.tags().await.unwrap();
        let expected: HashSet<Tagname> =
            [tag("rust"), tag("aws"), tag("serde")].into_iter().collect();
        assert_eq!(tags, expected);
    }

    #[tokio::test]
    async fn create_round_trips() {
        let store = Arc::new(Store::new());
        let repo = Articles::new(store);
        let alice = username("alice");
        let created = repo
            .create(
                &alice,
                "My Post",
                "d",
                "b",
                Some(vec![tag("rust"), tag("aws")]),
            )
            .await
            .unwrap();
        assert!(created.slug().starts_with("my-post-"));
        assert_eq!(created.favorites_count(), 0);

        let fetched = repo.get(created.slug()).await.unwrap();
        assert_eq!(fetched.title(), "My Post");
        assert_eq!(fetched.description(), "d");
        assert_eq!(fetched.body(), "b");
        assert_eq!(fetched.tag_list(), created.tag_list());

        // Identical titles still mint distinct slugs
        let again = repo.create(&alice, "My Post", "d", "b", None).await.unwrap();
        assert_ne!(again.slug(), created.slug());
    }

    #[tokio::test]
    async fn update_is_author_only_and_leaves_record_unchanged_on_failure() {
        let store = Arc::new(Store::new());
        seed(&store, "the-post", "alice", 1, &[], &[]).await;
        let repo = Articles::new(store);
        let slug = Slug::new("the-post").unwrap();

        let changes = ArticleChanges {
            body: Some("hijacked".to_string()),
            ..Default::default()
        };
        let err = repo
            .update(&slug, &username("mallory"), &changes)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAuthor { .. }));
        assert_eq!(repo.get(&slug).await.unwrap().body(), "body");

        let updated = repo.update(&slug, &username("alice"), &changes).await.unwrap();
        assert_eq!(updated.body(), "hijacked");
        assert!(updated.created_at() <= updated.updated_at());
    }

    #[tokio::test]
    async fn delete_is_author_only() {
        let store = Arc::new(Store::new());
        seed(&store, "the-post", "alice", 1, &[], &[]).await;
        let repo = Articles::new(store);
        let slug = Slug::new("the-post").unwrap();

        let err = repo.delete(&slug, &username("mallory")).await.unwrap_err();
        assert!(matches!(err, Error::NotAuthor { .. }));
        repo.delete(&slug, &username("alice")).await.unwrap();
        assert!(matches!(
            repo.get(&slug).await.unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn favorites_toggle_and_stay_consistent() {
        let store = Arc::new(Store::new());
        seed(&store, "the-post", "alice", 1, &[], &[]).await;
        let repo = Articles::new(store);
        let slug = Slug::new("the-post").unwrap();
        let bob = username("bob");

        let favorited = repo.set_favorite(&slug, &bob, true).await.unwrap();
        assert_eq!(favorited.favorites_count(), 1);
        assert!(favorited.is_favorited_by(&bob));

        // Favoriting twice is idempotent
        let again = repo.set_favorite(&slug, &bob, true).await.unwrap();
        assert_eq!(again.favorites_count(), 1);

        // Unfavoriting when not favorited is a no-op too
        let unfavorited = repo.set_favorite(&slug, &bob, false).await.unwrap();
        assert_eq!(unfavorited.favorites_count(), 0);
        let still = repo.set_favorite(&slug, &username("carol"), false).await.unwrap();
        assert_eq!(still.favorites_count(), 0);
    }
}
