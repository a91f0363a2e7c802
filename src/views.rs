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

//! # views
//!
//! API-facing projections of stored records.
//!
//! [ArticleView] is a pure function of (stored record, author profile, viewer)-- it borrows its
//! inputs, clones what it keeps, and never writes back. The stored record a caller holds is
//! exactly what it was before projection; there is no aliasing between the two representations.

use crate::{
    entities::{Article, Slug, Tagname},
    identity::{Identity, Profile},
};

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Render epoch seconds the way the wire format wants them: ISO-8601 with a millisecond suffix
///
/// Stored timestamps are second-granularity, so the milliseconds are always `.000`.
pub fn iso8601(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .unwrap_or_default()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// The API-facing representation of an [Article]
///
/// Same fields as the stored record, with the differences the API promises: timestamps rendered
/// textually, the author expanded into a viewer-relative [Profile], `favorited` resolved against
/// the viewer, and the optional attributes (`tagList`, `favoritesCount`) defaulted rather than
/// omitted. The partition discriminator and the favorited-by set do not appear.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleView {
    pub slug: Slug,
    pub title: String,
    pub description: String,
    pub body: String,
    pub tag_list: Vec<Tagname>,
    pub created_at: String,
    pub updated_at: String,
    pub favorited: bool,
    pub favorites_count: u64,
    pub author: Profile,
}

impl ArticleView {
    /// Project `article` for `viewer`
    ///
    /// The author [Profile] is resolved by the caller (it takes an identity-provider lookup,
    /// which keeps this function synchronous & side-effect-free).
    pub fn project(article: &Article, author: Profile, viewer: Option<&Identity>) -> ArticleView {
        ArticleView {
            slug: article.slug().clone(),
            title: article.title().to_string(),
            description: article.description().to_string(),
            body: article.body().to_string(),
            tag_list: article.tag_list().to_vec(),
            created_at: iso8601(article.created_at()),
            updated_at: iso8601(article.updated_at()),
            favorited: viewer
                .map(|viewer| article.is_favorited_by(&viewer.username))
                .unwrap_or(false),
            favorites_count: article.favorites_count(),
            author,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entities::Username;

    fn fixture() -> Article {
        let alice = Username::new("alice").unwrap();
        let mut article = Article::new(
            Slug::mint("My Post"),
            &alice,
            "My Post",
            "d",
            "b",
            Some(vec![Tagname::new("rust").unwrap()]),
            1_700_000_000,
        );
        article.favorite(&Username::new("bob").unwrap());
        article
    }

    #[test]
    fn timestamps() {
        assert_eq!(iso8601(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(iso8601(1_700_000_000), "2023-11-14T22:13:20.000Z");
    }

    #[test]
    fn viewer_relative_fields() {
        let article = fixture();
        let author = Profile::unknown(article.author());

        let anonymous = ArticleView::project(&article, author.clone(), None);
        assert!(!anonymous.favorited);
        assert_eq!(anonymous.favorites_count, 1);

        let bob = Identity {
            username: Username::new("bob").unwrap(),
            bio: String::new(),
            image: String::new(),
        };
        let viewed = ArticleView::project(&article, author, Some(&bob));
        assert!(viewed.favorited);
    }

    #[test]
    fn projection_does_not_mutate() {
        let article = fixture();
        let before = article.clone();
        let _ = ArticleView::project(&article, Profile::unknown(article.author()), None);
        assert_eq!(article, before);
    }

    #[test]
    fn wire_shape() {
        let article = fixture();
        let view = ArticleView::project(&article, Profile::unknown(article.author()), None);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["tagList"][0], "rust");
        assert_eq!(json["createdAt"], "2023-11-14T22:13:20.000Z");
        assert_eq!(json["author"]["username"], "alice");
        assert_eq!(json["author"]["following"], false);
        // the favorited-by set is never exposed
        assert!(json.get("favoritedBy").is_none());
    }
}
