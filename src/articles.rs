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

//! # articles
//!
//! The article API: request handlers & their router.
//!
//! Each handler is thin orchestration: resolve the caller through the identity provider
//! (optional or required depending on the route), validate required fields (independently per
//! field, first missing field wins), invoke the repository, project the result(s) for the
//! viewer, wrap in the response envelope. Handlers are written as an outer `axum` handler
//! delegating to a nested function returning this module's `Result`, so the interesting logic
//! reads straight through with `?` & the envelope/status plumbing happens in one place.
//!
//! Failure categories get distinct status codes: missing/invalid fields & bad filter
//! combinations are 422, a missing login is 401, touching someone else's article is 403, an
//! unknown slug is 404, and a store failure is a 500 whose detail stays in the logs.

use crate::{
    entities::{self, Article, ArticleChanges, Slug, Tagname, Username},
    http::{ArticleBody, ArticlesBody, Conduit, MessageBody, TagsBody},
    identity::{self, Identity, Profile},
    repository,
    storage::ListFilter,
    views::ArticleView,
};

use axum::{
    extract::{Json, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use itertools::Itertools;
use serde::Deserialize;
use snafu::prelude::*;
use tower_http::cors::CorsLayer;
use tracing::{debug, error};

use std::{collections::HashMap, sync::Arc};

const DEFAULT_LIMIT: i64 = 20;

/// article-API module error type
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Article must be specified"))]
    ArticleMissing,
    #[snafu(display("Failed to resolve the request's credentials: {source}"))]
    Authenticate { source: identity::Error },
    #[snafu(display("An Authorization header had a non-textual value: {source}"))]
    BadAuthHeader { source: header::ToStrError },
    #[snafu(display("{source}"))]
    BadTagFilter { source: entities::Error },
    #[snafu(display("{source}"))]
    BadUserFilter { source: entities::Error },
    #[snafu(display("Failed to resolve followed users: {source}"))]
    Follows { source: identity::Error },
    #[snafu(display("Article can only be modified by its author: {author}"))]
    Forbidden { author: Username },
    #[snafu(display("{field} must be specified"))]
    MissingField { field: &'static str },
    #[snafu(display("Multiple Authorization headers were supplied; only one is accepted"))]
    MultipleAuthHeaders,
    #[snafu(display("Use only one of tag, author, or favorited"))]
    MultipleFilters,
    #[snafu(display("At least one field must be specified: [title, description, body]"))]
    NoFieldsToUpdate,
    #[snafu(display("Article not found: {slug}"))]
    NotFound { slug: String },
    #[snafu(display("Must be logged in"))]
    NotLoggedIn,
    #[snafu(display("Failed to resolve a profile: {source}"))]
    Profile { source: identity::Error },
    #[snafu(display("Failed to {op}: {source}"))]
    Repository {
        op: &'static str,
        source: repository::Error,
    },
}

impl Error {
    pub fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ////////////////////////////////////////////////////////////////////////////////////////
            // Broken requests-- tell the caller how to fix it
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::ArticleMissing
            | Error::BadAuthHeader { .. }
            | Error::BadTagFilter { .. }
            | Error::BadUserFilter { .. }
            | Error::MissingField { .. }
            | Error::MultipleAuthHeaders
            | Error::MultipleFilters
            | Error::NoFieldsToUpdate => (StatusCode::UNPROCESSABLE_ENTITY, format!("{}", self)),
            ////////////////////////////////////////////////////////////////////////////////////////
            // Authentication & authorization failures
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::NotLoggedIn => (StatusCode::UNAUTHORIZED, format!("{}", self)),
            Error::Forbidden { .. } => (StatusCode::FORBIDDEN, format!("{}", self)),
            ////////////////////////////////////////////////////////////////////////////////////////
            // No such article
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::NotFound { .. } => (StatusCode::NOT_FOUND, format!("{}", self)),
            ////////////////////////////////////////////////////////////////////////////////////////
            // Internal failure-- own up to it, but keep the detail in the logs
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::Authenticate { .. }
            | Error::Follows { .. }
            | Error::Profile { .. }
            | Error::Repository { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        }
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            error!("{:#?}", self);
        } else {
            debug!("{:#?}", self);
        }
        (status, Json(MessageBody { message })).into_response()
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Map a repository failure into this module's taxonomy: the caller-addressable kinds keep their
/// identity; everything else is an internal failure tagged with the operation that hit it
fn repo_err(op: &'static str) -> impl FnOnce(repository::Error) -> Error {
    move |err| match err {
        repository::Error::NotFound { slug } => Error::NotFound {
            slug: slug.to_string(),
        },
        repository::Error::NotAuthor { author, .. } => Error::Forbidden { author },
        source => Error::Repository { op, source },
    }
}

fn respond<T: serde::Serialize>(result: Result<T>) -> axum::response::Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         authentication                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Pull the bearer credential, if any, out of the Authorization header
///
/// The RealWorld convention is `Authorization: Token <credential>`; plain `Bearer` is accepted
/// too. A request carrying more than one Authorization header is rejected outright.
fn bearer(headers: &HeaderMap) -> Result<Option<&str>> {
    match headers
        .get_all(header::AUTHORIZATION)
        .into_iter()
        .at_most_one()
        .map_err(|_| Error::MultipleAuthHeaders)?
    {
        None => Ok(None),
        Some(value) => {
            let text = value.to_str().context(BadAuthHeaderSnafu)?;
            Ok(Some(
                text.strip_prefix("Token ")
                    .or_else(|| text.strip_prefix("Bearer "))
                    .unwrap_or(text)
                    .trim(),
            ))
        }
    }
}

/// Resolve the caller, if any; anonymous requests resolve to `None`
async fn user_for_request(state: &Conduit, headers: &HeaderMap) -> Result<Option<Identity>> {
    state
        .identity
        .authenticate(bearer(headers)?)
        .await
        .context(AuthenticateSnafu)
}

/// Resolve the caller or fail with 401
async fn require_user(state: &Conduit, headers: &HeaderMap) -> Result<Identity> {
    user_for_request(state, headers)
        .await?
        .context(NotLoggedInSnafu)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           projection                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Project a batch of articles for `viewer`, resolving each distinct author's profile once
async fn project(
    state: &Conduit,
    articles: &[Article],
    viewer: Option<&Identity>,
) -> Result<Vec<ArticleView>> {
    let mut profiles: HashMap<Username, Profile> = HashMap::new();
    let mut views = Vec::with_capacity(articles.len());
    for article in articles {
        let profile = match profiles.get(article.author()) {
            Some(profile) => profile.clone(),
            None => {
                let profile = state
                    .identity
                    .profile(article.author(), viewer)
                    .await
                    .context(ProfileSnafu)?;
                profiles.insert(article.author().clone(), profile.clone());
                profile
            }
        };
        views.push(ArticleView::project(article, profile, viewer));
    }
    Ok(views)
}

async fn project_one(
    state: &Conduit,
    article: &Article,
    viewer: Option<&Identity>,
) -> Result<ArticleBody> {
    let author = state
        .identity
        .profile(article.author(), viewer)
        .await
        .context(ProfileSnafu)?;
    Ok(ArticleBody {
        article: ArticleView::project(article, author, viewer),
    })
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        `POST /articles`                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize)]
struct CreateReq {
    article: Option<CreateArticle>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateArticle {
    title: Option<String>,
    description: Option<String>,
    body: Option<String>,
    tag_list: Option<Vec<Tagname>>,
}

async fn create_article(
    State(state): State<Arc<Conduit>>,
    headers: HeaderMap,
    Json(req): Json<CreateReq>,
) -> axum::response::Response {
    async fn create_article1(
        state: &Conduit,
        headers: &HeaderMap,
        req: CreateReq,
    ) -> Result<ArticleBody> {
        let viewer = require_user(state, headers).await?;
        let article_req = req.article.context(ArticleMissingSnafu)?;
        // Missing-field checks are independent; the first missing field wins & is reported
        let title = article_req
            .title
            .context(MissingFieldSnafu { field: "title" })?;
        let description = article_req.description.context(MissingFieldSnafu {
            field: "description",
        })?;
        let body = article_req
            .body
            .context(MissingFieldSnafu { field: "body" })?;
        let article = state
            .articles
            .create(
                &viewer.username,
                &title,
                &description,
                &body,
                article_req.tag_list,
            )
            .await
            .map_err(repo_err("create article"))?;
        project_one(state, &article, Some(&viewer)).await
    }

    respond(create_article1(&state, &headers, req).await)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    `GET /articles/{slug}`                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

async fn get_article(
    State(state): State<Arc<Conduit>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> axum::response::Response {
    async fn get_article1(state: &Conduit, headers: &HeaderMap, slug: String) -> Result<ArticleBody> {
        // A slug that doesn't even parse can't name an article
        let slug = Slug::try_from(slug.clone()).map_err(|_| Error::NotFound { slug })?;
        let viewer = user_for_request(state, headers).await?;
        let article = state
            .articles
            .get(&slug)
            .await
            .map_err(repo_err("fetch article"))?;
        project_one(state, &article, viewer.as_ref()).await
    }

    respond(get_article1(&state, &headers, slug).await)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    `PUT /articles/{slug}`                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize)]
struct UpdateReq {
    article: Option<UpdateArticle>,
}

#[derive(Clone, Debug, Deserialize)]
struct UpdateArticle {
    title: Option<String>,
    description: Option<String>,
    body: Option<String>,
}

async fn update_article(
    State(state): State<Arc<Conduit>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateReq>,
) -> axum::response::Response {
    async fn update_article1(
        state: &Conduit,
        headers: &HeaderMap,
        slug: String,
        req: UpdateReq,
    ) -> Result<ArticleBody> {
        let article_req = req.article.context(ArticleMissingSnafu)?;
        let changes = ArticleChanges {
            title: article_req.title,
            description: article_req.description,
            body: article_req.body,
        };
        ensure!(!changes.is_empty(), NoFieldsToUpdateSnafu);
        let viewer = require_user(state, headers).await?;
        let slug = Slug::try_from(slug.clone()).map_err(|_| Error::NotFound { slug })?;
        let article = state
            .articles
            .update(&slug, &viewer.username, &changes)
            .await
            .map_err(repo_err("update article"))?;
        project_one(state, &article, Some(&viewer)).await
    }

    respond(update_article1(&state, &headers, slug, req).await)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                   `DELETE /articles/{slug}`                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, serde::Serialize)]
struct Empty {}

async fn delete_article(
    State(state): State<Arc<Conduit>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> axum::response::Response {
    async fn delete_article1(state: &Conduit, headers: &HeaderMap, slug: String) -> Result<Empty> {
        let viewer = require_user(state, headers).await?;
        let slug = Slug::try_from(slug.clone()).map_err(|_| Error::NotFound { slug })?;
        state
            .articles
            .delete(&slug, &viewer.username)
            .await
            .map_err(repo_err("delete article"))?;
        Ok(Empty {})
    }

    respond(delete_article1(&state, &headers, slug).await)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                              `POST|DELETE /articles/{slug}/favorite`                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

async fn set_favorite1(
    state: &Conduit,
    headers: &HeaderMap,
    slug: String,
    on: bool,
) -> Result<ArticleBody> {
    let viewer = require_user(state, headers).await?;
    let slug = Slug::try_from(slug.clone()).map_err(|_| Error::NotFound { slug })?;
    let article = state
        .articles
        .set_favorite(&slug, &viewer.username, on)
        .await
        .map_err(repo_err("toggle favorite"))?;
    project_one(state, &article, Some(&viewer)).await
}

async fn favorite_article(
    State(state): State<Arc<Conduit>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> axum::response::Response {
    respond(set_favorite1(&state, &headers, slug, true).await)
}

async fn unfavorite_article(
    State(state): State<Arc<Conduit>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> axum::response::Response {
    respond(set_favorite1(&state, &headers, slug, false).await)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        `GET /articles`                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize)]
struct ListReq {
    // These quietly fall back to their defaults when they don't parse, so they're taken as raw
    // text rather than letting the extractor 400 the request
    limit: Option<String>,
    offset: Option<String>,
    tag: Option<String>,
    author: Option<String>,
    favorited: Option<String>,
}

/// `limit`/`offset` parsing: absent or non-numeric falls back to `default`; negative clamps to
/// zero (a non-positive limit yields an empty listing downstream)
fn numeric(text: &Option<String>, default: i64) -> usize {
    text.as_ref()
        .and_then(|text| text.parse::<i64>().ok())
        .unwrap_or(default)
        .max(0) as usize
}

/// At most one of `tag`/`author`/`favorited` may be active per call
fn parse_filter(req: &ListReq) -> Result<Option<ListFilter>> {
    let named = [&req.tag, &req.author, &req.favorited]
        .iter()
        .filter(|param| param.is_some())
        .count();
    ensure!(named <= 1, MultipleFiltersSnafu);
    if let Some(tag) = &req.tag {
        return Ok(Some(ListFilter::Tag(
            Tagname::new(tag).context(BadTagFilterSnafu)?,
        )));
    }
    if let Some(author) = &req.author {
        return Ok(Some(ListFilter::Author(
            Username::new(author).context(BadUserFilterSnafu)?,
        )));
    }
    if let Some(favorited) = &req.favorited {
        return Ok(Some(ListFilter::FavoritedBy(
            Username::new(favorited).context(BadUserFilterSnafu)?,
        )));
    }
    Ok(None)
}

async fn list_articles(
    State(state): State<Arc<Conduit>>,
    Query(req): Query<ListReq>,
    headers: HeaderMap,
) -> axum::response::Response {
    async fn list_articles1(
        state: &Conduit,
        headers: &HeaderMap,
        req: ListReq,
    ) -> Result<ArticlesBody> {
        let viewer = user_for_request(state, headers).await?;
        let filter = parse_filter(&req)?;
        let articles = state
            .articles
            .list(
                filter.as_ref(),
                numeric(&req.limit, DEFAULT_LIMIT),
                numeric(&req.offset, 0),
            )
            .await
            .map_err(repo_err("list articles"))?;
        Ok(ArticlesBody {
            articles: project(state, &articles, viewer.as_ref()).await?,
        })
    }

    respond(list_articles1(&state, &headers, req).await)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      `GET /articles/feed`                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize)]
struct FeedReq {
    limit: Option<String>,
    offset: Option<String>,
}

async fn get_feed(
    State(state): State<Arc<Conduit>>,
    Query(req): Query<FeedReq>,
    headers: HeaderMap,
) -> axum::response::Response {
    async fn get_feed1(state: &Conduit, headers: &HeaderMap, req: FeedReq) -> Result<ArticlesBody> {
        let viewer = require_user(state, headers).await?;
        let followed = state
            .identity
            .following(&viewer.username)
            .await
            .context(FollowsSnafu)?;
        let articles = state
            .articles
            .feed(
                &followed,
                numeric(&req.limit, DEFAULT_LIMIT),
                numeric(&req.offset, 0),
            )
            .await
            .map_err(repo_err("fetch feed"))?;
        Ok(ArticlesBody {
            articles: project(state, &articles, Some(&viewer)).await?,
        })
    }

    respond(get_feed1(&state, &headers, req).await)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          `GET /tags`                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

async fn get_tags(State(state): State<Arc<Conduit>>) -> axum::response::Response {
    async fn get_tags1(state: &Conduit) -> Result<TagsBody> {
        let mut tags: Vec<String> = state
            .articles
            .tags()
            .await
            .map_err(repo_err("aggregate tags"))?
            .into_iter()
            .map(|tag| tag.to_string())
            .collect();
        // The contract is set equality; sorting just makes responses stable
        tags.sort_unstable();
        Ok(TagsBody { tags })
    }

    respond(get_tags1(&state).await)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Public API                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Return a Router for the article API
///
/// The returned router can be composed with other routers.
pub fn make_router(state: Arc<Conduit>) -> Router {
    Router::new()
        .route("/articles", get(list_articles).post(create_article))
        .route("/articles/feed", get(get_feed))
        .route(
            "/articles/{slug}",
            get(get_article).put(update_article).delete(delete_article),
        )
        .route(
            "/articles/{slug}/favorite",
            post(favorite_article).delete(unfavorite_article),
        )
        .route("/tags", get(get_tags))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{identity::UserRecord, memory::Store, repository::Articles};

    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    /// A router over an in-memory store seeded with alice & bob; bob follows alice
    fn fixture() -> Router {
        let store = Arc::new(Store::with_page_size(2));
        let alice = Username::new("alice").unwrap();
        store.add_user(UserRecord {
            username: alice.clone(),
            bio: "cryptographer".to_string(),
            image: String::new(),
            token: "alice-token".to_string(),
            following: vec![],
        });
        store.add_user(UserRecord {
            username: Username::new("bob").unwrap(),
            bio: String::new(),
            image: String::new(),
            token: "bob-token".to_string(),
            following: vec![alice],
        });
        make_router(Arc::new(Conduit {
            articles: Articles::new(store.clone()),
            identity: store,
        }))
    }

    async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Token {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn article_body(title: &str) -> serde_json::Value {
        serde_json::json!({
            "article": {"title": title, "description": "d", "body": "b", "tagList": ["rust"]}
        })
    }

    #[tokio::test]
    async fn create_requires_login() {
        let router = fixture();
        let (status, json) = call(&router, "POST", "/articles", None, Some(article_body("t"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["message"], "Must be logged in");
    }

    #[tokio::test]
    async fn create_reports_first_missing_field() {
        let router = fixture();
        let (status, json) = call(
            &router,
            "POST",
            "/articles",
            Some("alice-token"),
            Some(serde_json::json!({"article": {"description": "d"}})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["message"], "title must be specified");

        let (status, json) = call(
            &router,
            "POST",
            "/articles",
            Some("alice-token"),
            Some(serde_json::json!({"nope": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["message"], "Article must be specified");
    }

    #[tokio::test]
    async fn create_and_fetch() {
        let router = fixture();
        let (status, json) = call(
            &router,
            "POST",
            "/articles",
            Some("alice-token"),
            Some(article_body("My Post")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let slug = json["article"]["slug"].as_str().unwrap().to_string();
        assert!(slug.starts_with("my-post-"));
        assert_eq!(json["article"]["author"]["username"], "alice");
        assert_eq!(json["article"]["favorited"], false);
        assert_eq!(json["article"]["favoritesCount"], 0);

        let (status, json) = call(&router, "GET", &format!("/articles/{}", slug), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["article"]["title"], "My Post");
        assert_eq!(json["article"]["tagList"][0], "rust");
        // bio comes along with the expanded author profile
        assert_eq!(json["article"]["author"]["bio"], "cryptographer");
    }

    #[tokio::test]
    async fn unknown_slug_is_404() {
        let router = fixture();
        let (status, json) = call(&router, "GET", "/articles/no-such-thing", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["message"], "Article not found: no-such-thing");
    }

    #[tokio::test]
    async fn update_is_author_only() {
        let router = fixture();
        let (_, json) = call(
            &router,
            "POST",
            "/articles",
            Some("alice-token"),
            Some(article_body("My Post")),
        )
        .await;
        let slug = json["article"]["slug"].as_str().unwrap().to_string();

        let mutation = serde_json::json!({"article": {"body": "b2"}});
        let (status, json) = call(
            &router,
            "PUT",
            &format!("/articles/{}", slug),
            Some("bob-token"),
            Some(mutation.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(
            json["message"],
            "Article can only be modified by its author: alice"
        );

        let (status, json) = call(
            &router,
            "PUT",
            &format!("/articles/{}", slug),
            Some("alice-token"),
            Some(mutation),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["article"]["body"], "b2");

        // An empty mutation is a validation error, reported before anything else
        let (status, json) = call(
            &router,
            "PUT",
            &format!("/articles/{}", slug),
            None,
            Some(serde_json::json!({"article": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            json["message"],
            "At least one field must be specified: [title, description, body]"
        );
    }

    #[tokio::test]
    async fn favorites_are_viewer_relative_and_idempotent() {
        let router = fixture();
        let (_, json) = call(
            &router,
            "POST",
            "/articles",
            Some("alice-token"),
            Some(article_body("My Post")),
        )
        .await;
        let slug = json["article"]["slug"].as_str().unwrap().to_string();
        let uri = format!("/articles/{}/favorite", slug);

        let (status, json) = call(&router, "POST", &uri, Some("bob-token"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["article"]["favoritesCount"], 1);
        assert_eq!(json["article"]["favorited"], true);

        // Favoriting twice is idempotent
        let (_, json) = call(&router, "POST", &uri, Some("bob-token"), None).await;
        assert_eq!(json["article"]["favoritesCount"], 1);

        // From alice's point of view the count holds but the flag doesn't
        let (_, json) = call(
            &router,
            "GET",
            &format!("/articles/{}", slug),
            Some("alice-token"),
            None,
        )
        .await;
        assert_eq!(json["article"]["favoritesCount"], 1);
        assert_eq!(json["article"]["favorited"], false);

        let (_, json) = call(&router, "DELETE", &uri, Some("bob-token"), None).await;
        assert_eq!(json["article"]["favoritesCount"], 0);
    }

    #[tokio::test]
    async fn listing_filters_are_mutually_exclusive() {
        let router = fixture();
        let (status, json) = call(
            &router,
            "GET",
            "/articles?tag=rust&author=alice",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["message"], "Use only one of tag, author, or favorited");
    }

    #[tokio::test]
    async fn listing_paginates_newest_first() {
        let router = fixture();
        for i in 0..5 {
            call(
                &router,
                "POST",
                "/articles",
                Some("alice-token"),
                Some(article_body(&format!("post {}", i))),
            )
            .await;
        }
        let (status, json) = call(&router, "GET", "/articles?limit=2&offset=1", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let articles = json["articles"].as_array().unwrap();
        assert_eq!(articles.len(), 2);
        // All five share one creation second (at most two); order within it is by slug,
        // descending-- just assert the invariant the API promises:
        let all = call(&router, "GET", "/articles", None, None).await.1;
        let all = all["articles"].as_array().unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(&all[1..3], articles.as_slice());

        // Non-numeric limit/offset fall back to the defaults
        let (status, json) = call(&router, "GET", "/articles?limit=bogus", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["articles"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn feed_requires_login_and_follows() {
        let router = fixture();
        call(
            &router,
            "POST",
            "/articles",
            Some("alice-token"),
            Some(article_body("from alice")),
        )
        .await;
        call(
            &router,
            "POST",
            "/articles",
            Some("bob-token"),
            Some(article_body("from bob")),
        )
        .await;

        let (status, _) = call(&router, "GET", "/articles/feed", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // bob follows alice: his feed is her article, & the author profile reports the follow
        let (status, json) = call(&router, "GET", "/articles/feed", Some("bob-token"), None).await;
        assert_eq!(status, StatusCode::OK);
        let articles = json["articles"].as_array().unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0]["title"], "from alice");
        assert_eq!(articles[0]["author"]["following"], true);

        // alice follows no one
        let (_, json) = call(&router, "GET", "/articles/feed", Some("alice-token"), None).await;
        assert!(json["articles"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tags_aggregate() {
        let router = fixture();
        call(
            &router,
            "POST",
            "/articles",
            Some("alice-token"),
            Some(serde_json::json!({
                "article": {"title": "a", "description": "d", "body": "b", "tagList": ["rust", "aws"]}
            })),
        )
        .await;
        call(
            &router,
            "POST",
            "/articles",
            Some("bob-token"),
            Some(serde_json::json!({
                "article": {"title": "b", "description": "d", "body": "b", "tagList": ["rust"]}
            })),
        )
        .await;
        let (status, json) = call(&router, "GET", "/tags", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["tags"], serde_json::json!(["aws", "rust"]));
    }

    #[tokio::test]
    async fn delete_removes_the_record() {
        let router = fixture();
        let (_, json) = call(
            &router,
            "POST",
            "/articles",
            Some("alice-token"),
            Some(article_body("doomed")),
        )
        .await;
        let slug = json["article"]["slug"].as_str().unwrap().to_string();
        let uri = format!("/articles/{}", slug);

        let (status, _) = call(&router, "DELETE", &uri, Some("bob-token"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(&router, "DELETE", &uri, Some("alice-token"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&router, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
