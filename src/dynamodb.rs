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

//! # dynamodb
//!
//! [storage::Backend] & [identity::Provider] implementations for DynamoDB.
//!
//! The article table is keyed on `slug` and carries two global secondary indexes: `created`
//! (partitioned on the constant discriminator attribute, ranged on `createdAt`) for the global
//! newest-first listing, and `author` (partitioned on `author`, ranged on `createdAt`) for
//! per-author reads. Listing filters compile to `FilterExpression`s-- which DynamoDB applies
//! *after* the index scan, per page, which is why [Backend::query_created] may hand back a
//! near-empty page along with a continuation token. Continuation tokens are the SDK's
//! `LastEvaluatedKey` maps, round-tripped through JSON so callers see only an opaque string.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, Region};
use aws_sdk_dynamodb::{
    config::Credentials,
    error::SdkError,
    operation::put_item::PutItemError,
    types::AttributeValue,
};
use either::Either;
use itertools::Itertools;
use secrecy::SecretString;
use serde::Deserialize;
use serde_dynamo::aws_sdk_dynamodb_1::{from_item, from_items, to_item};
use snafu::{Backtrace, Snafu};
use tap::Pipe;
use tracing::debug;
use url::Url;

use crate::{
    entities::{Article, Slug, Tagname, Username, PARTITION},
    identity::{self, Identity, Profile, Provider, UserRecord},
    storage::{self, Backend, ListFilter, Page, Put, Token},
};

pub const ARTICLES_TABLE: &str = "articles";
pub const USERS_TABLE: &str = "users";
pub const CREATED_INDEX: &str = "created";
pub const AUTHOR_INDEX: &str = "author";
pub const TOKEN_INDEX: &str = "users_by_token";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("No endpoint URLs specified"))]
    NoEndpoints { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

/// Where to find the database: an AWS region, or one or more explicit endpoint URLs (a local
/// DynamoDB or an Alternator cluster)
pub type Location = Either<String, Vec<Url>>;

pub struct Client {
    client: ::aws_sdk_dynamodb::Client,
}

impl Client {
    pub async fn new(
        location: &Location,
        credentials: &Option<(SecretString, SecretString)>,
    ) -> Result<Client> {
        use secrecy::ExposeSecret;
        let creds = credentials.as_ref().map(|(id, secret)| {
            Credentials::new(
                id.expose_secret(),
                secret.expose_secret(),
                None,
                None,
                "conduit",
            )
        });

        let config = match location {
            Either::Left(region) => {
                let region_provider =
                    RegionProviderChain::first_try(Some(Region::new(region.clone())))
                        .or_default_provider()
                        .or_else(Region::new("us-west-2"));
                let mut loader = aws_config::from_env().region(region_provider);
                if let Some(creds) = creds {
                    loader = loader.credentials_provider(creds);
                }
                loader.load().await
            }
            Either::Right(endpoints) => {
                let ep_url = endpoints.first().ok_or(NoEndpointsSnafu {}.build())?;
                let mut loader =
                    aws_config::defaults(BehaviorVersion::latest()).endpoint_url(ep_url.as_str());
                if let Some(creds) = creds {
                    loader = loader.credentials_provider(creds);
                }
                loader.load().await
            }
        };
        Ok(Client {
            client: ::aws_sdk_dynamodb::Client::new(&config),
        })
    }

    /// The raw SDK client-- the schema-management module drives table creation through this
    pub fn raw(&self) -> &::aws_sdk_dynamodb::Client {
        &self.client
    }

    async fn user_record(
        &self,
        username: &Username,
    ) -> std::result::Result<Option<UserRecord>, identity::Error> {
        let gio = self
            .client
            .get_item()
            .table_name(USERS_TABLE)
            .key("username", AttributeValue::S(username.to_string()))
            .send()
            .await
            .map_err(identity::Error::new)?;
        match gio.item {
            Some(item) => from_item::<UserRecord>(item)
                .map(Some)
                .map_err(identity::Error::new),
            None => Ok(None),
        }
    }
}

/// `LastEvaluatedKey` → opaque continuation token
///
/// The key map round-trips through JSON; the attribute types involved (strings & numbers) survive
/// the trip unambiguously.
fn encode_token(
    key: HashMap<String, AttributeValue>,
) -> std::result::Result<Token, storage::Error> {
    let value: serde_json::Value = from_item(key).map_err(storage::Error::new)?;
    serde_json::to_string(&value)
        .map(Token)
        .map_err(storage::Error::new)
}

fn decode_token(
    token: &Token,
) -> std::result::Result<HashMap<String, AttributeValue>, storage::Error> {
    let value: serde_json::Value =
        serde_json::from_str(&token.0).map_err(storage::Error::new)?;
    to_item(value).map_err(storage::Error::new)
}

/// Did a write fail because its condition expression did?
///
/// The SDK expresses that with a `ServiceError` wrapping a `ConditionalCheckFailedException`;
/// everything else is a genuine failure.
fn is_condition_failure(err: &SdkError<PutItemError, aws_sdk_dynamodb::config::http::HttpResponse>) -> bool {
    matches!(err, SdkError::ServiceError(inner) if matches!(inner.err(), PutItemError::ConditionalCheckFailedException(_)))
}

/// The shape of a tag-scan result row: just the one projected attribute, which may be absent
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TagsProjection {
    #[serde(default)]
    tag_list: Option<Vec<Tagname>>,
}

#[async_trait]
impl Backend for Client {
    async fn get_article(&self, slug: &Slug) -> std::result::Result<Option<Article>, storage::Error> {
        let gio = self
            .client
            .get_item()
            .table_name(ARTICLES_TABLE)
            .key("slug", AttributeValue::S(slug.to_string()))
            .send()
            .await
            .map_err(storage::Error::new)?;
        match gio.item {
            Some(item) => from_item::<Article>(item)
                .map(Some)
                .map_err(storage::Error::new),
            None => Ok(None),
        }
    }

    async fn put_article(
        &self,
        article: &Article,
        put: Put,
    ) -> std::result::Result<(), storage::Error> {
        let item = to_item(article).map_err(storage::Error::new)?;
        let mut builder = self
            .client
            .put_item()
            .table_name(ARTICLES_TABLE)
            .set_item(Some(item));
        match put {
            Put::Always => {}
            Put::IfAbsent => {
                builder = builder.condition_expression("attribute_not_exists(slug)");
            }
            Put::IfUnchanged(seen) => {
                builder = builder
                    .condition_expression(
                        "updatedAt = :seen_updated AND favoritesCount = :seen_count",
                    )
                    .expression_attribute_values(
                        ":seen_updated",
                        AttributeValue::N(seen.updated_at.to_string()),
                    )
                    .expression_attribute_values(
                        ":seen_count",
                        AttributeValue::N(seen.favorites_count.to_string()),
                    );
            }
        }
        match builder.send().await {
            Ok(_) => Ok(()),
            Err(err) if is_condition_failure(&err) => Err(storage::Error::PreconditionFailed),
            Err(err) => Err(storage::Error::new(err)),
        }
    }

    async fn delete_article(&self, slug: &Slug) -> std::result::Result<(), storage::Error> {
        self.client
            .delete_item()
            .table_name(ARTICLES_TABLE)
            .key("slug", AttributeValue::S(slug.to_string()))
            .send()
            .await
            .map(|_| ())
            .map_err(storage::Error::new)
    }

    async fn query_created(
        &self,
        filter: Option<&ListFilter>,
        start: Option<Token>,
    ) -> std::result::Result<Page<Article>, storage::Error> {
        let mut builder = self
            .client
            .query()
            .table_name(ARTICLES_TABLE)
            .index_name(CREATED_INDEX)
            .key_condition_expression("dummy = :partition")
            .expression_attribute_values(":partition", AttributeValue::S(PARTITION.to_string()))
            .scan_index_forward(false);
        match filter {
            Some(ListFilter::Tag(tag)) => {
                builder = builder
                    .filter_expression("contains(tagList, :tag)")
                    .expression_attribute_values(":tag", AttributeValue::S(tag.to_string()));
            }
            Some(ListFilter::Author(author)) => {
                builder = builder
                    .filter_expression("author = :author")
                    .expression_attribute_values(":author", AttributeValue::S(author.to_string()));
            }
            Some(ListFilter::FavoritedBy(user)) => {
                builder = builder
                    .filter_expression("contains(favoritedBy, :favorited)")
                    .expression_attribute_values(":favorited", AttributeValue::S(user.to_string()));
            }
            None => {}
        }
        if let Some(token) = start {
            builder = builder.set_exclusive_start_key(Some(decode_token(&token)?));
        }
        let qo = builder.send().await.map_err(storage::Error::new)?;
        debug!(
            "created-index page: {} item(s), more={}",
            qo.count,
            qo.last_evaluated_key.is_some()
        );
        Ok(Page {
            items: from_items::<Article>(qo.items.unwrap_or_default())
                .map_err(storage::Error::new)?,
            next: qo.last_evaluated_key.map(encode_token).transpose()?,
        })
    }

    async fn query_author(
        &self,
        author: &Username,
        start: Option<Token>,
    ) -> std::result::Result<Page<Article>, storage::Error> {
        let mut builder = self
            .client
            .query()
            .table_name(ARTICLES_TABLE)
            .index_name(AUTHOR_INDEX)
            .key_condition_expression("author = :author")
            .expression_attribute_values(":author", AttributeValue::S(author.to_string()))
            .scan_index_forward(false);
        if let Some(token) = start {
            builder = builder.set_exclusive_start_key(Some(decode_token(&token)?));
        }
        let qo = builder.send().await.map_err(storage::Error::new)?;
        Ok(Page {
            items: from_items::<Article>(qo.items.unwrap_or_default())
                .map_err(storage::Error::new)?,
            next: qo.last_evaluated_key.map(encode_token).transpose()?,
        })
    }

    async fn scan_tags(
        &self,
        start: Option<Token>,
    ) -> std::result::Result<Page<Vec<Tagname>>, storage::Error> {
        let mut builder = self
            .client
            .scan()
            .table_name(ARTICLES_TABLE)
            .projection_expression("tagList");
        if let Some(token) = start {
            builder = builder.set_exclusive_start_key(Some(decode_token(&token)?));
        }
        let so = builder.send().await.map_err(storage::Error::new)?;
        Ok(Page {
            items: from_items::<TagsProjection>(so.items.unwrap_or_default())
                .map_err(storage::Error::new)?
                .into_iter()
                .map(|row| row.tag_list.unwrap_or_default())
                .collect(),
            next: so.last_evaluated_key.map(encode_token).transpose()?,
        })
    }
}

#[async_trait]
impl Provider for Client {
    async fn authenticate(
        &self,
        credential: Option<&str>,
    ) -> std::result::Result<Option<Identity>, identity::Error> {
        let Some(credential) = credential else {
            return Ok(None);
        };
        // `token` is a DynamoDB reserved word, hence the attribute-name placeholder
        let qo = self
            .client
            .query()
            .table_name(USERS_TABLE)
            .index_name(TOKEN_INDEX)
            .key_condition_expression("#token = :token")
            .expression_attribute_names("#token", "token")
            .expression_attribute_values(":token", AttributeValue::S(credential.to_string()))
            .send()
            .await
            .map_err(identity::Error::new)?;
        match qo.items {
            Some(items) => from_items::<UserRecord>(items)
                .map_err(identity::Error::new)?
                .into_iter()
                .at_most_one()
                .map_err(identity::Error::new)?
                .map(|record| record.identity())
                .pipe(Ok),
            None => Ok(None),
        }
    }

    async fn profile(
        &self,
        username: &Username,
        viewer: Option<&Identity>,
    ) -> std::result::Result<Profile, identity::Error> {
        let following = match viewer {
            Some(viewer) => self
                .user_record(&viewer.username)
                .await?
                .map(|record| record.following.contains(username))
                .unwrap_or(false),
            None => false,
        };
        Ok(match self.user_record(username).await? {
            Some(record) => Profile {
                username: record.username,
                bio: record.bio,
                image: record.image,
                following,
            },
            None => Profile {
                following,
                ..Profile::unknown(username)
            },
        })
    }

    async fn following(
        &self,
        username: &Username,
    ) -> std::result::Result<Vec<Username>, identity::Error> {
        Ok(self
            .user_record(username)
            .await?
            .map(|record| record.following)
            .unwrap_or_default())
    }
}
